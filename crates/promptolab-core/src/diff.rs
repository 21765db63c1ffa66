//! Sentence-level change list between a baseline and a current output.

use unicode_segmentation::UnicodeSegmentation;

fn sentences(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Describe how `current` differs from `baseline`, one entry per change.
/// Positions are 1-based. Identical texts yield no entries.
pub fn key_changes(baseline: &str, current: &str) -> Vec<String> {
    let base = sentences(baseline);
    let cur = sentences(current);
    let mut changes = Vec::new();

    if base.len() != cur.len() {
        changes.push(format!(
            "Sentence count changed from {} to {}",
            base.len(),
            cur.len()
        ));
    }

    for i in 0..base.len().max(cur.len()) {
        match (base.get(i), cur.get(i)) {
            (Some(b), Some(c)) if b != c => changes.push(format!("Sentence {} modified", i + 1)),
            (Some(_), None) => changes.push(format!("Sentence {} removed", i + 1)),
            (None, Some(_)) => changes.push(format!("New sentence added at position {}", i + 1)),
            _ => {}
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_no_changes() {
        assert!(key_changes("One. Two.", "One. Two.").is_empty());
    }

    #[test]
    fn reports_modified_and_added() {
        let changes = key_changes("The sky is blue. Grass is green.", "The sky is grey. Grass is green. Birds sing.");
        assert_eq!(
            changes,
            vec![
                "Sentence count changed from 2 to 3",
                "Sentence 1 modified",
                "New sentence added at position 3",
            ]
        );
    }

    #[test]
    fn reports_removed() {
        let changes = key_changes("A first. A second.", "A first.");
        assert_eq!(
            changes,
            vec!["Sentence count changed from 2 to 1", "Sentence 2 removed"]
        );
    }
}
