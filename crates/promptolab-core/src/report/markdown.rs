//! Self-contained Markdown rendering of an [`EvaluationReport`].

use crate::model::{Similarity, SimilarityMethod};
use crate::report::EvaluationReport;
use std::fmt::Write as _;

/// Make `text` safe inside a table cell: pipes escaped, newlines as `<br>`.
pub fn escape_cell(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '|' => out.push_str("\\|"),
            '\\' => out.push_str("\\\\"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => {}
            '\n' => out.push_str("<br>"),
            _ => out.push(c),
        }
    }
    out
}

fn similarity_cell(s: &Similarity) -> String {
    match s {
        Similarity::Score { value, method } => {
            let method = match method {
                SimilarityMethod::Embedding => "embedding",
                SimilarityMethod::Lexical => "lexical",
            };
            format!("{value:.2} ({method})")
        }
        Similarity::NotApplicable => "n/a".to_string(),
    }
}

fn opt_cell(v: Option<&str>) -> String {
    v.map(escape_cell).unwrap_or_else(|| "_none_".to_string())
}

pub fn render_markdown(report: &EvaluationReport) -> String {
    let m = &report.metadata;
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "# Evaluation report: {}", escape_cell(&m.test_set));
    let _ = writeln!(out);
    let _ = writeln!(out, "| Field | Value |");
    let _ = writeln!(out, "|---|---|");
    let _ = writeln!(out, "| Run | `{}` |", m.run_id);
    let _ = writeln!(out, "| Model | {} |", escape_cell(&m.model));
    if let Some(t) = m.config.temperature {
        let _ = writeln!(out, "| Temperature | {t} |");
    }
    if let Some(t) = m.config.max_tokens {
        let _ = writeln!(out, "| Max tokens | {t} |");
    }
    if let Some(p) = m.config.top_p {
        let _ = writeln!(out, "| Top-p | {p} |");
    }
    let _ = writeln!(
        out,
        "| Baseline system prompt | {} |",
        opt_cell(m.baseline_system_prompt.as_deref())
    );
    let _ = writeln!(
        out,
        "| System prompt | {} |",
        opt_cell(m.system_prompt.as_deref())
    );
    let _ = writeln!(out, "| Fingerprint | `{}` |", m.config_fingerprint);
    let _ = writeln!(out, "| Started | {} |", m.started_at.to_rfc3339());
    let _ = writeln!(out, "| Finished | {} |", m.finished_at.to_rfc3339());
    let _ = writeln!(out);

    let s = &report.summary;
    let st = &report.stats;
    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} cases: {} completed, {} failed, {} cancelled, {} not dispatched.",
        s.total_cases, s.succeeded, s.failed, s.cancelled, s.not_dispatched
    );
    let _ = writeln!(
        out,
        "Grades: {} passed, {} failed, {} ungraded.",
        st.passed, st.failed, st.ungraded
    );
    if let Some(mean) = st.mean_similarity {
        let _ = writeln!(out, "Mean similarity: {mean:.3}.");
    }
    if st.total_tokens > 0 {
        let _ = writeln!(out, "Tokens used: {}.", st.total_tokens);
    }
    if s.partial {
        let _ = writeln!(out);
        let _ = writeln!(out, "**Partial run.**");
    }
    if let Some(h) = &s.halted {
        let _ = writeln!(out, "Dispatch halted: {}", escape_cell(&h.to_string()));
    }
    for u in &s.unattributed {
        let _ = writeln!(out, "- {}", escape_cell(&u.to_string()));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "| Grade | Count |");
    let _ = writeln!(out, "|---|---|");
    for (grade, count) in &st.grade_distribution {
        let _ = writeln!(out, "| {grade} | {count} |");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Results");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "| Case | Status | Input | Baseline | Current | Similarity | Grade | Feedback | Key changes |"
    );
    let _ = writeln!(out, "|---|---|---|---|---|---|---|---|---|");
    for row in &report.rows {
        let feedback = match &row.error {
            Some(e) if row.feedback.is_empty() => e.to_string(),
            _ => row.feedback.clone(),
        };
        let _ = writeln!(
            out,
            "| `{}` | {} | {} | {} | {} | {} | {} | {} | {} |",
            row.case_id,
            row.status.as_str(),
            escape_cell(&row.input),
            opt_cell(row.baseline.as_deref()),
            opt_cell(row.current.as_deref()),
            similarity_cell(&row.similarity),
            row.grade,
            escape_cell(&feedback),
            escape_cell(&row.key_changes.join("\n")),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{fixtures, ReportBuilder};

    #[test]
    fn escapes_table_breaking_characters() {
        assert_eq!(escape_cell("a|b\nc"), "a\\|b<br>c");
        assert_eq!(escape_cell("<script>"), "&lt;script&gt;");
    }

    #[test]
    fn renders_metadata_and_one_row_per_case() {
        let md = render_markdown(&ReportBuilder::build(&fixtures::run()));
        assert!(md.starts_with("# Evaluation report: support\n"));
        assert!(md.contains("| Baseline system prompt | old prompt |"));
        assert!(md.contains("| System prompt | new prompt |"));
        assert!(md.contains("base \\| line"));
        assert!(md.contains("| `c3` | completed |"));
        assert!(md.contains("| 0.50 (lexical) | D |"));
        assert!(md.contains("[c4] provider_connection: reset"));
        assert!(md.contains("Tokens used: 45."));
        assert!(!md.contains("| ungraded | 1 |"));
        let rows = md.lines().filter(|l| l.starts_with("| `c")).count();
        assert_eq!(rows, 4);
    }
}
