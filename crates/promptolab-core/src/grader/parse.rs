//! Grade extraction from free-form grader replies.
//!
//! Order: first JSON object carrying a `grade`, then `Grade: X` lines, then a
//! bare one-letter reply. Conflicting letters are treated as unparseable.

use crate::errors::{EngineError, EngineResult};
use crate::model::Grade;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedGrade {
    pub grade: Grade,
    pub feedback: String,
}

lazy_static! {
    static ref GRADE_LINE: Regex = Regex::new(
        r#"(?i)(?:^|[^a-z])grade[\s*_]*[:=][\s*_"'`]*([a-f])[+-]?(?:[\s*_"'`.,;:)-]+(.*))?$"#
    )
    .unwrap();
    static ref FEEDBACK_LABEL: Regex =
        Regex::new(r"(?i)^[\s*_#>-]*(?:feedback|rationale|reason)[\s*_]*:[\s*_]*").unwrap();
}

pub fn parse_grade(text: &str) -> EngineResult<ParsedGrade> {
    let text = text.trim();
    if text.is_empty() {
        return Err(EngineError::grading_parse("empty grader response", text));
    }
    if let Some(parsed) = from_json(text)? {
        return Ok(parsed);
    }
    if let Some(parsed) = from_grade_lines(text)? {
        return Ok(parsed);
    }
    if let Some(grade) = bare_letter(text) {
        return Ok(ParsedGrade {
            grade,
            feedback: String::new(),
        });
    }
    Err(EngineError::grading_parse("no grade found in response", text))
}

fn letter(s: &str) -> Option<Grade> {
    let s = s.trim();
    let mut chars = s.chars();
    let c = chars.next()?;
    match chars.next() {
        None | Some('+') | Some('-') if chars.next().is_none() => Grade::from_letter(c),
        _ => None,
    }
}

fn from_json(text: &str) -> EngineResult<Option<ParsedGrade>> {
    for (idx, _) in text.match_indices('{') {
        let Some(Ok(Value::Object(obj))) = serde_json::Deserializer::from_str(&text[idx..])
            .into_iter::<Value>()
            .next()
        else {
            continue;
        };
        let Some(raw_grade) = obj.get("grade") else {
            continue;
        };
        let grade = raw_grade.as_str().and_then(letter).ok_or_else(|| {
            EngineError::grading_parse(format!("invalid grade value {raw_grade}"), text)
        })?;
        let feedback = ["feedback", "rationale", "reason"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .unwrap_or_default()
            .trim()
            .to_string();
        return Ok(Some(ParsedGrade { grade, feedback }));
    }
    Ok(None)
}

fn from_grade_lines(text: &str) -> EngineResult<Option<ParsedGrade>> {
    let mut grade: Option<Grade> = None;
    let mut feedback: Vec<String> = Vec::new();

    for line in text.lines() {
        let caps = GRADE_LINE
            .captures(line)
            .filter(|caps| !is_article(line, caps));
        if let Some(caps) = caps {
            let found = caps
                .get(1)
                .and_then(|m| m.as_str().chars().next())
                .and_then(Grade::from_letter);
            match (grade, found) {
                (Some(g), Some(f)) if g != f => {
                    return Err(EngineError::grading_parse(
                        format!("conflicting grades {g} and {f}"),
                        text,
                    ));
                }
                (None, Some(f)) => grade = Some(f),
                _ => {}
            }
            if let Some(rest) = caps.get(2) {
                let rest = rest
                    .as_str()
                    .trim_matches(|c: char| c.is_whitespace() || c == '*' || c == '_');
                if !rest.is_empty() {
                    feedback.push(rest.to_string());
                }
            }
        } else {
            let stripped = FEEDBACK_LABEL.replace(line, "");
            let stripped = stripped.trim();
            if !stripped.is_empty() {
                feedback.push(stripped.to_string());
            }
        }
    }

    Ok(grade.map(|grade| ParsedGrade {
        grade,
        feedback: feedback.join("\n"),
    }))
}

/// `grade: a mixed result` uses "a" as an article. A lowercase letter followed
/// by a space and another word is prose, not a grade.
fn is_article(line: &str, caps: &regex::Captures<'_>) -> bool {
    let Some(m) = caps.get(1) else {
        return false;
    };
    if !m.as_str().chars().all(|c| c.is_ascii_lowercase()) {
        return false;
    }
    let after = &line[m.end()..];
    after.starts_with(char::is_whitespace)
        && after.trim_start().starts_with(char::is_alphabetic)
}

fn bare_letter(text: &str) -> Option<Grade> {
    let trimmed = text.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '*' | '_' | '"' | '\'' | '`' | '.' | '!')
    });
    letter(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn parses_embedded_json() {
        let p = parse_grade(
            "Sure! Here is my verdict:\n```json\n{\"grade\": \"b\", \"feedback\": \"Slightly shorter.\"}\n```",
        )
        .unwrap();
        assert_eq!(p.grade, Grade::B);
        assert_eq!(p.feedback, "Slightly shorter.");
    }

    #[test]
    fn json_accepts_rationale_key() {
        let p = parse_grade(r#"{"grade":"A","rationale":"Same meaning."}"#).unwrap();
        assert_eq!(p.grade, Grade::A);
        assert_eq!(p.feedback, "Same meaning.");
    }

    #[test]
    fn skips_json_without_grade() {
        let p = parse_grade("{\"note\": 1}\nGrade: C\nLost detail.").unwrap();
        assert_eq!(p.grade, Grade::C);
        assert_eq!(p.feedback, "{\"note\": 1}\nLost detail.");
    }

    #[test]
    fn invalid_json_grade_is_error() {
        let err = parse_grade(r#"{"grade": "excellent"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GradingParse);
    }

    #[test]
    fn parses_grade_line_with_markdown() {
        let p = parse_grade("**Grade:** B\n**Feedback:** Mostly equivalent.").unwrap();
        assert_eq!(p.grade, Grade::B);
        assert_eq!(p.feedback, "Mostly equivalent.");

        let p = parse_grade("Grade: D - misses the main point").unwrap();
        assert_eq!(p.grade, Grade::D);
        assert_eq!(p.feedback, "misses the main point");
    }

    #[test]
    fn conflicting_grade_lines_are_ambiguous() {
        let err = parse_grade("Grade: A\nOn reflection, Grade: C").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GradingParse);
        let err = parse_grade("Grade: A\nGrade: C").unwrap_err();
        assert!(err.to_string().contains("conflicting"));
    }

    #[test]
    fn word_starting_with_letter_is_not_a_grade() {
        assert!(parse_grade("Grade: Average").is_err());
    }

    #[test]
    fn lowercase_article_is_not_a_grade() {
        let err = parse_grade("Overall grade: a mixed result, several facts dropped.").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GradingParse);

        // A lowercase letter on its own or before punctuation still counts.
        assert_eq!(parse_grade("Grade: b").unwrap().grade, Grade::B);
        let p = parse_grade("grade: a, same facts in fewer words").unwrap();
        assert_eq!(p.grade, Grade::A);
        assert_eq!(p.feedback, "same facts in fewer words");
        assert_eq!(parse_grade("grade: c- loses the caveat").unwrap().grade, Grade::C);
        assert_eq!(parse_grade("Grade: B mostly equivalent").unwrap().grade, Grade::B);
    }

    #[test]
    fn bare_letter_reply() {
        assert_eq!(parse_grade(" **A** ").unwrap().grade, Grade::A);
        assert_eq!(parse_grade("F.").unwrap().grade, Grade::F);
        assert!(parse_grade("E").is_err());
        assert!(parse_grade("").is_err());
    }

    #[test]
    fn unparseable_keeps_raw_text() {
        match parse_grade("I cannot decide.").unwrap_err() {
            EngineError::GradingParse { raw, .. } => assert_eq!(raw, "I cannot decide."),
            other => panic!("unexpected {other:?}"),
        }
    }
}
