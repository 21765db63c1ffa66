pub mod console;
pub mod json;
pub mod markdown;
pub mod progress;

use crate::errors::CaseError;
use crate::model::{
    CaseStatus, EvaluationConfig, EvaluationRun, Grade, RunSummary, Similarity, Usage,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub run_id: String,
    pub test_set: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub config: EvaluationConfig,
    pub config_fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub engine_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub case_id: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    pub similarity: Similarity,
    pub grade: Grade,
    pub feedback: String,
    pub key_changes: Vec<String>,
    pub status: CaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CaseError>,
    /// Tokens for the completion and any grader calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportStats {
    /// Keyed by letter grade; every letter is present, zero or not.
    /// Ungraded cases are counted in `ungraded` only.
    pub grade_distribution: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_similarity: Option<f64>,
    pub passed: usize,
    pub failed: usize,
    pub ungraded: usize,
    /// Sum over every case that reported usage, including failed ones.
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub metadata: ReportMetadata,
    pub rows: Vec<ReportRow>,
    pub summary: RunSummary,
    pub stats: ReportStats,
}

pub struct ReportBuilder;

impl ReportBuilder {
    /// Rows follow the run's result order, which is test set order.
    pub fn build(run: &EvaluationRun) -> EvaluationReport {
        let rows: Vec<ReportRow> = run
            .results
            .iter()
            .map(|r| ReportRow {
                case_id: r.case_id.clone(),
                input: r.input_text.clone(),
                baseline: r.baseline_output.clone(),
                current: r.current_output.clone(),
                similarity: r.similarity,
                grade: r.grade,
                feedback: r.feedback.clone(),
                key_changes: r.key_changes.clone(),
                status: r.status,
                error: r.error.clone(),
                usage: r.usage,
            })
            .collect();

        EvaluationReport {
            metadata: ReportMetadata {
                run_id: run.run_id.clone(),
                test_set: run.test_set_name.clone(),
                model: run.config.model.clone(),
                baseline_system_prompt: run.baseline_system_prompt.clone(),
                system_prompt: run
                    .config
                    .system_prompt
                    .clone()
                    .or_else(|| run.baseline_system_prompt.clone()),
                config: run.config.clone(),
                config_fingerprint: run.config_fingerprint.clone(),
                started_at: run.started_at,
                finished_at: run.finished_at,
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            stats: stats(&rows),
            rows,
            summary: run.summary.clone(),
        }
    }
}

fn stats(rows: &[ReportRow]) -> ReportStats {
    let mut s = ReportStats::default();
    for g in Grade::LETTERS {
        s.grade_distribution.insert(g.as_str().to_string(), 0);
    }

    let mut sim_total = 0.0;
    let mut sim_count = 0usize;
    for row in rows {
        s.total_tokens += row.usage.map_or(0, |u| u.total());
        if row.status != CaseStatus::Completed {
            continue;
        }
        if row.grade.is_letter() {
            *s.grade_distribution
                .entry(row.grade.as_str().to_string())
                .or_insert(0) += 1;
        }
        match row.grade.is_pass() {
            Some(true) => s.passed += 1,
            Some(false) => s.failed += 1,
            None if row.grade == Grade::Ungraded => s.ungraded += 1,
            None => {}
        }
        if let Some(v) = row.similarity.value() {
            sim_total += v;
            sim_count += 1;
        }
    }
    if sim_count > 0 {
        s.mean_similarity = Some(sim_total / sim_count as f64);
    }
    s
}
