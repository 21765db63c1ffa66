use crate::errors::{CaseError, EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSet {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl TestSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: None,
            test_cases: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Append a case with a fresh id and return that id.
    pub fn add_case(&mut self, input_text: impl Into<String>) -> String {
        let case = TestCase::new(input_text);
        let id = case.id.clone();
        self.test_cases.push(case);
        id
    }

    pub fn case(&self, id: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|c| c.id == id)
    }

    pub fn case_mut(&mut self, id: &str) -> Option<&mut TestCase> {
        self.test_cases.iter_mut().find(|c| c.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.test_cases.iter().position(|c| c.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    /// Rejects empty sets, blank ids and duplicate ids.
    pub fn validate(&self) -> EngineResult<()> {
        if self.test_cases.is_empty() {
            return Err(EngineError::validation(format!(
                "test set '{}' has no test cases",
                self.name
            )));
        }
        let mut seen = HashSet::with_capacity(self.test_cases.len());
        for case in &self.test_cases {
            if case.id.trim().is_empty() {
                return Err(EngineError::validation(format!(
                    "test set '{}' contains a case with an empty id",
                    self.name
                )));
            }
            if !seen.insert(case.id.as_str()) {
                return Err(EngineError::validation(format!(
                    "duplicate test case id '{}' in test set '{}'",
                    case.id, self.name
                )));
            }
        }
        Ok(())
    }

    /// Apply the outputs of a finished run. Baselines are left untouched.
    pub fn record_run(&mut self, run: &EvaluationRun) {
        for result in &run.results {
            if result.status == CaseStatus::Cancelled {
                continue;
            }
            if let Some(case) = self.case_mut(&result.case_id) {
                if result.current_output.is_some() {
                    case.current_output = result.current_output.clone();
                }
                case.last_run = Some(run.finished_at);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub input_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_output: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

impl TestCase {
    pub fn new(input_text: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), input_text)
    }

    pub fn with_id(id: impl Into<String>, input_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input_text: input_text.into(),
            baseline_output: None,
            current_output: None,
            created_at: Utc::now(),
            last_run: None,
        }
    }

    pub fn with_baseline(mut self, baseline: impl Into<String>) -> Self {
        self.baseline_output = Some(baseline.into());
        self
    }
}

/// Model and sampling parameters for one run. `None` means backend default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl EvaluationConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn params(&self) -> ModelParams {
        ModelParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }

    /// The system prompt to use: the config override, else the test set's own.
    pub fn effective_system_prompt<'a>(&'a self, test_set: &'a TestSet) -> Option<&'a str> {
        self.system_prompt
            .as_deref()
            .or(test_set.system_prompt.as_deref())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.model.trim().is_empty() {
            return Err(EngineError::validation("model must not be empty"));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(EngineError::validation(format!(
                    "temperature {t} out of range [0, 2]"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(EngineError::validation(format!(
                    "top_p {p} out of range [0, 1]"
                )));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(EngineError::validation("max_tokens must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub model: String,
    #[serde(default)]
    pub params: ModelParams,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            model: model.into(),
            params: ModelParams::default(),
        }
    }

    pub fn with_system_prompt(mut self, system: Option<&str>) -> Self {
        self.system_prompt = system.map(str::to_string);
        self
    }

    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn merge(a: Option<Usage>, b: Option<Usage>) -> Option<Usage> {
        match (a, b) {
            (None, None) => None,
            (Some(u), None) | (None, Some(u)) => Some(u),
            (Some(x), Some(y)) => Some(Usage {
                input_tokens: x.input_tokens + y.input_tokens,
                output_tokens: x.output_tokens + y.output_tokens,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMethod {
    Embedding,
    Lexical,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Similarity {
    Score { value: f64, method: SimilarityMethod },
    NotApplicable,
}

impl Similarity {
    pub fn value(&self) -> Option<f64> {
        match self {
            Similarity::Score { value, .. } => Some(*value),
            Similarity::NotApplicable => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
    Ungraded,
    NotApplicable,
}

impl Grade {
    pub const LETTERS: [Grade; 5] = [Grade::A, Grade::B, Grade::C, Grade::D, Grade::F];

    pub fn from_letter(c: char) -> Option<Grade> {
        match c.to_ascii_uppercase() {
            'A' => Some(Grade::A),
            'B' => Some(Grade::B),
            'C' => Some(Grade::C),
            'D' => Some(Grade::D),
            'F' => Some(Grade::F),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
            Grade::Ungraded => "ungraded",
            Grade::NotApplicable => "n/a",
        }
    }

    pub fn is_letter(&self) -> bool {
        !matches!(self, Grade::Ungraded | Grade::NotApplicable)
    }

    /// A to C pass, D and F fail. Ungraded and not-applicable are neither.
    pub fn is_pass(&self) -> Option<bool> {
        match self {
            Grade::A | Grade::B | Grade::C => Some(true),
            Grade::D | Grade::F => Some(false),
            Grade::Ungraded | Grade::NotApplicable => None,
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Completed,
    Failed,
    Cancelled,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Completed => "completed",
            CaseStatus::Failed => "failed",
            CaseStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub case_id: String,
    pub input_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_output: Option<String>,
    pub similarity: Similarity,
    pub grade: Grade,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_changes: Vec<String>,
    pub status: CaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CaseError>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub duration_ms: u64,
}

impl EvaluationResult {
    /// A result for a case that produced no output.
    pub fn unsuccessful(case: &TestCase, status: CaseStatus, error: CaseError) -> Self {
        Self {
            case_id: case.id.clone(),
            input_text: case.input_text.clone(),
            baseline_output: case.baseline_output.clone(),
            current_output: None,
            similarity: Similarity::NotApplicable,
            grade: Grade::NotApplicable,
            feedback: String::new(),
            key_changes: Vec::new(),
            status,
            error: Some(error),
            attempts: 0,
            usage: None,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_cases: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub not_dispatched: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted: Option<CaseError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unattributed: Vec<CaseError>,
    pub partial: bool,
}

impl RunSummary {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.partial && self.unattributed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub run_id: String,
    pub test_set_name: String,
    pub config: EvaluationConfig,
    pub config_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_system_prompt: Option<String>,
    pub results: Vec<EvaluationResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: RunSummary,
}

impl EvaluationRun {
    pub fn result(&self, case_id: &str) -> Option<&EvaluationResult> {
        self.results.iter().find(|r| r.case_id == case_id)
    }
}
