//! User settings shared by baseline generation and evaluation.
//!
//! Stored as YAML. Precedence, lowest first: built-in defaults, the settings
//! file, `PROMPTOLAB_*` environment variables, command-line flags (applied by
//! the caller).

use crate::engine::retry::RetryPolicy;
use crate::engine::runner::RunnerConfig;
use crate::errors::{EngineError, EngineResult};
use crate::grader::GraderConfig;
use crate::model::EvaluationConfig;
use crate::providers::{BackendKind, ProviderSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const SUPPORTED_SETTINGS_VERSION: u32 = 1;
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const ENV_BACKEND: &str = "PROMPTOLAB_BACKEND";
pub const ENV_MODEL: &str = "PROMPTOLAB_MODEL";
pub const ENV_LLM_PROGRAM: &str = "PROMPTOLAB_LLM_PROGRAM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub grader: GraderConfig,
    /// Treat a model missing from the backend's list as an error.
    #[serde(default)]
    pub strict_models: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
}

fn default_version() -> u32 {
    SUPPORTED_SETTINGS_VERSION
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            model: default_model(),
            temperature: None,
            max_tokens: None,
            top_p: None,
            provider: ProviderSettings::default(),
            run: RunSettings::default(),
            retry: RetrySettings::default(),
            grader: GraderConfig::default(),
            strict_models: false,
            store_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_unit_timeout_secs() -> u64 {
    600
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            unit_timeout_secs: default_unit_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_call_timeout_secs() -> u64 {
    120
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> EngineResult<Settings> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Settings::default());
            }
            Err(e) => {
                return Err(EngineError::storage(format!(
                    "failed to read settings {}: {e}",
                    path.display()
                )))
            }
        };
        let settings: Settings = serde_yaml::from_str(&raw).map_err(|e| {
            EngineError::validation(format!(
                "failed to parse settings {}: {e}",
                path.display()
            ))
        })?;
        if settings.version != SUPPORTED_SETTINGS_VERSION {
            return Err(EngineError::validation(format!(
                "unsupported settings version {} (supported: {})",
                settings.version, SUPPORTED_SETTINGS_VERSION
            )));
        }
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| EngineError::internal(format!("failed to serialize settings: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        std::fs::write(path, yaml).map_err(|e| {
            EngineError::storage(format!("failed to write settings {}: {e}", path.display()))
        })
    }

    /// Apply `PROMPTOLAB_BACKEND`, `PROMPTOLAB_MODEL` and `PROMPTOLAB_LLM_PROGRAM`.
    pub fn apply_env(&mut self) -> EngineResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> EngineResult<()> {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_BACKEND) {
            self.provider.backend = v.parse::<BackendKind>()?;
        }
        if let Some(v) = non_empty(ENV_MODEL) {
            self.model = v.trim().to_string();
        }
        if let Some(v) = non_empty(ENV_LLM_PROGRAM) {
            self.provider.llm_program = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.evaluation_config(None).validate()?;
        if self.run.concurrency == 0 {
            return Err(EngineError::validation("run.concurrency must be at least 1"));
        }
        if self.run.unit_timeout_secs == 0 || self.retry.call_timeout_secs == 0 {
            return Err(EngineError::validation("timeouts must be positive"));
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(EngineError::validation(
                "retry.base_backoff_ms must not exceed retry.max_backoff_ms",
            ));
        }
        if let Some(t) = self.grader.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(EngineError::validation(format!(
                    "grader.temperature {t} out of range [0, 2]"
                )));
            }
        }
        if matches!(self.grader.model.as_deref(), Some(m) if m.trim().is_empty()) {
            return Err(EngineError::validation("grader.model must not be empty when set"));
        }
        Ok(())
    }

    pub fn evaluation_config(&self, system_prompt: Option<String>) -> EvaluationConfig {
        EvaluationConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            system_prompt,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            concurrency: self.run.concurrency.max(1),
            unit_timeout: Duration::from_secs(self.run.unit_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_backoff: Duration::from_millis(self.retry.base_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            call_timeout: Duration::from_secs(self.retry.call_timeout_secs),
        }
    }

    pub fn grader_config(&self) -> GraderConfig {
        self.grader.clone()
    }
}
