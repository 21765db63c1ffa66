//! Error taxonomy shared by every engine component.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Malformed input detected before any provider call was issued.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Network or process failure, including timeouts.
    #[error("provider connection error: {message}")]
    ProviderConnection { message: String, timed_out: bool },

    /// Rate limit or usage exhaustion.
    #[error("provider quota exhausted: {message}")]
    ProviderQuota {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Parameter, model or feature not supported by the active backend.
    #[error("provider capability error: {message}")]
    ProviderCapability { message: String },

    /// Grader response had no recognizable grade.
    #[error("grading response not parseable: {message}")]
    GradingParse { message: String, raw: String },

    /// Persistence read/write failure.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Work abandoned because the run was cancelled.
    #[error("cancelled: {message}")]
    Cancelled { message: String },

    /// Engine fault not caused by input or backend (e.g. a panicked worker).
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Stable, serializable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ProviderConnection,
    ProviderQuota,
    ProviderCapability,
    GradingParse,
    Storage,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ProviderConnection => "provider_connection",
            ErrorKind::ProviderQuota => "provider_quota",
            ErrorKind::ProviderCapability => "provider_capability",
            ErrorKind::GradingParse => "grading_parse",
            ErrorKind::Storage => "storage",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::ProviderConnection {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::ProviderConnection {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::ProviderQuota {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::ProviderCapability {
            message: message.into(),
        }
    }

    pub fn grading_parse(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::GradingParse {
            message: message.into(),
            raw: raw.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ProviderConnection { .. } => ErrorKind::ProviderConnection,
            Self::ProviderQuota { .. } => ErrorKind::ProviderQuota,
            Self::ProviderCapability { .. } => ErrorKind::ProviderCapability,
            Self::GradingParse { .. } => ErrorKind::GradingParse,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Human-readable message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Validation { message }
            | Self::ProviderConnection { message, .. }
            | Self::ProviderQuota { message, .. }
            | Self::ProviderCapability { message }
            | Self::GradingParse { message, .. }
            | Self::Storage { message }
            | Self::Cancelled { message }
            | Self::Internal { message } => message,
        }
    }

    /// Whether a retry can relieve the cause. Quota and capability errors never qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderConnection { .. })
    }

    /// Whether this error stops dispatch of the remaining cases in a run.
    pub fn halts_dispatch(&self) -> bool {
        matches!(self, Self::ProviderQuota { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ProviderConnection {
                timed_out: true,
                ..
            }
        )
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::ProviderCapability { .. } => 2,
            Self::ProviderConnection { .. }
            | Self::ProviderQuota { .. }
            | Self::Storage { .. }
            | Self::GradingParse { .. }
            | Self::Internal { .. } => 3,
            Self::Cancelled { .. } => 130,
        }
    }

    /// Map free-form backend output (e.g. subprocess stderr) to an error.
    ///
    /// Unrecognized text is treated as a connection-class failure so that it
    /// stays retryable.
    pub fn classify_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let msg = message.to_lowercase();

        if msg.contains("rate limit")
            || msg.contains("ratelimit")
            || msg.contains("quota")
            || msg.contains("429")
            || msg.contains("too many requests")
            || msg.contains("insufficient_quota")
            || msg.contains("billing")
        {
            Self::quota(message)
        } else if msg.contains("unknown model")
            || msg.contains("model not found")
            || msg.contains("no such option")
            || msg.contains("not supported")
            || msg.contains("unsupported")
            || msg.contains("does not support")
            || msg.contains("invalid value for")
            || msg.contains("no key found")
            || msg.contains("api key")
        {
            Self::capability(message)
        } else if msg.contains("timeout") || msg.contains("timed out") {
            Self::timeout(message)
        } else {
            Self::connection(message)
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::connection(err.to_string())
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Error attributed to a test case (or to the run when `case_id` is `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl CaseError {
    pub fn new(case_id: impl Into<String>, err: &EngineError) -> Self {
        Self {
            case_id: Some(case_id.into()),
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }

    pub fn unattributed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            case_id: None,
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.case_id {
            Some(id) => write!(f, "[{}] {}: {}", id, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}
