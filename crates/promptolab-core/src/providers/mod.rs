//! LLM backends behind one capability trait.
//!
//! The backend is fixed when the provider is built. Switching backends means
//! building a new instance with [`build_provider`].

pub mod fake;
pub mod http;
pub mod llm_cmd;
pub mod tracing;

use crate::errors::{EngineError, EngineResult};
use crate::model::{ProviderRequest, ProviderResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, request: &ProviderRequest) -> EngineResult<ProviderResponse>;

    /// Models available on this backend, in backend order.
    async fn list_models(&self) -> EngineResult<Vec<String>>;

    fn supports_embeddings(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> EngineResult<Vec<f32>> {
        Err(EngineError::capability(format!(
            "provider '{}' does not support embeddings",
            self.provider_name()
        )))
    }

    fn provider_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// The `llm` command-line tool, one subprocess per call.
    #[default]
    LlmCmd,
    /// OpenAI-compatible HTTP endpoints selected by model prefix.
    Http,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::LlmCmd => "llm_cmd",
            BackendKind::Http => "http",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llm" | "llm_cmd" | "llm-cmd" | "cmd" => Ok(BackendKind::LlmCmd),
            "http" | "api" | "litellm" => Ok(BackendKind::Http),
            other => Err(EngineError::validation(format!(
                "unknown backend '{other}' (expected 'llm_cmd' or 'http')"
            ))),
        }
    }
}

/// Per-endpoint overrides for the HTTP backend, keyed by model prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSettings {
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointSettings>,
    /// Overrides the built-in supported-model list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_models: Option<Vec<String>>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            supported_models: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_llm_program")]
    pub llm_program: PathBuf,
    /// Embedding model; unset uses the backend default, empty disables embeddings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub http: HttpSettings,
}

fn default_llm_program() -> PathBuf {
    PathBuf::from("llm")
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            llm_program: default_llm_program(),
            embedding_model: None,
            http: HttpSettings::default(),
        }
    }
}

impl ProviderSettings {
    pub fn resolved_embedding_model(&self) -> Option<String> {
        match self.embedding_model.as_deref() {
            Some("") => None,
            Some(m) => Some(m.to_string()),
            None => Some(
                match self.backend {
                    BackendKind::LlmCmd => llm_cmd::DEFAULT_EMBEDDING_MODEL,
                    BackendKind::Http => http::DEFAULT_EMBEDDING_MODEL,
                }
                .to_string(),
            ),
        }
    }
}

/// Build the configured backend, wrapped in a tracing decorator.
pub fn build_provider(settings: &ProviderSettings) -> EngineResult<Arc<dyn Provider>> {
    let embedding_model = settings.resolved_embedding_model();
    let inner: Arc<dyn Provider> = match settings.backend {
        BackendKind::LlmCmd => Arc::new(llm_cmd::LlmCmdProvider::new(
            settings.llm_program.clone(),
            embedding_model,
        )),
        BackendKind::Http => Arc::new(http::HttpProvider::from_settings(
            &settings.http,
            embedding_model,
        )?),
    };
    ::tracing::debug!(backend = %settings.backend, "provider built");
    Ok(Arc::new(tracing::TracingProvider::new(inner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("llm".parse::<BackendKind>().unwrap(), BackendKind::LlmCmd);
        assert_eq!("LLM_CMD".parse::<BackendKind>().unwrap(), BackendKind::LlmCmd);
        assert_eq!("litellm".parse::<BackendKind>().unwrap(), BackendKind::Http);
        assert!("grpc".parse::<BackendKind>().is_err());
    }

    #[test]
    fn embedding_model_defaults_per_backend() {
        let mut s = ProviderSettings::default();
        assert_eq!(s.resolved_embedding_model().as_deref(), Some("3-large"));
        s.backend = BackendKind::Http;
        assert_eq!(
            s.resolved_embedding_model().as_deref(),
            Some("text-embedding-3-large")
        );
        s.embedding_model = Some(String::new());
        assert_eq!(s.resolved_embedding_model(), None);
    }

    #[test]
    fn build_provider_selects_backend() {
        let mut s = ProviderSettings::default();
        let p = build_provider(&s).unwrap();
        assert_eq!(p.provider_name(), "llm_cmd");
        s.backend = BackendKind::Http;
        let p = build_provider(&s).unwrap();
        assert_eq!(p.provider_name(), "http");
    }
}
