//! OpenAI-compatible HTTP backend.
//!
//! One call shape for many hosted and local endpoints. The endpoint is chosen
//! from the model id prefix (`groq/llama-3.1-8b-instant`), and the prefix is
//! stripped before the request is sent. Ids without a known prefix go to OpenAI.
//!
//! This is the only place HTTP status codes are interpreted.

use super::{HttpSettings, Provider};
use crate::errors::{EngineError, EngineResult};
use crate::model::{ProviderRequest, ProviderResponse, Usage};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";

pub const SUPPORTED_MODELS: &[&str] = &[
    "gpt-4o-mini",
    "gpt-4o",
    "o1-mini",
    "o1-preview",
    "groq/llama-3.1-8b-instant",
    "groq/llama-3.1-70b-versatile",
    "gemini/gemini-1.5-pro-latest",
    "gemini/gemini-2.0-flash",
];

/// Built-in endpoints: (prefix, base url, api key env var).
const DEFAULT_ENDPOINTS: &[(&str, &str, Option<&str>)] = &[
    ("openai", "https://api.openai.com/v1", Some("OPENAI_API_KEY")),
    ("groq", "https://api.groq.com/openai/v1", Some("GROQ_API_KEY")),
    (
        "gemini",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        Some("GEMINI_API_KEY"),
    ),
    ("ollama", "http://localhost:11434/v1", None),
    (
        "openrouter",
        "https://openrouter.ai/api/v1",
        Some("OPENROUTER_API_KEY"),
    ),
];

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Env var the key is read from, kept for error messages.
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    endpoints: BTreeMap<String, Endpoint>,
    supported_models: Vec<String>,
    embedding_model: Option<String>,
}

impl HttpProvider {
    /// Build from settings, reading API keys from the environment once.
    pub fn from_settings(
        settings: &HttpSettings,
        embedding_model: Option<String>,
    ) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .user_agent(concat!("promptolab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::capability(format!("failed to build HTTP client: {e}")))?;

        let mut endpoints = BTreeMap::new();
        for (prefix, base_url, key_env) in DEFAULT_ENDPOINTS {
            let overrides = settings.endpoints.get(*prefix);
            let base_url = overrides
                .and_then(|o| o.base_url.clone())
                .unwrap_or_else(|| (*base_url).to_string());
            let api_key_env = overrides
                .and_then(|o| o.api_key_env.clone())
                .or_else(|| key_env.map(str::to_string));
            let api_key = api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|k| !k.is_empty());
            endpoints.insert(
                (*prefix).to_string(),
                Endpoint {
                    base_url,
                    api_key,
                    api_key_env,
                },
            );
        }
        // Extra prefixes declared only in settings.
        for (prefix, o) in &settings.endpoints {
            if endpoints.contains_key(prefix) {
                continue;
            }
            let Some(base_url) = o.base_url.clone() else {
                return Err(EngineError::validation(format!(
                    "endpoint '{prefix}' needs a base_url"
                )));
            };
            let api_key = o
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|k| !k.is_empty());
            endpoints.insert(
                prefix.clone(),
                Endpoint {
                    base_url,
                    api_key,
                    api_key_env: o.api_key_env.clone(),
                },
            );
        }

        let supported_models = settings
            .supported_models
            .clone()
            .unwrap_or_else(|| SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect());

        Ok(Self {
            client,
            endpoints,
            supported_models,
            embedding_model,
        })
    }

    /// Replace or add one endpoint.
    pub fn with_endpoint(
        mut self,
        prefix: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        self.endpoints.insert(
            prefix.into(),
            Endpoint {
                base_url: base_url.into(),
                api_key,
                api_key_env: None,
            },
        );
        self
    }

    /// Resolve a model id to its endpoint and the id the endpoint expects.
    pub fn route<'a>(&self, model: &'a str) -> EngineResult<(&Endpoint, &'a str)> {
        let (prefix, id) = match model.split_once('/') {
            Some((prefix, id)) if self.endpoints.contains_key(prefix) => (prefix, id),
            Some((prefix, _)) => {
                return Err(EngineError::capability(format!(
                    "no endpoint configured for provider prefix '{prefix}' (model '{model}')"
                )));
            }
            _ => ("openai", model),
        };
        let endpoint = self.endpoints.get(prefix).ok_or_else(|| {
            EngineError::capability(format!("no endpoint configured for '{prefix}'"))
        })?;
        Ok((endpoint, id))
    }

    async fn post(&self, endpoint: &Endpoint, suffix: &str, body: &Value) -> EngineResult<Value> {
        let url = format!("{}/{}", endpoint.base_url.trim_end_matches('/'), suffix);
        let mut request = self.client.post(&url).json(body);
        match (&endpoint.api_key, &endpoint.api_key_env) {
            (Some(key), _) => {
                request = request.header(AUTHORIZATION, format!("Bearer {key}"));
            }
            (None, Some(var)) => {
                return Err(EngineError::capability(format!(
                    "no API key found: set {var}"
                )));
            }
            (None, None) => {}
        }

        debug!(url = %url, "sending request");
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(|e| {
                EngineError::connection(format!("malformed response body: {e}"))
            });
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status.as_u16(), retry_after, &body))
    }
}

/// Map a non-success status and its body to an engine error.
pub fn map_status(status: u16, retry_after: Option<Duration>, body: &str) -> EngineError {
    let lower = body.to_lowercase();
    let message = format!("HTTP {}: {}", status, truncate(body, 300));
    match status {
        429 if lower.contains("insufficient_quota") => EngineError::quota(message),
        429 => EngineError::ProviderQuota {
            message,
            retry_after,
        },
        402 => EngineError::quota(message),
        400 | 404
            if lower.contains("model")
                || lower.contains("unsupported")
                || lower.contains("not supported") =>
        {
            EngineError::capability(message)
        }
        400 if lower.contains("insufficient_quota") => EngineError::quota(message),
        401 | 403 => EngineError::capability(message),
        408 | 504 => EngineError::timeout(message),
        500..=599 => EngineError::connection(message),
        _ => EngineError::capability(message),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn request_body(model_id: &str, request: &ProviderRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = request.system_prompt.as_deref() {
        if !system.is_empty() {
            messages.push(json!({"role": "system", "content": system}));
        }
    }
    messages.push(json!({"role": "user", "content": request.prompt}));

    let mut body = Map::new();
    body.insert("model".into(), json!(model_id));
    body.insert("messages".into(), Value::Array(messages));
    let p = &request.params;
    if let Some(t) = p.temperature {
        body.insert("temperature".into(), json!(t));
    }
    if let Some(m) = p.max_tokens {
        body.insert("max_tokens".into(), json!(m));
    }
    if let Some(tp) = p.top_p {
        body.insert("top_p".into(), json!(tp));
    }
    Value::Object(body)
}

#[async_trait]
impl Provider for HttpProvider {
    async fn complete(&self, request: &ProviderRequest) -> EngineResult<ProviderResponse> {
        let (endpoint, model_id) = self.route(&request.model)?;
        let body = request_body(model_id, request);
        let json = self.post(endpoint, "chat/completions", &body).await?;

        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::connection("response missing choices[0].message.content"))?
            .trim()
            .to_string();

        let usage = json.get("usage").map(|u| Usage {
            input_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: u
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        });

        Ok(ProviderResponse {
            text,
            usage,
            provider: self.provider_name().to_string(),
            model: request.model.clone(),
        })
    }

    async fn list_models(&self) -> EngineResult<Vec<String>> {
        Ok(self.supported_models.clone())
    }

    fn supports_embeddings(&self) -> bool {
        self.embedding_model.is_some()
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let Some(model) = self.embedding_model.as_deref() else {
            return Err(EngineError::capability("no embedding model configured"));
        };
        let (endpoint, model_id) = self.route(model)?;
        let body = json!({"model": model_id, "input": text});
        let json = self.post(endpoint, "embeddings", &body).await?;

        let vector = json
            .pointer("/data/0/embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| EngineError::connection("response missing data[0].embedding"))?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| EngineError::connection("embedding contains non-numeric values"))?;
        Ok(vector)
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }
}
