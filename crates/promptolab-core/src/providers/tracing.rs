use crate::errors::EngineResult;
use crate::model::{ProviderRequest, ProviderResponse};
use crate::providers::Provider;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info_span, Instrument};

/// Wraps a provider with one span per call.
pub struct TracingProvider {
    inner: Arc<dyn Provider>,
}

impl TracingProvider {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Provider for TracingProvider {
    async fn complete(&self, request: &ProviderRequest) -> EngineResult<ProviderResponse> {
        let span = info_span!(
            "gen_ai.client.request",
            "promptolab.provider" = self.inner.provider_name(),
            "gen_ai.request.model" = request.model.as_str(),
            "gen_ai.usage.input_tokens" = tracing::field::Empty,
            "gen_ai.usage.output_tokens" = tracing::field::Empty,
            "duration_ms" = tracing::field::Empty,
            "error" = tracing::field::Empty,
            "error.kind" = tracing::field::Empty
        );

        async move {
            let start = std::time::Instant::now();
            let result = self.inner.complete(request).await;
            let span = tracing::Span::current();
            span.record("duration_ms", start.elapsed().as_millis() as u64);

            match &result {
                Ok(resp) => {
                    if let Some(usage) = resp.usage {
                        span.record("gen_ai.usage.input_tokens", usage.input_tokens);
                        span.record("gen_ai.usage.output_tokens", usage.output_tokens);
                    }
                }
                Err(e) => {
                    span.record("error", true);
                    span.record("error.kind", e.kind().as_str());
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn list_models(&self) -> EngineResult<Vec<String>> {
        self.inner.list_models().await
    }

    fn supports_embeddings(&self) -> bool {
        self.inner.supports_embeddings()
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let span = info_span!(
            "gen_ai.client.embed",
            "promptolab.provider" = self.inner.provider_name(),
            "error.kind" = tracing::field::Empty
        );
        async move {
            let result = self.inner.embed(text).await;
            if let Err(e) = &result {
                tracing::Span::current().record("error.kind", e.kind().as_str());
            }
            result
        }
        .instrument(span)
        .await
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}
