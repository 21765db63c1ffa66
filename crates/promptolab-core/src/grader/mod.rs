//! LLM-based comparative grading of a current output against its baseline.

pub mod parse;
mod prompt;

use crate::engine::retry::{call_with_retry, RetryPolicy};
use crate::engine::CancelToken;
use crate::errors::{EngineError, EngineResult, ErrorKind};
use crate::model::{Grade, ModelParams, ProviderRequest, ProviderResponse, Usage};
use crate::providers::Provider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderConfig {
    /// Grader model; unset means the evaluation model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
}

fn default_temperature() -> Option<f32> {
    Some(0.0)
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GradeRequest<'a> {
    pub input: &'a str,
    pub system_prompt: Option<&'a str>,
    pub baseline: &'a str,
    pub current: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeOutcome {
    pub grade: Grade,
    pub feedback: String,
    /// Provider calls made, including transport retries.
    pub attempts: u32,
    /// Last raw grader reply.
    pub raw: String,
    pub usage: Option<Usage>,
}

pub struct LlmGrader {
    provider: Arc<dyn Provider>,
    config: GraderConfig,
    retry: RetryPolicy,
}

impl LlmGrader {
    pub fn new(provider: Arc<dyn Provider>, config: GraderConfig, retry: RetryPolicy) -> Self {
        Self {
            provider,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &GraderConfig {
        &self.config
    }

    pub fn model_for<'a>(&'a self, eval_model: &'a str) -> &'a str {
        self.config.model.as_deref().unwrap_or(eval_model)
    }

    /// Grade `req.current` against `req.baseline`.
    ///
    /// Only quota exhaustion and cancellation are returned as errors. A reply
    /// that stays unparseable after one stricter retry yields
    /// [`Grade::Ungraded`] with the raw retried reply as feedback.
    pub async fn grade(
        &self,
        req: &GradeRequest<'_>,
        eval_model: &str,
        cancel: &CancelToken,
    ) -> EngineResult<GradeOutcome> {
        let model = self.model_for(eval_model);
        let mut attempts = 0u32;
        let mut usage = None;

        let first = match self
            .call(model, prompt::build_prompt(req), cancel, &mut attempts)
            .await
        {
            Ok(resp) => resp,
            Err(e) => return self.on_provider_error(e, attempts, usage),
        };
        usage = Usage::merge(usage, first.usage);

        match parse::parse_grade(&first.text) {
            Ok(parsed) => {
                return Ok(GradeOutcome {
                    grade: parsed.grade,
                    feedback: parsed.feedback,
                    attempts,
                    raw: first.text,
                    usage,
                })
            }
            Err(e) => debug!(error = %e, "grader reply unparseable, retrying with strict format"),
        }

        let second = match self
            .call(model, prompt::build_strict_prompt(req), cancel, &mut attempts)
            .await
        {
            Ok(resp) => resp,
            Err(e) => return self.on_provider_error(e, attempts, usage),
        };
        usage = Usage::merge(usage, second.usage);

        match parse::parse_grade(&second.text) {
            Ok(parsed) => Ok(GradeOutcome {
                grade: parsed.grade,
                feedback: parsed.feedback,
                attempts,
                raw: second.text,
                usage,
            }),
            Err(e) => {
                warn!(error = %e, "grader reply unparseable after strict retry");
                Ok(GradeOutcome {
                    grade: Grade::Ungraded,
                    feedback: second.text.clone(),
                    attempts,
                    raw: second.text,
                    usage,
                })
            }
        }
    }

    async fn call(
        &self,
        model: &str,
        text: String,
        cancel: &CancelToken,
        attempts: &mut u32,
    ) -> EngineResult<ProviderResponse> {
        if cancel.is_cancelled() {
            return Err(EngineError::cancelled("grader: run cancelled"));
        }
        let request = ProviderRequest::new(model, text)
            .with_system_prompt(Some(prompt::SYSTEM_PROMPT))
            .with_params(ModelParams {
                temperature: self.config.temperature,
                ..Default::default()
            });
        let out = call_with_retry(&self.retry, cancel, "grader", || {
            self.provider.complete(&request)
        })
        .await;
        *attempts += out.attempts;
        out.result
    }

    fn on_provider_error(
        &self,
        e: EngineError,
        attempts: u32,
        usage: Option<Usage>,
    ) -> EngineResult<GradeOutcome> {
        match e.kind() {
            ErrorKind::ProviderQuota | ErrorKind::Cancelled => Err(e),
            _ => {
                warn!(error = %e, "grader call failed");
                Ok(GradeOutcome {
                    grade: Grade::Ungraded,
                    feedback: format!("grader error: {e}"),
                    attempts,
                    raw: String::new(),
                    usage,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CancelHandle;
    use crate::providers::fake::{FakeProvider, FakeReply};
    use std::time::Duration;

    fn grader(p: Arc<FakeProvider>, model: Option<&str>) -> LlmGrader {
        LlmGrader::new(
            p,
            GraderConfig {
                model: model.map(str::to_string),
                ..Default::default()
            },
            RetryPolicy {
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                ..Default::default()
            },
        )
    }

    const REQ: GradeRequest<'static> = GradeRequest {
        input: "Name a primary colour.",
        system_prompt: Some("Be brief."),
        baseline: "Red.",
        current: "Blue.",
    };

    #[tokio::test]
    async fn first_reply_parsed_without_retry() {
        let p = Arc::new(
            FakeProvider::new().with_default(FakeReply::text(r#"{"grade":"B","feedback":"Different colour, still valid."}"#)),
        );
        let out = grader(p.clone(), Some("judge"))
            .grade(&REQ, "eval-model", &CancelHandle::new().token())
            .await
            .unwrap();
        assert_eq!(out.grade, Grade::B);
        assert_eq!(out.feedback, "Different colour, still valid.");
        assert_eq!(out.attempts, 1);
        let calls = p.calls();
        assert_eq!(calls[0].model, "judge");
        assert_eq!(calls[0].params.temperature, Some(0.0));
        assert_eq!(calls[0].system_prompt.as_deref(), Some(prompt::SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn model_defaults_to_eval_model() {
        let p = Arc::new(FakeProvider::new().with_default(FakeReply::text("A")));
        grader(p.clone(), None)
            .grade(&REQ, "eval-model", &CancelHandle::new().token())
            .await
            .unwrap();
        assert_eq!(p.calls()[0].model, "eval-model");
    }

    #[tokio::test]
    async fn strict_retry_recovers() {
        let p = Arc::new(
            FakeProvider::new()
                .on_prompt(prompt::STRICT_MARKER, FakeReply::text(r#"{"grade":"C"}"#))
                .with_default(FakeReply::text("It is fine I guess")),
        );
        let out = grader(p.clone(), None)
            .grade(&REQ, "m", &CancelHandle::new().token())
            .await
            .unwrap();
        assert_eq!(out.grade, Grade::C);
        assert_eq!(out.attempts, 2);
        assert_eq!(p.call_count(), 2);
    }

    #[tokio::test]
    async fn non_quota_provider_error_is_ungraded() {
        let p = Arc::new(
            FakeProvider::new().with_default(FakeReply::Error(EngineError::capability("no such model"))),
        );
        let out = grader(p, None)
            .grade(&REQ, "m", &CancelHandle::new().token())
            .await
            .unwrap();
        assert_eq!(out.grade, Grade::Ungraded);
        assert!(out.feedback.starts_with("grader error:"));
    }

    #[tokio::test]
    async fn quota_error_propagates() {
        let p = Arc::new(
            FakeProvider::new().with_default(FakeReply::Error(EngineError::quota("429"))),
        );
        let err = grader(p, None)
            .grade(&REQ, "m", &CancelHandle::new().token())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderQuota);
    }

    #[tokio::test]
    async fn cancelled_run_is_not_graded() {
        let p = Arc::new(FakeProvider::new().with_default(FakeReply::text("A")));
        let handle = CancelHandle::new();
        handle.cancel();
        let err = grader(p.clone(), None)
            .grade(&REQ, "m", &handle.token())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(p.call_count(), 0);
    }
}
