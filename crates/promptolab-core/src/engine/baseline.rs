//! Baseline generation: one completion per case, stored as the reference output.

use super::retry::{call_with_retry, RetryPolicy};
use super::runner::{RunHandle, RunnerConfig, TaskRunner, Unit, UnitResult};
use super::{CancelHandle, CancelToken};
use crate::errors::{CaseError, EngineResult, ErrorKind};
use crate::model::{EvaluationConfig, ProviderRequest, TestSet};
use crate::providers::Provider;
use crate::report::progress::ProgressSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Cases abandoned by cancellation after they started.
    pub cancelled: usize,
    pub not_dispatched: usize,
    pub failures: Vec<CaseError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted: Option<CaseError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unattributed: Vec<CaseError>,
}

impl BaselineSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
            && self.cancelled == 0
            && self.not_dispatched == 0
            && self.unattributed.is_empty()
    }
}

#[derive(Debug)]
pub struct BaselineOutcome {
    pub test_set: TestSet,
    pub summary: BaselineSummary,
}

pub struct BaselineHandle {
    inner: RunHandle<(TestSet, BaselineSummary)>,
}

impl BaselineHandle {
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.inner.cancel_handle()
    }

    pub async fn wait(self) -> EngineResult<BaselineOutcome> {
        let out = self.inner.wait().await?;
        let (test_set, mut summary) = out.state;
        summary.not_dispatched = out.report.not_dispatched.len();
        summary.halted = out.report.halted;
        summary.unattributed = out.report.unattributed;
        info!(
            test_set = %test_set.name,
            succeeded = summary.succeeded,
            failed = summary.failed,
            not_dispatched = summary.not_dispatched,
            "baseline generation finished"
        );
        Ok(BaselineOutcome { test_set, summary })
    }
}

pub struct BaselineGenerator {
    provider: Arc<dyn Provider>,
    runner: TaskRunner,
    retry: RetryPolicy,
}

impl BaselineGenerator {
    pub fn new(provider: Arc<dyn Provider>, runner: RunnerConfig, retry: RetryPolicy) -> Self {
        Self {
            provider,
            runner: TaskRunner::new(runner),
            retry,
        }
    }

    /// Validate and start generating baselines for every case of `test_set`.
    pub fn start(
        &self,
        test_set: TestSet,
        config: &EvaluationConfig,
        progress: Option<ProgressSink>,
    ) -> EngineResult<BaselineHandle> {
        test_set.validate()?;
        config.validate()?;

        let system = config.effective_system_prompt(&test_set).map(str::to_string);
        let units: Vec<Unit<ProviderRequest>> = test_set
            .test_cases
            .iter()
            .map(|case| Unit {
                case_id: case.id.clone(),
                input: ProviderRequest::new(config.model.clone(), case.input_text.clone())
                    .with_system_prompt(system.as_deref())
                    .with_params(config.params()),
            })
            .collect();

        info!(
            test_set = %test_set.name,
            model = %config.model,
            cases = units.len(),
            concurrency = self.runner.config().concurrency,
            "starting baseline generation"
        );

        let provider = self.provider.clone();
        let retry = self.retry;
        let work = move |request: ProviderRequest, cancel: CancelToken| {
            let provider = provider.clone();
            async move {
                let out = call_with_retry(&retry, &cancel, "baseline", || {
                    provider.complete(&request)
                })
                .await;
                out.result.map(|resp| resp.text)
            }
        };

        let inner = self.runner.run(
            units,
            (test_set, BaselineSummary::default()),
            work,
            apply_result,
            progress,
        );
        Ok(BaselineHandle { inner })
    }

    /// Run to completion and write baselines into `test_set`.
    pub async fn generate(
        &self,
        test_set: &mut TestSet,
        config: &EvaluationConfig,
        progress: Option<ProgressSink>,
    ) -> EngineResult<BaselineSummary> {
        let handle = self.start(test_set.clone(), config, progress)?;
        let outcome = handle.wait().await?;
        *test_set = outcome.test_set;
        Ok(outcome.summary)
    }
}

fn apply_result(state: &mut (TestSet, BaselineSummary), result: UnitResult<String>) {
    let (test_set, summary) = state;
    match result.outcome {
        Ok(text) => {
            if let Some(case) = test_set.case_mut(&result.case_id) {
                case.baseline_output = Some(text);
            }
            summary.succeeded += 1;
        }
        Err(e) if e.kind() == ErrorKind::Cancelled => {
            summary.cancelled += 1;
        }
        Err(e) => {
            warn!(case_id = %result.case_id, error = %e, "baseline failed");
            summary.failed += 1;
            summary.failures.push(CaseError::new(result.case_id, &e));
        }
    }
}
