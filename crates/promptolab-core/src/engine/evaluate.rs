//! Evaluation: re-run every case under a new config, then score and grade it
//! against its baseline.

use super::retry::{call_with_retry, RetryPolicy};
use super::runner::{RunHandle, RunnerConfig, TaskRunner, Unit, UnitResult};
use super::{CancelHandle, CancelToken};
use crate::diff::key_changes;
use crate::errors::{CaseError, EngineError, EngineResult, ErrorKind};
use crate::fingerprint;
use crate::grader::{GradeRequest, LlmGrader};
use crate::model::{
    CaseStatus, EvaluationConfig, EvaluationResult, EvaluationRun, Grade, ProviderRequest,
    RunSummary, Similarity, TestCase, TestSet, Usage,
};
use crate::providers::Provider;
use crate::report::progress::ProgressSink;
use crate::similarity::SimilarityScorer;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Receives each case result as it completes, from a single task.
pub type ResultSink = Box<dyn FnMut(&EvaluationResult) + Send>;

const IDENTICAL_FEEDBACK: &str = "Output is identical to the baseline.";

struct CaseContext {
    provider: Arc<dyn Provider>,
    scorer: Arc<SimilarityScorer>,
    grader: Arc<LlmGrader>,
    retry: RetryPolicy,
    config: EvaluationConfig,
    system_prompt: Option<String>,
}

struct EvalState {
    cases: HashMap<String, TestCase>,
    results: Vec<EvaluationResult>,
    sink: Option<ResultSink>,
}

pub struct EvaluationHandle {
    inner: RunHandle<EvalState>,
    run_id: String,
    test_set_name: String,
    order: Vec<String>,
    config: EvaluationConfig,
    config_fingerprint: String,
    baseline_system_prompt: Option<String>,
    started_at: DateTime<Utc>,
}

impl EvaluationHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.inner.cancel_handle()
    }

    /// Wait for every in-flight case and assemble the run in test set order.
    pub async fn wait(self) -> EngineResult<EvaluationRun> {
        let out = self.inner.wait().await?;
        let report = out.report;
        let mut results = out.state.results;

        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        results.sort_by_key(|r| {
            position
                .get(r.case_id.as_str())
                .copied()
                .unwrap_or(usize::MAX)
        });

        let count = |s: CaseStatus| results.iter().filter(|r| r.status == s).count();
        let summary = RunSummary {
            total_cases: report.total,
            succeeded: count(CaseStatus::Completed),
            failed: count(CaseStatus::Failed),
            cancelled: count(CaseStatus::Cancelled),
            not_dispatched: report.not_dispatched.len(),
            partial: report.cancelled
                || report.halted.is_some()
                || !report.not_dispatched.is_empty()
                || !report.unattributed.is_empty(),
            halted: report.halted,
            unattributed: report.unattributed,
        };

        info!(
            run_id = %self.run_id,
            test_set = %self.test_set_name,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            not_dispatched = summary.not_dispatched,
            partial = summary.partial,
            "evaluation finished"
        );

        Ok(EvaluationRun {
            run_id: self.run_id,
            test_set_name: self.test_set_name,
            config: self.config,
            config_fingerprint: self.config_fingerprint,
            baseline_system_prompt: self.baseline_system_prompt,
            results,
            started_at: self.started_at,
            finished_at: Utc::now(),
            summary,
        })
    }
}

pub struct EvaluationOrchestrator {
    provider: Arc<dyn Provider>,
    scorer: Arc<SimilarityScorer>,
    grader: Arc<LlmGrader>,
    runner: TaskRunner,
    retry: RetryPolicy,
}

impl EvaluationOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        scorer: SimilarityScorer,
        grader: LlmGrader,
        runner: RunnerConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            scorer: Arc::new(scorer),
            grader: Arc::new(grader),
            runner: TaskRunner::new(runner),
            retry,
        }
    }

    /// Validate and start evaluating every case of `test_set` under `config`.
    pub fn start(
        &self,
        test_set: &TestSet,
        config: &EvaluationConfig,
        on_result: Option<ResultSink>,
        progress: Option<ProgressSink>,
    ) -> EngineResult<EvaluationHandle> {
        test_set.validate()?;
        config.validate()?;

        let started_at = Utc::now();
        let system_prompt = config.effective_system_prompt(test_set).map(str::to_string);
        let fp = fingerprint::compute(config, system_prompt.as_deref(), self.grader.config());
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(
            run_id = %run_id,
            test_set = %test_set.name,
            model = %config.model,
            cases = test_set.len(),
            concurrency = self.runner.config().concurrency,
            fingerprint = %fp.hex,
            "starting evaluation"
        );

        let ctx = Arc::new(CaseContext {
            provider: self.provider.clone(),
            scorer: self.scorer.clone(),
            grader: self.grader.clone(),
            retry: self.retry,
            config: config.clone(),
            system_prompt,
        });

        let units: Vec<Unit<TestCase>> = test_set
            .test_cases
            .iter()
            .map(|case| Unit {
                case_id: case.id.clone(),
                input: case.clone(),
            })
            .collect();
        let state = EvalState {
            cases: test_set
                .test_cases
                .iter()
                .map(|c| (c.id.clone(), c.clone()))
                .collect(),
            results: Vec::with_capacity(units.len()),
            sink: on_result,
        };

        let work =
            move |case: TestCase, cancel: CancelToken| evaluate_case(ctx.clone(), case, cancel);
        let inner = self.runner.run(units, state, work, apply_result, progress);

        Ok(EvaluationHandle {
            inner,
            run_id,
            test_set_name: test_set.name.clone(),
            order: test_set.test_cases.iter().map(|c| c.id.clone()).collect(),
            config: config.clone(),
            config_fingerprint: fp.hex,
            baseline_system_prompt: test_set.system_prompt.clone(),
            started_at,
        })
    }

    /// Run to completion and record current outputs into `test_set`.
    pub async fn evaluate(
        &self,
        test_set: &mut TestSet,
        config: &EvaluationConfig,
        on_result: Option<ResultSink>,
        progress: Option<ProgressSink>,
    ) -> EngineResult<EvaluationRun> {
        let run = self.start(test_set, config, on_result, progress)?.wait().await?;
        test_set.record_run(&run);
        Ok(run)
    }
}

/// Only errors that halt dispatch are returned as `Err`; every other failure
/// is folded into the case result.
async fn evaluate_case(
    ctx: Arc<CaseContext>,
    case: TestCase,
    cancel: CancelToken,
) -> EngineResult<EvaluationResult> {
    let started = Instant::now();
    let request = ProviderRequest::new(ctx.config.model.clone(), case.input_text.clone())
        .with_system_prompt(ctx.system_prompt.as_deref())
        .with_params(ctx.config.params());

    let out = call_with_retry(&ctx.retry, &cancel, "evaluate", || {
        ctx.provider.complete(&request)
    })
    .await;
    let mut attempts = out.attempts;

    let response = match out.result {
        Ok(r) => r,
        Err(e) if e.halts_dispatch() => return Err(e),
        Err(e) => {
            let status = if e.kind() == ErrorKind::Cancelled {
                CaseStatus::Cancelled
            } else {
                warn!(case_id = %case.id, error = %e, attempts, "evaluation call failed");
                CaseStatus::Failed
            };
            let mut result =
                EvaluationResult::unsuccessful(&case, status, CaseError::new(case.id.clone(), &e));
            result.attempts = attempts;
            result.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(result);
        }
    };

    let current = response.text;
    let mut usage = response.usage;
    let mut result = EvaluationResult {
        case_id: case.id.clone(),
        input_text: case.input_text.clone(),
        baseline_output: case.baseline_output.clone(),
        current_output: Some(current.clone()),
        similarity: Similarity::NotApplicable,
        grade: Grade::NotApplicable,
        feedback: String::new(),
        key_changes: Vec::new(),
        status: CaseStatus::Completed,
        error: None,
        attempts,
        usage,
        duration_ms: 0,
    };

    let Some(baseline) = case.baseline_output.as_deref() else {
        result.duration_ms = started.elapsed().as_millis() as u64;
        return Ok(result);
    };

    result.key_changes = key_changes(baseline, &current);

    if baseline == current {
        result.similarity = ctx.scorer.score(baseline, &current, &cancel).await?;
        result.grade = Grade::A;
        result.feedback = IDENTICAL_FEEDBACK.to_string();
        result.duration_ms = started.elapsed().as_millis() as u64;
        return Ok(result);
    }

    // Cancelled while the completion was in flight: keep the output, skip
    // scoring and grading.
    if cancel.is_cancelled() {
        interrupt(
            &mut result,
            &EngineError::cancelled("run cancelled before grading"),
        );
        result.duration_ms = started.elapsed().as_millis() as u64;
        return Ok(result);
    }

    let grade_request = GradeRequest {
        input: &case.input_text,
        system_prompt: ctx.system_prompt.as_deref(),
        baseline,
        current: &current,
    };
    let (similarity, graded) = tokio::join!(
        ctx.scorer.score(baseline, &current, &cancel),
        ctx.grader.grade(&grade_request, &ctx.config.model, &cancel),
    );
    if let Some(e) = [similarity.as_ref().err(), graded.as_ref().err()]
        .into_iter()
        .flatten()
        .find(|e| e.halts_dispatch())
    {
        return Err(e.clone());
    }

    // Cancelled while scoring or grading; the new output is still worth keeping.
    match similarity {
        Ok(s) => result.similarity = s,
        Err(e) => interrupt(&mut result, &e),
    }
    match graded {
        Ok(outcome) => {
            attempts += outcome.attempts;
            usage = Usage::merge(usage, outcome.usage);
            result.grade = outcome.grade;
            result.feedback = outcome.feedback;
        }
        Err(e) => interrupt(&mut result, &e),
    }

    result.attempts = attempts;
    result.usage = usage;
    result.duration_ms = started.elapsed().as_millis() as u64;
    Ok(result)
}

/// Mark a case that produced output but could not be scored. The first error wins.
fn interrupt(result: &mut EvaluationResult, e: &EngineError) {
    if result.error.is_some() {
        return;
    }
    result.status = if e.kind() == ErrorKind::Cancelled {
        CaseStatus::Cancelled
    } else {
        CaseStatus::Failed
    };
    result.error = Some(CaseError::new(result.case_id.clone(), e));
}

fn apply_result(state: &mut EvalState, unit: UnitResult<EvaluationResult>) {
    let result = match unit.outcome {
        Ok(r) => r,
        Err(e) => {
            let Some(case) = state.cases.get(&unit.case_id) else {
                error!(case_id = %unit.case_id, error = %e, "result for unknown case");
                return;
            };
            let status = if e.kind() == ErrorKind::Cancelled {
                CaseStatus::Cancelled
            } else {
                CaseStatus::Failed
            };
            let mut r =
                EvaluationResult::unsuccessful(case, status, CaseError::new(case.id.clone(), &e));
            r.attempts = 1;
            r
        }
    };
    if let Some(sink) = state.sink.as_mut() {
        sink(&result);
    }
    state.results.push(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grader::GraderConfig;
    use crate::providers::fake::{FakeProvider, FakeReply};
    use std::sync::Mutex;
    use std::time::Duration;

    const GRADER_NEEDLE: &str = "<candidate_response>";

    fn orchestrator(p: Arc<FakeProvider>) -> EvaluationOrchestrator {
        let retry = RetryPolicy {
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            ..Default::default()
        };
        EvaluationOrchestrator::new(
            p.clone(),
            SimilarityScorer::new(p.clone(), retry),
            LlmGrader::new(p, GraderConfig::default(), retry),
            RunnerConfig {
                concurrency: 3,
                unit_timeout: Duration::from_secs(5),
            },
            retry,
        )
    }

    fn set() -> TestSet {
        let mut ts = TestSet::new("greetings").with_system_prompt("old prompt");
        ts.test_cases
            .push(TestCase::with_id("1", "hello there").with_baseline("hello there"));
        ts.test_cases
            .push(TestCase::with_id("2", "good morning").with_baseline("morning!"));
        ts.test_cases.push(TestCase::with_id("3", "no baseline yet"));
        ts
    }

    #[tokio::test]
    async fn scores_grades_and_keeps_set_order() {
        let p = Arc::new(FakeProvider::new().on_prompt(
            GRADER_NEEDLE,
            FakeReply::text(r#"{"grade":"C","feedback":"Reworded."}"#),
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sink: ResultSink = Box::new(move |r: &EvaluationResult| {
            s.lock().unwrap().push(r.case_id.clone())
        });

        let mut ts = set();
        let mut cfg = EvaluationConfig::new("m");
        cfg.system_prompt = Some("new prompt".into());
        let run = orchestrator(p.clone())
            .evaluate(&mut ts, &cfg, Some(sink), None)
            .await
            .unwrap();

        let ids: Vec<&str> = run.results.iter().map(|r| r.case_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(run.baseline_system_prompt.as_deref(), Some("old prompt"));
        assert_eq!(run.config_fingerprint.len(), 64);
        assert!(run.summary.is_clean());

        // Identical output short-circuits the grader.
        assert_eq!(run.results[0].grade, Grade::A);
        assert_eq!(run.results[0].similarity.value(), Some(1.0));
        assert!(run.results[0].key_changes.is_empty());

        assert_eq!(run.results[1].grade, Grade::C);
        assert_eq!(run.results[1].feedback, "Reworded.");
        assert_eq!(run.results[1].attempts, 2);

        assert_eq!(run.results[2].grade, Grade::NotApplicable);
        assert_eq!(run.results[2].similarity, Similarity::NotApplicable);
        assert_eq!(
            run.results[2].current_output.as_deref(),
            Some("no baseline yet")
        );

        let grader_calls = p
            .calls()
            .iter()
            .filter(|c| c.prompt.contains(GRADER_NEEDLE))
            .count();
        assert_eq!(grader_calls, 1);
        assert!(p
            .calls()
            .iter()
            .filter(|c| !c.prompt.contains(GRADER_NEEDLE))
            .all(|c| c.system_prompt.as_deref() == Some("new prompt")));

        assert_eq!(ts.test_cases[1].current_output.as_deref(), Some("good morning"));
        assert_eq!(ts.test_cases[1].baseline_output.as_deref(), Some("morning!"));
        assert!(ts.test_cases[2].last_run.is_some());
    }

    #[tokio::test]
    async fn per_case_failure_stays_with_the_case() {
        let p = Arc::new(
            FakeProvider::new()
                .on_prompt("good morning", FakeReply::Error(EngineError::capability("bad option")))
                .on_prompt(GRADER_NEEDLE, FakeReply::text("B")),
        );
        let run = orchestrator(p)
            .start(&set(), &EvaluationConfig::new("m"), None, None)
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(run.summary.failed, 1);
        assert_eq!(run.summary.succeeded, 2);
        assert!(!run.summary.partial);
        let failed = run.result("2").unwrap();
        assert_eq!(failed.status, CaseStatus::Failed);
        assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::ProviderCapability);
        assert!(failed.current_output.is_none());
    }

    #[tokio::test]
    async fn grader_quota_fails_the_case_and_halts() {
        let p = Arc::new(FakeProvider::new().on_prompt(
            GRADER_NEEDLE,
            FakeReply::Error(EngineError::quota("insufficient_quota")),
        ));
        let run = orchestrator(p)
            .start(&set(), &EvaluationConfig::new("m"), None, None)
            .unwrap()
            .wait()
            .await
            .unwrap();
        let halted = run.summary.halted.as_ref().unwrap();
        assert_eq!(halted.case_id.as_deref(), Some("2"));
        assert!(run.summary.partial);
        assert_eq!(run.result("2").unwrap().status, CaseStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_during_completion_skips_scoring_and_grading() {
        let p = Arc::new(
            FakeProvider::new()
                .with_latency(Duration::from_millis(80))
                .with_embeddings(|_| Ok(vec![1.0, 0.0])),
        );
        let mut ts = TestSet::new("slow");
        ts.test_cases
            .push(TestCase::with_id("1", "hello").with_baseline("goodbye"));

        let handle = orchestrator(p.clone())
            .start(&ts, &EvaluationConfig::new("m"), None, None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        let run = handle.wait().await.unwrap();

        assert_eq!(p.call_count(), 1);
        assert_eq!(p.embed_count(), 0);
        assert_eq!(run.summary.cancelled, 1);
        let r = run.result("1").unwrap();
        assert_eq!(r.status, CaseStatus::Cancelled);
        assert_eq!(r.current_output.as_deref(), Some("hello"));
        assert_eq!(r.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(r.grade, Grade::NotApplicable);
        assert_eq!(r.similarity, Similarity::NotApplicable);
    }

    #[tokio::test]
    async fn embedding_quota_halts_the_run() {
        let p = Arc::new(
            FakeProvider::new()
                .with_embeddings(|_| Err(EngineError::quota("insufficient_quota")))
                .on_prompt(GRADER_NEEDLE, FakeReply::text("B")),
        );
        let run = orchestrator(p)
            .start(&set(), &EvaluationConfig::new("m"), None, None)
            .unwrap()
            .wait()
            .await
            .unwrap();
        let halted = run.summary.halted.as_ref().unwrap();
        assert_eq!(halted.kind, ErrorKind::ProviderQuota);
        assert_eq!(halted.case_id.as_deref(), Some("2"));
        assert_eq!(run.result("2").unwrap().status, CaseStatus::Failed);
    }
}
