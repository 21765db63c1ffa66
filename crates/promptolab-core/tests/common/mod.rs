#![allow(dead_code)]

use promptolab_core::engine::baseline::BaselineGenerator;
use promptolab_core::engine::evaluate::EvaluationOrchestrator;
use promptolab_core::engine::retry::RetryPolicy;
use promptolab_core::engine::runner::RunnerConfig;
use promptolab_core::grader::{GraderConfig, LlmGrader};
use promptolab_core::model::{TestCase, TestSet};
use promptolab_core::providers::fake::FakeProvider;
use promptolab_core::similarity::SimilarityScorer;
use std::sync::Arc;
use std::time::Duration;

/// Grader prompts always carry this tag; completion prompts never do.
pub const GRADER_NEEDLE: &str = "<candidate_response>";

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        call_timeout: Duration::from_secs(5),
    }
}

pub fn runner(concurrency: usize) -> RunnerConfig {
    RunnerConfig {
        concurrency,
        unit_timeout: Duration::from_secs(10),
    }
}

pub fn generator(p: Arc<FakeProvider>, concurrency: usize) -> BaselineGenerator {
    BaselineGenerator::new(p, runner(concurrency), fast_retry())
}

pub fn orchestrator(p: Arc<FakeProvider>, concurrency: usize) -> EvaluationOrchestrator {
    EvaluationOrchestrator::new(
        p.clone(),
        SimilarityScorer::new(p.clone(), fast_retry()),
        LlmGrader::new(p, GraderConfig::default(), fast_retry()),
        runner(concurrency),
        fast_retry(),
    )
}

/// `n` cases with ids `c1..cn` and inputs `input 1..n`.
pub fn numbered_set(name: &str, n: usize) -> TestSet {
    let mut ts = TestSet::new(name);
    for i in 1..=n {
        ts.test_cases
            .push(TestCase::with_id(format!("c{i}"), format!("input {i}")));
    }
    ts
}

pub fn grader_calls(p: &FakeProvider) -> usize {
    p.calls()
        .iter()
        .filter(|c| c.prompt.contains(GRADER_NEEDLE))
        .count()
}
