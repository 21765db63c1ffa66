//! Bounded-concurrency task runner.
//!
//! Units run on a fixed pool of permits. A single driver task collects
//! completions, so the result callback and progress sink are never called
//! concurrently. There is no retry here; retries belong to the work function.

use super::{CancelHandle, CancelToken};
use crate::errors::{CaseError, EngineError, EngineResult, ErrorKind};
use crate::report::progress::{ProgressEvent, ProgressSink};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub concurrency: usize,
    pub unit_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            unit_timeout: Duration::from_secs(600),
        }
    }
}

/// One unit of work, attributed to a test case.
#[derive(Debug, Clone)]
pub struct Unit<I> {
    pub case_id: String,
    pub input: I,
}

#[derive(Debug)]
pub struct UnitResult<T> {
    pub case_id: String,
    pub outcome: EngineResult<T>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnerReport {
    pub total: usize,
    /// Results handed to the callback.
    pub delivered: usize,
    /// Case ids never started, in input order.
    pub not_dispatched: Vec<String>,
    pub cancelled: bool,
    /// First error that stopped dispatch.
    pub halted: Option<CaseError>,
    /// Units that died without a result (panics).
    pub unattributed: Vec<CaseError>,
}

pub struct RunOutput<S> {
    pub state: S,
    pub report: RunnerReport,
}

pub struct RunHandle<S> {
    cancel: CancelHandle,
    driver: JoinHandle<RunOutput<S>>,
}

impl<S> RunHandle<S> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the driver to finish. In-flight units always complete first.
    pub async fn wait(self) -> EngineResult<RunOutput<S>> {
        self.driver.await.map_err(|e| {
            error!(error = %e, "runner driver aborted");
            EngineError::internal(format!("runner driver aborted: {e}"))
        })
    }
}

pub struct TaskRunner {
    config: RunnerConfig,
}

impl TaskRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Start running `units`. `on_result` folds each completion into `state`.
    pub fn run<I, T, S, W, Fut, R>(
        &self,
        units: Vec<Unit<I>>,
        state: S,
        work: W,
        on_result: R,
        progress: Option<ProgressSink>,
    ) -> RunHandle<S>
    where
        I: Send + 'static,
        T: Send + 'static,
        S: Send + 'static,
        W: Fn(I, CancelToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
        R: FnMut(&mut S, UnitResult<T>) + Send + 'static,
    {
        self.run_with_cancel(units, state, work, on_result, progress, CancelHandle::new())
    }

    /// As [`TaskRunner::run`], sharing an existing cancellation signal.
    pub fn run_with_cancel<I, T, S, W, Fut, R>(
        &self,
        units: Vec<Unit<I>>,
        state: S,
        work: W,
        on_result: R,
        progress: Option<ProgressSink>,
        cancel: CancelHandle,
    ) -> RunHandle<S>
    where
        I: Send + 'static,
        T: Send + 'static,
        S: Send + 'static,
        W: Fn(I, CancelToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
        R: FnMut(&mut S, UnitResult<T>) + Send + 'static,
    {
        let driver = tokio::spawn(drive(
            self.config,
            units,
            state,
            Arc::new(work),
            on_result,
            progress,
            cancel.token(),
        ));
        RunHandle { cancel, driver }
    }
}

async fn drive<I, T, S, W, Fut, R>(
    config: RunnerConfig,
    units: Vec<Unit<I>>,
    mut state: S,
    work: Arc<W>,
    mut on_result: R,
    progress: Option<ProgressSink>,
    mut cancel: CancelToken,
) -> RunOutput<S>
where
    I: Send + 'static,
    T: Send + 'static,
    W: Fn(I, CancelToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EngineResult<T>> + Send + 'static,
    R: FnMut(&mut S, UnitResult<T>),
{
    let total = units.len();
    let sem = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut pending: VecDeque<Unit<I>> = units.into();
    // Permits travel back with the result so a slot frees only after the
    // driver has seen the completion.
    let mut join_set: JoinSet<(String, EngineResult<T>, OwnedSemaphorePermit)> = JoinSet::new();
    let mut report = RunnerReport {
        total,
        ..Default::default()
    };
    let mut done = 0usize;
    let mut stopped = false;

    loop {
        if join_set.is_empty() && (stopped || pending.is_empty()) {
            break;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled(), if !report.cancelled => {
                debug!(pending = pending.len(), in_flight = join_set.len(), "run cancelled");
                report.cancelled = true;
                stopped = true;
            }

            Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                done += 1;
                let finished = match joined {
                    Ok((case_id, outcome, _permit)) => {
                        if let Err(e) = &outcome {
                            if e.halts_dispatch() && report.halted.is_none() {
                                warn!(
                                    case_id = %case_id,
                                    error = %e,
                                    remaining = pending.len(),
                                    "halting dispatch"
                                );
                                report.halted = Some(CaseError::new(case_id.clone(), e));
                                stopped = true;
                            }
                        }
                        report.delivered += 1;
                        on_result(&mut state, UnitResult { case_id: case_id.clone(), outcome });
                        Some(case_id)
                    }
                    Err(join_err) => {
                        error!(error = %join_err, "unit failed without a result");
                        report.unattributed.push(CaseError::unattributed(
                            ErrorKind::Internal,
                            format!("unit task failed: {join_err}"),
                        ));
                        None
                    }
                };
                if let Some(sink) = &progress {
                    sink(ProgressEvent { done, total, case_id: finished });
                }
            }

            Ok(permit) = sem.clone().acquire_owned(), if !stopped && !pending.is_empty() => {
                let Some(unit) = pending.pop_front() else { continue };
                let work = work.clone();
                let token = cancel.clone();
                let unit_timeout = config.unit_timeout;
                join_set.spawn(async move {
                    let Unit { case_id, input } = unit;
                    let outcome = match tokio::time::timeout(unit_timeout, work(input, token)).await {
                        Ok(r) => r,
                        Err(_) => Err(EngineError::timeout(format!(
                            "case exceeded unit timeout of {}ms",
                            unit_timeout.as_millis()
                        ))),
                    };
                    (case_id, outcome, permit)
                });
            }

            else => break,
        }
    }

    report.not_dispatched = pending.into_iter().map(|u| u.case_id).collect();
    RunOutput { state, report }
}
