//! Case-level progress for baseline and evaluation runs.

use std::sync::Arc;

/// Emitted by the runner after each case result has been delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub done: usize,
    pub total: usize,
    /// The case that just finished. `None` when a unit died without a result.
    pub case_id: Option<String>,
}

impl ProgressEvent {
    /// True for the update that accounts for every dispatched case of a full run.
    pub fn is_final(&self) -> bool {
        self.done >= self.total
    }
}

/// Called from the runner's driver task only, never concurrently.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;
