//! Progress and failure reporting for a running pipeline.

use crate::pipeline::types::JobFailure;
use std::sync::{Mutex, PoisonError};

/// Receives progress updates from the pipeline's worker threads.
///
/// Called from worker threads, so implementations must be cheap and must
/// not block for long.
pub trait PipelineObserver: Send + Sync {
    /// Called after each job finishes the last stage.
    fn on_progress(&self, completed: usize, total: usize, message: &str);

    /// Free-form status line (worker start and exit, detached workers).
    fn on_log(&self, line: &str);

    /// Called once for every job that fails in any stage.
    fn on_failure(&self, _failure: &JobFailure) {}
}

/// Formats the standard progress message, e.g. `2/3 (66%)`.
pub fn progress_message(completed: usize, total: usize) -> String {
    let pct = (completed * 100).checked_div(total).unwrap_or(100);
    format!("{completed}/{total} ({pct}%)")
}

/// Observer that forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_progress(&self, completed: usize, total: usize, message: &str) {
        tracing::info!(completed, total, "progress {message}");
    }

    fn on_log(&self, line: &str) {
        tracing::info!("{line}");
    }

    fn on_failure(&self, failure: &JobFailure) {
        tracing::warn!(
            job = %failure.job.id,
            stage = %failure.stage,
            "{}",
            failure.message
        );
    }
}

/// Observer that records everything it sees. Handy in tests.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    progress: Mutex<Vec<(usize, usize, String)>>,
    logs: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self) -> Vec<(usize, usize, String)> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Display strings of reported failures, in report order.
    pub fn failures(&self) -> Vec<String> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PipelineObserver for CollectingObserver {
    fn on_progress(&self, completed: usize, total: usize, message: &str) {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((completed, total, message.to_string()));
    }

    fn on_log(&self, line: &str) {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }

    fn on_failure(&self, failure: &JobFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure.to_string());
    }
}
