//! State shared between the coordinator and the stage workers.

use crate::cancel::CancellationToken;
use crate::pipeline::observer::{PipelineObserver, progress_message};
use crate::pipeline::station::Handoff;
use crate::pipeline::types::{Completed, JobFailure, Stage, WorkerState};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Outcomes {
    results: Vec<Completed>,
    errors: Vec<JobFailure>,
}

pub(crate) struct PipelineState {
    total_jobs: usize,
    completed_jobs: AtomicUsize,
    failed_jobs: AtomicUsize,
    outcomes: Mutex<Outcomes>,
    markers: [Mutex<Option<String>>; 3],
    worker_states: [AtomicU8; 3],
    cancel: CancellationToken,
    observer: Arc<dyn PipelineObserver>,
}

impl PipelineState {
    pub(crate) fn new(
        total_jobs: usize,
        cancel: CancellationToken,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            total_jobs,
            completed_jobs: AtomicUsize::new(0),
            failed_jobs: AtomicUsize::new(0),
            outcomes: Mutex::new(Outcomes::default()),
            markers: Default::default(),
            worker_states: Default::default(),
            cancel,
            observer,
        }
    }

    pub(crate) fn total_jobs(&self) -> usize {
        self.total_jobs
    }

    pub(crate) fn completed_jobs(&self) -> usize {
        self.completed_jobs.load(Ordering::SeqCst)
    }

    pub(crate) fn failed_jobs(&self) -> usize {
        self.failed_jobs.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn observer(&self) -> &dyn PipelineObserver {
        self.observer.as_ref()
    }

    /// Stores a finished job and reports progress. Returns the new count.
    pub(crate) fn record_result(&self, completed: Completed) -> usize {
        let name = completed.job.name.clone();
        self.lock_outcomes().results.push(completed);
        let done = self.completed_jobs.fetch_add(1, Ordering::SeqCst) + 1;

        let message = progress_message(done, self.total_jobs);
        tracing::debug!(job = %name, "completed {message}");
        self.observer.on_progress(done, self.total_jobs, &message);
        done
    }

    pub(crate) fn record_failure(&self, failure: JobFailure) {
        self.observer.on_failure(&failure);
        self.lock_outcomes().errors.push(failure);
        self.failed_jobs.fetch_add(1, Ordering::SeqCst);
    }

    /// Moves the accumulated results and errors out.
    pub(crate) fn take_outcomes(&self) -> (Vec<Completed>, Vec<JobFailure>) {
        let mut outcomes = self.lock_outcomes();
        (
            std::mem::take(&mut outcomes.results),
            std::mem::take(&mut outcomes.errors),
        )
    }

    pub(crate) fn set_marker(&self, stage: Stage, job_name: Option<String>) {
        *self.markers[stage.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = job_name;
    }

    pub(crate) fn marker(&self, stage: Stage) -> Option<String> {
        self.markers[stage.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_worker_state(&self, stage: Stage, state: WorkerState) {
        self.worker_states[stage.index()].store(state.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn worker_state(&self, stage: Stage) -> WorkerState {
        WorkerState::from_u8(self.worker_states[stage.index()].load(Ordering::SeqCst))
    }

    fn lock_outcomes(&self) -> MutexGuard<'_, Outcomes> {
        self.outcomes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Terminal handoff: collects completed jobs into the pipeline state.
pub(crate) struct ResultSink {
    state: Arc<PipelineState>,
}

impl ResultSink {
    pub(crate) fn new(state: Arc<PipelineState>) -> Self {
        Self { state }
    }
}

impl Handoff<Completed> for ResultSink {
    fn hand_off(&self, item: Completed, _cancel: &CancellationToken) -> bool {
        self.state.record_result(item);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::observer::CollectingObserver;
    use crate::pipeline::types::{Artifact, Job};
    use std::time::Duration;

    fn completed(id: &str) -> Completed {
        Completed {
            job: Arc::new(Job::new(id, id.to_uppercase())),
            audio: Artifact::new(format!("{id}.mp3")),
            visual: Artifact::new(format!("{id}.mkv")),
            output: Artifact::new(format!("{id}.mp4")),
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn result_sink_counts_and_reports_progress() {
        let observer = Arc::new(CollectingObserver::new());
        let state = Arc::new(PipelineState::new(
            2,
            CancellationToken::new(),
            observer.clone(),
        ));
        let sink = ResultSink::new(state.clone());

        assert!(sink.hand_off(completed("a"), state.cancel_token()));
        assert!(sink.hand_off(completed("b"), state.cancel_token()));

        assert_eq!(state.completed_jobs(), 2);
        let progress = observer.progress();
        assert_eq!(progress[0], (1, 2, "1/2 (50%)".to_string()));
        assert_eq!(progress[1], (2, 2, "2/2 (100%)".to_string()));

        let (results, errors) = state.take_outcomes();
        assert_eq!(results.len(), 2);
        assert!(errors.is_empty());
        // Taking leaves nothing behind.
        assert!(state.take_outcomes().0.is_empty());
    }

    #[test]
    fn failures_are_counted_and_observed() {
        let observer = Arc::new(CollectingObserver::new());
        let state = PipelineState::new(1, CancellationToken::new(), observer.clone());
        state.record_failure(JobFailure {
            job: Arc::new(Job::new("a", "A")),
            stage: Stage::Synthesis,
            message: "quota".to_string(),
        });
        assert_eq!(state.failed_jobs(), 1);
        assert_eq!(observer.failures().len(), 1);
    }

    #[test]
    fn markers_and_worker_states() {
        let state = PipelineState::new(0, CancellationToken::new(), Arc::new(CollectingObserver::new()));
        assert_eq!(state.worker_state(Stage::Render), WorkerState::Idle);
        assert_eq!(state.marker(Stage::Render), None);

        state.set_worker_state(Stage::Render, WorkerState::Processing);
        state.set_marker(Stage::Render, Some("Episode 1".to_string()));
        assert_eq!(state.worker_state(Stage::Render), WorkerState::Processing);
        assert_eq!(state.marker(Stage::Render).as_deref(), Some("Episode 1"));
        assert_eq!(state.marker(Stage::Combine), None);
    }
}
