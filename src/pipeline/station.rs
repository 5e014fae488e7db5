//! Station abstraction and the worker loop that drives it.

use crate::cancel::CancellationToken;
use crate::pipeline::error::StageError;
use crate::pipeline::queue::{Polled, WorkQueue};
use crate::pipeline::stage::{Combiner, Renderer, Synthesizer};
use crate::pipeline::state::PipelineState;
use crate::pipeline::types::{
    Completed, Job, JobFailure, Rendered, Stage, Synthesized, Ticket, WorkerState,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One stage of the batch pipeline.
///
/// A station turns an input ticket into the next ticket. It runs on its own
/// thread and sees one item at a time.
pub trait Station: Send + 'static {
    type Input: Ticket;
    type Output: Send + 'static;

    /// Processes a single item.
    ///
    /// Long-running implementations should check `cancel` and return
    /// [`StageError::Aborted`] once it fires.
    fn process(
        &mut self,
        input: Self::Input,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, StageError>;

    fn stage(&self) -> Stage;
}

/// Where a station puts its output.
pub trait Handoff<T>: Send + Sync {
    /// Returns `false` if the item was dropped because of cancellation.
    fn hand_off(&self, item: T, cancel: &CancellationToken) -> bool;
}

impl<T: Send> Handoff<T> for WorkQueue<T> {
    fn hand_off(&self, item: T, cancel: &CancellationToken) -> bool {
        self.put(item, cancel)
    }
}

/// Stage 1 wrapper around a [`Synthesizer`].
pub struct SynthesisStation {
    synthesizer: Arc<dyn Synthesizer>,
}

impl SynthesisStation {
    pub fn new(synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self { synthesizer }
    }
}

impl Station for SynthesisStation {
    type Input = Arc<Job>;
    type Output = Synthesized;

    fn process(
        &mut self,
        job: Arc<Job>,
        cancel: &CancellationToken,
    ) -> Result<Synthesized, StageError> {
        let started = Instant::now();
        let audio = self.synthesizer.synthesize(&job, cancel)?;
        Ok(Synthesized {
            job,
            audio,
            started,
        })
    }

    fn stage(&self) -> Stage {
        Stage::Synthesis
    }
}

/// Stage 2 wrapper around a [`Renderer`].
pub struct RenderStation {
    renderer: Arc<dyn Renderer>,
}

impl RenderStation {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self { renderer }
    }
}

impl Station for RenderStation {
    type Input = Synthesized;
    type Output = Rendered;

    fn process(
        &mut self,
        input: Synthesized,
        cancel: &CancellationToken,
    ) -> Result<Rendered, StageError> {
        let visual = self.renderer.render(&input.job, &input.audio, cancel)?;
        Ok(Rendered {
            job: input.job,
            audio: input.audio,
            visual,
            started: input.started,
        })
    }

    fn stage(&self) -> Stage {
        Stage::Render
    }
}

/// Stage 3 wrapper around a [`Combiner`].
pub struct CombineStation {
    combiner: Arc<dyn Combiner>,
}

impl CombineStation {
    pub fn new(combiner: Arc<dyn Combiner>) -> Self {
        Self { combiner }
    }
}

impl Station for CombineStation {
    type Input = Rendered;
    type Output = Completed;

    fn process(
        &mut self,
        input: Rendered,
        cancel: &CancellationToken,
    ) -> Result<Completed, StageError> {
        let output = self
            .combiner
            .combine(&input.job, &input.audio, &input.visual, cancel)?;
        Ok(Completed {
            job: input.job,
            audio: input.audio,
            visual: input.visual,
            output,
            elapsed: input.started.elapsed(),
        })
    }

    fn stage(&self) -> Stage {
        Stage::Combine
    }
}

/// Everything a worker thread needs besides its station and queues.
pub(crate) struct WorkerContext {
    pub(crate) state: Arc<PipelineState>,
    /// Set once no more items will ever arrive in this worker's queue.
    pub(crate) upstream_done: Arc<AtomicBool>,
    /// Set by this worker when it exits, for whatever reason.
    pub(crate) done: Arc<AtomicBool>,
    pub(crate) poll_interval: Duration,
}

/// Marks the worker terminated even if the loop unwinds.
struct DoneGuard {
    state: Arc<PipelineState>,
    stage: Stage,
    done: Arc<AtomicBool>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.state.set_marker(self.stage, None);
        self.state
            .set_worker_state(self.stage, WorkerState::Terminated);
        self.done.store(true, Ordering::SeqCst);
    }
}

/// Runs a station in a dedicated thread.
pub struct StationRunner {
    handle: Option<JoinHandle<()>>,
    stage: Stage,
    done: Arc<AtomicBool>,
}

impl StationRunner {
    /// Spawns a worker thread feeding `input` through `station` into `output`.
    pub(crate) fn spawn<S: Station>(
        station: S,
        input: Arc<WorkQueue<S::Input>>,
        output: Arc<dyn Handoff<S::Output>>,
        context: WorkerContext,
    ) -> std::io::Result<Self> {
        let stage = station.stage();
        let done = context.done.clone();

        let handle = thread::Builder::new()
            .name(format!("voxreel-{stage}"))
            .spawn(move || {
                Self::run_station(station, &input, output.as_ref(), &context);
            })?;

        Ok(Self {
            handle: Some(handle),
            stage,
            done,
        })
    }

    /// Main loop: poll, process, hand off, repeat.
    ///
    /// Exits on cancellation, on the shutdown sentinel, or once upstream is
    /// finished and the input queue has no unfinished items.
    fn run_station<S: Station>(
        mut station: S,
        input: &WorkQueue<S::Input>,
        output: &dyn Handoff<S::Output>,
        context: &WorkerContext,
    ) {
        let stage = station.stage();
        let state = &context.state;
        let cancel = state.cancel_token().clone();
        let _guard = DoneGuard {
            state: state.clone(),
            stage,
            done: context.done.clone(),
        };

        state.observer().on_log(&format!("{stage} worker started"));
        tracing::debug!(%stage, "worker started");

        loop {
            if cancel.is_cancelled() {
                tracing::debug!(%stage, "cancelled, worker exiting");
                break;
            }

            let upstream_done = context.upstream_done.load(Ordering::SeqCst);
            state.set_worker_state(
                stage,
                if upstream_done {
                    WorkerState::Draining
                } else {
                    WorkerState::Polling
                },
            );

            match input.recv_timeout(context.poll_interval) {
                Polled::Item(item) => {
                    Self::process_one(&mut station, item, output, state, &cancel);
                    input.task_done();
                }
                Polled::Shutdown => {
                    tracing::debug!(%stage, "shutdown sentinel received");
                    break;
                }
                Polled::Empty => {
                    // Load upstream_done before checking the queue: the
                    // upstream worker's last put happens before its flag is set.
                    if upstream_done && input.unfinished() == 0 {
                        tracing::debug!(%stage, "upstream finished and queue drained");
                        break;
                    }
                }
            }
        }

        state.observer().on_log(&format!("{stage} worker exited"));
    }

    fn process_one<S: Station>(
        station: &mut S,
        item: S::Input,
        output: &dyn Handoff<S::Output>,
        state: &PipelineState,
        cancel: &CancellationToken,
    ) {
        let stage = station.stage();
        if cancel.is_cancelled() {
            return;
        }

        let job = item.job().clone();
        state.set_worker_state(stage, WorkerState::Processing);
        state.set_marker(stage, Some(job.name.clone()));
        tracing::debug!(%stage, job = %job.id, "processing");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| station.process(item, cancel)));
        state.set_marker(stage, None);

        // Whatever finished while cancellation was in progress is dropped.
        if cancel.is_cancelled() {
            tracing::debug!(%stage, job = %job.id, "dropped after cancellation");
            return;
        }

        let message = match outcome {
            Ok(Ok(next)) => {
                if !output.hand_off(next, cancel) {
                    tracing::debug!(%stage, job = %job.id, "handoff dropped after cancellation");
                }
                return;
            }
            Ok(Err(StageError::Failed(message))) => message,
            Ok(Err(StageError::Aborted)) => "Stage aborted without cancellation".to_string(),
            Err(panic_info) => format!("Stage panicked: {}", panic_message(panic_info.as_ref())),
        };

        tracing::warn!(%stage, job = %job.id, "job failed: {message}");
        state.record_failure(JobFailure {
            job,
            stage,
            message,
        });
    }

    /// True once the worker loop has exited.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Waits for the worker thread to complete.
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| format!("{} worker thread panicked", self.stage))
        } else {
            Ok(())
        }
    }
}

fn panic_message(panic_info: &(dyn Any + Send)) -> &str {
    panic_info
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic_info.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
