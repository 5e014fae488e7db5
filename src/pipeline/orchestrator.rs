//! Batch pipeline: Jobs → Synthesis → Render → Combine → results.

use crate::cancel::CancellationToken;
use crate::defaults;
use crate::error::Result;
use crate::pipeline::observer::{LogObserver, PipelineObserver};
use crate::pipeline::queue::WorkQueue;
use crate::pipeline::stage::StageFunctions;
use crate::pipeline::state::{PipelineState, ResultSink};
use crate::pipeline::station::{
    CombineStation, RenderStation, StationRunner, SynthesisStation, WorkerContext,
};
use crate::pipeline::types::{
    Job, PipelineReport, PipelineStatus, Rendered, Stage, StageStatus, Synthesized,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How often `wait_completion` re-checks the queues.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// How often the join loop re-checks worker threads.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How long a worker blocks on an empty queue before re-checking its
    /// termination conditions.
    pub poll_interval: Duration,
    /// How long `wait_completion` waits for workers to exit before
    /// detaching them.
    pub join_timeout: Duration,
    /// Capacity of the audio and visual queues; zero means unbounded.
    /// The job queue is always unbounded so `add_job` never blocks.
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            join_timeout: Duration::from_secs(defaults::JOIN_TIMEOUT_SECS),
            queue_capacity: defaults::QUEUE_CAPACITY,
        }
    }
}

/// A pipeline that has not been started yet.
///
/// Jobs can only be added here; [`Pipeline::start`] consumes the pipeline, so
/// adding after start does not compile.
pub struct Pipeline {
    config: PipelineConfig,
    stages: StageFunctions,
    observer: Arc<dyn PipelineObserver>,
    jobs: Arc<WorkQueue<Arc<Job>>>,
    total_jobs: usize,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Creates a new pipeline that reports through [`LogObserver`].
    pub fn new(config: PipelineConfig, stages: StageFunctions) -> Self {
        Self {
            config,
            stages,
            observer: Arc::new(LogObserver),
            jobs: Arc::new(WorkQueue::unbounded()),
            total_jobs: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets a custom observer.
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Enqueues a job for stage 1.
    pub fn add_job(&mut self, job: Job) {
        tracing::debug!(job = %job.id, "job added");
        self.total_jobs += 1;
        self.jobs.put(Arc::new(job), &self.cancel);
    }

    pub fn total_jobs(&self) -> usize {
        self.total_jobs
    }

    /// Token shared with the workers once started; cancelling it before
    /// start makes the workers exit immediately.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns exactly one worker thread per stage.
    pub fn start(self) -> Result<PipelineHandle> {
        let state = Arc::new(PipelineState::new(
            self.total_jobs,
            self.cancel.clone(),
            self.observer.clone(),
        ));
        let audio: Arc<WorkQueue<Synthesized>> =
            Arc::new(WorkQueue::new(self.config.queue_capacity));
        let visual: Arc<WorkQueue<Rendered>> =
            Arc::new(WorkQueue::new(self.config.queue_capacity));

        let adding_finished = Arc::new(AtomicBool::new(false));
        let synthesis_done = Arc::new(AtomicBool::new(false));
        let render_done = Arc::new(AtomicBool::new(false));
        let combine_done = Arc::new(AtomicBool::new(false));

        let context = |upstream_done: &Arc<AtomicBool>, done: &Arc<AtomicBool>| WorkerContext {
            state: state.clone(),
            upstream_done: upstream_done.clone(),
            done: done.clone(),
            poll_interval: self.config.poll_interval,
        };

        let mut handle = PipelineHandle {
            config: self.config.clone(),
            state: state.clone(),
            jobs: self.jobs.clone(),
            audio: audio.clone(),
            visual: visual.clone(),
            adding_finished: adding_finished.clone(),
            runners: Vec::with_capacity(3),
        };

        let spawned = StationRunner::spawn(
            SynthesisStation::new(self.stages.synthesizer.clone()),
            self.jobs.clone(),
            audio.clone(),
            context(&adding_finished, &synthesis_done),
        )
        .and_then(|runner| {
            handle.runners.push(runner);
            StationRunner::spawn(
                RenderStation::new(self.stages.renderer.clone()),
                audio.clone(),
                visual.clone(),
                context(&synthesis_done, &render_done),
            )
        })
        .and_then(|runner| {
            handle.runners.push(runner);
            StationRunner::spawn(
                CombineStation::new(self.stages.combiner.clone()),
                visual.clone(),
                Arc::new(ResultSink::new(state.clone())),
                context(&render_done, &combine_done),
            )
        });

        match spawned {
            Ok(runner) => handle.runners.push(runner),
            Err(e) => {
                // Workers already running see the cancellation and exit;
                // dropping the handle detaches them.
                tracing::error!("failed to spawn pipeline worker: {e}");
                handle.cancel();
                return Err(e.into());
            }
        }

        tracing::info!(jobs = self.total_jobs, "pipeline started");
        Ok(handle)
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    config: PipelineConfig,
    state: Arc<PipelineState>,
    jobs: Arc<WorkQueue<Arc<Job>>>,
    audio: Arc<WorkQueue<Synthesized>>,
    visual: Arc<WorkQueue<Rendered>>,
    adding_finished: Arc<AtomicBool>,
    runners: Vec<StationRunner>,
}

impl PipelineHandle {
    /// Tells stage 1 that no more jobs will arrive.
    pub fn finish_adding_jobs(&self) {
        self.adding_finished.store(true, Ordering::SeqCst);
    }

    /// Requests cooperative cancellation of all workers.
    pub fn cancel(&self) {
        if !self.state.cancel_token().is_cancelled() {
            self.state.observer().on_log("cancellation requested");
            tracing::info!("pipeline cancellation requested");
        }
        self.state.cancel_token().cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.cancel_token().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancel_token().is_cancelled()
    }

    /// Snapshot of counters, worker states and per-stage markers.
    ///
    /// Markers are read without a global lock, so the view may be slightly
    /// stale.
    pub fn status(&self) -> PipelineStatus {
        let queued = [self.jobs.len(), self.audio.len(), self.visual.len()];
        let stages = Stage::ALL
            .iter()
            .map(|&stage| StageStatus {
                stage,
                state: self.state.worker_state(stage),
                current_job: self.state.marker(stage),
                queued: queued[stage.index()],
            })
            .collect();

        PipelineStatus {
            total_jobs: self.state.total_jobs(),
            completed_jobs: self.state.completed_jobs(),
            failed_jobs: self.state.failed_jobs(),
            cancelled: self.is_cancelled(),
            stages,
        }
    }

    /// Waits for every job to be accounted for (or for cancellation), stops
    /// the workers and returns the results.
    ///
    /// Workers still running after the join timeout are detached; they die
    /// with the process.
    pub fn wait_completion(mut self) -> PipelineReport {
        self.finish_adding_jobs();
        let cancel = self.cancellation_token();

        loop {
            if cancel.is_cancelled() || self.is_idle() {
                break;
            }
            if self.runners.iter().all(StationRunner::is_done) {
                break;
            }
            if cancel.wait_timeout(IDLE_CHECK_INTERVAL) {
                break;
            }
        }

        let detached_workers = self.shutdown();
        let (results, errors) = self.state.take_outcomes();

        let report = PipelineReport {
            results,
            errors,
            total_jobs: self.state.total_jobs(),
            cancelled: cancel.is_cancelled(),
            detached_workers,
        };
        tracing::info!(
            completed = report.results.len(),
            failed = report.errors.len(),
            total = report.total_jobs,
            cancelled = report.cancelled,
            "pipeline finished"
        );
        report
    }

    /// True once no queue holds unfinished work.
    ///
    /// Queues are read front to back: a ticket is put downstream before it is
    /// marked done upstream, so a ticket in transit is always counted once.
    fn is_idle(&self) -> bool {
        self.jobs.unfinished() == 0 && self.audio.unfinished() == 0 && self.visual.unfinished() == 0
    }

    /// Sends the shutdown sentinel and joins workers up to the deadline.
    ///
    /// Returns the number of detached workers.
    fn shutdown(&mut self) -> usize {
        self.jobs.close();
        self.audio.close();
        self.visual.close();

        let deadline = Instant::now() + self.config.join_timeout;

        loop {
            // Drain finished threads, joining each to catch panics
            let mut remaining = Vec::new();
            for runner in self.runners.drain(..) {
                if runner.is_finished() {
                    if let Err(msg) = runner.join() {
                        tracing::error!("{msg}");
                    }
                } else {
                    remaining.push(runner);
                }
            }
            self.runners = remaining;

            if self.runners.is_empty() {
                return 0;
            }

            if Instant::now() >= deadline {
                let detached = self.runners.len();
                let stages: Vec<&str> = self.runners.iter().map(|r| r.stage().name()).collect();
                let line = format!(
                    "shutdown timeout, detaching {detached} worker(s): {}",
                    stages.join(", ")
                );
                tracing::warn!("{line}");
                self.state.observer().on_log(&line);
                // Dropping the runners detaches their threads.
                self.runners.clear();
                return detached;
            }

            thread::sleep(JOIN_POLL_INTERVAL);
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        // Dropped without wait_completion: let the workers wind down on
        // their own instead of polling forever.
        if !self.runners.is_empty() {
            self.state.cancel_token().cancel();
            self.finish_adding_jobs();
        }
    }
}
