//! Data types flowing through the batch pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One of the three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Synthesis,
    Render,
    Combine,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Synthesis, Stage::Render, Stage::Combine];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Synthesis => "synthesis",
            Stage::Render => "render",
            Stage::Combine => "combine",
        }
    }

    /// Position in the pipeline, starting at zero.
    pub fn index(self) -> usize {
        match self {
            Stage::Synthesis => 0,
            Stage::Render => 1,
            Stage::Combine => 2,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A unit of pipeline work as supplied by the caller.
///
/// The payload is opaque to the pipeline; only stage functions interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Job {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Looks up a string field of an object payload.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(serde_json::Value::as_str)
    }
}

/// Reference to a produced media file. The pipeline never opens it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub location: PathBuf,
    pub bytes: Option<u64>,
}

impl Artifact {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            bytes: None,
        }
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.location
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location.display())
    }
}

/// Anything that travels through a queue on behalf of a job.
pub trait Ticket: Send + 'static {
    fn job(&self) -> &Arc<Job>;
}

impl Ticket for Arc<Job> {
    fn job(&self) -> &Arc<Job> {
        self
    }
}

/// A job after stage 1.
#[derive(Debug, Clone)]
pub struct Synthesized {
    pub job: Arc<Job>,
    pub audio: Artifact,
    pub started: Instant,
}

impl Ticket for Synthesized {
    fn job(&self) -> &Arc<Job> {
        &self.job
    }
}

/// A job after stage 2.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub job: Arc<Job>,
    pub audio: Artifact,
    pub visual: Artifact,
    pub started: Instant,
}

impl Ticket for Rendered {
    fn job(&self) -> &Arc<Job> {
        &self.job
    }
}

/// A job that made it through all three stages.
#[derive(Debug, Clone)]
pub struct Completed {
    pub job: Arc<Job>,
    pub audio: Artifact,
    pub visual: Artifact,
    pub output: Artifact,
    /// Time from the start of synthesis to the end of combination.
    pub elapsed: Duration,
}

/// A job whose journey ended with a stage failure.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub job: Arc<Job>,
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) failed in {}: {}",
            self.job.name, self.job.id, self.stage, self.message
        )
    }
}

/// Lifecycle of a stage worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Polling,
    Processing,
    Draining,
    Terminated,
}

impl WorkerState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Polling => 1,
            WorkerState::Processing => 2,
            WorkerState::Draining => 3,
            WorkerState::Terminated => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Polling,
            2 => WorkerState::Processing,
            3 => WorkerState::Draining,
            4 => WorkerState::Terminated,
            _ => WorkerState::Idle,
        }
    }
}

/// Diagnostic view of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatus {
    pub stage: Stage,
    pub state: WorkerState,
    /// Name of the job being processed right now, if any. Best effort.
    pub current_job: Option<String>,
    /// Items waiting in this stage's input queue.
    pub queued: usize,
}

/// Snapshot returned by `PipelineHandle::status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled: bool,
    pub stages: Vec<StageStatus>,
}

/// Everything the caller gets back from `wait_completion`.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub results: Vec<Completed>,
    pub errors: Vec<JobFailure>,
    pub total_jobs: usize,
    pub cancelled: bool,
    /// Workers still running when the join timeout expired.
    pub detached_workers: usize,
}

impl PipelineReport {
    /// Jobs that appear in neither `results` nor `errors`.
    pub fn unaccounted(&self) -> usize {
        self.total_jobs
            .saturating_sub(self.results.len() + self.errors.len())
    }

    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.errors.is_empty() && self.unaccounted() == 0
    }
}
