//! Three-stage batch pipeline for media jobs.
//!
//! Each stage runs in its own thread; stages are connected by crossbeam
//! queues that count unfinished work so the coordinator knows when a batch
//! is done.

pub mod error;
pub mod observer;
pub mod orchestrator;
pub mod queue;
pub mod stage;
mod state;
pub mod station;
pub mod types;

pub use error::StageError;
pub use observer::{CollectingObserver, LogObserver, PipelineObserver, progress_message};
pub use orchestrator::{Pipeline, PipelineConfig, PipelineHandle};
pub use queue::{Polled, WorkQueue};
pub use stage::{Combiner, Renderer, StageFunctions, Synthesizer};
pub use station::{
    CombineStation, Handoff, RenderStation, Station, StationRunner, SynthesisStation,
};
pub use types::{
    Artifact, Completed, Job, JobFailure, PipelineReport, PipelineStatus, Rendered, Stage,
    StageStatus, Synthesized, Ticket, WorkerState,
};
