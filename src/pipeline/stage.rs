//! Injected stage functions.
//!
//! The pipeline never synthesizes, renders or combines anything itself. It
//! calls the three functions supplied here, each of which turns a job (plus
//! the artifacts of earlier stages) into one new artifact.

use crate::cancel::CancellationToken;
use crate::pipeline::error::StageError;
use crate::pipeline::types::{Artifact, Job};
use std::sync::Arc;

/// Stage 1: turns job text into audio.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, job: &Job, cancel: &CancellationToken) -> Result<Artifact, StageError>;
}

/// Stage 2: turns audio into a visual track.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        job: &Job,
        audio: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<Artifact, StageError>;
}

/// Stage 3: muxes audio and visual into the final output.
pub trait Combiner: Send + Sync {
    fn combine(
        &self,
        job: &Job,
        audio: &Artifact,
        visual: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<Artifact, StageError>;
}

impl<F> Synthesizer for F
where
    F: Fn(&Job, &CancellationToken) -> Result<Artifact, StageError> + Send + Sync,
{
    fn synthesize(&self, job: &Job, cancel: &CancellationToken) -> Result<Artifact, StageError> {
        self(job, cancel)
    }
}

impl<F> Renderer for F
where
    F: Fn(&Job, &Artifact, &CancellationToken) -> Result<Artifact, StageError> + Send + Sync,
{
    fn render(
        &self,
        job: &Job,
        audio: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<Artifact, StageError> {
        self(job, audio, cancel)
    }
}

impl<F> Combiner for F
where
    F: Fn(&Job, &Artifact, &Artifact, &CancellationToken) -> Result<Artifact, StageError>
        + Send
        + Sync,
{
    fn combine(
        &self,
        job: &Job,
        audio: &Artifact,
        visual: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<Artifact, StageError> {
        self(job, audio, visual, cancel)
    }
}

/// The three stage functions a pipeline runs.
#[derive(Clone)]
pub struct StageFunctions {
    pub synthesizer: Arc<dyn Synthesizer>,
    pub renderer: Arc<dyn Renderer>,
    pub combiner: Arc<dyn Combiner>,
}

impl StageFunctions {
    pub fn new(
        synthesizer: impl Synthesizer + 'static,
        renderer: impl Renderer + 'static,
        combiner: impl Combiner + 'static,
    ) -> Self {
        Self {
            synthesizer: Arc::new(synthesizer),
            renderer: Arc::new(renderer),
            combiner: Arc::new(combiner),
        }
    }
}

impl std::fmt::Debug for StageFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageFunctions").finish_non_exhaustive()
    }
}
