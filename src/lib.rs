//! voxreel - Batch pipeline for narrated media
//!
//! Jobs flow through three concurrent stages (synthesize speech, render
//! visuals, combine) with a resilient, chunking call layer for remote
//! speech synthesis.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod call;
pub mod cancel;
pub mod chunker;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod jobs;
pub mod pipeline;
#[cfg(feature = "cli")]
pub mod progress;
pub mod stages;

// Composition root - needs everything
#[cfg(feature = "cli")]
pub mod app;

// Stage functions (job → audio → visual → output)
pub use pipeline::{Combiner, Renderer, StageFunctions, Synthesizer};
pub use stages::{CommandExecutor, CommandStage, SpeechSynthesizer, SystemCommandExecutor};

// Pipeline
pub use pipeline::{
    Artifact, Completed, Job, JobFailure, Pipeline, PipelineConfig, PipelineHandle,
    PipelineObserver, PipelineReport, PipelineStatus, Stage, StageError,
};

// Call layer
pub use call::{CallError, ChunkedSynthesis, ResilientClient, RetryPolicy, Transport};

// Cancellation
pub use cancel::CancellationToken;

// Error handling
pub use error::{Result, VoxreelError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_hash_suffix_only_with_git_hash() {
        let ver = version_string();
        match option_env!("GIT_HASH") {
            Some(hash) if !hash.is_empty() => {
                assert_eq!(ver, format!("{}+{}", env!("CARGO_PKG_VERSION"), hash));
            }
            _ => assert_eq!(ver, env!("CARGO_PKG_VERSION")),
        }
    }
}
