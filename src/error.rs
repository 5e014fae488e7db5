//! Error types for voxreel.

use crate::call::CallError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxreelError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Job input errors
    #[error("Failed to read job file {path}: {message}")]
    JobFile { path: String, message: String },

    // Text chunking errors
    #[error("Text chunking failed: {message}")]
    Chunking { message: String },

    // Call layer errors
    #[error("Synthesis call failed: {0}")]
    Call(#[from] CallError),

    // Stage command errors
    #[error("Stage command not found: {command}")]
    StageCommandNotFound { command: String },

    #[error("Stage command failed: {message}")]
    StageCommand { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxreelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallFailure, FailureKind};
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxreelError::ConfigInvalidValue {
            key: "call.max_retries".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for call.max_retries: must be at least 1"
        );
    }

    #[test]
    fn test_job_file_display() {
        let error = VoxreelError::JobFile {
            path: "/tmp/jobs.toml".to_string(),
            message: "missing field `id`".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to read job file /tmp/jobs.toml: missing field `id`"
        );
    }

    #[test]
    fn test_chunking_display() {
        let error = VoxreelError::Chunking {
            message: "no chunks survived validation".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Text chunking failed: no chunks survived validation"
        );
    }

    #[test]
    fn test_from_call_error() {
        let call = CallError::Exhausted {
            attempts: 3,
            last: CallFailure::new(FailureKind::Server, "503 Service Unavailable"),
        };
        let error: VoxreelError = call.into();
        assert!(error.to_string().starts_with("Synthesis call failed:"));
        assert!(error.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_stage_command_not_found_display() {
        let error = VoxreelError::StageCommandNotFound {
            command: "ffmpeg".to_string(),
        };
        assert_eq!(error.to_string(), "Stage command not found: ffmpeg");
    }

    #[test]
    fn test_other_display() {
        let error = VoxreelError::Other("unexpected error".to_string());
        assert_eq!(error.to_string(), "unexpected error");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxreelError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoxreelError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: VoxreelError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxreelError>();
        assert_sync::<VoxreelError>();
    }
}
