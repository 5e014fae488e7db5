//! Errors returned by stage functions.

use std::fmt;

/// Outcome of a stage function that did not produce an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The job failed in this stage. Its journey ends and the message is
    /// recorded in the pipeline's error list.
    Failed(String),
    /// The stage function noticed cancellation and gave up early.
    Aborted,
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        StageError::Failed(message.into())
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Failed(msg) => write!(f, "{}", msg),
            StageError::Aborted => write!(f, "Aborted by cancellation"),
        }
    }
}

impl std::error::Error for StageError {}

impl From<crate::error::VoxreelError> for StageError {
    fn from(error: crate::error::VoxreelError) -> Self {
        match error {
            crate::error::VoxreelError::Call(crate::call::CallError::Cancelled { .. }) => {
                StageError::Aborted
            }
            other => StageError::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallError;
    use crate::error::VoxreelError;

    #[test]
    fn test_stage_error_display() {
        assert_eq!(StageError::failed("disk full").to_string(), "disk full");
        assert_eq!(StageError::Aborted.to_string(), "Aborted by cancellation");
    }

    #[test]
    fn test_cancelled_call_becomes_aborted() {
        let err: StageError = VoxreelError::Call(CallError::Cancelled { attempts: 2 }).into();
        assert_eq!(err, StageError::Aborted);
    }

    #[test]
    fn test_other_errors_become_failed() {
        let err: StageError = VoxreelError::Chunking {
            message: "empty text".to_string(),
        }
        .into();
        assert!(matches!(err, StageError::Failed(msg) if msg.contains("empty text")));
    }
}
