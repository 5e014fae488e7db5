//! Failure classification for synthesis calls.
//!
//! Every transport failure is mapped to a [`FailureKind`], which decides
//! whether the call is retried and how long the client backs off first.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Caps the backoff exponent so the shift can never overflow.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Number of characters of request text included in malformed-request errors.
const PREVIEW_CHARS: usize = 80;

/// Classified reason a single call attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Server-side error (HTTP 5xx).
    Server,
    /// Rate limit or quota signal (HTTP 429).
    RateLimited,
    /// The request itself was rejected (HTTP 400 and friends).
    BadRequest,
    /// Connection failure or timeout.
    Network,
    /// Missing or insufficient credentials (HTTP 401/403).
    Unauthorized,
}

impl FailureKind {
    /// Classifies an HTTP status code. Returns `None` for success codes.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 => Some(Self::Unauthorized),
            408 => Some(Self::Network),
            429 => Some(Self::RateLimited),
            400..=499 => Some(Self::BadRequest),
            _ => Some(Self::Server),
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Server | Self::RateLimited | Self::Network)
    }

    /// Multiplier applied to `2^attempt` seconds, or `None` if not retryable.
    pub fn backoff_factor(self) -> Option<u64> {
        match self {
            Self::Server => Some(2),
            Self::RateLimited => Some(3),
            Self::Network => Some(1),
            Self::BadRequest | Self::Unauthorized => None,
        }
    }

    /// Backoff before the retry that follows failed attempt `attempt` (0-based),
    /// without jitter.
    pub fn backoff(self, attempt: u32) -> Option<Duration> {
        let factor = self.backoff_factor()?;
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
        Some(Duration::from_secs((1u64 << exponent) * factor))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server error",
            Self::RateLimited => "rate limited",
            Self::BadRequest => "bad request",
            Self::Network => "network error",
            Self::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed call attempt as reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct CallFailure {
    pub kind: FailureKind,
    pub message: String,
    /// HTTP status, when the failure came from a response.
    pub status: Option<u16>,
}

impl CallFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Final outcome of a failed [`ResilientClient::call`](crate::call::ResilientClient::call).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("request rejected as malformed ({request_bytes} bytes, text {preview:?}): {message}")]
    Malformed {
        request_bytes: usize,
        preview: String,
        message: String,
    },

    #[error("not authorized: {message}")]
    Unauthorized { message: String },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: CallFailure },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("no credential has quota left for voice {voice} ({chars} characters)")]
    NoCredential { voice: String, chars: usize },
}

impl CallError {
    /// Builds the non-retryable error for a failure that must not be retried.
    pub(crate) fn fatal(failure: CallFailure, text: &str) -> Self {
        match failure.kind {
            FailureKind::Unauthorized => Self::Unauthorized {
                message: failure.message,
            },
            _ => Self::Malformed {
                request_bytes: text.len(),
                preview: text.chars().take(PREVIEW_CHARS).collect(),
                message: failure.message,
            },
        }
    }

    /// True if the error came from exhausting retries on transient failures.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
