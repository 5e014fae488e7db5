//! Resilient call layer feeding the synthesis stage.
//!
//! A byte-budget chunker cuts text to the API's request limit; the
//! [`ResilientClient`] retries transient failures with classified backoff;
//! a [`QuotaTracker`] picks the credential for each chunk.

pub mod backoff;
pub mod client;
pub mod failure;
#[cfg(feature = "http")]
pub mod http;
pub mod quota;
pub mod synthesis;
pub mod transport;

pub use backoff::{
    Jitter, NoJitter, RandomJitter, RecordingSleeper, RetryPolicy, Sleeper, SystemSleeper,
};
pub use client::ResilientClient;
pub use failure::{CallError, CallFailure, FailureKind};
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use quota::{Allowance, KeyPool, QuotaTracker, SingleKey, VoiceTier};
pub use synthesis::{ChunkedSynthesis, SpeechSegments};
pub use transport::{ApiKey, CallRequest, RecordedRequest, ScriptedTransport, Transport};
