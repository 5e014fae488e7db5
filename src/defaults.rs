//! Default configuration constants for voxreel.
//!
//! Shared by the configuration layer and the library so both agree on
//! budgets, retry limits, and pipeline timings.

/// Hard request-size limit of the consumed speech-synthesis API, in bytes.
pub const WIRE_LIMIT_BYTES: usize = 5000;

/// Default byte budget per text chunk.
///
/// Kept conservatively below [`WIRE_LIMIT_BYTES`] so request envelopes and
/// markup added by the transport never push a chunk over the wire limit.
pub const SAFE_LIMIT_BYTES: usize = 4000;

/// Chunks shorter than this are treated as splitting artifacts and merged
/// into a neighbour.
pub const MIN_CHUNK_BYTES: usize = 10;

/// Default number of attempts a call makes before giving up.
pub const MAX_RETRIES: u32 = 5;

/// Default per-attempt call timeout in seconds.
pub const CALL_TIMEOUT_SECS: u64 = 90;

/// Upper bound of the random jitter added to each backoff delay, in milliseconds.
pub const JITTER_MAX_MS: u64 = 1000;

/// How long a stage worker waits on its queue before re-checking
/// cancellation and upstream completion.
pub const POLL_INTERVAL_MS: u64 = 1000;

/// How long `wait_completion` waits for worker threads before detaching them.
pub const JOIN_TIMEOUT_SECS: u64 = 5;

/// Queue capacity. Zero means unbounded.
pub const QUEUE_CAPACITY: usize = 0;

/// Default voice name sent with synthesis requests.
pub const DEFAULT_VOICE: &str = "en-US-Standard-C";
