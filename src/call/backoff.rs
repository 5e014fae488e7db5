//! Retry delays: policy, jitter, and interruptible sleeping.
//!
//! Jitter and sleeping sit behind traits so tests can run the full retry
//! loop without waiting on real time.

use crate::call::failure::FailureKind;
use crate::cancel::CancellationToken;
use crate::defaults;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Retry settings for [`ResilientClient`](crate::call::ResilientClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_retries: u32,
    /// Timeout of a single attempt.
    pub timeout: Duration,
    /// Upper bound of the jitter added to each backoff delay.
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            timeout: Duration::from_secs(defaults::CALL_TIMEOUT_SECS),
            jitter_max: Duration::from_millis(defaults::JITTER_MAX_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt `attempt` (0-based).
    ///
    /// `None` means the failure is not retryable.
    pub fn delay(&self, kind: FailureKind, attempt: u32, jitter: &dyn Jitter) -> Option<Duration> {
        kind.backoff(attempt)
            .map(|base| base + jitter.sample(self.jitter_max))
    }
}

/// Source of random jitter.
pub trait Jitter: Send + Sync {
    /// Returns a duration in `[0, max)`, or zero when `max` is zero.
    fn sample(&self, max: Duration) -> Duration;
}

/// Jitter drawn from the standard library's randomly keyed hasher.
#[derive(Debug, Default)]
pub struct RandomJitter {
    counter: AtomicU64,
}

impl Jitter for RandomJitter {
    fn sample(&self, max: Duration) -> Duration {
        let bound = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }

        let mut hasher = RandomState::new().build_hasher();
        hasher.write_u64(self.counter.fetch_add(1, Ordering::Relaxed));
        if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
            hasher.write_u128(now.as_nanos());
        }
        Duration::from_nanos(hasher.finish() % bound)
    }
}

/// No jitter at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn sample(&self, _max: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Waits out a backoff delay.
pub trait Sleeper: Send + Sync {
    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `false` if the sleep was cut short by cancellation.
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool;
}

/// Real sleeping that wakes up on cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSleeper;

impl Sleeper for SystemSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        !cancel.wait_timeout(duration)
    }
}

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        !cancel.is_cancelled()
    }
}
