//! Resilient call client: one logical call, classified retries with backoff.

use crate::call::backoff::{Jitter, RandomJitter, RetryPolicy, Sleeper, SystemSleeper};
use crate::call::failure::CallError;
use crate::call::transport::{ApiKey, CallRequest, Transport};
use crate::cancel::CancellationToken;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wraps a [`Transport`] with retry, backoff, and failure classification.
///
/// The client holds no state between calls; attempt counting lives entirely
/// inside one [`call`](Self::call) invocation.
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn Jitter>,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            sleeper: Arc::new(SystemSleeper),
            jitter: Arc::new(RandomJitter::default()),
        }
    }

    /// Sets a custom sleeper (for deterministic testing).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Sets a custom jitter source.
    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Synthesizes `text` with `voice`, retrying transient failures.
    ///
    /// Makes at most `max_retries` attempts (at least one). Malformed-request
    /// and authorization failures are returned after the first attempt.
    /// Backoff sleeps end early with [`CallError::Cancelled`] when `cancel`
    /// fires.
    pub fn call(
        &self,
        text: &str,
        voice: &str,
        key: &ApiKey,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, CallError> {
        let max_attempts = self.policy.max_retries.max(1);
        let request = CallRequest {
            text,
            voice,
            key,
            timeout: self.policy.timeout,
        };

        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(CallError::Cancelled { attempts });
            }

            let failure = match self.transport.send(&request) {
                Ok(body) => {
                    if attempts > 0 {
                        debug!(attempts, key = key.name(), "call succeeded after retry");
                    }
                    return Ok(body);
                }
                Err(failure) => failure,
            };
            attempts += 1;

            let Some(delay) = self
                .policy
                .delay(failure.kind, attempts - 1, self.jitter.as_ref())
            else {
                warn!(
                    kind = %failure.kind,
                    bytes = text.len(),
                    error = %failure.message,
                    "call failed, not retryable"
                );
                return Err(CallError::fatal(failure, text));
            };

            if attempts >= max_attempts {
                warn!(
                    attempts,
                    kind = %failure.kind,
                    error = %failure.message,
                    "call failed, retries exhausted"
                );
                return Err(CallError::Exhausted {
                    attempts,
                    last: failure,
                });
            }

            warn!(
                attempt = attempts,
                max_attempts,
                kind = %failure.kind,
                delay_ms = delay.as_millis() as u64,
                error = %failure.message,
                "call failed, retrying"
            );
            if !self.sleeper.sleep(delay, cancel) {
                return Err(CallError::Cancelled { attempts });
            }
        }
    }
}
