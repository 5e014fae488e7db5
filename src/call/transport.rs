//! The single network call underneath the resilient client.

use crate::call::failure::{CallFailure, FailureKind};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A resolved credential for the synthesis endpoint.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    name: String,
    secret: String,
}

impl ApiKey {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
        }
    }

    /// Label used for logging and usage accounting.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One synthesis request as handed to a transport.
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    pub text: &'a str,
    pub voice: &'a str,
    pub key: &'a ApiKey,
    /// Upper bound for this attempt; the transport must enforce it.
    pub timeout: Duration,
}

/// Sends one request and classifies any failure.
///
/// Implementations make exactly one attempt; retrying is the client's job.
pub trait Transport: Send + Sync {
    fn send(&self, request: &CallRequest<'_>) -> Result<Vec<u8>, CallFailure>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: &CallRequest<'_>) -> Result<Vec<u8>, CallFailure> {
        (**self).send(request)
    }
}

/// A request as observed by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub key: String,
    pub voice: String,
    pub text: String,
}

/// Transport that replays a scripted sequence of outcomes.
///
/// Once the script is exhausted every further call gets the fallback
/// outcome, which by default echoes the request text back as bytes.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Vec<u8>, CallFailure>>>,
    fallback: Option<CallFailure>,
    calls: AtomicU32,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a successful response.
    pub fn then_ok(self, body: impl Into<Vec<u8>>) -> Self {
        self.push(Ok(body.into()))
    }

    /// Queues a failed attempt.
    pub fn then_fail(self, kind: FailureKind, message: &str) -> Self {
        self.push(Err(CallFailure::new(kind, message)))
    }

    /// Fails every call not covered by the script.
    pub fn always_fail(mut self, kind: FailureKind, message: &str) -> Self {
        self.fallback = Some(CallFailure::new(kind, message));
        self
    }

    /// Number of `send` calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(self, outcome: Result<Vec<u8>, CallFailure>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
        self
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &CallRequest<'_>) -> Result<Vec<u8>, CallFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                key: request.key.name().to_string(),
                voice: request.voice.to_string(),
                text: request.text.to_string(),
            });

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match (scripted, &self.fallback) {
            (Some(outcome), _) => outcome,
            (None, Some(failure)) => Err(failure.clone()),
            (None, None) => Ok(request.text.as_bytes().to_vec()),
        }
    }
}
