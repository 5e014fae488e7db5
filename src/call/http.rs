//! HTTP transport for a JSON speech-synthesis endpoint.

use crate::call::failure::{CallFailure, FailureKind};
use crate::call::transport::{CallRequest, Transport};
use crate::error::{Result, VoxreelError};

/// Longest response body quoted in a failure message.
const MAX_ERROR_BODY: usize = 300;

/// Header carrying the API key unless overridden.
pub const DEFAULT_KEY_HEADER: &str = "x-api-key";

/// Posts `{"input": {"text": ...}, "voice": {"name": ...}}` to an endpoint and
/// returns the raw response body.
///
/// Decoding the body (raw audio or an encoded field) is left to the caller;
/// this transport only moves bytes and classifies failures.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    endpoint: String,
    key_header: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("voxreel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VoxreelError::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            key_header: DEFAULT_KEY_HEADER.to_string(),
        })
    }

    pub fn with_key_header(mut self, header: impl Into<String>) -> Self {
        self.key_header = header.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &CallRequest<'_>) -> std::result::Result<Vec<u8>, CallFailure> {
        let body = serde_json::json!({
            "input": { "text": request.text },
            "voice": { "name": request.voice },
        });

        let mut builder = self.client.post(&self.endpoint).timeout(request.timeout);
        // An empty secret means the endpoint takes no credentials.
        if !request.key.secret().is_empty() {
            builder = builder.header(self.key_header.as_str(), request.key.secret());
        }
        let response = builder
            .json(&body)
            .send()
            .map_err(classify_transport_error)?;

        let status = response.status();
        if let Some(kind) = FailureKind::from_status(status.as_u16()) {
            let detail = response.text().unwrap_or_default();
            let detail: String = detail.chars().take(MAX_ERROR_BODY).collect();
            return Err(
                CallFailure::new(kind, format!("{status}: {detail}")).with_status(status.as_u16())
            );
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(classify_transport_error)
    }
}

fn classify_transport_error(error: reqwest::Error) -> CallFailure {
    if let Some(status) = error.status()
        && let Some(kind) = FailureKind::from_status(status.as_u16())
    {
        return CallFailure::new(kind, error.to_string()).with_status(status.as_u16());
    }
    if error.is_builder() {
        return CallFailure::new(FailureKind::BadRequest, error.to_string());
    }
    // Timeouts, refused connections, resets and truncated bodies.
    CallFailure::new(FailureKind::Network, error.to_string())
}
