//! Chunked speech synthesis: split, pick a key, call, record usage.

use crate::call::client::ResilientClient;
use crate::call::failure::CallError;
use crate::call::quota::QuotaTracker;
use crate::cancel::CancellationToken;
use crate::chunker::{ChunkerConfig, split_text_with};
use crate::error::Result;
use std::sync::Arc;

/// Audio returned for each chunk, in chunk order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeechSegments {
    segments: Vec<Vec<u8>>,
}

impl SpeechSegments {
    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    /// Joins all segments into one buffer.
    ///
    /// Fine for frame-based formats such as MP3; container formats need a
    /// proper muxer instead.
    pub fn concat(&self) -> Vec<u8> {
        self.segments.concat()
    }
}

/// Turns arbitrarily long text into speech through a byte-limited API.
pub struct ChunkedSynthesis {
    client: ResilientClient,
    quota: Arc<dyn QuotaTracker>,
    chunker: ChunkerConfig,
}

impl ChunkedSynthesis {
    pub fn new(client: ResilientClient, quota: Arc<dyn QuotaTracker>) -> Self {
        Self {
            client,
            quota,
            chunker: ChunkerConfig::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    /// Synthesizes `text` chunk by chunk.
    ///
    /// Chunking failures surface before any network call. Usage is recorded
    /// against the key that served each chunk, only after that chunk
    /// succeeded.
    pub fn synthesize(
        &self,
        text: &str,
        voice: &str,
        cancel: &CancellationToken,
    ) -> Result<SpeechSegments> {
        let chunks = split_text_with(text, &self.chunker)?;
        let mut segments = Vec::with_capacity(chunks.len());

        for (index, chunk) in chunks.iter().enumerate() {
            let chars = chunk.chars().count();
            let key = self
                .quota
                .select_key(voice, chars)
                .ok_or_else(|| CallError::NoCredential {
                    voice: voice.to_string(),
                    chars,
                })?;

            tracing::debug!(
                chunk = index + 1,
                of = chunks.len(),
                bytes = chunk.len(),
                key = key.name(),
                "synthesizing chunk"
            );
            let audio = self.client.call(chunk, voice, &key, cancel)?;
            self.quota.record_usage(&key, voice, chars);
            segments.push(audio);
        }

        Ok(SpeechSegments { segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::backoff::{NoJitter, RecordingSleeper, RetryPolicy};
    use crate::call::failure::FailureKind;
    use crate::call::quota::{Allowance, KeyPool, VoiceTier};
    use crate::call::transport::{ApiKey, ScriptedTransport};
    use crate::error::VoxreelError;

    const VOICE: &str = "en-US-Standard-C";

    fn synthesis(
        transport: Arc<ScriptedTransport>,
        quota: Arc<dyn QuotaTracker>,
        budget: usize,
    ) -> ChunkedSynthesis {
        let client = ResilientClient::new(transport, RetryPolicy::default())
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .with_jitter(Arc::new(NoJitter));
        ChunkedSynthesis::new(client, quota).with_chunker(ChunkerConfig::with_budget(budget))
    }

    fn unlimited_pool() -> Arc<KeyPool> {
        Arc::new(KeyPool::new().with_key(ApiKey::new("main", "s"), Allowance::unlimited()))
    }

    #[test]
    fn one_call_per_chunk_in_order() {
        let transport = Arc::new(ScriptedTransport::new());
        let text = "First sentence is here. Second sentence is here. Third one too.";
        let synth = synthesis(transport.clone(), unlimited_pool(), 30);

        let speech = synth.synthesize(text, VOICE, &CancellationToken::new()).unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), speech.len());
        assert_eq!(
            requests.iter().map(|r| r.text.as_str()).collect::<Vec<_>>(),
            vec![
                "First sentence is here.",
                "Second sentence is here.",
                "Third one too."
            ]
        );
        // The scripted transport echoes text, so the audio reflects the chunks.
        assert_eq!(speech.segments()[0], b"First sentence is here.".to_vec());
        assert_eq!(speech.total_bytes(), speech.concat().len());
    }

    #[test]
    fn usage_is_recorded_per_chunk() {
        let pool = Arc::new(KeyPool::new().with_key(
            ApiKey::new("main", "s"),
            Allowance {
                standard: Some(1000),
                premium: None,
            },
        ));
        let synth = synthesis(Arc::new(ScriptedTransport::new()), pool.clone(), 4000);

        synth
            .synthesize("Twelve chars", VOICE, &CancellationToken::new())
            .unwrap();

        assert_eq!(pool.remaining("main", VoiceTier::Standard), Some(988));
    }

    #[test]
    fn rotates_keys_between_chunks() {
        let pool = Arc::new(
            KeyPool::new()
                .with_key(
                    ApiKey::new("small", "a"),
                    Allowance {
                        standard: Some(30),
                        premium: None,
                    },
                )
                .with_key(ApiKey::new("big", "b"), Allowance::unlimited()),
        );
        let transport = Arc::new(ScriptedTransport::new());
        let synth = synthesis(transport.clone(), pool, 30);

        synth
            .synthesize(
                "First sentence is here. Second sentence is here.",
                VOICE,
                &CancellationToken::new(),
            )
            .unwrap();

        let keys: Vec<String> = transport.requests().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["small".to_string(), "big".to_string()]);
    }

    #[test]
    fn no_credential_fails_without_calling() {
        let pool = Arc::new(KeyPool::new());
        let transport = Arc::new(ScriptedTransport::new());
        let synth = synthesis(transport.clone(), pool, 4000);

        let err = synth
            .synthesize("Some text to speak.", VOICE, &CancellationToken::new())
            .unwrap_err();

        assert!(matches!(
            err,
            VoxreelError::Call(CallError::NoCredential { .. })
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn chunking_failure_happens_before_network() {
        let transport = Arc::new(ScriptedTransport::new());
        let synth = synthesis(transport.clone(), unlimited_pool(), 4000);

        let err = synth
            .synthesize("   ", VOICE, &CancellationToken::new())
            .unwrap_err();

        assert!(matches!(err, VoxreelError::Chunking { .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn call_failure_stops_remaining_chunks() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .then_ok(b"a".to_vec())
                .always_fail(FailureKind::Unauthorized, "revoked"),
        );
        let pool = unlimited_pool();
        let synth = synthesis(transport.clone(), pool, 30);

        let err = synth
            .synthesize(
                "First sentence is here. Second sentence is here. Third one too.",
                VOICE,
                &CancellationToken::new(),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            VoxreelError::Call(CallError::Unauthorized { .. })
        ));
        assert_eq!(transport.calls(), 2);
    }
}
