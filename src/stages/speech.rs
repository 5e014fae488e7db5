//! Stage 1 backed by the chunked synthesis call layer.

use crate::call::ChunkedSynthesis;
use crate::cancel::CancellationToken;
use crate::pipeline::{Artifact, Job, StageError, Synthesizer};
use std::borrow::Cow;
use std::fs;
use std::path::PathBuf;

/// Synthesizes a job's text and writes the audio to the work directory.
///
/// The job payload supplies the input:
/// - `text`: the text to speak, or
/// - `text_file`: a path to a UTF-8 file holding it;
/// - `voice` (optional): overrides the default voice.
pub struct SpeechSynthesizer {
    synthesis: ChunkedSynthesis,
    work_dir: PathBuf,
    extension: String,
    default_voice: String,
}

impl SpeechSynthesizer {
    pub fn new(
        synthesis: ChunkedSynthesis,
        work_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        default_voice: impl Into<String>,
    ) -> Self {
        Self {
            synthesis,
            work_dir: work_dir.into(),
            extension: extension.into(),
            default_voice: default_voice.into(),
        }
    }

    pub fn output_path(&self, job: &Job) -> PathBuf {
        self.work_dir.join(format!("{}.{}", job.id, self.extension))
    }

    fn job_text<'a>(job: &'a Job) -> Result<Cow<'a, str>, StageError> {
        if let Some(text) = job.payload_str("text") {
            return Ok(Cow::Borrowed(text));
        }
        if let Some(path) = job.payload_str("text_file") {
            return fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|e| StageError::failed(format!("Failed to read {path}: {e}")));
        }
        Err(StageError::failed(
            "job payload has neither \"text\" nor \"text_file\"",
        ))
    }
}

impl Synthesizer for SpeechSynthesizer {
    fn synthesize(&self, job: &Job, cancel: &CancellationToken) -> Result<Artifact, StageError> {
        let text = Self::job_text(job)?;
        let voice = job.payload_str("voice").unwrap_or(&self.default_voice);

        let speech = self.synthesis.synthesize(&text, voice, cancel)?;
        let audio = speech.concat();

        let path = self.output_path(job);
        fs::write(&path, &audio)
            .map_err(|e| StageError::failed(format!("Failed to write {}: {e}", path.display())))?;

        tracing::debug!(
            job = %job.id,
            chunks = speech.len(),
            bytes = audio.len(),
            "audio written"
        );
        Ok(Artifact::new(path).with_bytes(audio.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{
        ApiKey, FailureKind, NoJitter, RecordingSleeper, ResilientClient, RetryPolicy,
        ScriptedTransport, SingleKey,
    };
    use crate::chunker::ChunkerConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn synthesizer(transport: Arc<ScriptedTransport>, dir: &std::path::Path) -> SpeechSynthesizer {
        let client = ResilientClient::new(transport, RetryPolicy::default())
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .with_jitter(Arc::new(NoJitter));
        let synthesis = ChunkedSynthesis::new(client, Arc::new(SingleKey::new(ApiKey::new("k", "s"))))
            .with_chunker(ChunkerConfig::with_budget(30));
        SpeechSynthesizer::new(synthesis, dir, "mp3", "en-US-Standard-C")
    }

    #[test]
    fn test_writes_concatenated_audio() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let synth = synthesizer(transport.clone(), dir.path());
        let job = Job::new("ep1", "Episode 1").with_payload(json!({
            "text": "First sentence is here. Second sentence is here.",
            "voice": "en-GB-Wavenet-B",
        }));

        let artifact = synth.synthesize(&job, &CancellationToken::new()).unwrap();

        assert_eq!(artifact.path(), dir.path().join("ep1.mp3"));
        let written = fs::read(artifact.path()).unwrap();
        // The scripted transport echoes each chunk back.
        assert_eq!(written, b"First sentence is here.Second sentence is here.".to_vec());
        assert_eq!(artifact.bytes, Some(written.len() as u64));
        assert!(
            transport
                .requests()
                .iter()
                .all(|r| r.voice == "en-GB-Wavenet-B")
        );
    }

    #[test]
    fn test_reads_text_file_and_uses_default_voice() {
        let dir = tempfile::tempdir().unwrap();
        let text_path = dir.path().join("script.txt");
        fs::write(&text_path, "Short script.").unwrap();

        let transport = Arc::new(ScriptedTransport::new());
        let synth = synthesizer(transport.clone(), dir.path());
        let job = Job::new("ep2", "Episode 2").with_payload(json!({
            "text_file": text_path.display().to_string(),
        }));

        synth.synthesize(&job, &CancellationToken::new()).unwrap();
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].voice, "en-US-Standard-C");
        assert_eq!(requests[0].text, "Short script.");
    }

    #[test]
    fn test_missing_text_fails() {
        let dir = tempfile::tempdir().unwrap();
        let synth = synthesizer(Arc::new(ScriptedTransport::new()), dir.path());
        let err = synth
            .synthesize(&Job::new("x", "X"), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, StageError::Failed(msg) if msg.contains("text")));
    }

    #[test]
    fn test_call_failure_becomes_stage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transport =
            Arc::new(ScriptedTransport::new().always_fail(FailureKind::BadRequest, "bad ssml"));
        let synth = synthesizer(transport, dir.path());
        let job = Job::new("x", "X").with_payload(json!({"text": "Hello there."}));

        let err = synth.synthesize(&job, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, StageError::Failed(_)));
        assert!(!dir.path().join("x.mp3").exists());
    }
}
