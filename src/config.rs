use crate::call::{Allowance, ApiKey, KeyPool, QuotaTracker, RetryPolicy, SingleKey};
use crate::chunker::ChunkerConfig;
use crate::defaults;
use crate::error::{Result, VoxreelError};
use crate::pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineSettings,
    pub call: CallSettings,
    pub stages: StageSettings,
}

/// Worker and queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub poll_interval_ms: u64,
    pub join_timeout_secs: u64,
    /// Zero means unbounded.
    pub queue_capacity: usize,
}

/// Speech-synthesis endpoint, retry and chunking settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallSettings {
    /// HTTP endpoint; when unset, stage 1 runs `stages.synthesize` instead.
    pub endpoint: Option<String>,
    pub key_header: String,
    pub voice: String,
    /// Total attempts per call, including the first.
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub jitter_max_ms: u64,
    pub safe_limit_bytes: usize,
    pub min_chunk_bytes: usize,
    pub keys: Vec<KeySettings>,
}

/// One API key and its character allowance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeySettings {
    pub name: String,
    pub secret: String,
    /// Characters available for standard voices; unset means unlimited.
    #[serde(default)]
    pub standard_chars: Option<usize>,
    /// Characters available for premium voices; unset means unlimited.
    #[serde(default)]
    pub premium_chars: Option<usize>,
}

/// Artifact locations and external stage commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageSettings {
    pub work_dir: PathBuf,
    pub audio_extension: String,
    pub visual_extension: String,
    pub output_extension: String,
    /// Command template used for synthesis when no endpoint is configured.
    pub synthesize: Vec<String>,
    pub render: Vec<String>,
    pub combine: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            join_timeout_secs: defaults::JOIN_TIMEOUT_SECS,
            queue_capacity: defaults::QUEUE_CAPACITY,
        }
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            key_header: "x-api-key".to_string(),
            voice: defaults::DEFAULT_VOICE.to_string(),
            max_retries: defaults::MAX_RETRIES,
            timeout_secs: defaults::CALL_TIMEOUT_SECS,
            jitter_max_ms: defaults::JITTER_MAX_MS,
            safe_limit_bytes: defaults::SAFE_LIMIT_BYTES,
            min_chunk_bytes: defaults::MIN_CHUNK_BYTES,
            keys: Vec::new(),
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("voxreel-out"),
            audio_extension: "mp3".to_string(),
            visual_extension: "mkv".to_string(),
            output_extension: "mp4".to_string(),
            synthesize: argv(&["espeak-ng", "-w", "{output}", "{payload.text}"]),
            render: argv(&[
                "ffmpeg", "-y", "-loglevel", "error",
                "-f", "lavfi", "-i", "color=c=black:s=1280x720:r=25",
                "-i", "{audio}", "-shortest", "-map", "0:v",
                "-c:v", "libx264", "-tune", "stillimage", "{output}",
            ]),
            combine: argv(&[
                "ffmpeg", "-y", "-loglevel", "error",
                "-i", "{visual}", "-i", "{audio}",
                "-c:v", "copy", "-c:a", "aac", "-shortest", "{output}",
            ]),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXREEL_MAX_RETRIES → call.max_retries
    /// - VOXREEL_SAFE_LIMIT_BYTES → call.safe_limit_bytes
    /// - VOXREEL_ENDPOINT → call.endpoint
    /// - VOXREEL_API_KEY → an unlimited key named "env", tried first
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("VOXREEL_MAX_RETRIES")
            && !value.is_empty()
        {
            match value.parse() {
                Ok(n) => self.call.max_retries = n,
                Err(e) => tracing::warn!("ignoring VOXREEL_MAX_RETRIES={value}: {e}"),
            }
        }

        if let Ok(value) = std::env::var("VOXREEL_SAFE_LIMIT_BYTES")
            && !value.is_empty()
        {
            match value.parse() {
                Ok(n) => self.call.safe_limit_bytes = n,
                Err(e) => tracing::warn!("ignoring VOXREEL_SAFE_LIMIT_BYTES={value}: {e}"),
            }
        }

        if let Ok(endpoint) = std::env::var("VOXREEL_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.call.endpoint = Some(endpoint);
        }

        if let Ok(secret) = std::env::var("VOXREEL_API_KEY")
            && !secret.is_empty()
        {
            self.call.keys.retain(|k| k.name != "env");
            self.call.keys.insert(
                0,
                KeySettings {
                    name: "env".to_string(),
                    secret,
                    standard_chars: None,
                    premium_chars: None,
                },
            );
        }

        self
    }

    /// Checks values that would otherwise fail deep inside the pipeline.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: impl Into<String>) -> Result<()> {
            Err(VoxreelError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.into(),
            })
        }

        let call = &self.call;
        if call.max_retries == 0 {
            return invalid("call.max_retries", "must be at least 1");
        }
        if call.timeout_secs == 0 {
            return invalid("call.timeout_secs", "must be at least 1");
        }
        if call.safe_limit_bytes < 4 || call.safe_limit_bytes > defaults::WIRE_LIMIT_BYTES {
            return invalid(
                "call.safe_limit_bytes",
                format!("must be between 4 and {}", defaults::WIRE_LIMIT_BYTES),
            );
        }
        if call.min_chunk_bytes >= call.safe_limit_bytes {
            return invalid("call.min_chunk_bytes", "must be below call.safe_limit_bytes");
        }
        if call.voice.trim().is_empty() {
            return invalid("call.voice", "must not be empty");
        }

        let mut names = HashSet::new();
        for key in &call.keys {
            if key.secret.is_empty() {
                return invalid("call.keys", format!("key '{}' has an empty secret", key.name));
            }
            if !names.insert(key.name.as_str()) {
                return invalid("call.keys", format!("duplicate key name '{}'", key.name));
            }
        }

        if self.pipeline.poll_interval_ms == 0 {
            return invalid("pipeline.poll_interval_ms", "must be at least 1");
        }

        let stages = &self.stages;
        for (key, template) in [
            ("stages.render", &stages.render),
            ("stages.combine", &stages.combine),
        ] {
            if template.is_empty() {
                return invalid(key, "command template must not be empty");
            }
        }
        if call.endpoint.is_none() && stages.synthesize.is_empty() {
            return invalid(
                "stages.synthesize",
                "needed when call.endpoint is not set",
            );
        }
        for (key, ext) in [
            ("stages.audio_extension", &stages.audio_extension),
            ("stages.visual_extension", &stages.visual_extension),
            ("stages.output_extension", &stages.output_extension),
        ] {
            if ext.is_empty() || ext.contains(['/', '\\']) {
                return invalid(key, "must be a plain file extension");
            }
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.call.max_retries,
            timeout: Duration::from_secs(self.call.timeout_secs),
            jitter_max: Duration::from_millis(self.call.jitter_max_ms),
        }
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            budget_bytes: self.call.safe_limit_bytes,
            min_chunk_bytes: self.call.min_chunk_bytes,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(self.pipeline.poll_interval_ms),
            join_timeout: Duration::from_secs(self.pipeline.join_timeout_secs),
            queue_capacity: self.pipeline.queue_capacity,
        }
    }

    /// Key selection for the configured keys.
    ///
    /// Without any key, requests go out unauthenticated under the name
    /// "anonymous".
    pub fn quota_tracker(&self) -> Arc<dyn QuotaTracker> {
        if self.call.keys.is_empty() {
            return Arc::new(SingleKey::new(ApiKey::new("anonymous", "")));
        }
        let pool = self.call.keys.iter().fold(KeyPool::new(), |pool, key| {
            pool.with_key(
                ApiKey::new(key.name.clone(), key.secret.clone()),
                Allowance {
                    standard: key.standard_chars,
                    premium: key.premium_chars,
                },
            )
        });
        Arc::new(pool)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxreel/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voxreel")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxreel_env() {
        remove_env("VOXREEL_MAX_RETRIES");
        remove_env("VOXREEL_SAFE_LIMIT_BYTES");
        remove_env("VOXREEL_ENDPOINT");
        remove_env("VOXREEL_API_KEY");
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.pipeline.poll_interval_ms, 1000);
        assert_eq!(config.pipeline.join_timeout_secs, 5);
        assert_eq!(config.pipeline.queue_capacity, 0);

        assert_eq!(config.call.endpoint, None);
        assert_eq!(config.call.max_retries, 5);
        assert_eq!(config.call.timeout_secs, 90);
        assert_eq!(config.call.safe_limit_bytes, 4000);
        assert_eq!(config.call.min_chunk_bytes, 10);
        assert!(config.call.keys.is_empty());

        assert_eq!(config.stages.audio_extension, "mp3");
        assert_eq!(config.stages.render[0], "ffmpeg");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [pipeline]
            poll_interval_ms = 250
            join_timeout_secs = 10
            queue_capacity = 4

            [call]
            endpoint = "https://tts.example.com/v1/synthesize"
            voice = "en-GB-Wavenet-B"
            max_retries = 3
            safe_limit_bytes = 3000

            [[call.keys]]
            name = "primary"
            secret = "abc"
            standard_chars = 4000000
            premium_chars = 1000000

            [[call.keys]]
            name = "backup"
            secret = "def"

            [stages]
            work_dir = "/tmp/reels"
            render = ["render-tool", "{audio}", "{output}"]
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.pipeline.poll_interval_ms, 250);
        assert_eq!(config.pipeline.queue_capacity, 4);
        assert_eq!(
            config.call.endpoint.as_deref(),
            Some("https://tts.example.com/v1/synthesize")
        );
        assert_eq!(config.call.voice, "en-GB-Wavenet-B");
        assert_eq!(config.call.max_retries, 3);
        assert_eq!(config.call.keys.len(), 2);
        assert_eq!(config.call.keys[0].premium_chars, Some(1_000_000));
        assert_eq!(config.call.keys[1].standard_chars, None);
        assert_eq!(config.stages.work_dir, PathBuf::from("/tmp/reels"));
        assert_eq!(config.stages.render, vec!["render-tool", "{audio}", "{output}"]);
        // Untouched sections keep their defaults.
        assert_eq!(config.stages.combine, StageSettings::default().combine);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_settings() {
        let mut config = Config::default();
        config.call.max_retries = 3;
        config.call.timeout_secs = 30;
        config.call.safe_limit_bytes = 2000;
        config.pipeline.join_timeout_secs = 7;

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.timeout, Duration::from_secs(30));

        assert_eq!(config.chunker_config().budget_bytes, 2000);
        assert_eq!(config.pipeline_config().join_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_quota_tracker_from_keys() {
        let mut config = Config::default();
        let anonymous = config.quota_tracker().select_key("en-US-Standard-C", 10).unwrap();
        assert_eq!(anonymous.name(), "anonymous");

        config.call.keys = vec![
            KeySettings {
                name: "small".to_string(),
                secret: "a".to_string(),
                standard_chars: Some(5),
                premium_chars: None,
            },
            KeySettings {
                name: "big".to_string(),
                secret: "b".to_string(),
                standard_chars: None,
                premium_chars: None,
            },
        ];
        let tracker = config.quota_tracker();
        assert_eq!(tracker.select_key("en-US-Standard-C", 5).unwrap().name(), "small");
        assert_eq!(tracker.select_key("en-US-Standard-C", 6).unwrap().name(), "big");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases: Vec<(&str, Box<dyn Fn(&mut Config)>)> = vec![
            ("call.max_retries", Box::new(|c: &mut Config| c.call.max_retries = 0)),
            ("call.safe_limit_bytes", Box::new(|c: &mut Config| c.call.safe_limit_bytes = 6000)),
            ("call.safe_limit_bytes", Box::new(|c: &mut Config| c.call.safe_limit_bytes = 3)),
            ("call.min_chunk_bytes", Box::new(|c: &mut Config| c.call.min_chunk_bytes = 4000)),
            ("stages.render", Box::new(|c: &mut Config| c.stages.render.clear())),
            ("stages.synthesize", Box::new(|c: &mut Config| c.stages.synthesize.clear())),
            ("stages.output_extension", Box::new(|c: &mut Config| c.stages.output_extension = "a/b".into())),
            (
                "call.keys",
                Box::new(|c: &mut Config| {
                    let key = KeySettings {
                        name: "dup".to_string(),
                        secret: "s".to_string(),
                        standard_chars: None,
                        premium_chars: None,
                    };
                    c.call.keys = vec![key.clone(), key];
                }),
            ),
        ];

        for (expected_key, mutate) in cases {
            let mut config = Config::default();
            mutate(&mut config);
            match config.validate() {
                Err(VoxreelError::ConfigInvalidValue { key, .. }) => assert_eq!(key, expected_key),
                other => panic!("expected {expected_key} to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_synthesize_template_optional_with_endpoint() {
        let mut config = Config::default();
        config.stages.synthesize.clear();
        config.call.endpoint = Some("http://localhost:5002/api/tts".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_retries_and_budget() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxreel_env();

        set_env("VOXREEL_MAX_RETRIES", "2");
        set_env("VOXREEL_SAFE_LIMIT_BYTES", "1500");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.call.max_retries, 2);
        assert_eq!(config.call.safe_limit_bytes, 1500);
        assert_eq!(config.call.endpoint, None); // Not overridden

        clear_voxreel_env();
    }

    #[test]
    fn test_env_override_endpoint_and_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxreel_env();

        set_env("VOXREEL_ENDPOINT", "http://localhost:8080/tts");
        set_env("VOXREEL_API_KEY", "secret-from-env");
        let mut config = Config::default();
        config.call.keys.push(KeySettings {
            name: "file".to_string(),
            secret: "from-file".to_string(),
            standard_chars: None,
            premium_chars: None,
        });
        let config = config.with_env_overrides();

        assert_eq!(config.call.endpoint.as_deref(), Some("http://localhost:8080/tts"));
        assert_eq!(config.call.keys.len(), 2);
        assert_eq!(config.call.keys[0].name, "env");
        assert_eq!(config.call.keys[0].secret, "secret-from-env");

        clear_voxreel_env();
    }

    #[test]
    fn test_env_override_invalid_number_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxreel_env();

        set_env("VOXREEL_MAX_RETRIES", "lots");
        set_env("VOXREEL_ENDPOINT", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.call.max_retries, 5);
        assert_eq!(config.call.endpoint, None);

        clear_voxreel_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [call
            voice = "broken
        "#,
        );

        let result = Config::load(temp_file.path());

        assert!(result.is_err());
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("voxreel"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_voxreel_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let temp_file = write_config("[pipeline\npoll_interval_ms = ");

        let err = Config::load_or_default(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
