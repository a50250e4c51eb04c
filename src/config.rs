use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::CaptureConfig;
use crate::backoff::Backoff;
use crate::connection::ReconnectPolicy;
use crate::protocol::AudioEncoding;
use crate::session::SessionConfig;

/// Environment variables override file values, e.g. `CLARIFAI__IDENTITY__TOKEN`
pub const ENV_PREFIX: &str = "CLARIFAI";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub endpoints: EndpointsConfig,
    pub identity: IdentityConfig,
    pub reconnect: ReconnectConfig,
    pub audio: AudioConfig,
    pub explain: ExplainConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "clarifai-stream".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub transcription_url: String,
    pub explain_url: Option<String>,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            transcription_url: session.transcription_url,
            explain_url: session.explain_url,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            connect_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub frame_interval_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: AudioEncoding,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 250,
            sample_rate: 16000,
            channels: 1,
            encoding: AudioEncoding::Binary,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    pub timeout_ms: u64,
    pub speak: bool,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            speak: false,
        }
    }
}

impl Config {
    /// Load `path` (extension optional, file optional) under `CLARIFAI__*`
    /// environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {path}"))?;

        let config: Self = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoints.transcription_url.trim().is_empty() {
            anyhow::bail!("endpoints.transcription_url must not be empty");
        }
        if self.reconnect.base_delay_ms == 0 || self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            anyhow::bail!(
                "reconnect delays must satisfy 0 < base_delay_ms <= max_delay_ms (got {} and {})",
                self.reconnect.base_delay_ms,
                self.reconnect.max_delay_ms
            );
        }
        if self.audio.frame_interval_ms == 0 {
            anyhow::bail!("audio.frame_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            backoff: Backoff::new(
                Duration::from_millis(self.reconnect.base_delay_ms),
                Duration::from_millis(self.reconnect.max_delay_ms),
            ),
            max_attempts: self.reconnect.max_attempts,
            connect_timeout: Duration::from_millis(self.reconnect.connect_timeout_ms),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_sample_rate: self.audio.sample_rate,
            target_channels: self.audio.channels,
            frame_interval: Duration::from_millis(self.audio.frame_interval_ms),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            transcription_url: self.endpoints.transcription_url.clone(),
            explain_url: self
                .endpoints
                .explain_url
                .clone()
                .filter(|url| !url.trim().is_empty()),
            user_id: self.identity.user_id.clone(),
            token: self.identity.token.clone(),
            policy: self.reconnect_policy(),
            audio_encoding: self.audio.encoding,
            explain_timeout: Duration::from_millis(self.explain.timeout_ms),
            speak_explanations: self.explain.speak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/clarifai-stream").unwrap();
        assert_eq!(config.service.name, "clarifai-stream");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.audio.frame_interval_ms, 250);
        assert_eq!(config.audio.encoding, AudioEncoding::Binary);

        let session = config.session_config();
        assert_eq!(session.policy, ReconnectPolicy::default());
        assert_eq!(session.explain_timeout, Duration::from_secs(30));
        assert!(!session.speak_explanations);
    }

    #[test]
    fn test_file_values_flow_into_session_config() {
        let file = write_config(
            r#"
[endpoints]
transcription_url = "wss://lectures.example/ws/audio-to-text"
explain_url = ""

[identity]
user_id = "student-7"
mode = "lecture"

[reconnect]
base_delay_ms = 500
max_delay_ms = 8000
max_attempts = 3
connect_timeout_ms = 2000

[audio]
frame_interval_ms = 100
encoding = "base64-json"

[explain]
timeout_ms = 10000
speak = true
"#,
        );

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        let session = config.session_config();

        assert_eq!(session.transcription_url, "wss://lectures.example/ws/audio-to-text");
        assert_eq!(session.explain_url, None);
        assert_eq!(session.user_id.as_deref(), Some("student-7"));
        assert_eq!(config.identity.mode.as_deref(), Some("lecture"));
        assert_eq!(session.policy.max_attempts, 3);
        assert_eq!(session.policy.backoff.base(), Duration::from_millis(500));
        assert_eq!(session.policy.backoff.max(), Duration::from_secs(8));
        assert_eq!(session.policy.connect_timeout, Duration::from_secs(2));
        assert_eq!(session.audio_encoding, AudioEncoding::Base64Json);
        assert_eq!(session.explain_timeout, Duration::from_secs(10));
        assert!(session.speak_explanations);
        assert_eq!(config.capture_config().frame_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let file = write_config(
            r#"
[reconnect]
base_delay_ms = 5000
max_delay_ms = 1000
"#,
        );

        let err = Config::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("base_delay_ms"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config(
            r#"
[identity]
user_id = "from-file"
"#,
        );
        std::env::set_var("CLARIFAI__IDENTITY__TOKEN", "secret-token");

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        std::env::remove_var("CLARIFAI__IDENTITY__TOKEN");

        assert_eq!(config.identity.user_id.as_deref(), Some("from-file"));
        assert_eq!(config.session_config().token.as_deref(), Some("secret-token"));
    }
}
