use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::connection::ReconnectPolicy;
use crate::protocol::{AudioEncoding, Concept};

/// Configuration for a streaming session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Transcription endpoint (audio in, transcripts and concepts out)
    pub transcription_url: String,

    /// Separate flag/explain endpoint; `None` shares the transcription connection
    pub explain_url: Option<String>,

    /// Identity sent in the init message
    pub user_id: Option<String>,

    /// Opaque bearer credential, attached to the init message when present
    pub token: Option<String>,

    /// Reconnect ceiling, backoff and connect timeout
    pub policy: ReconnectPolicy,

    /// How audio frames are put on the wire
    pub audio_encoding: AudioEncoding,

    /// Bound on waiting for an explanation
    pub explain_timeout: Duration,

    /// Vocalise resolved explanations through the speech output
    pub speak_explanations: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transcription_url: "ws://localhost:8000/ws/audio-to-text".to_string(),
            explain_url: Some("ws://localhost:8000/ws/flag-concept".to_string()),
            user_id: None,
            token: None,
            policy: ReconnectPolicy::default(),
            audio_encoding: AudioEncoding::Binary,
            explain_timeout: Duration::from_secs(30),
            speak_explanations: false,
        }
    }
}

/// What a new session is about
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartOptions {
    /// Lecture identifier; generated when absent (e.g. "lecture-<uuid>")
    pub lecture_id: Option<String>,

    /// Optional mode hint forwarded in the init message
    pub mode: Option<String>,
}

/// A user's request to have a concept explained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    pub concept_name: String,
    pub context: String,
    pub difficulty: u8,
}

impl AskRequest {
    pub fn new(concept_name: impl Into<String>, context: impl Into<String>, difficulty: u8) -> Self {
        Self {
            concept_name: concept_name.into(),
            context: context.into(),
            difficulty,
        }
    }
}

impl From<&Concept> for AskRequest {
    fn from(concept: &Concept) -> Self {
        Self::new(concept.name.clone(), concept.snippet.clone(), concept.difficulty)
    }
}
