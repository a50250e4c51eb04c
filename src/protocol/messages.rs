use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Identity message sent as the first text frame after every successful open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitMessage {
    pub user_id: Option<String>,
    pub lecture_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Opaque bearer credential, attached only when one is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Concept flag / explanation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRequest {
    pub concept_name: String,
    pub context: String,
    pub user_id: Option<String>,
    pub lecture_id: String,
    pub difficulty_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_id: Option<String>,
}

/// Audio frame carried inside a JSON text frame
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioChunkMessage {
    pub audio: String, // Base64-encoded PCM bytes
}

/// Everything the engine can put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Init(InitMessage),
    Audio(Vec<u8>),
    Flag(FlagRequest),
}

/// A detected concept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    #[serde(rename = "concept_name")]
    pub name: String,

    /// Snippet of the transcript the concept was detected in
    #[serde(rename = "text_snippet", default, deserialize_with = "null_as_default")]
    pub snippet: String,

    /// 1 (easy) to 5 (hard)
    #[serde(
        rename = "difficulty_level",
        default = "default_difficulty",
        deserialize_with = "difficulty_or_default"
    )]
    pub difficulty: u8,

    #[serde(default, deserialize_with = "null_as_default")]
    pub is_current: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_position: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_position: Option<usize>,
}

fn default_difficulty() -> u8 {
    1
}

// Concept lists are model-generated; an explicit null means "not given".
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn difficulty_or_default<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u8>::deserialize(deserializer)?.unwrap_or_else(default_difficulty))
}

/// Parse one concept entry, dropping it (not the frame) when malformed
fn parse_concept(value: Value) -> Option<Concept> {
    match serde_json::from_value(value) {
        Ok(concept) => Some(concept),
        Err(e) => {
            warn!("Dropping malformed concept: {}", e);
            None
        }
    }
}

impl Concept {
    pub fn new(name: impl Into<String>, snippet: impl Into<String>, difficulty: u8) -> Self {
        Self {
            name: name.into(),
            snippet: snippet.into(),
            difficulty: difficulty.clamp(1, 5),
            is_current: false,
            start_position: None,
            end_position: None,
        }
    }
}

/// Structured explanation returned for a flagged concept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub explanation: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub misconceptions: Vec<String>,
    #[serde(default)]
    pub related_concepts: Vec<String>,
}

/// Where an `Error` event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// `{status: "error"}` sent by the peer
    Server,
    /// The frame could not be decoded
    Decode,
}

/// Decoded inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Connected {
        session_id: String,
        message: Option<String>,
    },
    Transcript {
        text: String,
        is_final: bool,
        full_text: Option<String>,
    },
    Concepts(Vec<Concept>),
    CurrentConcept(Concept),
    Explanation(Explanation),
    Ack {
        message: Option<String>,
    },
    Error {
        message: String,
        origin: ErrorOrigin,
    },
}

impl InboundEvent {
    pub(crate) fn decode_error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            origin: ErrorOrigin::Decode,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Transcript { .. } => "transcript",
            Self::Concepts(_) => "concepts",
            Self::CurrentConcept(_) => "current_concept",
            Self::Explanation(_) => "explanation",
            Self::Ack { .. } => "ack",
            Self::Error { .. } => "error",
        }
    }
}

/// Explanation payloads come either structured or as bare text
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ExplanationBody {
    Structured(Explanation),
    Text(String),
}

impl From<ExplanationBody> for Explanation {
    fn from(body: ExplanationBody) -> Self {
        match body {
            ExplanationBody::Structured(explanation) => explanation,
            ExplanationBody::Text(explanation) => Explanation {
                explanation,
                ..Default::default()
            },
        }
    }
}

/// Superset of every JSON object the service sends
#[derive(Debug, Deserialize)]
pub(crate) struct WireMessage {
    pub status: Option<String>,
    pub session_id: Option<String>,
    pub message: Option<String>,
    pub transcript: Option<String>,
    pub is_final: Option<bool>,
    pub full_transcript: Option<String>,
    pub concepts: Option<Vec<Value>>,
    pub current_concept: Option<Value>,
    pub explanation: Option<ExplanationBody>,
}

impl WireMessage {
    /// Classify into events, in the order the service intends them to be applied.
    pub(crate) fn into_events(self) -> Vec<InboundEvent> {
        match self.status.as_deref() {
            Some("error") => {
                return vec![InboundEvent::Error {
                    message: self
                        .message
                        .unwrap_or_else(|| "unspecified server error".to_string()),
                    origin: ErrorOrigin::Server,
                }];
            }
            Some("connected") if self.session_id.is_none() => {
                return vec![InboundEvent::decode_error(
                    "connected status without session_id",
                )];
            }
            _ => {}
        }

        let mut events = Vec::new();

        if self.status.as_deref() == Some("connected") {
            if let Some(session_id) = self.session_id {
                events.push(InboundEvent::Connected {
                    session_id,
                    message: self.message.clone(),
                });
            }
        }

        if let Some(text) = self.transcript {
            events.push(InboundEvent::Transcript {
                text,
                is_final: self.is_final.unwrap_or(false),
                full_text: self.full_transcript,
            });
        }

        if let Some(entries) = self.concepts {
            let concepts = entries.into_iter().filter_map(parse_concept).collect();
            events.push(InboundEvent::Concepts(concepts));
        }

        if let Some(concept) = self.current_concept.and_then(parse_concept) {
            events.push(InboundEvent::CurrentConcept(concept));
        }

        if let Some(body) = self.explanation {
            events.push(InboundEvent::Explanation(body.into()));
        }

        if events.is_empty() {
            if self.status.as_deref() == Some("success") {
                events.push(InboundEvent::Ack {
                    message: self.message,
                });
            } else {
                events.push(InboundEvent::decode_error("unrecognized message shape"));
            }
        }

        events
    }
}
