use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::messages::{AudioChunkMessage, InboundEvent, Outbound, WireMessage};
use crate::error::Result;

/// A raw transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// How captured audio is put on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioEncoding {
    /// Raw bytes in a binary frame
    #[default]
    Binary,
    /// `{"audio": "<base64>"}` in a text frame
    Base64Json,
}

/// Translates between transport frames and typed messages.
///
/// Decoding never fails past this boundary: malformed input becomes an
/// `Error` event with a `Decode` origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec {
    audio_encoding: AudioEncoding,
}

impl MessageCodec {
    pub fn new(audio_encoding: AudioEncoding) -> Self {
        Self { audio_encoding }
    }

    pub fn audio_encoding(&self) -> AudioEncoding {
        self.audio_encoding
    }

    pub fn encode(&self, message: &Outbound) -> Result<Frame> {
        let frame = match message {
            Outbound::Init(init) => Frame::Text(serde_json::to_string(init)?),
            Outbound::Flag(request) => Frame::Text(serde_json::to_string(request)?),
            Outbound::Audio(bytes) => match self.audio_encoding {
                AudioEncoding::Binary => Frame::Binary(bytes.clone()),
                AudioEncoding::Base64Json => {
                    let chunk = AudioChunkMessage {
                        audio: base64::engine::general_purpose::STANDARD.encode(bytes),
                    };
                    Frame::Text(serde_json::to_string(&chunk)?)
                }
            },
        };
        Ok(frame)
    }

    /// Decode one frame into zero or more events, in application order.
    pub fn decode(&self, frame: &Frame) -> Vec<InboundEvent> {
        match frame {
            Frame::Text(text) => decode_text(text),
            Frame::Binary(bytes) => {
                trace!("Binary frame ({} bytes) treated as acknowledgement", bytes.len());
                vec![InboundEvent::Ack { message: None }]
            }
        }
    }
}

fn decode_text(text: &str) -> Vec<InboundEvent> {
    match serde_json::from_str::<WireMessage>(text) {
        Ok(wire) => wire.into_events(),
        Err(e) => {
            warn!("Failed to parse inbound frame: {}", e);
            vec![InboundEvent::decode_error(format!("invalid message: {e}"))]
        }
    }
}
