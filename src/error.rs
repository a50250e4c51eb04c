//! Error taxonomy for the streaming session engine.

use thiserror::Error;

/// Errors surfaced by the session engine.
///
/// Everything here is `Clone` so that it can travel on session events and
/// inside the explanation tracker's stored outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    // Transport errors (retried through backoff up to the ceiling)
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Connection failed permanently after {attempts} reconnect attempts")]
    Fatal { attempts: u32 },

    // Protocol errors
    #[error("Failed to decode inbound frame: {message}")]
    Decode { message: String },

    #[error("Failed to encode outbound message: {message}")]
    Encode { message: String },

    #[error("Server error: {message}")]
    Server { message: String },

    // Audio capture errors
    #[error("Capture device error: {message}")]
    CaptureDevice { message: String },

    // Explanation request errors
    #[error("An explanation for '{concept}' is already pending")]
    AlreadyPending { concept: String },

    #[error("Not connected")]
    NotConnected,

    #[error("No explanation received for '{concept}' within {timeout_secs}s")]
    Timeout { concept: String, timeout_secs: u64 },
}

impl SessionError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::CaptureDevice {
            message: message.into(),
        }
    }

    /// Whether the caller can simply try again (as opposed to restarting the session).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyPending { .. }
                | Self::NotConnected
                | Self::Timeout { .. }
                | Self::Server { .. }
        )
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
