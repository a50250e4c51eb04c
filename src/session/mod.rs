//! Streaming session management
//!
//! This module provides the `StreamingSession` facade that ties together:
//! - The transcription connection (and an optional explain connection)
//! - Audio capture, armed once the transcription connection opens
//! - Explanation requests, one at a time
//! - Transcript and concept state, published as snapshots

mod config;
mod session;
mod state;
mod stats;

pub use config::{AskRequest, SessionConfig, StartOptions};
pub use session::{SessionEvent, StreamingSession};
pub use state::{ConceptSet, SessionSnapshot, TranscriptBuffer};
pub use stats::{SessionStats, TranscriptSegment};
