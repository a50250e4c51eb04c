use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Whether audio was still being captured when the stats were taken
    pub is_recording: bool,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Frames delivered by the capture device
    pub frames_captured: u64,

    /// Frames written to an open connection
    pub frames_sent: u64,

    /// Frames dropped because the connection was not open
    pub frames_dropped: u64,

    /// Reconnects scheduled on the transcription connection
    pub reconnects: u64,

    /// Number of finalized transcript segments
    pub transcript_segments_count: usize,

    /// Number of distinct concepts detected
    pub concepts_count: usize,
}

/// A finalized transcript segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Transcribed text
    pub text: String,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,
}
