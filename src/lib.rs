pub mod audio;
pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod explain;
pub mod protocol;
pub mod session;
pub mod transport;

pub use audio::{
    AudioFile, AudioFrame, AudioIngest, CaptureConfig, CaptureDevice, IngestReport, LogSpeech,
    SpeechOutput, WavCaptureDevice,
};
pub use backoff::Backoff;
pub use config::Config;
pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState,
    ReconnectPolicy,
};
pub use error::{Result, SessionError};
pub use explain::{ExplanationOutcome, ExplanationTracker, RequestState};
pub use protocol::{
    AudioEncoding, Concept, Explanation, FlagRequest, Frame, InboundEvent, InitMessage,
    MessageCodec, Outbound,
};
pub use session::{
    AskRequest, SessionConfig, SessionEvent, SessionSnapshot, SessionStats, StartOptions,
    StreamingSession, TranscriptSegment,
};
pub use transport::{Connector, Transport, TransportEvent, WebSocketConnector};
