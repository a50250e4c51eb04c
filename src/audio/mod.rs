pub mod backend;
pub mod file;
pub mod ingest;
pub mod speech;

pub use backend::{AudioFrame, CaptureConfig, CaptureDevice};
pub use file::{AudioFile, WavCaptureDevice};
pub use ingest::{AudioIngest, IngestReport};
pub use speech::{LogSpeech, SpeechOutput};
