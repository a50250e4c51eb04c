use tracing::info;

/// Local speech output. Fire-and-forget: `speak` must not block.
pub trait SpeechOutput: Send + Sync {
    fn speak(&self, text: &str);
}

/// Speech output that writes the text to the log instead of vocalising it
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSpeech;

impl SpeechOutput for LogSpeech {
    fn speak(&self, text: &str) {
        info!("Speaking: {}", text);
    }
}
