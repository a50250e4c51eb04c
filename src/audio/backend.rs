use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Little-endian PCM bytes, as sent on the wire
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Duration covered by this frame
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        Duration::from_millis(frames * 1000 / self.sample_rate as u64)
    }

    /// Downsample by decimation (takes every Nth sample frame)
    pub fn downsample(self, target_rate: u32) -> AudioFrame {
        if target_rate == 0 || self.sample_rate <= target_rate {
            return self; // Can't upsample
        }

        let ratio = (self.sample_rate / target_rate) as usize;
        if ratio <= 1 {
            return self;
        }

        let channels = self.channels.max(1) as usize;
        let samples: Vec<i16> = self
            .samples
            .chunks_exact(channels)
            .step_by(ratio)
            .flatten()
            .copied()
            .collect();

        AudioFrame {
            samples,
            sample_rate: target_rate,
            ..self
        }
    }

    /// Convert stereo to mono by averaging channels
    pub fn to_mono(self) -> AudioFrame {
        if self.channels != 2 {
            return self; // Only support stereo -> mono
        }

        let samples = self
            .samples
            .chunks_exact(2)
            .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
            .collect();

        AudioFrame {
            samples,
            channels: 1,
            ..self
        }
    }
}

/// Capture format and cadence
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate (will downsample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Interval between emitted frames
    pub frame_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            target_channels: 1,
            frame_interval: Duration::from_millis(250),
        }
    }
}

/// Audio capture device
///
/// Once started, the device yields frames at a fixed cadence until stopped.
/// Implementations:
/// - `WavCaptureDevice`: replays a WAV recording in real time
/// - test doubles in `tests/common`
#[async_trait::async_trait]
pub trait CaptureDevice: Send {
    /// Acquire the device and start capturing.
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if the device is currently capturing
    fn is_capturing(&self) -> bool;

    /// Device name for logging
    fn name(&self) -> &str;
}
