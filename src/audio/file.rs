use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, CaptureConfig, CaptureDevice};

/// A decoded WAV recording
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            bail!(
                "Unsupported WAV format: {} bit {:?} (expected 16 bit PCM)",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Split into frames of `config.frame_interval`, converted to the target format
    pub fn frames(&self, config: &CaptureConfig) -> Vec<AudioFrame> {
        let interval_ms = config.frame_interval.as_millis().max(1) as u64;
        let frames_per_chunk =
            ((self.sample_rate as u64 * interval_ms) / 1000).max(1) as usize;
        let chunk_len = frames_per_chunk * self.channels.max(1) as usize;

        self.samples
            .chunks(chunk_len)
            .enumerate()
            .map(|(index, chunk)| {
                let mut frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: self.sample_rate,
                    channels: self.channels,
                    timestamp_ms: index as u64 * interval_ms,
                };
                if frame.sample_rate != config.target_sample_rate {
                    frame = frame.downsample(config.target_sample_rate);
                }
                if frame.channels != config.target_channels && config.target_channels == 1 {
                    frame = frame.to_mono();
                }
                frame
            })
            .collect()
    }
}

/// Capture device that replays a WAV file at real-time cadence
pub struct WavCaptureDevice {
    file: AudioFile,
    config: CaptureConfig,
    looping: bool,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    capturing: bool,
}

impl WavCaptureDevice {
    pub fn open(path: impl AsRef<Path>, config: CaptureConfig) -> Result<Self> {
        Ok(Self {
            file: AudioFile::open(path)?,
            config,
            looping: false,
            stop_tx: None,
            task: None,
            capturing: false,
        })
    }

    /// Restart from the beginning when the file runs out
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

#[async_trait::async_trait]
impl CaptureDevice for WavCaptureDevice {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing {
            bail!("Already capturing");
        }

        let frames = self.file.frames(&self.config);
        if frames.is_empty() {
            bail!("{} contains no audio", self.file.path);
        }

        info!(
            "Replaying {} as {} frames of {:?}",
            self.file.path,
            frames.len(),
            self.config.frame_interval
        );

        let (tx, rx) = mpsc::channel(16);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let interval = self.config.frame_interval;
        let looping = self.looping;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            'replay: loop {
                for frame in frames.iter().cloned() {
                    tokio::select! {
                        _ = &mut stop_rx => break 'replay,
                        _ = ticker.tick() => {}
                    }
                    if tx.send(frame).await.is_err() {
                        break 'replay;
                    }
                }
                if !looping {
                    break;
                }
            }
            debug!("WAV replay finished");
        });

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
        self.capturing = true;

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing {
            return Ok(());
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("WAV replay task panicked: {}", e);
            }
        }

        self.capturing = false;
        info!("WAV capture stopped");

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_frames_are_converted_to_target_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // 1 second of 32kHz stereo
        write_wav(&path, 32000, 2, &vec![10i16; 64000]);

        let file = AudioFile::open(&path).unwrap();
        assert_eq!(file.sample_rate, 32000);
        assert_eq!(file.channels, 2);

        let frames = file.frames(&CaptureConfig::default());
        assert_eq!(frames.len(), 4);
        for (index, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sample_rate, 16000);
            assert_eq!(frame.channels, 1);
            assert_eq!(frame.samples.len(), 4000);
            assert_eq!(frame.timestamp_ms, index as u64 * 250);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_replays_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 16000, 1, &vec![0i16; 8000]); // 500ms

        let mut device = WavCaptureDevice::open(&path, CaptureConfig::default()).unwrap();
        let mut rx = device.start().await.unwrap();
        assert!(device.is_capturing());
        assert!(device.start().await.is_err());

        let mut received = 0;
        while let Some(frame) = rx.recv().await {
            assert_eq!(frame.duration(), Duration::from_millis(250));
            received += 1;
        }
        assert_eq!(received, 2);

        device.stop().await.unwrap();
        assert!(!device.is_capturing());
        device.stop().await.unwrap();
    }

    #[test]
    fn test_rejects_missing_file() {
        assert!(AudioFile::open("/nonexistent/recording.wav").is_err());
    }
}
