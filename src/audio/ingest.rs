use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{AudioFrame, CaptureDevice};
use crate::connection::ConnectionHandle;
use crate::error::{Result, SessionError};
use crate::protocol::Outbound;

/// Frame counts for one armed period
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub frames_captured: u64,
    pub frames_forwarded: u64,
    /// Dropped because the connection was not open when the frame was sent
    pub frames_dropped: u64,
}

struct Forwarder {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<IngestReport>,
}

/// Audio Ingest Pipeline
///
/// Arms the capture device and forwards each frame to the connection.
/// Frames that arrive while the connection is not open are dropped, never
/// buffered: the connection checks its state when it processes the send.
pub struct AudioIngest {
    device: Box<dyn CaptureDevice>,
    forwarder: Option<Forwarder>,
}

impl AudioIngest {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device,
            forwarder: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.forwarder.is_some()
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Acquire the capture device and start forwarding to `connection`.
    pub async fn arm(&mut self, connection: ConnectionHandle) -> Result<()> {
        if self.is_armed() {
            warn!("Audio ingest already armed");
            return Ok(());
        }

        info!("Arming capture device: {}", self.device.name());

        let frames = self
            .device
            .start()
            .await
            .map_err(|e| SessionError::capture(format!("{e:#}")))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(forward_frames(frames, stop_rx, connection));

        self.forwarder = Some(Forwarder { stop_tx, task });
        Ok(())
    }

    /// Stop forwarding and release the capture device.
    ///
    /// Idempotent; safe to call when never armed.
    pub async fn disarm(&mut self) -> Option<IngestReport> {
        let report = match self.forwarder.take() {
            Some(forwarder) => {
                let _ = forwarder.stop_tx.send(());
                match forwarder.task.await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        error!("Audio forwarding task panicked: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        if self.device.is_capturing() {
            if let Err(e) = self.device.stop().await {
                error!("Failed to stop capture device: {}", e);
            }
            info!("Capture device released: {}", self.device.name());
        }

        report
    }
}

async fn forward_frames(
    mut frames: mpsc::Receiver<AudioFrame>,
    mut stop_rx: oneshot::Receiver<()>,
    connection: ConnectionHandle,
) -> IngestReport {
    let mut report = IngestReport::default();
    let mut dropping = false;

    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => {
                    info!("Capture stream ended");
                    break;
                }
            },
        };

        report.frames_captured += 1;

        match connection.send(Outbound::Audio(frame.to_pcm_bytes())).await {
            Ok(()) => {
                if dropping {
                    info!("Connection open again, resuming audio forwarding");
                    dropping = false;
                }
                report.frames_forwarded += 1;
            }
            Err(SessionError::NotConnected) => {
                if !dropping {
                    info!("Connection not open, dropping audio until it is");
                    dropping = true;
                }
                report.frames_dropped += 1;
            }
            Err(e) => {
                warn!("Failed to forward audio frame: {}", e);
                report.frames_dropped += 1;
            }
        }
    }

    debug!(
        "Audio forwarding stopped: {} captured, {} forwarded, {} dropped",
        report.frames_captured, report.frames_forwarded, report.frames_dropped
    );
    report
}
