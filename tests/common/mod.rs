//! In-memory test doubles for the transport and capture seams.

#![allow(dead_code)]

use anyhow::{bail, Result};
use clarifai_stream::transport::TRANSPORT_QUEUE_CAPACITY;
use clarifai_stream::{
    AudioFrame, CaptureDevice, Connector, Frame, SessionError, Transport, TransportEvent,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::pending;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

/// Shared, ordered record of what the doubles observed
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Accept,
    Refuse,
    /// Never completes; only the connect timeout ends it
    Hang,
}

/// Connector whose attempts are scripted and whose accepted transports are
/// handed to the test as [`MockPeer`]s.
pub struct MockConnector {
    script: Mutex<VecDeque<ConnectBehavior>>,
    fallback: ConnectBehavior,
    attempts: Mutex<Vec<(String, Instant)>>,
    peers: mpsc::UnboundedSender<MockPeer>,
    journal: Journal,
}

impl MockConnector {
    pub fn new(fallback: ConnectBehavior) -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        Self::with_journal(fallback, Journal::default())
    }

    pub fn with_journal(
        fallback: ConnectBehavior,
        journal: Journal,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            peers: peers_tx,
            journal,
        };
        (Arc::new(connector), peers_rx)
    }

    /// Queue behaviours for the next attempts; the fallback applies afterwards
    pub fn script(&self, behaviors: impl IntoIterator<Item = ConnectBehavior>) {
        self.script.lock().unwrap().extend(behaviors);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    pub fn attempt_urls(&self) -> Vec<String> {
        self.attempts.lock().unwrap().iter().map(|(url, _)| url.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> clarifai_stream::Result<Transport> {
        self.attempts
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match behavior {
            ConnectBehavior::Refuse => Err(SessionError::transport("connection refused")),
            ConnectBehavior::Hang => pending().await,
            ConnectBehavior::Accept => {
                let (client_tx, mut relay_rx) = mpsc::channel::<Frame>(TRANSPORT_QUEUE_CAPACITY);
                let (peer_tx, peer_rx) = mpsc::unbounded_channel();
                let (inbound_tx, inbound_rx) = mpsc::channel(TRANSPORT_QUEUE_CAPACITY);

                let journal = self.journal.clone();
                let label = url.to_string();
                tokio::spawn(async move {
                    while let Some(frame) = relay_rx.recv().await {
                        let _ = peer_tx.send(frame);
                    }
                    journal.record(format!("writer closed {label}"));
                });

                self.journal.record(format!("open {url}"));
                let _ = self.peers.send(MockPeer {
                    url: url.to_string(),
                    from_client: peer_rx,
                    to_client: inbound_tx,
                });

                Ok(Transport {
                    outbound: client_tx,
                    inbound: inbound_rx,
                })
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// The service side of one accepted transport
pub struct MockPeer {
    pub url: String,
    from_client: mpsc::UnboundedReceiver<Frame>,
    to_client: mpsc::Sender<TransportEvent>,
}

impl MockPeer {
    /// Next frame the client wrote; `None` once the client closed its side
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Next text frame parsed as JSON, skipping binary frames
    pub async fn recv_json(&mut self) -> Option<Value> {
        while let Some(frame) = self.recv().await {
            if let Frame::Text(text) = frame {
                return serde_json::from_str(&text).ok();
            }
        }
        None
    }

    /// Frames already delivered, without waiting
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub async fn send_json(&self, value: Value) {
        let _ = self
            .to_client
            .send(TransportEvent::Frame(Frame::Text(value.to_string())))
            .await;
    }

    pub async fn send_text(&self, text: &str) {
        let _ = self
            .to_client
            .send(TransportEvent::Frame(Frame::Text(text.to_string())))
            .await;
    }

    pub async fn close(&self, code: u16) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed {
                code: Some(code),
                reason: "server closed".to_string(),
            })
            .await;
    }

    pub async fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .send(TransportEvent::Error(message.to_string()))
            .await;
    }
}

/// Wait for the next accepted transport
pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MockPeer>) -> MockPeer {
    timeout(Duration::from_secs(120), peers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Capture device driven by the test through a [`CaptureControl`]
pub struct MockCaptureDevice {
    shared: Arc<Mutex<CaptureShared>>,
    fail_on_start: bool,
    journal: Journal,
}

#[derive(Default)]
struct CaptureShared {
    sender: Option<mpsc::Sender<AudioFrame>>,
    starts: usize,
    stops: usize,
}

#[derive(Clone)]
pub struct CaptureControl {
    shared: Arc<Mutex<CaptureShared>>,
}

impl MockCaptureDevice {
    pub fn new(journal: Journal) -> (Self, CaptureControl) {
        let shared = Arc::new(Mutex::new(CaptureShared::default()));
        let device = Self {
            shared: Arc::clone(&shared),
            fail_on_start: false,
            journal,
        };
        (device, CaptureControl { shared })
    }

    pub fn failing(journal: Journal) -> (Self, CaptureControl) {
        let (mut device, control) = Self::new(journal);
        device.fail_on_start = true;
        (device, control)
    }
}

#[async_trait::async_trait]
impl CaptureDevice for MockCaptureDevice {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.fail_on_start {
            self.journal.record("capture start failed");
            bail!("microphone permission denied");
        }
        let (tx, rx) = mpsc::channel(64);
        let mut shared = self.shared.lock().unwrap();
        shared.sender = Some(tx);
        shared.starts += 1;
        self.journal.record("capture start");
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.sender = None;
        shared.stops += 1;
        self.journal.record("capture stop");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.shared.lock().unwrap().sender.is_some()
    }

    fn name(&self) -> &str {
        "mock-capture"
    }
}

impl CaptureControl {
    /// Emit one 250 ms frame of silence tagged with `marker` as its first sample.
    /// Returns false when the device is not capturing.
    pub async fn push_frame(&self, marker: i16) -> bool {
        let sender = self.shared.lock().unwrap().sender.clone();
        let Some(sender) = sender else {
            return false;
        };
        let mut samples = vec![0i16; 4000];
        samples[0] = marker;
        sender
            .send(AudioFrame {
                samples,
                sample_rate: 16000,
                channels: 1,
                timestamp_ms: 0,
            })
            .await
            .is_ok()
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.lock().unwrap().sender.is_some()
    }

    pub fn starts(&self) -> usize {
        self.shared.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.shared.lock().unwrap().stops
    }
}

/// Give spawned tasks a chance to run without advancing the paused clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// First sample of a binary audio frame, as written by `push_frame`
pub fn audio_marker(frame: &Frame) -> Option<i16> {
    match frame {
        Frame::Binary(bytes) if bytes.len() >= 2 => Some(i16::from_le_bytes([bytes[0], bytes[1]])),
        _ => None,
    }
}
