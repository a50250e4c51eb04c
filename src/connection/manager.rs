use futures::future::BoxFuture;
use std::future::pending;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use super::machine::{ConnectionState, Effect, Input, Machine, ReconnectPolicy};
use crate::error::{Result, SessionError};
use crate::protocol::{Frame, InboundEvent, InitMessage, MessageCodec, Outbound};
use crate::transport::{Connector, Transport, TransportEvent};

type OpenFuture = BoxFuture<'static, Result<Transport>>;

/// Configuration for one logical connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Service endpoint
    pub url: String,

    /// Name used in logs ("transcription", "explain")
    pub label: String,

    pub policy: ReconnectPolicy,

    pub codec: MessageCodec,

    /// Sent after every successful open, if present
    pub init: Option<InitMessage>,
}

/// Notifications from a connection, delivered in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    State {
        state: ConnectionState,
        attempt: u32,
    },
    Inbound(InboundEvent),
    /// Reconnect ceiling exhausted; reported once per failure
    Fatal(SessionError),
}

/// Counters shared between the driver and its handles
#[derive(Debug, Default)]
pub struct ConnectionStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    reconnects: AtomicU64,
}

impl ConnectionStats {
    /// Audio frames written to an open transport
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    /// Audio frames discarded because the transport was not open
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::SeqCst)
    }

    /// Reconnects scheduled
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

enum Command {
    Connect,
    Disconnect(oneshot::Sender<()>),
    Send {
        message: Outbound,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable handle to a running connection driver.
///
/// The driver stops and releases its transport once every handle is dropped.
#[derive(Clone)]
pub struct ConnectionHandle {
    label: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandle {
    /// Start connecting. No-op while connecting or open.
    pub fn connect(&self) {
        if self.commands.send(Command::Connect).is_err() {
            warn!("[{}] connect requested after driver stopped", self.label);
        }
    }

    /// Tear down the connection and cancel every pending timer.
    ///
    /// Returns once the driver has applied the disconnect, so no reconnect
    /// scheduled before this call can fire afterwards.
    pub async fn disconnect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Send a message if, at the moment the driver processes it, the
    /// connection is open. Fails with `NotConnected` otherwise.
    pub async fn send(&self, message: Outbound) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                message,
                reply: reply_tx,
            })
            .map_err(|_| SessionError::NotConnected)?;
        reply_rx.await.unwrap_or(Err(SessionError::NotConnected))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Connection Lifecycle Manager
///
/// Owns one logical connection: opens the transport, sends the init message,
/// decodes inbound frames, and reconnects with backoff until the ceiling.
pub struct ConnectionManager;

impl ConnectionManager {
    /// Spawn the driver task. It starts idle; call [`ConnectionHandle::connect`].
    pub fn spawn(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let stats = Arc::new(ConnectionStats::default());

        info!(
            "[{}] connection manager using {} connector for {}",
            config.label,
            connector.name(),
            config.url
        );

        let handle = ConnectionHandle {
            label: Arc::from(config.label.as_str()),
            commands: command_tx,
            state: state_rx,
            stats: Arc::clone(&stats),
        };

        let driver = Driver {
            machine: Machine::new(config.policy),
            config,
            connector,
            writer: None,
            reader: None,
            opening: None,
            deadline: None,
            reconnect_at: None,
            events: event_tx,
            state_tx,
            stats,
        };
        tokio::spawn(driver.run(command_rx));

        (handle, event_rx)
    }
}

struct Driver {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    machine: Machine,
    writer: Option<mpsc::Sender<Frame>>,
    reader: Option<mpsc::Receiver<TransportEvent>>,
    opening: Option<OpenFuture>,
    deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    stats: Arc<ConnectionStats>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                result = poll_open(&mut self.opening) => {
                    self.opening = None;
                    match result {
                        Ok(transport) => {
                            self.writer = Some(transport.outbound);
                            self.reader = Some(transport.inbound);
                            self.apply(Input::Opened);
                        }
                        Err(e) => {
                            warn!("[{}] open failed: {}", self.config.label, e);
                            self.apply(Input::OpenFailed(e.to_string()));
                        }
                    }
                }
                event = next_transport_event(&mut self.reader) => self.on_transport_event(event),
                _ = sleep_until_opt(self.deadline) => {
                    self.deadline = None;
                    if self.machine.state() == ConnectionState::Connecting {
                        warn!(
                            "[{}] open timed out after {:?}",
                            self.config.label,
                            self.machine.policy().connect_timeout
                        );
                    }
                    self.apply(Input::DeadlineElapsed);
                }
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.apply(Input::ReconnectDue);
                }
            }
        }

        debug!("[{}] all handles dropped, stopping driver", self.config.label);
        self.apply(Input::Disconnect);
        self.release_transport();
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.apply(Input::Connect),
            Command::Disconnect(ack) => {
                info!("[{}] disconnect requested", self.config.label);
                self.apply(Input::Disconnect);
                let _ = ack.send(());
            }
            Command::Send { message, reply } => {
                let _ = reply.send(self.send_now(&message));
            }
        }
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Frame(frame)) => {
                if self.machine.state() != ConnectionState::Open {
                    trace!("[{}] dropping frame received while {}", self.config.label, self.machine.state());
                    return;
                }
                for event in self.config.codec.decode(&frame) {
                    trace!("[{}] inbound {}", self.config.label, event.kind());
                    let _ = self.events.send(ConnectionEvent::Inbound(event));
                }
            }
            Some(TransportEvent::Closed { code, reason }) => {
                info!(
                    "[{}] transport closed (code={:?}, reason={:?})",
                    self.config.label, code, reason
                );
                self.apply(Input::TransportClosed { code, reason });
            }
            Some(TransportEvent::Error(message)) => {
                warn!("[{}] transport error: {}", self.config.label, message);
                self.apply(Input::TransportFailed(message));
            }
            None => {
                self.reader = None;
                self.apply(Input::TransportClosed {
                    code: None,
                    reason: "transport ended".to_string(),
                });
            }
        }
    }

    fn apply(&mut self, input: Input) {
        let before = self.machine.state();
        let (machine, effects) = self.machine.transition(input);
        self.machine = machine;

        for effect in effects {
            self.perform(effect);
        }

        let after = self.machine.state();
        if before != after {
            info!("[{}] {} -> {}", self.config.label, before, after);
            self.state_tx.send_replace(after);
            let _ = self.events.send(ConnectionEvent::State {
                state: after,
                attempt: self.machine.attempt(),
            });
        }
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport => {
                self.release_transport();
                let connector = Arc::clone(&self.connector);
                let url = self.config.url.clone();
                debug!("[{}] opening transport to {}", self.config.label, url);
                self.opening = Some(Box::pin(async move { connector.connect(&url).await }));
            }
            Effect::CloseTransport => {
                // Dropping the writer asks the peer to close; keep reading until it does
                self.writer = None;
            }
            Effect::ReleaseTransport => self.release_transport(),
            Effect::ArmDeadline(timeout) => self.deadline = Some(Instant::now() + timeout),
            Effect::CancelDeadline => self.deadline = None,
            Effect::ScheduleReconnect { delay, attempt } => {
                info!(
                    "[{}] reconnect attempt {}/{} in {:?}",
                    self.config.label,
                    attempt,
                    self.machine.policy().max_attempts,
                    delay
                );
                self.stats.reconnects.fetch_add(1, Ordering::SeqCst);
                self.reconnect_at = Some(Instant::now() + delay);
            }
            Effect::CancelReconnect => self.reconnect_at = None,
            Effect::SendInit => self.send_init(),
            Effect::ReportFatal { attempts } => {
                error!(
                    "[{}] giving up after {} reconnect attempts",
                    self.config.label, attempts
                );
                let _ = self
                    .events
                    .send(ConnectionEvent::Fatal(SessionError::Fatal { attempts }));
            }
        }
    }

    fn release_transport(&mut self) {
        self.opening = None;
        self.writer = None;
        self.reader = None;
    }

    fn send_init(&mut self) {
        let Some(init) = self.config.init.clone() else {
            return;
        };
        if let Err(e) = self.write(&Outbound::Init(init)) {
            warn!("[{}] failed to send init message: {}", self.config.label, e);
        }
    }

    fn send_now(&mut self, message: &Outbound) -> Result<()> {
        let is_audio = matches!(message, Outbound::Audio(_));

        if self.machine.state() != ConnectionState::Open {
            if is_audio {
                self.stats.frames_dropped.fetch_add(1, Ordering::SeqCst);
            }
            return Err(SessionError::NotConnected);
        }

        match self.write(message) {
            Ok(()) => {
                if is_audio {
                    self.stats.frames_sent.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
            Err(e) => {
                if is_audio {
                    self.stats.frames_dropped.fetch_add(1, Ordering::SeqCst);
                }
                Err(e)
            }
        }
    }

    fn write(&self, message: &Outbound) -> Result<()> {
        let writer = self.writer.as_ref().ok_or(SessionError::NotConnected)?;
        let frame = self.config.codec.encode(message)?;
        writer
            .try_send(frame)
            .map_err(|e| SessionError::transport(format!("outbound queue: {e}")))
    }
}

async fn poll_open(opening: &mut Option<OpenFuture>) -> Result<Transport> {
    match opening {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_transport_event(
    reader: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match reader {
        Some(reader) => reader.recv().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
