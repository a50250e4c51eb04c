use chrono::{DateTime, Utc};
use std::future::pending;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::config::{AskRequest, SessionConfig, StartOptions};
use super::state::{ConceptSet, SessionSnapshot, TranscriptBuffer};
use super::stats::SessionStats;
use crate::audio::{AudioIngest, CaptureDevice, IngestReport, SpeechOutput};
use crate::connection::{
    ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState,
};
use crate::error::{Result, SessionError};
use crate::explain::{ExplanationOutcome, ExplanationTracker};
use crate::protocol::{
    Concept, ErrorOrigin, Explanation, FlagRequest, InboundEvent, InitMessage, MessageCodec,
};
use crate::transport::Connector;

/// Everything a session reports to its owner, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionChanged {
        state: ConnectionState,
        attempt: u32,
    },
    /// The service acknowledged the init message
    SessionStarted { session_id: String },
    Transcript { text: String, is_final: bool },
    Concepts(Vec<Concept>),
    CurrentConcept(Concept),
    ExplanationReady {
        concept: String,
        explanation: Explanation,
    },
    ExplanationFailed {
        concept: String,
        error: SessionError,
    },
    Error(SessionError),
}

enum SessionCommand {
    Start {
        options: StartOptions,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<SessionStats>,
    },
    Ask {
        request: AskRequest,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// A streaming lecture session.
///
/// The facade is a handle onto a task that owns the connections, the audio
/// pipeline and the explanation tracker; all state changes happen on that
/// task, in the order events arrive.
pub struct StreamingSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl StreamingSession {
    /// Spawn the session task. Nothing connects until [`start`](Self::start).
    pub fn spawn(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        device: Box<dyn CaptureDevice>,
        speech: Option<Arc<dyn SpeechOutput>>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        info!(
            "Creating streaming session against {} (capture: {})",
            config.transcription_url,
            device.name()
        );

        let actor = SessionActor {
            tracker: ExplanationTracker::new(config.explain_timeout),
            config,
            connector,
            speech,
            ingest: AudioIngest::new(device),
            transcript: TranscriptBuffer::new(),
            concepts: ConceptSet::new(),
            active: None,
            primary_events: None,
            explain_events: None,
            connection: ConnectionState::Idle,
            attempt: 0,
            session_id: None,
            error: None,
            events: event_tx,
            snapshot: snapshot_tx,
        };
        tokio::spawn(actor.run(command_rx));

        (
            Self {
                commands: command_tx,
                snapshot: snapshot_rx,
            },
            event_rx,
        )
    }

    /// Connect and, once the transcription connection opens, start capturing.
    ///
    /// A no-op while a session is already running.
    pub async fn start(&self, options: StartOptions) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Start { options, reply })?;
        rx.await.unwrap_or(Err(SessionError::NotConnected))
    }

    /// Stop capturing, then disconnect. Returns the session's statistics.
    pub async fn stop(&self) -> Result<SessionStats> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Stop { reply })?;
        rx.await.map_err(|_| SessionError::NotConnected)
    }

    /// Ask the service to explain a concept.
    ///
    /// Fails with `AlreadyPending` while another explanation is outstanding
    /// and `NotConnected` when the connection is not open.
    pub async fn ask(&self, request: AskRequest) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Ask { request, reply })?;
        rx.await.unwrap_or(Err(SessionError::NotConnected))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| {
            error!("Session task is no longer running");
            SessionError::NotConnected
        })
    }
}

struct ActiveSession {
    lecture_id: String,
    started_at: DateTime<Utc>,
    primary: ConnectionHandle,
    explain: Option<ConnectionHandle>,
}

impl ActiveSession {
    /// Connection flag requests go out on
    fn explain_connection(&self) -> &ConnectionHandle {
        self.explain.as_ref().unwrap_or(&self.primary)
    }
}

struct SessionActor {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    speech: Option<Arc<dyn SpeechOutput>>,
    ingest: AudioIngest,
    tracker: ExplanationTracker,
    transcript: TranscriptBuffer,
    concepts: ConceptSet,
    active: Option<ActiveSession>,
    primary_events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    explain_events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    connection: ConnectionState,
    attempt: u32,
    session_id: Option<String>,
    error: Option<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            let deadline = self.tracker.deadline();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                event = next_event(&mut self.primary_events) => match event {
                    Some(event) => self.on_primary_event(event).await,
                    None => self.primary_events = None,
                },
                event = next_event(&mut self.explain_events) => match event {
                    Some(event) => self.on_explain_event(event),
                    None => self.explain_events = None,
                },
                _ = sleep_until_opt(deadline) => {
                    if self.tracker.expire(Instant::now()) {
                        self.deliver_outcome();
                    }
                }
            }

            self.publish();
        }

        debug!("Session handle dropped, shutting down");
        self.shutdown().await;
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { options, reply } => {
                let result = self.start(options).await;
                let _ = reply.send(result);
            }
            SessionCommand::Stop { reply } => {
                let stats = self.shutdown().await;
                let _ = reply.send(stats);
            }
            SessionCommand::Ask { request, reply } => {
                let result = self.ask(request).await;
                if let Err(e) = &result {
                    self.error = Some(e.to_string());
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn start(&mut self, options: StartOptions) -> Result<()> {
        if let Some(active) = &self.active {
            if self.connection != ConnectionState::Failed {
                warn!("Session already started for lecture {}", active.lecture_id);
                return Ok(());
            }
            info!("Restarting failed session");
            self.shutdown().await;
        }

        self.transcript.clear();
        self.concepts.clear();
        self.tracker.reset();
        self.session_id = None;
        self.error = None;
        self.attempt = 0;

        let lecture_id = options
            .lecture_id
            .unwrap_or_else(|| format!("lecture-{}", Uuid::new_v4()));
        info!("Starting session for lecture {}", lecture_id);

        let init = InitMessage {
            user_id: self.config.user_id.clone(),
            lecture_id: lecture_id.clone(),
            mode: options.mode,
            token: self.config.token.clone(),
        };
        let codec = MessageCodec::new(self.config.audio_encoding);

        let (primary, primary_events) = ConnectionManager::spawn(
            ConnectionConfig {
                url: self.config.transcription_url.clone(),
                label: "transcription".to_string(),
                policy: self.config.policy,
                codec,
                init: Some(init),
            },
            Arc::clone(&self.connector),
        );
        primary.connect();

        let explain = self.config.explain_url.clone().map(|url| {
            let (handle, events) = ConnectionManager::spawn(
                ConnectionConfig {
                    url,
                    label: "explain".to_string(),
                    policy: self.config.policy,
                    codec,
                    init: None,
                },
                Arc::clone(&self.connector),
            );
            handle.connect();
            self.explain_events = Some(events);
            handle
        });

        self.primary_events = Some(primary_events);
        self.active = Some(ActiveSession {
            lecture_id,
            started_at: Utc::now(),
            primary,
            explain,
        });
        Ok(())
    }

    async fn ask(&mut self, request: AskRequest) -> Result<()> {
        let Some(active) = &self.active else {
            return Err(SessionError::NotConnected);
        };

        let flag = FlagRequest {
            concept_name: request.concept_name,
            context: request.context,
            user_id: self.config.user_id.clone(),
            lecture_id: active.lecture_id.clone(),
            difficulty_level: request.difficulty.clamp(1, 5),
            transcript_id: None,
        };
        self.tracker.flag(flag, active.explain_connection()).await
    }

    /// Audio first, then the connections.
    async fn shutdown(&mut self) -> SessionStats {
        let report = self.ingest.disarm().await.unwrap_or_default();

        let (started_at, reconnects) = match self.active.take() {
            Some(active) => {
                info!("Stopping session for lecture {}", active.lecture_id);
                active.primary.disconnect().await;
                if let Some(explain) = &active.explain {
                    explain.disconnect().await;
                }
                (active.started_at, active.primary.stats().reconnects())
            }
            None => (Utc::now(), 0),
        };

        self.primary_events = None;
        self.explain_events = None;
        self.tracker.reset();
        self.connection = ConnectionState::Idle;
        self.attempt = 0;

        let stats = self.stats(started_at, reconnects, report);
        info!(
            "Session stopped: {:.1}s, {} frames sent, {} dropped, {} segments, {} concepts",
            stats.duration_secs,
            stats.frames_sent,
            stats.frames_dropped,
            stats.transcript_segments_count,
            stats.concepts_count
        );
        stats
    }

    fn stats(&self, started_at: DateTime<Utc>, reconnects: u64, report: IngestReport) -> SessionStats {
        let duration = Utc::now().signed_duration_since(started_at);
        SessionStats {
            is_recording: self.ingest.is_armed(),
            started_at,
            duration_secs: duration.num_milliseconds().max(0) as f64 / 1000.0,
            frames_captured: report.frames_captured,
            frames_sent: report.frames_forwarded,
            frames_dropped: report.frames_dropped,
            reconnects,
            transcript_segments_count: self.transcript.finalized().len(),
            concepts_count: self.concepts.len(),
        }
    }

    async fn on_primary_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::State { state, attempt } => {
                self.connection = state;
                self.attempt = attempt;
                self.emit(SessionEvent::ConnectionChanged { state, attempt });

                if state == ConnectionState::Open && !self.ingest.is_armed() {
                    self.arm_audio().await;
                }
            }
            ConnectionEvent::Inbound(event) => self.on_inbound(event, self.explain_events.is_none()),
            ConnectionEvent::Fatal(e) => {
                error!("Transcription connection failed: {}", e);
                if let Some(report) = self.ingest.disarm().await {
                    debug!("Capture stopped after failure: {:?}", report);
                }
                if self.explain_events.is_none() && self.tracker.fail(e.clone()) {
                    self.deliver_outcome();
                }
                self.surface(e);
            }
        }
    }

    fn on_explain_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::State { state, attempt } => {
                debug!("Explain connection {} (attempt {})", state, attempt);
            }
            ConnectionEvent::Inbound(event) => self.on_inbound(event, true),
            ConnectionEvent::Fatal(e) => {
                error!("Explain connection failed: {}", e);
                if self.tracker.fail(e) {
                    self.deliver_outcome();
                }
            }
        }
    }

    async fn arm_audio(&mut self) {
        let Some(active) = &self.active else {
            return;
        };

        if let Err(e) = self.ingest.arm(active.primary.clone()).await {
            error!("Could not start audio capture: {}", e);
            self.surface(e);
            self.shutdown().await;
        }
    }

    /// `carries_explanations` is false for the transcription connection when
    /// explanations have their own connection.
    fn on_inbound(&mut self, event: InboundEvent, carries_explanations: bool) {
        match event {
            InboundEvent::Connected {
                session_id,
                message,
            } => {
                info!(
                    "Session {} connected: {}",
                    session_id,
                    message.as_deref().unwrap_or("")
                );
                self.session_id = Some(session_id.clone());
                self.emit(SessionEvent::SessionStarted { session_id });
            }
            InboundEvent::Transcript {
                text,
                is_final,
                full_text,
            } => {
                self.transcript.apply(&text, is_final, full_text.as_deref());
                self.emit(SessionEvent::Transcript { text, is_final });
            }
            InboundEvent::Concepts(concepts) => {
                self.concepts.apply_list(concepts.clone());
                self.emit(SessionEvent::Concepts(concepts));
            }
            InboundEvent::CurrentConcept(concept) => {
                let current = self.concepts.set_current(concept).cloned();
                if let Some(current) = current {
                    self.emit(SessionEvent::CurrentConcept(current));
                }
            }
            InboundEvent::Explanation(explanation) => {
                if self.tracker.on_explanation(explanation) {
                    self.deliver_outcome();
                }
            }
            InboundEvent::Ack { message } => trace!("Ack: {:?}", message),
            InboundEvent::Error {
                message,
                origin: ErrorOrigin::Decode,
            } => {
                warn!("Dropping undecodable frame: {}", message);
            }
            InboundEvent::Error {
                message,
                origin: ErrorOrigin::Server,
            } => {
                if carries_explanations && self.tracker.on_error(&message) {
                    self.deliver_outcome();
                } else {
                    self.surface(SessionError::Server { message });
                }
            }
        }
    }

    fn deliver_outcome(&mut self) {
        match self.tracker.take_outcome() {
            Some(ExplanationOutcome::Resolved {
                concept,
                explanation,
            }) => {
                if self.config.speak_explanations {
                    if let Some(speech) = &self.speech {
                        speech.speak(&explanation.explanation);
                    }
                }
                self.emit(SessionEvent::ExplanationReady {
                    concept,
                    explanation,
                });
            }
            Some(ExplanationOutcome::Failed { concept, error }) => {
                self.error = Some(error.to_string());
                self.emit(SessionEvent::ExplanationFailed { concept, error });
            }
            None => {}
        }
    }

    fn surface(&mut self, error: SessionError) {
        self.error = Some(error.to_string());
        self.emit(SessionEvent::Error(error));
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("Session event receiver dropped");
        }
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            connection: self.connection,
            is_connected: self.connection == ConnectionState::Open,
            is_recording: self.ingest.is_armed(),
            is_loading: self.tracker.is_pending(),
            session_id: self.session_id.clone(),
            lecture_id: self.active.as_ref().map(|a| a.lecture_id.clone()),
            reconnect_attempt: self.attempt,
            transcript: self
                .transcript
                .finalized()
                .iter()
                .map(|segment| segment.text.clone())
                .collect(),
            pending_transcript: self.transcript.pending().map(str::to_string),
            concepts: self.concepts.iter().cloned().collect(),
            current_concept: self.concepts.current().cloned(),
            error: self.error.clone(),
        };

        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
) -> Option<ConnectionEvent> {
    match events {
        Some(events) => events.recv().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
