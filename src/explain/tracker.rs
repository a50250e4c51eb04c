use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::error::{Result, SessionError};
use crate::protocol::{Explanation, FlagRequest, Outbound};

/// Lifecycle of the single outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    None,
    Pending,
    Resolved,
    Errored,
}

/// The request currently awaiting an answer
#[derive(Debug, Clone)]
pub struct PendingExplanation {
    pub concept_name: String,
    pub submitted_at: DateTime<Utc>,
    deadline: Instant,
}

impl PendingExplanation {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Result of a request, held until the caller consumes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplanationOutcome {
    Resolved {
        concept: String,
        explanation: Explanation,
    },
    Failed {
        concept: String,
        error: SessionError,
    },
}

/// Explanation Request Tracker
///
/// Strictly one outstanding request per tracker. Responses are not
/// correlated by id on the wire, so any explanation or server error that
/// arrives while a request is pending belongs to that request.
#[derive(Debug)]
pub struct ExplanationTracker {
    timeout: Duration,
    state: RequestState,
    pending: Option<PendingExplanation>,
    outcome: Option<ExplanationOutcome>,
}

impl ExplanationTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: RequestState::None,
            pending: None,
            outcome: None,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == RequestState::Pending
    }

    pub fn pending(&self) -> Option<&PendingExplanation> {
        self.pending.as_ref()
    }

    /// When the pending request times out
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Submit a flag/explain request.
    ///
    /// Fails fast with `AlreadyPending` while a request is outstanding and
    /// with `NotConnected` when the connection is not open; nothing is queued.
    pub async fn flag(&mut self, request: FlagRequest, connection: &ConnectionHandle) -> Result<()> {
        if let Some(pending) = &self.pending {
            warn!(
                "Explanation for '{}' requested while '{}' is pending",
                request.concept_name, pending.concept_name
            );
            return Err(SessionError::AlreadyPending {
                concept: pending.concept_name.clone(),
            });
        }

        if !connection.is_open() {
            return Err(SessionError::NotConnected);
        }

        let concept_name = request.concept_name.clone();
        connection.send(Outbound::Flag(request)).await?;

        info!("Requested explanation for '{}'", concept_name);
        self.state = RequestState::Pending;
        self.outcome = None;
        self.pending = Some(PendingExplanation {
            concept_name,
            submitted_at: Utc::now(),
            deadline: Instant::now() + self.timeout,
        });
        Ok(())
    }

    /// Returns true if this explanation resolved the pending request.
    pub fn on_explanation(&mut self, explanation: Explanation) -> bool {
        let Some(pending) = self.pending.take() else {
            debug!("Discarding explanation with no pending request");
            return false;
        };

        info!("Explanation received for '{}'", pending.concept_name);
        self.state = RequestState::Resolved;
        self.outcome = Some(ExplanationOutcome::Resolved {
            concept: pending.concept_name,
            explanation,
        });
        true
    }

    /// Returns true if this server error failed the pending request.
    pub fn on_error(&mut self, message: &str) -> bool {
        self.fail(SessionError::Server {
            message: message.to_string(),
        })
    }

    /// Fail the pending request if its deadline has passed.
    pub fn expire(&mut self, now: Instant) -> bool {
        match &self.pending {
            Some(pending) if now >= pending.deadline => {
                let concept = pending.concept_name.clone();
                self.fail(SessionError::Timeout {
                    concept,
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            _ => false,
        }
    }

    /// Fail the pending request with `error`. Returns false if none was pending.
    pub fn fail(&mut self, error: SessionError) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };

        warn!("Explanation for '{}' failed: {}", pending.concept_name, error);
        self.state = RequestState::Errored;
        self.outcome = Some(ExplanationOutcome::Failed {
            concept: pending.concept_name,
            error,
        });
        true
    }

    /// Consume the stored outcome, returning the tracker to `None`.
    pub fn take_outcome(&mut self) -> Option<ExplanationOutcome> {
        let outcome = self.outcome.take();
        if outcome.is_some() {
            self.state = RequestState::None;
        }
        outcome
    }

    /// Forget any pending request and stored outcome.
    pub fn reset(&mut self) {
        self.pending = None;
        self.outcome = None;
        self.state = RequestState::None;
    }
}
