//! Connection lifecycle state machine
//!
//! All lifecycle decisions live in [`Machine::transition`], a pure function
//! of `(machine, input) -> (machine, effects)`. The driver task performs the
//! effects (opening sockets, arming timers) and feeds the outcomes back in as
//! inputs. Timers that fire in a state that no longer expects them are
//! ignored, so a stale reconnect can never reopen a torn-down session.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::backoff::Backoff;

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started, or manually disconnected
    Idle,
    /// Transport open in progress
    Connecting,
    /// Transport open and usable
    Open,
    /// Graceful close in progress after a manual disconnect
    Closing,
    /// Lost the transport, reconnect scheduled
    Closed,
    /// Reconnect ceiling exhausted
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reconnect and timeout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub backoff: Backoff,
    /// Reconnect attempts allowed before the session is declared dead
    pub max_attempts: u32,
    /// Bound on transport open (and on graceful close)
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            max_attempts: 5,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Connect,
    Disconnect,
    Opened,
    OpenFailed(String),
    DeadlineElapsed,
    TransportClosed { code: Option<u16>, reason: String },
    TransportFailed(String),
    ReconnectDue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start opening a transport (dropping any stale one first)
    OpenTransport,
    /// Ask the peer to close, keep listening for its close
    CloseTransport,
    /// Drop the transport and any in-flight open
    ReleaseTransport,
    ArmDeadline(Duration),
    CancelDeadline,
    ScheduleReconnect { delay: Duration, attempt: u32 },
    CancelReconnect,
    SendInit,
    ReportFatal { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Machine {
    state: ConnectionState,
    attempt: u32,
    policy: ReconnectPolicy,
}

impl Machine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful open
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn transition(self, input: Input) -> (Self, Vec<Effect>) {
        use ConnectionState::*;

        let mut next = self;
        let timeout = self.policy.connect_timeout;

        let effects = match (self.state, input) {
            (Connecting | Open, Input::Connect) => Vec::new(),
            (Idle | Closing | Closed | Failed, Input::Connect) => {
                next.state = Connecting;
                next.attempt = 0;
                vec![
                    Effect::CancelReconnect,
                    Effect::CancelDeadline,
                    Effect::ReleaseTransport,
                    Effect::OpenTransport,
                    Effect::ArmDeadline(timeout),
                ]
            }

            (Connecting, Input::Opened) => {
                next.state = Open;
                next.attempt = 0;
                vec![Effect::CancelDeadline, Effect::SendInit]
            }
            // An open that completes after we stopped wanting it
            (_, Input::Opened) => vec![Effect::ReleaseTransport],

            (
                Connecting,
                Input::OpenFailed(_)
                | Input::DeadlineElapsed
                | Input::TransportClosed { .. }
                | Input::TransportFailed(_),
            ) => {
                let mut effects = vec![Effect::CancelDeadline, Effect::ReleaseTransport];
                effects.extend(next.lose_transport());
                effects
            }
            (Open, Input::TransportClosed { .. } | Input::TransportFailed(_)) => {
                let mut effects = vec![Effect::ReleaseTransport];
                effects.extend(next.lose_transport());
                effects
            }

            (Closed, Input::ReconnectDue) => {
                next.state = Connecting;
                vec![Effect::OpenTransport, Effect::ArmDeadline(timeout)]
            }

            (Connecting, Input::Disconnect) => {
                next.state = Idle;
                next.attempt = 0;
                vec![
                    Effect::CancelDeadline,
                    Effect::CancelReconnect,
                    Effect::ReleaseTransport,
                ]
            }
            (Open, Input::Disconnect) => {
                next.state = Closing;
                next.attempt = 0;
                vec![
                    Effect::CancelReconnect,
                    Effect::CloseTransport,
                    Effect::ArmDeadline(timeout),
                ]
            }
            (Closed | Failed, Input::Disconnect) => {
                next.state = Idle;
                next.attempt = 0;
                vec![Effect::CancelReconnect]
            }

            (
                Closing,
                Input::TransportClosed { .. } | Input::TransportFailed(_) | Input::DeadlineElapsed,
            ) => {
                next.state = Idle;
                vec![Effect::CancelDeadline, Effect::ReleaseTransport]
            }

            // Stale timers and events for a state we already left
            _ => Vec::new(),
        };

        (next, effects)
    }

    fn lose_transport(&mut self) -> Vec<Effect> {
        if self.attempt >= self.policy.max_attempts {
            self.state = ConnectionState::Failed;
            return vec![Effect::ReportFatal {
                attempts: self.attempt,
            }];
        }

        let delay = self.policy.backoff.next_delay(self.attempt);
        self.attempt += 1;
        self.state = ConnectionState::Closed;
        vec![Effect::ScheduleReconnect {
            delay,
            attempt: self.attempt,
        }]
    }
}
