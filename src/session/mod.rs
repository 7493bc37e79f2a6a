//! Session lifecycle state machine.
//!
//! All mutable per-session fields live in one [`SessionHandle`] record and
//! every transition flows through a single
//! [`handle_event`](SessionHandle::handle_event) dispatcher that returns the
//! side effects for the driver task to execute. Keeping the transitions
//! pure (no I/O, no timers) makes the whole lifecycle table unit-testable;
//! the async driver in [`task`] owns the transport, the deadlines, and the
//! heartbeat monitor.

pub(crate) mod task;

use crate::transport::{CloseInfo, CLOSE_ABNORMAL, CLOSE_NORMAL};
use serde::Serialize;
use std::fmt;

/// Lifecycle of one logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection and none pending (also the suspended-while-offline
    /// state).
    Idle,
    /// Dial in progress or a reconnect delay running.
    Connecting,
    /// Transport open but not yet past the stability dwell.
    OpenUnstable,
    /// Transport open and stable; outbound drain is active.
    OpenStable,
    /// Auth-rejected close received; credential refresh in flight.
    Reauthenticating,
    /// Caller-initiated close in progress.
    Closing,
    /// Terminal for this handle; a new `connect()` builds a fresh one.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::OpenUnstable => "open_unstable",
            SessionState::OpenStable => "open_stable",
            SessionState::Reauthenticating => "reauthenticating",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Unrecoverable conditions surfaced through [`SessionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalError {
    /// Credential refresh failed; the user must re-authenticate.
    AuthRequired,
    /// Automatic reconnect attempts exhausted; a manual reconnect resets
    /// the counter.
    RetriesExhausted,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::AuthRequired => f.write_str("re-authentication required"),
            FatalError::RetriesExhausted => f.write_str("reconnect attempts exhausted"),
        }
    }
}

/// Synchronous status snapshot returned by
/// [`SessionManager::status`](crate::SessionManager::status).
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub reconnect_attempt: u32,
    /// Last measured heartbeat round-trip, if any.
    pub last_latency_ms: Option<u64>,
    pub fatal: Option<FatalError>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            reconnect_attempt: 0,
            last_latency_ms: None,
            fatal: None,
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    DialSucceeded,
    DialFailed,
    TransportClosed(Option<CloseInfo>),
    DwellElapsed,
    HeartbeatUnhealthy,
    HeartbeatDegraded,
    DisconnectRequested,
    ManualReconnect,
    TokenExpired,
    WentOffline,
    CameOnline,
}

/// Side effects the driver executes after a transition.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Action {
    /// Read the current credential and dial the transport factory now.
    Dial,
    /// Arm the reconnect timer with the backoff delay for `attempt`.
    ScheduleRetry { attempt: u32 },
    StartHeartbeat,
    StopHeartbeat,
    ArmDwell,
    CloseTransport,
    /// Ask the credential provider for a fresh token; feeds back into the
    /// machine as refresh success or failure.
    Refresh,
    /// Drain the outbound queue immediately.
    DrainNow,
    ReleaseKey,
    NotifyFatal(FatalError),
    /// Terminate the driver task (timers die with it).
    Exit,
}

/// All mutable state of one logical session, owned by its driver task.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    pub state: SessionState,
    pub reconnect_attempt: u32,
    /// True only after the connection has survived the stability dwell.
    pub stable: bool,
    pub fatal: Option<FatalError>,
    /// Offline signal received; reconnect deferred until back online.
    suspended: bool,
    /// `disconnect()` was requested; suppress all automatic reconnection.
    caller_close: bool,
    max_attempts: Option<u32>,
    auth_rejected_code: u16,
}

impl SessionHandle {
    pub fn new(max_attempts: Option<u32>, auth_rejected_code: u16) -> Self {
        Self {
            state: SessionState::Connecting,
            reconnect_attempt: 0,
            stable: false,
            fatal: None,
            suspended: false,
            caller_close: false,
            max_attempts,
            auth_rejected_code,
        }
    }

    /// The single transition dispatcher.
    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<Action> {
        match event {
            SessionEvent::DialSucceeded => {
                self.state = SessionState::OpenUnstable;
                self.stable = false;
                vec![Action::StartHeartbeat, Action::ArmDwell]
            },
            SessionEvent::DialFailed => self.retry_or_give_up(),
            SessionEvent::DwellElapsed => {
                if self.state == SessionState::OpenUnstable {
                    self.state = SessionState::OpenStable;
                    self.stable = true;
                    self.reconnect_attempt = 0;
                    vec![Action::DrainNow]
                } else {
                    Vec::new()
                }
            },
            SessionEvent::TransportClosed(info) => self.on_transport_closed(info),
            SessionEvent::HeartbeatUnhealthy | SessionEvent::HeartbeatDegraded => {
                if self.is_open() {
                    self.stable = false;
                    let mut actions = vec![Action::StopHeartbeat, Action::CloseTransport];
                    actions.extend(self.retry_or_give_up());
                    actions
                } else {
                    Vec::new()
                }
            },
            SessionEvent::DisconnectRequested => {
                // The driver closes the transport inline, so Closing
                // collapses into Closed within one transition.
                self.caller_close = true;
                self.stable = false;
                self.state = SessionState::Closed;
                vec![
                    Action::StopHeartbeat,
                    Action::CloseTransport,
                    Action::ReleaseKey,
                    Action::Exit,
                ]
            },
            SessionEvent::ManualReconnect => {
                self.reconnect_attempt = 0;
                self.fatal = None;
                self.force_reconnect()
            },
            SessionEvent::TokenExpired => self.force_reconnect(),
            SessionEvent::WentOffline => {
                self.suspended = true;
                match self.state {
                    SessionState::Connecting
                    | SessionState::OpenUnstable
                    | SessionState::OpenStable
                    | SessionState::Reauthenticating => {
                        self.state = SessionState::Idle;
                        self.stable = false;
                        vec![Action::StopHeartbeat, Action::CloseTransport]
                    },
                    _ => Vec::new(),
                }
            },
            SessionEvent::CameOnline => {
                // Idempotent: only resume when actually suspended.
                if self.suspended && self.state == SessionState::Idle {
                    self.suspended = false;
                    self.state = SessionState::Connecting;
                    vec![Action::Dial]
                } else {
                    Vec::new()
                }
            },
        }
    }

    /// Feed the outcome of a credential refresh back into the machine.
    pub fn handle_refresh_result(&mut self, refreshed: bool) -> Vec<Action> {
        if self.state != SessionState::Reauthenticating {
            return Vec::new();
        }
        if refreshed {
            self.state = SessionState::Connecting;
            vec![Action::Dial]
        } else {
            self.state = SessionState::Closed;
            self.fatal = Some(FatalError::AuthRequired);
            vec![
                Action::ReleaseKey,
                Action::NotifyFatal(FatalError::AuthRequired),
                Action::Exit,
            ]
        }
    }

    fn is_open(&self) -> bool {
        matches!(
            self.state,
            SessionState::OpenUnstable | SessionState::OpenStable
        )
    }

    fn on_transport_closed(&mut self, info: Option<CloseInfo>) -> Vec<Action> {
        if self.caller_close || self.state == SessionState::Closing {
            self.state = SessionState::Closed;
            return vec![
                Action::CloseTransport,
                Action::StopHeartbeat,
                Action::ReleaseKey,
                Action::Exit,
            ];
        }

        let code = info.as_ref().map_or(CLOSE_ABNORMAL, |i| i.code);
        let was_stable = self.stable;
        self.stable = false;

        if code == self.auth_rejected_code {
            self.state = SessionState::Reauthenticating;
            return vec![Action::CloseTransport, Action::StopHeartbeat, Action::Refresh];
        }

        if code == CLOSE_NORMAL && was_stable {
            // Server said goodbye after a stable run: terminal.
            self.state = SessionState::Closed;
            return vec![
                Action::CloseTransport,
                Action::StopHeartbeat,
                Action::ReleaseKey,
                Action::Exit,
            ];
        }

        // A clean close before stability is a failed handshake; everything
        // else is an abnormal drop. Both retry with backoff.
        let mut actions = vec![Action::CloseTransport, Action::StopHeartbeat];
        actions.extend(self.retry_or_give_up());
        actions
    }

    fn force_reconnect(&mut self) -> Vec<Action> {
        match self.state {
            SessionState::OpenUnstable | SessionState::OpenStable => {
                self.state = SessionState::Connecting;
                self.stable = false;
                vec![Action::StopHeartbeat, Action::CloseTransport, Action::Dial]
            },
            SessionState::Idle | SessionState::Closed => {
                self.suspended = false;
                self.caller_close = false;
                self.state = SessionState::Connecting;
                vec![Action::Dial]
            },
            // Connecting here means a backoff delay is pending (commands
            // are not read during an actual dial); skip the wait.
            SessionState::Connecting => vec![Action::Dial],
            // Let an in-flight refresh or teardown settle first.
            SessionState::Reauthenticating | SessionState::Closing => Vec::new(),
        }
    }

    fn retry_or_give_up(&mut self) -> Vec<Action> {
        let attempt = self.reconnect_attempt;
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                self.state = SessionState::Closed;
                self.fatal = Some(FatalError::RetriesExhausted);
                return vec![
                    Action::ReleaseKey,
                    Action::NotifyFatal(FatalError::RetriesExhausted),
                    Action::Exit,
                ];
            }
        }
        self.state = SessionState::Connecting;
        self.reconnect_attempt += 1;
        vec![Action::ScheduleRetry { attempt }]
    }
}
