//! The session manager façade.
//!
//! [`SessionManager`] is the public entry point: it owns the outbound
//! queue and the subscriber set, and spawns one driver task per connected
//! channel. Every method is non-blocking — commands go to the task over a
//! bounded channel and status comes back through a watch, so the façade is
//! safe to call from UI code, request handlers, or drop glue.
//!
//! Must be used inside a tokio runtime; [`connect`](SessionManager::connect)
//! spawns the background task.

use crate::channel::ChannelSpec;
use crate::config::SessionOptions;
use crate::credentials::{ArcCredentialProvider, CredentialProvider, StaticCredentials};
use crate::error::{LiveLinkError, Result};
use crate::events::{EventHandlers, SubscriberSet};
use crate::queue::OutboundQueue;
use crate::registry::ConnectionRegistry;
use crate::session::task::{session_task, SessionCmd, SessionContext};
use crate::session::{SessionState, SessionStatus};
use crate::transport::tungstenite::WsTransportFactory;
use crate::transport::{ArcTransportFactory, TransportFactory};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const CMD_CHANNEL_CAPACITY: usize = 32;

struct ActiveSession {
    channel: ChannelSpec,
    cmd_tx: mpsc::Sender<SessionCmd>,
    status_rx: watch::Receiver<SessionStatus>,
    task: JoinHandle<()>,
}

impl ActiveSession {
    fn alive(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Resilient real-time session manager for one logical channel at a time.
///
/// The manager survives its connections: reconnection, credential refresh,
/// and heartbeat supervision happen in a background task, while the
/// outbound queue and subscriber registrations live here and carry over
/// across reconnects and channel switches.
pub struct SessionManager {
    options: SessionOptions,
    registry: Arc<ConnectionRegistry>,
    credentials: ArcCredentialProvider,
    factory: ArcTransportFactory,
    handlers: EventHandlers,
    subscribers: SubscriberSet,
    queue: Arc<Mutex<OutboundQueue>>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionManager {
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::new()
    }

    /// Connect to `channel`, or do nothing if an equivalent session is
    /// already live.
    ///
    /// Calling this twice with the same channel is free; the second call
    /// is a no-op, not a second connection. Calling it with a different
    /// channel tears the old session down first and connects the new one.
    pub fn connect(&self, channel: ChannelSpec) {
        let mut active = self.active.lock().unwrap();
        if let Some(session) = active.as_ref() {
            if session.channel == channel
                && session.alive()
                && session.status_rx.borrow().state != SessionState::Closed
            {
                log::debug!(
                    "[livelink] connect('{}') ignored, session already live",
                    channel.channel_id
                );
                return;
            }
            log::info!(
                "[livelink] Switching from channel '{}' to '{}'",
                session.channel.channel_id,
                channel.channel_id
            );
            let _ = session.cmd_tx.try_send(SessionCmd::Disconnect);
        }
        *active = Some(self.spawn_session(channel));
    }

    /// Queue a payload for delivery.
    ///
    /// Never blocks and never fails: if the connection is absent or not yet
    /// stable the payload waits in the bounded queue, and overflow drops
    /// the oldest entries (logged).
    pub fn send(&self, payload: Value) {
        let dropped = self.queue.lock().unwrap().enqueue(payload);
        if dropped > 0 {
            log::warn!(
                "[livelink] Outbound queue overflowed, dropped {} oldest message(s)",
                dropped
            );
        }
        if let Some(session) = self.active.lock().unwrap().as_ref() {
            let _ = session.cmd_tx.try_send(SessionCmd::Nudge);
        }
    }

    /// Register an inbound-message subscriber.
    ///
    /// Subscribers receive every non-control payload in arrival order and
    /// survive reconnects. Dropping the returned [`Subscription`]
    /// unregisters.
    pub fn subscribe(&self, f: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        let id = self.subscribers.add(f);
        Subscription {
            id,
            set: self.subscribers.clone(),
        }
    }

    /// Tear the session down. Safe to call at any point, including
    /// mid-connect or when already disconnected. Queued payloads are kept
    /// for a future `connect`.
    pub fn disconnect(&self) {
        if let Some(session) = self.active.lock().unwrap().take() {
            log::info!(
                "[livelink] Disconnecting channel '{}'",
                session.channel.channel_id
            );
            let _ = session.cmd_tx.try_send(SessionCmd::Disconnect);
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> SessionStatus {
        match self.active.lock().unwrap().as_ref() {
            Some(session) => session.status_rx.borrow().clone(),
            None => SessionStatus::default(),
        }
    }

    /// A watch on the session status, for callers that want to await state
    /// changes instead of polling. `None` when no session was started.
    pub fn status_watch(&self) -> Option<watch::Receiver<SessionStatus>> {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.status_rx.clone())
    }

    /// Payloads currently waiting in the outbound queue.
    pub fn pending_outbound(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Force a reconnect now: resets the attempt counter, clears a fatal
    /// status, and dials immediately. Revives a session that gave up after
    /// exhausting its retries.
    pub fn reconnect(&self) {
        let mut active = self.active.lock().unwrap();
        let revive = match active.as_ref() {
            Some(session) if session.alive() => {
                let _ = session.cmd_tx.try_send(SessionCmd::Reconnect);
                None
            },
            // The task exited (fatal or terminal close); start over.
            Some(session) => Some(session.channel.clone()),
            None => {
                log::warn!("[livelink] reconnect() without a prior connect()");
                None
            },
        };
        if let Some(channel) = revive {
            log::info!(
                "[livelink] Reviving terminated session for '{}'",
                channel.channel_id
            );
            *active = Some(self.spawn_session(channel));
        }
    }

    /// Report a network reachability change. Offline suspends reconnection
    /// attempts without touching queue or subscribers; online resumes.
    pub fn notify_online(&self, online: bool) {
        if let Some(session) = self.active.lock().unwrap().as_ref() {
            let _ = session.cmd_tx.try_send(SessionCmd::Online(online));
        }
    }

    /// Report a UI visibility change. A hidden UI keeps its connection;
    /// becoming visible re-checks that one exists.
    pub fn notify_visible(&self, visible: bool) {
        if let Some(session) = self.active.lock().unwrap().as_ref() {
            let _ = session.cmd_tx.try_send(SessionCmd::Visible(visible));
        }
    }

    /// Report that the current token is known to be expired (e.g. the host
    /// app refreshed it out of band). The session redials, reading the
    /// credential fresh.
    pub fn notify_token_expired(&self) {
        if let Some(session) = self.active.lock().unwrap().as_ref() {
            let _ = session.cmd_tx.try_send(SessionCmd::TokenExpired);
        }
    }

    fn spawn_session(&self, channel: ChannelSpec) -> ActiveSession {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(SessionStatus {
            state: SessionState::Connecting,
            ..SessionStatus::default()
        });
        let ctx = SessionContext {
            channel: channel.clone(),
            options: self.options.clone(),
            registry: self.registry.clone(),
            credentials: self.credentials.clone(),
            factory: self.factory.clone(),
            queue: self.queue.clone(),
            subscribers: self.subscribers.clone(),
            handlers: self.handlers.clone(),
            status_tx,
        };
        let task = tokio::spawn(session_task(ctx, cmd_rx));
        ActiveSession {
            channel,
            cmd_tx,
            status_rx,
            task,
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // Best effort; the task also exits when the command channel closes.
        self.disconnect();
    }
}

/// RAII subscriber registration; dropping it unregisters.
pub struct Subscription {
    id: u64,
    set: SubscriberSet,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.set.remove(self.id);
    }
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    options: SessionOptions,
    registry: Option<Arc<ConnectionRegistry>>,
    credentials: Option<ArcCredentialProvider>,
    factory: Option<ArcTransportFactory>,
    handlers: EventHandlers,
}

impl SessionManagerBuilder {
    pub fn new() -> Self {
        Self {
            options: SessionOptions::default(),
            registry: None,
            credentials: None,
            factory: None,
            handlers: EventHandlers::new(),
        }
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Share a registry across managers so sessions for the same channel +
    /// credential never race. Defaults to a private registry.
    pub fn registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Defaults to [`StaticCredentials::anonymous`].
    pub fn credentials(mut self, provider: impl CredentialProvider) -> Self {
        self.credentials = Some(Arc::new(provider));
        self
    }

    /// Defaults to the production WebSocket factory.
    pub fn transport_factory(mut self, factory: impl TransportFactory) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn build(self) -> Result<SessionManager> {
        if self.options.probe_interval_ms == 0 {
            return Err(LiveLinkError::Configuration(
                "probe_interval_ms must be greater than zero".into(),
            ));
        }
        if !self.options.reconnect_multiplier.is_finite() {
            return Err(LiveLinkError::Configuration(
                "reconnect_multiplier must be finite".into(),
            ));
        }
        let queue = Arc::new(Mutex::new(OutboundQueue::new(self.options.queue_max_len)));
        Ok(SessionManager {
            registry: self.registry.unwrap_or_default(),
            credentials: self
                .credentials
                .unwrap_or_else(|| Arc::new(StaticCredentials::anonymous())),
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(WsTransportFactory::new())),
            handlers: self.handlers,
            subscribers: SubscriberSet::new(),
            queue,
            options: self.options,
            active: Mutex::new(None),
        })
    }
}

impl Default for SessionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
