//! Subscriber registration and connection lifecycle hooks.
//!
//! Two callback surfaces live here:
//!
//! - [`SubscriberSet`]: inbound-message subscribers. Delivery follows
//!   transport arrival order, and a panicking handler is isolated so it can
//!   never prevent delivery to the others.
//! - [`EventHandlers`]: optional lifecycle hooks (`on_connect`,
//!   `on_disconnect`, `on_error`) for UIs that want to reflect connection
//!   state beyond polling [`SessionStatus`](crate::SessionStatus).

use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Reason a connection closed, as passed to `on_disconnect`.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description.
    pub message: String,
    /// WebSocket close code, if one was received (1000 = normal,
    /// 1006 = abnormal).
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code: {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Error information passed to `on_error`.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    pub message: String,
    /// Whether auto-reconnect may still succeed.
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;
type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;

/// Optional connection lifecycle callbacks.
///
/// All handlers are `Send + Sync` and invoked from the session's background
/// task.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked when a transport opens.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Invoked when the transport closes, intentionally or not.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Invoked on connection errors, recoverable or fatal.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }
}

type SubscriberFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// Ordered set of inbound-message subscribers, shared between the façade
/// (registration) and the session task (dispatch).
#[derive(Clone, Default)]
pub(crate) struct SubscriberSet {
    inner: Arc<RwLock<Vec<(u64, SubscriberFn)>>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, f: impl Fn(&Value) + Send + Sync + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.write().unwrap().push((id, Arc::new(f)));
        id
    }

    pub fn remove(&self, id: u64) {
        self.inner.write().unwrap().retain(|(sid, _)| *sid != id);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Deliver one payload to every subscriber in registration order.
    ///
    /// Panics are caught per subscriber and logged; they never break the
    /// dispatch loop or corrupt session state.
    pub fn dispatch(&self, payload: &Value) {
        let subscribers: Vec<SubscriberFn> = self
            .inner
            .read()
            .unwrap()
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        for cb in subscribers {
            if catch_unwind(AssertUnwindSafe(|| cb(payload))).is_err() {
                log::warn!("[livelink] Subscriber panicked while handling a message");
            }
        }
    }
}
