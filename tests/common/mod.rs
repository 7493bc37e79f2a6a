#![allow(dead_code)]

//! Shared test doubles: a scripted transport factory and credential
//! provider, plus small helpers for driving the paused-clock runtime.

use async_trait::async_trait;
use livelink::{
    ChannelSpec, CloseInfo, CredentialProvider, LiveLinkError, SessionState, SessionStatus,
    Transport, TransportEvent, TransportFactory,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

// ── Transport stub ─────────────────────────────────────────────────────

/// Test-side controller for one stub connection.
#[derive(Clone)]
pub struct StubHandle {
    sent: Arc<Mutex<Vec<String>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl StubHandle {
    /// Feed an inbound application frame.
    pub fn push_frame(&self, payload: &Value) {
        let _ = self.events.send(TransportEvent::Frame(payload.to_string()));
    }

    /// Feed a raw inbound text frame.
    pub fn push_text(&self, text: &str) {
        let _ = self.events.send(TransportEvent::Frame(text.to_string()));
    }

    /// Close the connection with a close frame.
    pub fn close_with(&self, code: u16, reason: &str) {
        let _ = self
            .events
            .send(TransportEvent::Closed(Some(CloseInfo::new(code, reason))));
    }

    /// Drop the connection without a close frame (abnormal).
    pub fn drop_link(&self) {
        let _ = self.events.send(TransportEvent::Closed(None));
    }

    /// Everything the session wrote to this connection.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Application payloads sent (control frames filtered out).
    pub fn sent_payloads(&self) -> Vec<Value> {
        self.sent_texts()
            .iter()
            .filter_map(|t| serde_json::from_str::<Value>(t).ok())
            .filter(|v| v["type"] != "ping" && v["type"] != "pong")
            .collect()
    }

    /// Liveness probes sent on this connection.
    pub fn pings_sent(&self) -> Vec<Value> {
        self.sent_texts()
            .iter()
            .filter_map(|t| serde_json::from_str::<Value>(t).ok())
            .filter(|v| v["type"] == "ping")
            .collect()
    }

    /// Whether the session called `close()` on this transport.
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct StubTransport {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    // Held so the event channel outlives a dropped test handle, and used
    // for the automatic pong replies.
    loopback: mpsc::UnboundedSender<TransportEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    auto_pong: bool,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&mut self, text: &str) -> livelink::Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        if self.auto_pong {
            if let Ok(v) = serde_json::from_str::<Value>(text) {
                if v["type"] == "ping" {
                    let reply = json!({ "type": "pong", "ts": v["ts"] });
                    let _ = self.loopback.send(TransportEvent::Frame(reply.to_string()));
                }
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.rx.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed(None),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FactoryState {
    auto_pong: bool,
    fail_dials: usize,
    dial_count: usize,
    tokens: Vec<Option<String>>,
    handles: Vec<StubHandle>,
}

/// Scripted [`TransportFactory`]: counts dials, records tokens, and hands
/// out controllable stub connections. Clones share state so the test keeps
/// one while the manager owns another.
#[derive(Clone, Default)]
pub struct StubFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl StubFactory {
    /// Factory whose connections answer liveness probes by themselves.
    pub fn new() -> Self {
        let factory = Self::default();
        factory.state.lock().unwrap().auto_pong = true;
        factory
    }

    /// Factory whose connections stay silent unless the test speaks.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Make the next `n` dials fail with a transport error.
    pub fn fail_next_dials(&self, n: usize) {
        self.state.lock().unwrap().fail_dials = n;
    }

    pub fn dial_count(&self) -> usize {
        self.state.lock().unwrap().dial_count
    }

    /// Tokens presented at each dial, in order.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().tokens.clone()
    }

    /// Controller for the `i`-th successful connection.
    pub fn handle(&self, i: usize) -> StubHandle {
        self.state.lock().unwrap().handles[i].clone()
    }

    pub fn last_handle(&self) -> StubHandle {
        self.state
            .lock()
            .unwrap()
            .handles
            .last()
            .expect("no connection was established")
            .clone()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().unwrap().handles.len()
    }
}

#[async_trait]
impl TransportFactory for StubFactory {
    async fn connect(
        &self,
        _channel: &ChannelSpec,
        token: Option<&str>,
    ) -> livelink::Result<Box<dyn Transport>> {
        let mut state = self.state.lock().unwrap();
        state.dial_count += 1;
        state.tokens.push(token.map(String::from));
        if state.fail_dials > 0 {
            state.fail_dials -= 1;
            return Err(LiveLinkError::Transport("stub dial refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        state.handles.push(StubHandle {
            sent: sent.clone(),
            events: tx.clone(),
            closed: closed.clone(),
        });
        Ok(Box::new(StubTransport {
            rx,
            loopback: tx,
            sent,
            auto_pong: state.auto_pong,
            closed,
        }))
    }
}

// ── Credential stub ────────────────────────────────────────────────────

struct CredentialState {
    current: Option<String>,
    refresh_outcomes: VecDeque<Option<String>>,
    refresh_calls: usize,
}

/// Credential provider with a scripted sequence of refresh outcomes.
#[derive(Clone)]
pub struct ScriptedCredentials {
    state: Arc<Mutex<CredentialState>>,
}

impl ScriptedCredentials {
    pub fn new(initial: &str, refresh_outcomes: Vec<Option<&str>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CredentialState {
                current: Some(initial.to_string()),
                refresh_outcomes: refresh_outcomes
                    .into_iter()
                    .map(|o| o.map(String::from))
                    .collect(),
                refresh_calls: 0,
            })),
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.lock().unwrap().refresh_calls
    }
}

#[async_trait]
impl CredentialProvider for ScriptedCredentials {
    fn current_token(&self) -> Option<String> {
        self.state.lock().unwrap().current.clone()
    }

    async fn refresh(&self) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        state.refresh_calls += 1;
        let outcome = state.refresh_outcomes.pop_front().flatten();
        if outcome.is_some() {
            state.current = outcome.clone();
        }
        outcome
    }
}

// ── Runtime helpers ────────────────────────────────────────────────────

/// Let all ready tasks run without advancing virtual time.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Advance virtual time and let the fallout settle.
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

/// Await a target session state through the status watch.
pub async fn wait_for_state(rx: &mut watch::Receiver<SessionStatus>, target: SessionState) {
    let wait = async {
        loop {
            if rx.borrow_and_update().state == target {
                return;
            }
            if rx.changed().await.is_err() {
                // Task exited; the watch retains its last value.
                let state = rx.borrow().state;
                assert_eq!(state, target, "session task exited in state {:?}", state);
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {:?}", target));
}

/// Poll a condition, advancing virtual time in small steps.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..20_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting until {}", what);
}

pub fn test_channel(id: &str) -> ChannelSpec {
    ChannelSpec::new(id, "wss://example.test/ws/{channel}")
}
