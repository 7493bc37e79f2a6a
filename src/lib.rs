//! livelink — resilient real-time session manager.
//!
//! A client-side WebSocket session layer that survives the network: it
//! reconnects with jittered exponential backoff, supervises liveness with
//! application-level heartbeats, queues outbound payloads while the
//! connection is down, refreshes credentials when the server rejects them,
//! and guarantees at most one connection per logical channel + credential
//! pair process-wide.
//!
//! The [`SessionManager`] façade is non-blocking end to end: each session
//! runs in one background tokio task that owns the transport, the state
//! machine, and every timer, so tearing a session down is dropping a task,
//! never chasing callbacks.
//!
//! ```no_run
//! use livelink::{ChannelSpec, SessionManager, SessionOptions};
//!
//! # async fn run() -> livelink::Result<()> {
//! let manager = SessionManager::builder()
//!     .options(SessionOptions::default().with_probe_interval_ms(15_000))
//!     .build()?;
//!
//! manager.connect(ChannelSpec::new(
//!     "notifications",
//!     "wss://example.test/ws/{channel}",
//! ));
//! let _subscription = manager.subscribe(|msg| println!("inbound: {msg}"));
//! manager.send(serde_json::json!({ "type": "hello" }));
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod channel;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod session;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use channel::ChannelSpec;
pub use config::{SessionOptions, DEFAULT_AUTH_REJECTED_CLOSE_CODE};
pub use credentials::{ArcCredentialProvider, CredentialProvider, StaticCredentials};
pub use error::{LiveLinkError, Result};
pub use events::{ConnectionError, DisconnectReason, EventHandlers};
pub use manager::{SessionManager, SessionManagerBuilder, Subscription};
pub use queue::{OutboundQueue, QueuedMessage};
pub use registry::{session_key, ConnectionRegistry};
pub use session::{FatalError, SessionState, SessionStatus};
pub use transport::tungstenite::WsTransportFactory;
pub use transport::{
    ArcTransportFactory, CloseInfo, Transport, TransportEvent, TransportFactory, CLOSE_ABNORMAL,
    CLOSE_GOING_AWAY, CLOSE_NORMAL,
};
