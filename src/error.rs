//! Error types for the livelink session manager.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LiveLinkError>;

/// Errors surfaced by the session manager.
///
/// Transient network failures are handled internally (retry with backoff)
/// and never reach callers of the façade; these variants appear only at the
/// seams — transport factories, configuration validation, and the terminal
/// authentication path reflected in [`SessionStatus`](crate::SessionStatus).
#[derive(Debug, Error)]
pub enum LiveLinkError {
    /// Transport-level failure (dial error, send on a dead socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation did not complete within its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The server rejected the session's credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Invalid configuration detected at build time.
    #[error("configuration error: {0}")]
    Configuration(String),
}
