//! Credential provider seam.
//!
//! The session manager never owns tokens; it reads the *current* credential
//! at every dial and asks the provider to refresh when the server rejects
//! authentication. Implement [`CredentialProvider`] to bridge whatever
//! token store the host application uses (OAuth refresh flows, secure
//! storage, interactive login).

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Source of bearer tokens for connection attempts.
///
/// `refresh` fails by returning `None`, never by erroring across this
/// boundary; a `None` refresh is the signal that the user must
/// re-authenticate interactively.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    /// The token to present on the next dial, read fresh every time.
    fn current_token(&self) -> Option<String>;

    /// Obtain a fresh token (e.g. via a refresh-token exchange).
    async fn refresh(&self) -> Option<String>;

    /// Monotonic credential identity; part of the connection registry key
    /// so sessions for the same channel but different credentials never
    /// collide.
    fn version(&self) -> u64 {
        0
    }
}

/// A reference-counted provider, the form the manager holds.
pub type ArcCredentialProvider = Arc<dyn CredentialProvider>;

/// In-memory provider for static or externally rotated tokens.
///
/// `refresh` hands back whatever token is currently set — a plain static
/// token cannot renew itself, so rotation happens through
/// [`set_token`](Self::set_token) (which also bumps the version).
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
    version: AtomicU64,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
            version: AtomicU64::new(0),
        }
    }

    /// Anonymous sessions (no Authorization at all).
    pub fn anonymous() -> Self {
        Self::new(None)
    }

    /// Replace the stored token and bump the credential version.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap() = token;
        self.version.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    fn current_token(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }

    async fn refresh(&self) -> Option<String> {
        self.current_token()
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}
