//! Connection key registry.
//!
//! A process-wide guard that prevents two sessions from racing to open a
//! connection for the same logical channel + credential pair (rapid remount,
//! overlapping manual + automatic reconnects, duplicated effect firing).
//!
//! This is an explicit, injectable object rather than module-level state:
//! production code shares one registry across all managers via `Arc`, while
//! tests construct isolated instances. It is a logical mutex over
//! asynchronous setup, not a thread lock — session state itself is owned by
//! a single task and needs no locking.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Build the registry key for a channel + credential pair.
pub fn session_key(channel_id: &str, credential_version: u64) -> String {
    format!("{}#{}", channel_id, credential_version)
}

struct RegistryInner {
    held: HashSet<String>,
    last_attempt: HashMap<String, Instant>,
}

/// Exclusive, non-reentrant slot registry keyed by
/// `"{channel_id}#{credential_version}"`.
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                held: HashSet::new(),
                last_attempt: HashMap::new(),
            }),
        }
    }

    /// Try to claim the exclusive connection slot for `key`.
    ///
    /// Returns `false` when another session already holds the slot. That is
    /// not an error: the caller must silently skip its attempt and rely on
    /// the in-flight one to settle the state.
    pub fn try_acquire(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.held.insert(key.to_string())
    }

    /// Release the slot and forget the key's debounce timestamp.
    ///
    /// Dropping the timestamp keeps the map bounded across many channel
    /// switches in one long-lived process.
    pub fn release(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.held.remove(key);
        inner.last_attempt.remove(key);
    }

    /// Check the debounce window for `key` and record this attempt.
    ///
    /// Returns `false` (attempt rejected) when a previous attempt on the
    /// same key happened less than `window` ago.
    pub fn debounce(&self, key: &str, window: Duration) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        if let Some(last) = inner.last_attempt.get(key) {
            if now.duration_since(*last) < window {
                return false;
            }
        }
        inner.last_attempt.insert(key.to_string(), now);
        true
    }

    /// Number of currently held slots (diagnostics and tests).
    pub fn held_count(&self) -> usize {
        self.inner.lock().unwrap().held.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
