//! Session configuration.
//!
//! All timing and sizing knobs for a session in one serde-friendly struct
//! with builder-style setters. The heartbeat thresholds and reconnection
//! constants are deliberately configuration rather than hard-coded magic
//! numbers; [`SessionOptions::default`] provides one coherent set of
//! defaults and [`SessionOptions::fast`] a preset for tests and local
//! development.

use crate::backoff::BackoffPolicy;
use crate::heartbeat::HeartbeatSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application-specific close code meaning "authentication rejected".
pub const DEFAULT_AUTH_REJECTED_CLOSE_CODE: u16 = 4401;

/// Options controlling one logical session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Minimum gap between connection attempts on the same registry key.
    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,

    /// How long a connection must stay open before it counts as stable
    /// (distinguishes genuine connectivity from a flapping handshake).
    #[serde(default = "default_stability_dwell_ms")]
    pub stability_dwell_ms: u64,

    /// Initial reconnect delay.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Exponential growth factor between reconnect attempts.
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: f64,

    /// Ceiling for the reconnect delay (before jitter).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// Upper bound of the uniform jitter added to each reconnect delay.
    #[serde(default = "default_reconnect_jitter_ms")]
    pub reconnect_jitter_ms: u64,

    /// Automatic reconnect attempts before giving up with a fatal status.
    /// `None` retries forever; a manual reconnect always resets the count.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: Option<u32>,

    /// Heartbeat probe interval (I).
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// A probe tick counts as missed when the last ack is older than
    /// `probe_warn_multiplier * probe_interval_ms`.
    #[serde(default = "default_probe_warn_multiplier")]
    pub probe_warn_multiplier: u32,

    /// Consecutive missed probes that force a reconnect.
    #[serde(default = "default_max_missed_probes")]
    pub max_missed_probes: u32,

    /// Per-probe ack deadline; must be shorter than the probe interval.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Ack round-trip above this logs a warning; above twice this the path
    /// is treated as degraded and the session reconnects.
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,

    /// Tolerated clock skew when validating echoed probe timestamps.
    #[serde(default = "default_clock_skew_allowance_ms")]
    pub clock_skew_allowance_ms: u64,

    /// Outbound queue capacity; overflow drops the oldest entries.
    #[serde(default = "default_queue_max_len")]
    pub queue_max_len: usize,

    /// Interval of the background queue drain while stable.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Close code the server uses to signal "authentication rejected".
    #[serde(default = "default_auth_rejected_close_code")]
    pub auth_rejected_close_code: u16,

    /// Deadline for a single dial; a slow handshake counts as a failed
    /// attempt and enters the normal backoff path.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_debounce_window_ms() -> u64 {
    250
}

fn default_stability_dwell_ms() -> u64 {
    1000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_multiplier() -> f64 {
    2.0
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_reconnect_jitter_ms() -> u64 {
    250
}

fn default_max_reconnect_attempts() -> Option<u32> {
    Some(10)
}

fn default_probe_interval_ms() -> u64 {
    10_000
}

fn default_probe_warn_multiplier() -> u32 {
    2
}

fn default_max_missed_probes() -> u32 {
    3
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_max_latency_ms() -> u64 {
    1_000
}

fn default_clock_skew_allowance_ms() -> u64 {
    2_000
}

fn default_queue_max_len() -> usize {
    256
}

fn default_drain_interval_ms() -> u64 {
    500
}

fn default_auth_rejected_close_code() -> u16 {
    DEFAULT_AUTH_REJECTED_CLOSE_CODE
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debounce_window_ms: default_debounce_window_ms(),
            stability_dwell_ms: default_stability_dwell_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_multiplier: default_reconnect_multiplier(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_jitter_ms: default_reconnect_jitter_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_warn_multiplier: default_probe_warn_multiplier(),
            max_missed_probes: default_max_missed_probes(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_latency_ms: default_max_latency_ms(),
            clock_skew_allowance_ms: default_clock_skew_allowance_ms(),
            queue_max_len: default_queue_max_len(),
            drain_interval_ms: default_drain_interval_ms(),
            auth_rejected_close_code: default_auth_rejected_close_code(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggressive timings for tests and local development.
    pub fn fast() -> Self {
        Self {
            debounce_window_ms: 0,
            stability_dwell_ms: 100,
            reconnect_base_delay_ms: 50,
            reconnect_jitter_ms: 0,
            reconnect_max_delay_ms: 1_000,
            probe_interval_ms: 1_000,
            probe_warn_multiplier: 1,
            max_missed_probes: 2,
            ack_timeout_ms: 500,
            drain_interval_ms: 50,
            connect_timeout_ms: 2_000,
            ..Self::default()
        }
    }

    pub fn with_debounce_window_ms(mut self, ms: u64) -> Self {
        self.debounce_window_ms = ms;
        self
    }

    pub fn with_stability_dwell_ms(mut self, ms: u64) -> Self {
        self.stability_dwell_ms = ms;
        self
    }

    pub fn with_reconnect_base_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_base_delay_ms = ms;
        self
    }

    pub fn with_reconnect_multiplier(mut self, multiplier: f64) -> Self {
        self.reconnect_multiplier = multiplier;
        self
    }

    pub fn with_reconnect_max_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_max_delay_ms = ms;
        self
    }

    pub fn with_reconnect_jitter_ms(mut self, ms: u64) -> Self {
        self.reconnect_jitter_ms = ms;
        self
    }

    /// Pass `None` for unlimited automatic retries.
    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_probe_interval_ms(mut self, ms: u64) -> Self {
        self.probe_interval_ms = ms;
        self
    }

    pub fn with_probe_warn_multiplier(mut self, multiplier: u32) -> Self {
        self.probe_warn_multiplier = multiplier;
        self
    }

    pub fn with_max_missed_probes(mut self, count: u32) -> Self {
        self.max_missed_probes = count;
        self
    }

    pub fn with_ack_timeout_ms(mut self, ms: u64) -> Self {
        self.ack_timeout_ms = ms;
        self
    }

    pub fn with_max_latency_ms(mut self, ms: u64) -> Self {
        self.max_latency_ms = ms;
        self
    }

    pub fn with_queue_max_len(mut self, len: usize) -> Self {
        self.queue_max_len = len;
        self
    }

    pub fn with_drain_interval_ms(mut self, ms: u64) -> Self {
        self.drain_interval_ms = ms;
        self
    }

    pub fn with_auth_rejected_close_code(mut self, code: u16) -> Self {
        self.auth_rejected_close_code = code;
        self
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    // ── Derived views ──────────────────────────────────────────────────

    pub(crate) fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.reconnect_base_delay_ms),
            multiplier: self.reconnect_multiplier,
            max: Duration::from_millis(self.reconnect_max_delay_ms),
            jitter: Duration::from_millis(self.reconnect_jitter_ms),
        }
    }

    pub(crate) fn heartbeat(&self) -> HeartbeatSettings {
        HeartbeatSettings {
            interval: Duration::from_millis(self.probe_interval_ms),
            warn_multiplier: self.probe_warn_multiplier,
            max_missed: self.max_missed_probes,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms.min(self.probe_interval_ms)),
            max_latency: Duration::from_millis(self.max_latency_ms),
            clock_skew_allowance: Duration::from_millis(self.clock_skew_allowance_ms),
        }
    }

    pub(crate) fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub(crate) fn stability_dwell(&self) -> Duration {
        Duration::from_millis(self.stability_dwell_ms)
    }

    pub(crate) fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}
