//! Heartbeat monitor: liveness probing over an open connection.
//!
//! The monitor itself owns no timers. The session task drives it with
//! explicit instants (tick, ack, inbound frame, ack timeout) and reacts to
//! the verdicts it returns — this keeps the liveness rules pure and
//! testable, and all timer cleanup collapses into the task's own teardown.
//!
//! Rules:
//! - Every `interval` a probe carrying a wall-clock timestamp is sent.
//! - A tick where the last valid ack is older than
//!   `warn_multiplier * interval` counts as a missed probe; reaching
//!   `max_missed` yields [`TickVerdict::Unhealthy`] and resets the counter.
//! - A probe that is not acked within `ack_timeout` triggers an out-of-band
//!   health check (any inbound frame since the probe proves liveness)
//!   instead of an immediate failure — one slow ack must not cause a
//!   reconnect storm.
//! - Ack round-trips above `max_latency` are logged; above twice that bound
//!   the path is considered degraded and worth abandoning.
//! - Acks whose echoed timestamp is in the future beyond the clock-skew
//!   allowance, or implausibly old, are rejected and never reset liveness.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Current wall-clock time in millis since Unix epoch.
#[inline]
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Tunable thresholds for the monitor. Built from
/// [`SessionOptions`](crate::SessionOptions).
#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    /// Probe interval (I).
    pub interval: Duration,
    /// A tick counts as missed when the last ack is older than
    /// `warn_multiplier * interval`.
    pub warn_multiplier: u32,
    /// Missed-probe count that escalates to a reconnect.
    pub max_missed: u32,
    /// Per-probe ack deadline; must be shorter than `interval`.
    pub ack_timeout: Duration,
    /// Round-trip time above this logs a warning; above twice this forces
    /// a reconnect.
    pub max_latency: Duration,
    /// Tolerated clock skew when validating echoed timestamps.
    pub clock_skew_allowance: Duration,
}

/// Outcome of a probe tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickVerdict {
    /// Liveness window still satisfied.
    Healthy,
    /// Probe window exceeded; running count of consecutive misses.
    Missed(u32),
    /// `max_missed` reached — the connection should be torn down.
    Unhealthy,
}

/// Outcome of processing a probe acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Valid ack within the latency budget.
    Ok { rtt_ms: u64 },
    /// Valid ack, but slower than `max_latency`.
    Slow { rtt_ms: u64 },
    /// Valid ack with round-trip above `2 * max_latency`; the path is
    /// degraded and the session should reconnect.
    Degraded { rtt_ms: u64 },
    /// Echoed timestamp lies in the future beyond the skew allowance.
    RejectedFuture,
    /// Echoed timestamp is implausibly old (stale or corrupted ack).
    RejectedStale,
}

#[derive(Debug)]
struct OutstandingProbe {
    ts_ms: u64,
    sent_at: Instant,
}

/// Probe payload handed back to the caller for transmission.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub ts_ms: u64,
}

/// Liveness state for one open connection.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    settings: HeartbeatSettings,
    last_ack_at: Instant,
    last_frame_at: Instant,
    missed: u32,
    outstanding: Option<OutstandingProbe>,
    last_rtt_ms: Option<u64>,
}

impl HeartbeatMonitor {
    pub fn new(settings: HeartbeatSettings) -> Self {
        let now = Instant::now();
        Self {
            settings,
            last_ack_at: now,
            last_frame_at: now,
            missed: 0,
            outstanding: None,
            last_rtt_ms: None,
        }
    }

    fn warn_threshold(&self) -> Duration {
        self.settings.interval * self.settings.warn_multiplier.max(1)
    }

    /// Reset liveness state when a transport opens.
    pub fn on_open(&mut self, now: Instant) {
        self.last_ack_at = now;
        self.last_frame_at = now;
        self.missed = 0;
        self.outstanding = None;
    }

    /// Record an inbound frame of any kind.
    pub fn on_frame(&mut self, now: Instant) {
        self.last_frame_at = now;
    }

    /// Probe tick: evaluate the liveness window and produce the next probe.
    pub fn on_tick(&mut self, now: Instant) -> (Probe, TickVerdict) {
        let verdict = if now.duration_since(self.last_ack_at) >= self.warn_threshold() {
            self.missed += 1;
            if self.missed >= self.settings.max_missed {
                self.missed = 0;
                TickVerdict::Unhealthy
            } else {
                TickVerdict::Missed(self.missed)
            }
        } else {
            TickVerdict::Healthy
        };

        let ts_ms = now_ms();
        self.outstanding = Some(OutstandingProbe { ts_ms, sent_at: now });
        (Probe { ts_ms }, verdict)
    }

    /// The ack deadline expired without a matching ack.
    ///
    /// Out-of-band health check: any frame received since the probe was
    /// sent proves the connection is alive. Returns `true` when that check
    /// passes; `false` means the silence is real (logged by the caller,
    /// escalation stays with the tick path).
    pub fn on_ack_timeout(&mut self, _now: Instant) -> bool {
        match self.outstanding.take() {
            Some(probe) => self.last_frame_at > probe.sent_at,
            None => true,
        }
    }

    /// Process an ack that echoes a probe timestamp.
    pub fn on_ack(&mut self, echoed_ts_ms: u64, now: Instant) -> AckOutcome {
        let wall = now_ms();
        let skew = self.settings.clock_skew_allowance.as_millis() as u64;
        if echoed_ts_ms > wall.saturating_add(skew) {
            return AckOutcome::RejectedFuture;
        }
        let max_age = self.warn_threshold().as_millis() as u64;
        if wall.saturating_sub(echoed_ts_ms) > max_age {
            return AckOutcome::RejectedStale;
        }

        // Prefer the monotonic clock when this ack answers the probe we
        // have in flight; an unsolicited-but-plausible ack falls back to
        // the wall-clock difference.
        let rtt_ms = match self.outstanding.take() {
            Some(probe) if probe.ts_ms == echoed_ts_ms => {
                now.duration_since(probe.sent_at).as_millis() as u64
            },
            _ => wall.saturating_sub(echoed_ts_ms),
        };

        self.last_ack_at = now;
        self.last_frame_at = now;
        self.missed = 0;
        self.last_rtt_ms = Some(rtt_ms);

        let max_latency = self.settings.max_latency.as_millis() as u64;
        if rtt_ms > max_latency.saturating_mul(2) {
            AckOutcome::Degraded { rtt_ms }
        } else if rtt_ms > max_latency {
            AckOutcome::Slow { rtt_ms }
        } else {
            AckOutcome::Ok { rtt_ms }
        }
    }

    /// Last measured ack round-trip, if any.
    pub fn last_rtt_ms(&self) -> Option<u64> {
        self.last_rtt_ms
    }
}
