//! The session driver task.
//!
//! One tokio task owns everything mutable about a session: the transport,
//! the [`SessionHandle`] state machine, the heartbeat monitor, and every
//! timer. The façade talks to it only through the command channel and the
//! status watch, so no lock is ever held across a state transition, and
//! when the task exits its timers and transport die with it — teardown is
//! structural, not bookkeeping.

use super::{Action, SessionEvent, SessionHandle, SessionState, SessionStatus};
use crate::channel::ChannelSpec;
use crate::config::SessionOptions;
use crate::credentials::ArcCredentialProvider;
use crate::events::{ConnectionError, DisconnectReason, EventHandlers, SubscriberSet};
use crate::heartbeat::{AckOutcome, HeartbeatMonitor, TickVerdict};
use crate::queue::OutboundQueue;
use crate::registry::{session_key, ConnectionRegistry};
use crate::transport::{ArcTransportFactory, ControlFrame, Transport, TransportEvent};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};

/// Used to park a timer that is currently disarmed. ~100 years, far enough
/// to never fire, near enough to not overflow the timer wheel.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Commands from the façade to the driver task.
#[derive(Debug)]
pub(crate) enum SessionCmd {
    /// A payload was enqueued; drain now if stable.
    Nudge,
    Disconnect,
    /// Manual reconnect: reset the attempt counter and dial immediately.
    Reconnect,
    /// Network reachability changed.
    Online(bool),
    /// UI visibility changed.
    Visible(bool),
    /// The current token is known to be expired; redial with a fresh read.
    TokenExpired,
}

/// Everything the driver task needs, bundled so spawning stays readable.
pub(crate) struct SessionContext {
    pub channel: ChannelSpec,
    pub options: SessionOptions,
    pub registry: Arc<ConnectionRegistry>,
    pub credentials: ArcCredentialProvider,
    pub factory: ArcTransportFactory,
    pub queue: Arc<Mutex<OutboundQueue>>,
    pub subscribers: SubscriberSet,
    pub handlers: EventHandlers,
    pub status_tx: watch::Sender<SessionStatus>,
}

fn status_of(handle: &SessionHandle, monitor: &HeartbeatMonitor) -> SessionStatus {
    SessionStatus {
        state: handle.state,
        reconnect_attempt: handle.reconnect_attempt,
        last_latency_ms: monitor.last_rtt_ms(),
        fatal: handle.fatal,
    }
}

/// Send every queued payload in FIFO order; stop on the first failure.
///
/// The head is removed only after its send succeeds, so a failure mid-pass
/// loses nothing and keeps the order intact. Removal matches the head's
/// sequence number: if an overflow evicted it while the send was in
/// flight, there is nothing left to remove.
async fn drain_queue(transport: &mut Box<dyn Transport>, queue: &Mutex<OutboundQueue>) {
    loop {
        let next: Option<(u64, Value)> = queue
            .lock()
            .unwrap()
            .front()
            .map(|m| (m.seq, m.payload.clone()));
        let Some((seq, payload)) = next else { return };
        match transport.send(&payload.to_string()).await {
            Ok(()) => {
                queue.lock().unwrap().pop_front_if(seq);
            },
            Err(e) => {
                log::debug!("[livelink] Drain paused: {}", e);
                return;
            },
        }
    }
}

pub(crate) async fn session_task(ctx: SessionContext, mut cmd_rx: mpsc::Receiver<SessionCmd>) {
    let channel_id = ctx.channel.channel_id.clone();
    let backoff = ctx.options.backoff();
    let hb_settings = ctx.options.heartbeat();
    let probe_interval = hb_settings.interval;
    let ack_timeout = hb_settings.ack_timeout;
    let max_missed = ctx.options.max_missed_probes;
    let mut monitor = HeartbeatMonitor::new(hb_settings);
    let mut handle = SessionHandle::new(
        ctx.options.max_reconnect_attempts,
        ctx.options.auth_rejected_close_code,
    );

    // The exclusive slot must be ours before any I/O. Losing either check
    // means another session for the same channel + credential is already
    // settling the state; this task simply goes away.
    let mut key = session_key(&channel_id, ctx.credentials.version());
    if !ctx.registry.debounce(&key, ctx.options.debounce_window()) {
        log::debug!("[livelink] Connection attempt for '{}' debounced", key);
        ctx.status_tx.send_replace(SessionStatus::default());
        return;
    }
    if !ctx.registry.try_acquire(&key) {
        log::debug!("[livelink] Connection slot '{}' already held, skipping", key);
        ctx.status_tx.send_replace(SessionStatus::default());
        return;
    }
    let mut key_held = true;

    let mut transport: Option<Box<dyn Transport>> = None;
    let mut pending: VecDeque<Action> = VecDeque::new();
    pending.push_back(Action::Dial);

    // Timers are pinned once and re-armed by resetting deadlines; the
    // boolean flags gate the select arms while a timer is parked.
    let far = Instant::now() + FAR_FUTURE;
    let dial_sleep = time::sleep_until(far);
    tokio::pin!(dial_sleep);
    let mut dial_armed = false;

    let probe_sleep = time::sleep_until(far);
    tokio::pin!(probe_sleep);
    let mut hb_active = false;

    let ack_sleep = time::sleep_until(far);
    tokio::pin!(ack_sleep);
    let mut awaiting_ack = false;

    let dwell_sleep = time::sleep_until(far);
    tokio::pin!(dwell_sleep);
    let mut dwell_armed = false;

    let drain_interval = ctx.options.drain_interval();
    let drain_sleep = time::sleep_until(Instant::now() + drain_interval);
    tokio::pin!(drain_sleep);

    let mut exit = false;

    loop {
        // Execute the side effects of the last transition before waiting.
        // Actions may cascade (a refresh result feeds straight back into
        // the machine), hence the work queue.
        while let Some(action) = pending.pop_front() {
            match action {
                Action::Dial => {
                    // Cancel any pending retry; this dial supersedes it.
                    dial_armed = false;
                    // Credentials may have rotated since the slot was
                    // claimed; move the claim to the new key first.
                    let new_key = session_key(&channel_id, ctx.credentials.version());
                    if new_key != key {
                        if key_held {
                            ctx.registry.release(&key);
                        }
                        key_held = ctx.registry.try_acquire(&new_key);
                        key = new_key;
                    }
                    if !key_held {
                        log::warn!("[livelink] Slot '{}' busy after credential rotation", key);
                        let followups = handle.handle_event(SessionEvent::DialFailed);
                        pending.extend(followups);
                        continue;
                    }

                    let token = ctx.credentials.current_token();
                    log::info!("[livelink] Connecting to channel '{}'", channel_id);
                    let dial = time::timeout(
                        ctx.options.connect_timeout(),
                        ctx.factory.connect(&ctx.channel, token.as_deref()),
                    )
                    .await;
                    let followups = match dial {
                        Ok(Ok(t)) => {
                            log::info!("[livelink] Channel '{}' connected", channel_id);
                            transport = Some(t);
                            ctx.handlers.emit_connect();
                            handle.handle_event(SessionEvent::DialSucceeded)
                        },
                        Ok(Err(e)) => {
                            log::warn!("[livelink] Dial for '{}' failed: {}", channel_id, e);
                            ctx.handlers
                                .emit_error(ConnectionError::new(e.to_string(), true));
                            handle.handle_event(SessionEvent::DialFailed)
                        },
                        Err(_) => {
                            log::warn!("[livelink] Dial for '{}' timed out", channel_id);
                            ctx.handlers.emit_error(ConnectionError::new(
                                "connection attempt timed out",
                                true,
                            ));
                            handle.handle_event(SessionEvent::DialFailed)
                        },
                    };
                    pending.extend(followups);
                },
                Action::ScheduleRetry { attempt } => {
                    let delay = backoff.next_delay(attempt);
                    log::info!(
                        "[livelink] Reconnecting to '{}' in {:?} (attempt {})",
                        channel_id,
                        delay,
                        attempt + 1
                    );
                    dial_armed = true;
                    dial_sleep.as_mut().reset(Instant::now() + delay);
                },
                Action::StartHeartbeat => {
                    let now = Instant::now();
                    monitor.on_open(now);
                    awaiting_ack = false;
                    hb_active = true;
                    probe_sleep.as_mut().reset(now + probe_interval);
                },
                Action::StopHeartbeat => {
                    hb_active = false;
                    awaiting_ack = false;
                    dwell_armed = false;
                },
                Action::ArmDwell => {
                    dwell_armed = true;
                    dwell_sleep
                        .as_mut()
                        .reset(Instant::now() + ctx.options.stability_dwell());
                },
                Action::CloseTransport => {
                    if let Some(mut t) = transport.take() {
                        t.close().await;
                    }
                },
                Action::Refresh => {
                    log::info!(
                        "[livelink] Authentication rejected on '{}', refreshing credentials",
                        channel_id
                    );
                    let refreshed = ctx.credentials.refresh().await.is_some();
                    if !refreshed {
                        log::error!("[livelink] Credential refresh failed for '{}'", channel_id);
                    }
                    let followups = handle.handle_refresh_result(refreshed);
                    pending.extend(followups);
                },
                Action::DrainNow => {
                    if let Some(ref mut t) = transport {
                        drain_queue(t, &ctx.queue).await;
                    }
                },
                Action::ReleaseKey => {
                    if key_held {
                        ctx.registry.release(&key);
                        key_held = false;
                    }
                },
                Action::NotifyFatal(fatal) => {
                    log::error!("[livelink] Session '{}' gave up: {}", channel_id, fatal);
                    ctx.handlers
                        .emit_error(ConnectionError::new(fatal.to_string(), false));
                },
                Action::Exit => {
                    exit = true;
                },
            }
        }

        ctx.status_tx.send_replace(status_of(&handle, &monitor));
        if exit {
            break;
        }

        let actions: Vec<Action> = if let Some(ref mut t) = transport {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCmd::Nudge) => {
                        if handle.state == SessionState::OpenStable {
                            drain_queue(t, &ctx.queue).await;
                        }
                        Vec::new()
                    },
                    Some(SessionCmd::Disconnect) | None => {
                        handle.handle_event(SessionEvent::DisconnectRequested)
                    },
                    Some(SessionCmd::Reconnect) => {
                        handle.handle_event(SessionEvent::ManualReconnect)
                    },
                    Some(SessionCmd::TokenExpired) => {
                        handle.handle_event(SessionEvent::TokenExpired)
                    },
                    Some(SessionCmd::Online(false)) => {
                        log::info!("[livelink] Network offline, suspending '{}'", channel_id);
                        handle.handle_event(SessionEvent::WentOffline)
                    },
                    Some(SessionCmd::Online(true)) | Some(SessionCmd::Visible(true)) => {
                        handle.handle_event(SessionEvent::CameOnline)
                    },
                    Some(SessionCmd::Visible(false)) => {
                        // A hidden UI keeps its connection; probes continue.
                        log::debug!("[livelink] Channel '{}' hidden, staying connected", channel_id);
                        Vec::new()
                    },
                },

                event = t.next_event() => match event {
                    TransportEvent::Frame(text) => {
                        let now = Instant::now();
                        monitor.on_frame(now);
                        match crate::transport::parse_control(&text) {
                            Some(ControlFrame::Pong { ts }) => {
                                awaiting_ack = false;
                                match monitor.on_ack(ts, now) {
                                    AckOutcome::Ok { .. } => Vec::new(),
                                    AckOutcome::Slow { rtt_ms } => {
                                        log::warn!(
                                            "[livelink] Slow heartbeat on '{}': {}ms",
                                            channel_id,
                                            rtt_ms
                                        );
                                        Vec::new()
                                    },
                                    AckOutcome::Degraded { rtt_ms } => {
                                        log::warn!(
                                            "[livelink] Degraded path on '{}' ({}ms), reconnecting",
                                            channel_id,
                                            rtt_ms
                                        );
                                        handle.handle_event(SessionEvent::HeartbeatDegraded)
                                    },
                                    AckOutcome::RejectedFuture => {
                                        log::warn!(
                                            "[livelink] Rejected pong from the future on '{}' (ts {})",
                                            channel_id,
                                            ts
                                        );
                                        Vec::new()
                                    },
                                    AckOutcome::RejectedStale => {
                                        log::warn!(
                                            "[livelink] Rejected stale pong on '{}' (ts {})",
                                            channel_id,
                                            ts
                                        );
                                        Vec::new()
                                    },
                                }
                            },
                            Some(ControlFrame::Ping { ts }) => {
                                let reply = serde_json::to_string(&ControlFrame::Pong { ts }).unwrap();
                                if t.send(&reply).await.is_err() {
                                    log::debug!("[livelink] Failed to answer ping on '{}'", channel_id);
                                }
                                Vec::new()
                            },
                            None => {
                                match serde_json::from_str::<Value>(&text) {
                                    Ok(payload) => ctx.subscribers.dispatch(&payload),
                                    Err(e) => log::warn!(
                                        "[livelink] Dropping non-JSON frame on '{}': {}",
                                        channel_id,
                                        e
                                    ),
                                }
                                Vec::new()
                            },
                        }
                    },
                    TransportEvent::Closed(info) => {
                        let reason = match &info {
                            Some(ci) if ci.reason.is_empty() => {
                                DisconnectReason::with_code("connection closed", ci.code)
                            },
                            Some(ci) => DisconnectReason::with_code(ci.reason.clone(), ci.code),
                            None => DisconnectReason::new("connection dropped"),
                        };
                        log::info!("[livelink] Channel '{}' disconnected: {}", channel_id, reason);
                        ctx.handlers.emit_disconnect(reason);
                        handle.handle_event(SessionEvent::TransportClosed(info))
                    },
                },

                _ = &mut ack_sleep, if awaiting_ack => {
                    awaiting_ack = false;
                    if monitor.on_ack_timeout(Instant::now()) {
                        log::debug!(
                            "[livelink] Probe ack late on '{}' but traffic proves liveness",
                            channel_id
                        );
                    } else {
                        log::warn!(
                            "[livelink] Probe on '{}' unanswered within {:?}",
                            channel_id,
                            ack_timeout
                        );
                    }
                    Vec::new()
                },

                _ = &mut probe_sleep, if hb_active => {
                    let now = Instant::now();
                    probe_sleep.as_mut().reset(now + probe_interval);
                    let (probe, verdict) = monitor.on_tick(now);
                    let frame = serde_json::to_string(&ControlFrame::Ping { ts: probe.ts_ms }).unwrap();
                    match t.send(&frame).await {
                        Ok(()) => {
                            awaiting_ack = true;
                            ack_sleep.as_mut().reset(now + ack_timeout);
                            match verdict {
                                TickVerdict::Healthy => Vec::new(),
                                TickVerdict::Missed(n) => {
                                    log::warn!(
                                        "[livelink] Missed probe {}/{} on '{}'",
                                        n,
                                        max_missed,
                                        channel_id
                                    );
                                    Vec::new()
                                },
                                TickVerdict::Unhealthy => {
                                    log::warn!(
                                        "[livelink] Channel '{}' unhealthy, forcing reconnect",
                                        channel_id
                                    );
                                    handle.handle_event(SessionEvent::HeartbeatUnhealthy)
                                },
                            }
                        },
                        Err(e) => {
                            log::warn!("[livelink] Probe send failed on '{}': {}", channel_id, e);
                            handle.handle_event(SessionEvent::TransportClosed(None))
                        },
                    }
                },

                _ = &mut dwell_sleep, if dwell_armed => {
                    dwell_armed = false;
                    log::debug!("[livelink] Channel '{}' stable", channel_id);
                    handle.handle_event(SessionEvent::DwellElapsed)
                },

                _ = &mut drain_sleep => {
                    drain_sleep.as_mut().reset(Instant::now() + drain_interval);
                    if handle.state == SessionState::OpenStable {
                        drain_queue(t, &ctx.queue).await;
                    }
                    Vec::new()
                },
            }
        } else {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCmd::Nudge) => {
                        // Nothing to drain into; the payload waits in the
                        // queue for the next stable connection.
                        Vec::new()
                    },
                    Some(SessionCmd::Disconnect) | None => {
                        handle.handle_event(SessionEvent::DisconnectRequested)
                    },
                    Some(SessionCmd::Reconnect) => {
                        handle.handle_event(SessionEvent::ManualReconnect)
                    },
                    Some(SessionCmd::TokenExpired) => {
                        handle.handle_event(SessionEvent::TokenExpired)
                    },
                    Some(SessionCmd::Online(false)) => {
                        log::info!("[livelink] Network offline, suspending '{}'", channel_id);
                        // Also cancels a pending retry; CameOnline re-dials.
                        dial_armed = false;
                        handle.handle_event(SessionEvent::WentOffline)
                    },
                    Some(SessionCmd::Online(true)) | Some(SessionCmd::Visible(true)) => {
                        handle.handle_event(SessionEvent::CameOnline)
                    },
                    Some(SessionCmd::Visible(false)) => {
                        Vec::new()
                    },
                },

                _ = &mut dial_sleep, if dial_armed => {
                    dial_armed = false;
                    vec![Action::Dial]
                },
            }
        };
        pending.extend(actions);
    }

    // Exit paths all release through Action::ReleaseKey; this is the
    // last-resort cleanup if one ever does not.
    if key_held {
        ctx.registry.release(&key);
    }
    log::debug!("[livelink] Session task for '{}' exited", channel_id);
}
