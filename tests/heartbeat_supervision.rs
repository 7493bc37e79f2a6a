//! Heartbeat supervision scenarios on a paused clock: probe cadence,
//! latency accounting, missed-probe escalation, and the degraded path.

mod common;

use common::*;
use livelink::{SessionManager, SessionOptions, SessionState};
use serde_json::json;
use std::time::Duration;

fn manager(factory: &StubFactory, options: SessionOptions) -> SessionManager {
    SessionManager::builder()
        .options(options)
        .transport_factory(factory.clone())
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn answered_probes_keep_the_session_stable() {
    let factory = StubFactory::new();
    let manager = manager(&factory, SessionOptions::fast());

    manager.connect(test_channel("notifications"));
    let mut rx = manager.status_watch().unwrap();
    wait_for_state(&mut rx, SessionState::OpenStable).await;

    advance(Duration::from_millis(1_100)).await;
    let handle = factory.last_handle();
    assert!(!handle.pings_sent().is_empty());
    wait_until("latency recorded", || {
        manager.status().last_latency_ms.is_some()
    })
    .await;
    // The loopback pong arrives within the same virtual instant.
    assert!(manager.status().last_latency_ms.unwrap() < 10);

    assert_eq!(factory.dial_count(), 1);
    assert_eq!(manager.status().state, SessionState::OpenStable);
}

#[tokio::test(start_paused = true)]
async fn a_silent_connection_is_replaced_after_max_missed_probes() {
    // fast(): probe every 1s, a probe counts missed after 1 interval, two
    // misses escalate.
    let factory = StubFactory::silent();
    let manager = manager(&factory, SessionOptions::fast());

    manager.connect(test_channel("notifications"));
    let mut rx = manager.status_watch().unwrap();
    wait_for_state(&mut rx, SessionState::OpenStable).await;

    wait_until("unhealthy connection replaced", || {
        factory.dial_count() >= 2
    })
    .await;
    assert!(factory.handle(0).was_closed());
}

#[tokio::test(start_paused = true)]
async fn one_missed_probe_does_not_reconnect() {
    let factory = StubFactory::silent();
    let manager = manager(&factory, SessionOptions::fast());

    manager.connect(test_channel("notifications"));
    let mut rx = manager.status_watch().unwrap();
    wait_for_state(&mut rx, SessionState::OpenStable).await;
    let handle = factory.last_handle();

    // First probe tick: one miss, below the escalation threshold.
    advance(Duration::from_millis(1_200)).await;
    assert_eq!(factory.dial_count(), 1);
    let ping = handle.pings_sent().pop().expect("a probe was sent");

    // Answer it; the miss counter resets and the next tick is healthy.
    handle.push_frame(&json!({ "type": "pong", "ts": ping["ts"] }));
    settle().await;
    advance(Duration::from_millis(1_000)).await;
    assert_eq!(factory.dial_count(), 1);
    assert_eq!(manager.status().state, SessionState::OpenStable);
}

#[tokio::test(start_paused = true)]
async fn a_degraded_round_trip_forces_a_reconnect() {
    let factory = StubFactory::silent();
    let manager = manager(
        &factory,
        SessionOptions::fast().with_max_latency_ms(100),
    );

    manager.connect(test_channel("notifications"));
    let mut rx = manager.status_watch().unwrap();
    wait_for_state(&mut rx, SessionState::OpenStable).await;
    let handle = factory.last_handle();

    advance(Duration::from_millis(1_000)).await;
    let ping = handle.pings_sent().pop().expect("a probe was sent");

    // Ack 300ms later: within the ack window, but three times the latency
    // budget, so the path is degraded.
    advance(Duration::from_millis(300)).await;
    handle.push_frame(&json!({ "type": "pong", "ts": ping["ts"] }));

    wait_until("degraded connection replaced", || factory.dial_count() >= 2).await;
    assert!(handle.was_closed());
}

#[tokio::test(start_paused = true)]
async fn inbound_traffic_softens_a_late_ack() {
    let factory = StubFactory::silent();
    let manager = manager(&factory, SessionOptions::fast());

    manager.connect(test_channel("notifications"));
    let mut rx = manager.status_watch().unwrap();
    wait_for_state(&mut rx, SessionState::OpenStable).await;
    let handle = factory.last_handle();

    // Probe goes out; application traffic flows but no pong comes back.
    advance(Duration::from_millis(1_000)).await;
    advance(Duration::from_millis(100)).await;
    handle.push_frame(&json!({ "type": "chat.message", "n": 1 }));
    settle().await;

    // The ack deadline passes without tearing anything down.
    advance(Duration::from_millis(500)).await;
    assert_eq!(factory.dial_count(), 1);
    assert_eq!(manager.status().state, SessionState::OpenStable);
}
