//! Credential lifecycle scenarios: auth-rejected closes, refresh outcomes,
//! and out-of-band token expiry.

mod common;

use common::*;
use livelink::{
    EventHandlers, FatalError, SessionManager, SessionOptions, SessionState,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn auth_rejected_close_refreshes_and_redials_with_the_new_token() {
    let factory = StubFactory::new();
    let credentials = ScriptedCredentials::new("t1", vec![Some("t2")]);
    let manager = SessionManager::builder()
        .options(SessionOptions::fast())
        .transport_factory(factory.clone())
        .credentials(credentials.clone())
        .build()
        .unwrap();

    manager.connect(test_channel("chat:7"));
    let mut rx = manager.status_watch().unwrap();
    wait_for_state(&mut rx, SessionState::OpenStable).await;

    factory.last_handle().close_with(4401, "token expired");
    wait_until("redialed after refresh", || factory.dial_count() == 2).await;
    wait_until("stable on the new token", || {
        manager.status().state == SessionState::OpenStable
    })
    .await;

    assert_eq!(credentials.refresh_calls(), 1);
    assert_eq!(
        factory.tokens(),
        vec![Some("t1".to_string()), Some("t2".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_is_terminal_and_non_recoverable() {
    let factory = StubFactory::new();
    let credentials = ScriptedCredentials::new("t1", vec![None]);
    let errors = Arc::new(Mutex::new(Vec::new()));
    let handlers = {
        let errors = errors.clone();
        EventHandlers::new().on_error(move |e| errors.lock().unwrap().push(e.recoverable))
    };
    let manager = SessionManager::builder()
        .options(SessionOptions::fast())
        .transport_factory(factory.clone())
        .credentials(credentials.clone())
        .event_handlers(handlers)
        .build()
        .unwrap();

    manager.connect(test_channel("chat:7"));
    let mut rx = manager.status_watch().unwrap();
    wait_for_state(&mut rx, SessionState::OpenStable).await;

    factory.last_handle().close_with(4401, "token expired");
    wait_for_state(&mut rx, SessionState::Closed).await;

    assert_eq!(manager.status().fatal, Some(FatalError::AuthRequired));
    assert_eq!(credentials.refresh_calls(), 1);
    assert_eq!(*errors.lock().unwrap(), vec![false]);

    // One refresh attempt per rejection, and no dial storm afterwards.
    advance(Duration::from_secs(3600)).await;
    assert_eq!(factory.dial_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn the_auth_close_code_is_configurable() {
    let factory = StubFactory::new();
    let credentials = ScriptedCredentials::new("t1", vec![Some("t2")]);
    let manager = SessionManager::builder()
        .options(SessionOptions::fast().with_auth_rejected_close_code(4999))
        .transport_factory(factory.clone())
        .credentials(credentials.clone())
        .build()
        .unwrap();

    manager.connect(test_channel("chat:7"));
    let mut rx = manager.status_watch().unwrap();
    wait_for_state(&mut rx, SessionState::OpenStable).await;

    // 4401 is just an abnormal close now: reconnect, same token, no
    // refresh.
    factory.last_handle().close_with(4401, "whatever");
    wait_until("plain reconnect", || factory.dial_count() == 2).await;
    wait_until("stable again", || {
        manager.status().state == SessionState::OpenStable
    })
    .await;
    assert_eq!(credentials.refresh_calls(), 0);

    // The configured code triggers the refresh path.
    factory.last_handle().close_with(4999, "token expired");
    wait_until("refreshed redial", || factory.dial_count() == 3).await;
    assert_eq!(credentials.refresh_calls(), 1);
    assert_eq!(
        factory.tokens(),
        vec![
            Some("t1".to_string()),
            Some("t1".to_string()),
            Some("t2".to_string())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn out_of_band_expiry_redials_with_a_fresh_read() {
    let factory = StubFactory::new();
    let credentials = ScriptedCredentials::new("t1", vec![]);
    let manager = SessionManager::builder()
        .options(SessionOptions::fast())
        .transport_factory(factory.clone())
        .credentials(credentials.clone())
        .build()
        .unwrap();

    manager.connect(test_channel("chat:7"));
    let mut rx = manager.status_watch().unwrap();
    wait_for_state(&mut rx, SessionState::OpenStable).await;
    let old = factory.last_handle();

    manager.notify_token_expired();
    wait_until("redialed", || factory.dial_count() == 2).await;
    assert!(old.was_closed());
    // The token is read fresh at the dial, not cached from the last one.
    assert_eq!(factory.tokens().len(), 2);
}
