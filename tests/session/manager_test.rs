//! Session manager lifecycle: identity, expiry, heartbeats, agent children.

use std::sync::Arc;
use std::time::Duration;

use warelay::config::SessionScope;
use warelay::engine::agent::{run_agent, AgentError, SharedChild};
use warelay::session::SessionManager;

#[tokio::test]
async fn one_live_session_per_key() {
    let manager = SessionManager::new(SessionScope::PerSender, 60, 0);
    let (a, new_a) = manager.resolve("+15551234567");
    let (b, new_b) = manager.resolve("+15551234567");
    assert!(new_a);
    assert!(!new_b);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(manager.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sessions_expire_after_idle_minutes() {
    let manager = SessionManager::new(SessionScope::PerSender, 2, 0);
    let (_session, _) = manager.resolve("+15551234567");

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(manager.expired_keys().is_empty());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(manager.expired_keys().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn inbound_activity_resets_the_idle_clock() {
    let manager = SessionManager::new(SessionScope::PerSender, 1, 0);
    let (session, _) = manager.resolve("+15551234567");

    tokio::time::advance(Duration::from_secs(45)).await;
    session.touch(None, None);
    tokio::time::advance(Duration::from_secs(45)).await;
    // 45s since the touch: not expired yet.
    assert!(manager.expired_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_rearm_does_not_touch_idle_clock() {
    let manager = SessionManager::new(SessionScope::PerSender, 1, 1);
    let (session, _) = manager.resolve("+15551234567");

    tokio::time::advance(Duration::from_secs(59)).await;
    session.rearm_heartbeat(manager.heartbeat_interval());
    tokio::time::advance(Duration::from_secs(2)).await;
    // Idle clock still runs from creation: the session is expired even
    // though the heartbeat was re-armed a moment ago.
    assert_eq!(manager.expired_keys().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn destroying_a_session_kills_its_agent() {
    let manager = Arc::new(SessionManager::new(SessionScope::PerSender, 60, 0));
    let (session, _) = manager.resolve("+15551234567");

    let shared = SharedChild::default();
    session.set_agent(shared.clone());

    let argv = vec!["sleep".to_owned(), "30".to_owned()];
    let invocation = tokio::spawn(async move {
        run_agent(&argv, "", &shared, |_| {}).await
    });

    // Give the subprocess a moment to spawn, then destroy the session.
    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.destroy("+15551234567");

    let outcome = invocation.await.expect("join");
    assert!(
        matches!(outcome, Err(AgentError::Killed)),
        "expected Killed, got {outcome:?}"
    );
    assert!(manager.is_empty());
}
