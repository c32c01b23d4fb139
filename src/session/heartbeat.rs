//! Heartbeat scheduling: periodic synthetic prompts between user messages.
//!
//! Each session arms a heartbeat deadline `heartbeatMinutes` after its last
//! activity. A single long-lived task scans for due sessions and hands them
//! to the engine's heartbeat callback, which runs the poll prompt through
//! the normal reply path (with `HEARTBEAT_OK` suppression). Firing re-arms
//! the deadline; a new inbound reschedules it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tracing::debug;

use super::{Session, SessionManager};

/// The synthetic prompt sent to the agent on each heartbeat.
pub const HEARTBEAT_PROMPT: &str = "Heartbeat poll: is there anything the operator should know \
or that you want to push proactively? If not, reply with exactly HEARTBEAT_OK.";

/// Reply body that acknowledges a heartbeat with nothing to say; the engine
/// suppresses it instead of messaging the peer.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Callback invoked for each due session.
pub type HeartbeatCallback =
    Arc<dyn Fn(Arc<Session>) -> BoxFuture<'static, ()> + Send + Sync>;

/// How often the scheduler scans for due sessions.
const SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the heartbeat scheduler task.
///
/// Does nothing (and parks cheaply) when heartbeats are disabled.
pub fn spawn_scheduler(
    manager: Arc<SessionManager>,
    callback: HeartbeatCallback,
    mut stop_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Some(interval_cfg) = manager.heartbeat_interval() else {
            // Disabled; wait for shutdown so the task handle stays uniform.
            let _ = stop_rx.changed().await;
            return;
        };

        let mut interval = tokio::time::interval(SCAN_INTERVAL.min(interval_cfg));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for session in manager.heartbeat_due() {
                        debug!(session_key = %session.key, "heartbeat due");
                        // Re-arm before firing so a slow agent cannot stack
                        // overlapping heartbeats. The idle clock is not
                        // touched: heartbeats are not peer traffic.
                        session.rearm_heartbeat(Some(interval_cfg));
                        callback(session).await;
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
