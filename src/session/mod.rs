//! Session management: key derivation, idle expiry, and per-session
//! serialisation.
//!
//! The manager is the single owner of all sessions. Inbound dispatch holds
//! sessions by `Arc` handle; the agent subprocess and heartbeat deadline are
//! children of their session and die with it. A background sweeper destroys
//! sessions once their peer has been idle past the configured expiry,
//! killing any in-flight agent and cancelling the pending heartbeat.

pub mod heartbeat;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SessionScope;
use crate::engine::agent::SharedChild;
use crate::providers::ProviderKind;

/// Derive the session key for a sender under a scope.
///
/// | scope | sender | key |
/// |---|---|---|
/// | global | any | `global` |
/// | per-sender | `+E164` | `+E164` |
/// | per-sender | `whatsapp:+E164` | `+E164` |
/// | per-sender | `…@g.us` | `group:…@g.us` |
/// | per-sender | `telegram:…` | `telegram:…` |
/// | per-sender | empty | `unknown` |
pub fn derive_session_key(scope: SessionScope, sender: &str) -> String {
    if scope == SessionScope::Global {
        return "global".to_owned();
    }
    let sender = sender.trim();
    if sender.is_empty() {
        return "unknown".to_owned();
    }
    let sender = sender.strip_prefix("whatsapp:").unwrap_or(sender);
    if sender.ends_with("@g.us") {
        return format!("group:{sender}");
    }
    sender.to_owned()
}

/// Mutable session bookkeeping behind one lock.
struct SessionState {
    last_activity: Instant,
    heartbeat_at: Option<Instant>,
    origin: Option<(ProviderKind, String)>,
}

/// One live conversational session.
pub struct Session {
    /// Derived session key.
    pub key: String,
    /// Creation time.
    pub created_at: Instant,
    /// Serialises agent invocations: at most one in flight per session.
    pub gate: Mutex<()>,
    state: StdMutex<SessionState>,
    agent: StdMutex<Option<SharedChild>>,
}

impl Session {
    fn new(key: String, heartbeat: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            key,
            created_at: now,
            gate: Mutex::new(()),
            state: StdMutex::new(SessionState {
                last_activity: now,
                heartbeat_at: heartbeat.and_then(|hb| now.checked_add(hb)),
                origin: None,
            }),
            agent: StdMutex::new(None),
        }
    }

    /// Stamp activity and remember where replies should go; re-arms the
    /// heartbeat deadline.
    pub fn touch(&self, origin: Option<(ProviderKind, String)>, heartbeat: Option<Duration>) {
        if let Ok(mut state) = self.state.lock() {
            let now = Instant::now();
            state.last_activity = now;
            state.heartbeat_at = heartbeat.and_then(|hb| now.checked_add(hb));
            if origin.is_some() {
                state.origin = origin;
            }
        }
    }

    /// Re-arm only the heartbeat deadline. Heartbeat firings are not peer
    /// traffic, so the idle clock is left untouched.
    pub fn rearm_heartbeat(&self, heartbeat: Option<Duration>) {
        if let Ok(mut state) = self.state.lock() {
            let now = Instant::now();
            state.heartbeat_at = heartbeat.and_then(|hb| now.checked_add(hb));
        }
    }

    /// Idle time since the last inbound from the peer.
    pub fn idle_for(&self) -> Duration {
        self.state
            .lock()
            .map(|state| state.last_activity.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// The provider and recipient replies for this session go to.
    pub fn origin(&self) -> Option<(ProviderKind, String)> {
        self.state.lock().ok().and_then(|state| state.origin.clone())
    }

    /// Whether the heartbeat deadline has passed.
    pub fn heartbeat_due(&self, now: Instant) -> bool {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.heartbeat_at)
            .is_some_and(|at| at <= now)
    }

    /// Attach the running agent's child handle; the subprocess is a child
    /// of this session and is killed with it.
    pub fn set_agent(&self, child: SharedChild) {
        if let Ok(mut agent) = self.agent.lock() {
            *agent = Some(child);
        }
    }

    /// Detach the agent handle after its invocation settles.
    pub fn clear_agent(&self) {
        if let Ok(mut agent) = self.agent.lock() {
            *agent = None;
        }
    }

    /// Kill any in-flight agent subprocess.
    ///
    /// The child is taken out of the shared slot so the running invocation
    /// observes a terminated (not crashed) agent.
    pub fn kill_agent(&self) {
        let handle = self.agent.lock().ok().and_then(|mut agent| agent.take());
        if let Some(shared) = handle {
            let child = shared.lock().ok().and_then(|mut slot| slot.take());
            if let Some(mut child) = child {
                let _ = child.start_kill();
            }
        }
    }
}

/// Owner of all live sessions.
pub struct SessionManager {
    scope: SessionScope,
    idle: Duration,
    heartbeat: Option<Duration>,
    sessions: StdMutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    /// Create a manager from the configured scope, idle expiry (minutes)
    /// and heartbeat interval (minutes, 0 disables).
    pub fn new(scope: SessionScope, idle_minutes: u32, heartbeat_minutes: u32) -> Self {
        Self {
            scope,
            idle: Duration::from_secs(u64::from(idle_minutes).saturating_mul(60)),
            heartbeat: (heartbeat_minutes > 0)
                .then(|| Duration::from_secs(u64::from(heartbeat_minutes).saturating_mul(60))),
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    /// Configured idle expiry.
    pub fn idle_expiry(&self) -> Duration {
        self.idle
    }

    /// Configured heartbeat interval, if enabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat
    }

    /// Resolve the session for a sender, creating it when absent.
    ///
    /// Returns `(session, is_new)`. At most one live session exists per key.
    pub fn resolve(&self, sender: &str) -> (Arc<Session>, bool) {
        let key = derive_session_key(self.scope, sender);
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(session) = sessions.get(&key) {
            return (Arc::clone(session), false);
        }
        let session = Arc::new(Session::new(key.clone(), self.heartbeat));
        sessions.insert(key.clone(), Arc::clone(&session));
        info!(session_key = %key, "session created");
        (session, true)
    }

    /// Look up an existing session without creating one.
    pub fn get(&self, key: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(key).cloned())
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy a session: remove it, kill its agent, cancel its heartbeat.
    pub fn destroy(&self, key: &str) {
        let removed = self
            .sessions
            .lock()
            .ok()
            .and_then(|mut sessions| sessions.remove(key));
        if let Some(session) = removed {
            session.kill_agent();
            info!(session_key = %key, "session destroyed");
        }
    }

    /// Destroy every session (shutdown path).
    pub fn destroy_all(&self) {
        let drained: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .map(|mut sessions| sessions.drain().map(|(_, s)| s).collect())
            .unwrap_or_default();
        for session in &drained {
            session.kill_agent();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "all sessions destroyed");
        }
    }

    /// Sessions idle past the expiry right now.
    pub fn expired_keys(&self) -> Vec<String> {
        self.sessions
            .lock()
            .map(|sessions| {
                sessions
                    .values()
                    .filter(|s| s.idle_for() >= self.idle)
                    .map(|s| s.key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sessions whose heartbeat deadline has passed.
    pub fn heartbeat_due(&self) -> Vec<Arc<Session>> {
        let now = Instant::now();
        self.sessions
            .lock()
            .map(|sessions| {
                sessions
                    .values()
                    .filter(|s| s.heartbeat_due(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Spawn the background sweeper destroying idle sessions.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        mut stop_rx: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for key in manager.expired_keys() {
                            debug!(session_key = %key, "idle expiry");
                            manager.destroy(&key);
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_derivation_table() {
        let per = SessionScope::PerSender;
        assert_eq!(derive_session_key(SessionScope::Global, "+49"), "global");
        assert_eq!(derive_session_key(per, "+4915123"), "+4915123");
        assert_eq!(derive_session_key(per, "whatsapp:+4915123"), "+4915123");
        assert_eq!(
            derive_session_key(per, "12345-678@g.us"),
            "group:12345-678@g.us"
        );
        assert_eq!(
            derive_session_key(per, "telegram:@alice"),
            "telegram:@alice"
        );
        assert_eq!(derive_session_key(per, "telegram:99887"), "telegram:99887");
        assert_eq!(derive_session_key(per, ""), "unknown");
        assert_eq!(derive_session_key(per, "  "), "unknown");
    }

    #[test]
    fn cross_provider_senders_never_collide() {
        let per = SessionScope::PerSender;
        assert_ne!(
            derive_session_key(per, "telegram:@alice"),
            derive_session_key(per, "+15551234567")
        );
    }

    #[tokio::test]
    async fn resolve_returns_same_session_per_key() {
        let manager = SessionManager::new(SessionScope::PerSender, 60, 0);
        let (first, is_new) = manager.resolve("+4915123");
        assert!(is_new);
        let (second, is_new_again) = manager.resolve("+4915123");
        assert!(!is_new_again);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn destroy_removes_session() {
        let manager = SessionManager::new(SessionScope::PerSender, 60, 0);
        let (_, _) = manager.resolve("+4915123");
        manager.destroy("+4915123");
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire() {
        let manager = SessionManager::new(SessionScope::PerSender, 1, 0);
        let (_, _) = manager.resolve("+4915123");
        assert!(manager.expired_keys().is_empty());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(manager.expired_keys(), vec!["+4915123".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_becomes_due_after_interval() {
        let manager = SessionManager::new(SessionScope::PerSender, 60, 1);
        let (session, _) = manager.resolve("+4915123");
        assert!(manager.heartbeat_due().is_empty());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(manager.heartbeat_due().len(), 1);

        // A new inbound reschedules.
        session.touch(None, manager.heartbeat_interval());
        assert!(manager.heartbeat_due().is_empty());
    }
}
