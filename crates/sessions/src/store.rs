use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use srs_core::session::Session;
use srs_core::types::Timestamp;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Default sliding idle window of a session.
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(30 * 60);

/// How often expired sessions are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60); // 5 minutes

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session {0} expired")]
    Expired(String),

    #[error("Session {0} not found")]
    NotFound(String),

    #[error("Session has no user name")]
    InvalidUser,
}

struct SessionEntry {
    session: Session,
    valid_to: Timestamp,
}

/// Process-wide registry of authenticated sessions.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    idle_window: RwLock<chrono::Duration>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_WINDOW)
    }
}

impl SessionStore {
    pub fn new(idle_window: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_window: RwLock::new(to_chrono(idle_window)),
        }
    }

    /// Change the idle window. Applies from the next register/refresh on.
    pub async fn update_idle_window(&self, idle_window: Duration) {
        *self.idle_window.write().await = to_chrono(idle_window);
        tracing::info!(idle_secs = idle_window.as_secs(), "Session idle window updated");
    }

    pub async fn register(&self, session: Session) -> Result<(), SessionError> {
        self.register_at(session, chrono::Utc::now()).await
    }

    pub async fn register_at(&self, session: Session, now: Timestamp) -> Result<(), SessionError> {
        if session.user_name.trim().is_empty() {
            return Err(SessionError::InvalidUser);
        }
        let valid_to = now + *self.idle_window.read().await;
        tracing::debug!(user = %session.user_name, session_id = %session.session_id, "Session registered");
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), SessionEntry { session, valid_to });
        Ok(())
    }

    /// Remove a session (logout). Unknown ids are ignored.
    pub async fn unregister(&self, session_id: &str) {
        if self.sessions.write().await.remove(session_id).is_some() {
            tracing::debug!(session_id, "Session unregistered");
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.session.clone())
    }

    pub async fn is_active(&self, session_id: &str) -> bool {
        self.is_active_at(session_id, chrono::Utc::now()).await
    }

    pub async fn is_active_at(&self, session_id: &str, now: Timestamp) -> bool {
        self.sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(|entry| now < entry.valid_to)
    }

    /// Check a session is still valid and slide its expiry forward by the
    /// idle window.
    pub async fn validate_and_refresh(&self, session: &Session) -> Result<(), SessionError> {
        self.validate_and_refresh_at(session, chrono::Utc::now()).await
    }

    pub async fn validate_and_refresh_at(&self, session: &Session, now: Timestamp) -> Result<(), SessionError> {
        let idle_window = *self.idle_window.read().await;
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session.session_id)
            .ok_or_else(|| SessionError::NotFound(session.session_id.clone()))?;

        if now >= entry.valid_to {
            return Err(SessionError::Expired(session.session_id.clone()));
        }

        entry.valid_to = now + idle_window;
        Ok(())
    }

    /// Drop every session whose validity has passed. Returns the number
    /// removed.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(chrono::Utc::now()).await
    }

    pub async fn sweep_expired_at(&self, now: Timestamp) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| now < entry.valid_to);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Run the expired-session sweep every [`SWEEP_INTERVAL`] until `cancel`
/// is triggered.
pub async fn run(store: Arc<SessionStore>, cancel: CancellationToken) {
    run_every(store, SWEEP_INTERVAL, cancel).await;
}

pub async fn run_every(store: Arc<SessionStore>, period: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = period.as_secs(), "Session sweep started");

    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Session sweep stopping");
                break;
            }
            _ = interval.tick() => {
                let removed = store.sweep_expired().await;
                if removed > 0 {
                    tracing::info!(removed, "Session sweep: removed expired sessions");
                } else {
                    tracing::debug!("Session sweep: nothing expired");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn secs(s: i64) -> chrono::Duration {
        chrono::Duration::seconds(s)
    }

    async fn store_with(session: &Session, now: Timestamp) -> SessionStore {
        let store = SessionStore::new(WINDOW);
        store.register_at(session.clone(), now).await.unwrap();
        store
    }

    // -- sliding expiration --

    #[tokio::test]
    async fn active_until_window_elapses() {
        let session = Session::new("alice", None);
        let t = chrono::Utc::now();
        let store = store_with(&session, t).await;

        assert!(store.is_active_at(&session.session_id, t + secs(59)).await);
        assert!(!store.is_active_at(&session.session_id, t + secs(61)).await);
    }

    #[tokio::test]
    async fn refresh_slides_validity_from_call_time() {
        let session = Session::new("alice", None);
        let t = chrono::Utc::now();
        let store = store_with(&session, t).await;

        store.validate_and_refresh_at(&session, t + secs(50)).await.unwrap();

        assert!(store.is_active_at(&session.session_id, t + secs(109)).await);
        assert!(!store.is_active_at(&session.session_id, t + secs(111)).await);
    }

    #[tokio::test]
    async fn refresh_at_expiry_fails() {
        let session = Session::new("alice", None);
        let t = chrono::Utc::now();
        let store = store_with(&session, t).await;

        let result = store.validate_and_refresh_at(&session, t + secs(60)).await;
        assert_matches!(result, Err(SessionError::Expired(_)));
    }

    #[tokio::test]
    async fn refresh_of_unknown_session_fails() {
        let store = SessionStore::new(WINDOW);
        let session = Session::new("bob", None);

        let result = store.validate_and_refresh(&session).await;
        assert_matches!(result, Err(SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_user_name_is_rejected() {
        let store = SessionStore::new(WINDOW);
        let result = store.register(Session::new("  ", None)).await;
        assert_matches!(result, Err(SessionError::InvalidUser));
        assert!(store.is_empty().await);
    }

    // -- registry --

    #[tokio::test]
    async fn unregister_removes_session() {
        let session = Session::new("alice", Some("hok-token".into()));
        let store = store_with(&session, chrono::Utc::now()).await;

        assert_eq!(store.get(&session.session_id).await, Some(session.clone()));
        store.unregister(&session.session_id).await;
        assert_eq!(store.get(&session.session_id).await, None);
    }

    // -- sweep --

    #[tokio::test]
    async fn sweep_removes_only_expired_sessions() {
        let t = chrono::Utc::now();
        let old = Session::new("alice", None);
        let fresh = Session::new("bob", None);
        let store = SessionStore::new(WINDOW);
        store.register_at(old.clone(), t).await.unwrap();
        store.register_at(fresh.clone(), t + secs(30)).await.unwrap();

        let removed = store.sweep_expired_at(t + secs(70)).await;

        assert_eq!(removed, 1);
        assert!(store.get(&old.session_id).await.is_none());
        assert!(store.get(&fresh.session_id).await.is_some());
    }

    #[tokio::test]
    async fn sweep_task_runs_until_cancelled() {
        let store = Arc::new(SessionStore::new(Duration::from_millis(20)));
        store.register(Session::new("alice", None)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_every(Arc::clone(&store), Duration::from_millis(10), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty().await);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweep did not stop")
            .unwrap();
    }
}
