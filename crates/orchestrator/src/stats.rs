//! Admission and eviction bookkeeping for live workers.
//!
//! Every registered worker carries two clocks:
//!
//! - **active**: time since registration;
//! - **idle**: time since the later of registration and the last activity
//!   recorded for the session that created it.
//!
//! A worker becomes an eviction candidate when it has been idle longer
//! than `max_idle`, active longer than `max_active`, or when its session
//! is no longer active. All comparisons are strict.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use srs_core::settings::WorkerPoolSettings;
use srs_core::types::{Timestamp, WorkerId};
use srs_sessions::SessionStore;
use tokio::sync::RwLock;

/// What a registration refers to. Both kinds share the admission cap but
/// are evaluated separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Worker,
    WebConsole,
}

/// Answers whether a session is still active.
#[async_trait]
pub trait SessionOracle: Send + Sync {
    async fn is_session_active(&self, session_id: &str) -> bool;
}

#[async_trait]
impl SessionOracle for SessionStore {
    async fn is_session_active(&self, session_id: &str) -> bool {
        self.is_active(session_id).await
    }
}

/// Limits derived from [`WorkerPoolSettings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub max_workers: usize,
    pub max_idle: chrono::Duration,
    pub max_active: chrono::Duration,
}

impl From<&WorkerPoolSettings> for EvictionPolicy {
    fn from(settings: &WorkerPoolSettings) -> Self {
        let settings = settings.clone().normalized();
        Self {
            max_workers: settings.max_workers_per_tenant as usize,
            max_idle: settings.max_idle(),
            max_active: settings.max_active(),
        }
    }
}

/// Why a worker was selected for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Idle,
    Active,
    SessionInactive,
}

#[derive(Debug, Clone)]
struct Registration {
    kind: WorkerKind,
    session_id: String,
    registered_at: Timestamp,
    last_activity: Option<Timestamp>,
}

impl Registration {
    fn active_for(&self, now: Timestamp) -> chrono::Duration {
        now - self.registered_at
    }

    fn idle_for(&self, now: Timestamp) -> chrono::Duration {
        let since = self
            .last_activity
            .map_or(self.registered_at, |activity| activity.max(self.registered_at));
        now - since
    }
}

/// A claimed admission slot for a creation whose worker id is not known
/// yet. The slot is given back on drop, so register the worker before
/// dropping it.
pub struct CreationSlot<'a> {
    reserved: &'a AtomicUsize,
}

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        self.reserved.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct StatsTracker {
    registrations: RwLock<HashMap<WorkerId, Registration>>,
    /// Creations admitted but not registered yet.
    reserved: AtomicUsize,
    policy: RwLock<EvictionPolicy>,
    sessions: Arc<dyn SessionOracle>,
}

impl StatsTracker {
    pub fn new(settings: &WorkerPoolSettings, sessions: Arc<dyn SessionOracle>) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            reserved: AtomicUsize::new(0),
            policy: RwLock::new(EvictionPolicy::from(settings)),
            sessions,
        }
    }

    pub async fn policy(&self) -> EvictionPolicy {
        self.policy.read().await.clone()
    }

    pub async fn update_configuration(&self, settings: &WorkerPoolSettings) {
        let policy = EvictionPolicy::from(settings);
        let mut current = self.policy.write().await;
        if *current != policy {
            tracing::info!(
                max_workers = policy.max_workers,
                max_idle_minutes = policy.max_idle.num_minutes(),
                max_active_minutes = policy.max_active.num_minutes(),
                "Worker eviction policy updated",
            );
            *current = policy;
        }
    }

    /// Whether one more worker of any kind fits under the cap. Slots
    /// claimed by in-flight creations count as taken.
    pub async fn is_create_allowed(&self) -> bool {
        let max_workers = self.policy.read().await.max_workers;
        self.registrations.read().await.len() + self.reserved.load(Ordering::SeqCst) < max_workers
    }

    /// Claim a slot under the cap; `None` when the cap is reached.
    pub async fn try_reserve(&self) -> Option<CreationSlot<'_>> {
        let max_workers = self.policy.read().await.max_workers;
        // The write guard orders this check against concurrent claims and registrations.
        let registrations = self.registrations.write().await;
        if registrations.len() + self.reserved.load(Ordering::SeqCst) >= max_workers {
            return None;
        }
        self.reserved.fetch_add(1, Ordering::SeqCst);
        Some(CreationSlot {
            reserved: &self.reserved,
        })
    }

    pub async fn registered_count(&self) -> usize {
        self.registrations.read().await.len()
    }

    // -- registration --

    pub async fn register(&self, worker_id: &str, session_id: &str) {
        self.register_at(WorkerKind::Worker, worker_id, session_id, chrono::Utc::now())
            .await;
    }

    pub async fn register_web_console(&self, console_id: &str, session_id: &str) {
        self.register_at(WorkerKind::WebConsole, console_id, session_id, chrono::Utc::now())
            .await;
    }

    pub async fn register_at(&self, kind: WorkerKind, id: &str, session_id: &str, now: Timestamp) {
        tracing::debug!(worker_id = id, session_id, ?kind, "Worker registered for stats");
        self.registrations.write().await.insert(
            id.to_string(),
            Registration {
                kind,
                session_id: session_id.to_string(),
                registered_at: now,
                last_activity: None,
            },
        );
    }

    /// Forget a registration. Unknown ids are ignored.
    pub async fn unregister(&self, id: &str) {
        if self.registrations.write().await.remove(id).is_some() {
            tracing::debug!(worker_id = id, "Worker unregistered from stats");
        }
    }

    /// Ids registered under `kind`, sorted.
    pub async fn get_registered(&self, kind: WorkerKind) -> Vec<WorkerId> {
        let mut ids: Vec<_> = self
            .registrations
            .read()
            .await
            .iter()
            .filter(|(_, reg)| reg.kind == kind)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    // -- activity --

    /// Reset the idle clock of every worker owned by `session_id`.
    pub async fn record_session_activity(&self, session_id: &str) {
        self.record_session_activity_at(session_id, chrono::Utc::now()).await;
    }

    pub async fn record_session_activity_at(&self, session_id: &str, now: Timestamp) {
        for reg in self.registrations.write().await.values_mut() {
            if reg.session_id == session_id {
                reg.last_activity = Some(now);
            }
        }
    }

    // -- eviction --

    pub async fn evaluate_to_remove(&self, kind: WorkerKind) -> Vec<WorkerId> {
        self.evaluate_to_remove_at(kind, chrono::Utc::now()).await
    }

    /// Ids of `kind` that are eviction candidates at `now`, sorted.
    ///
    /// Read-only: candidates stay registered until the caller unregisters
    /// them.
    pub async fn evaluate_to_remove_at(&self, kind: WorkerKind, now: Timestamp) -> Vec<WorkerId> {
        let policy = self.policy().await;
        let snapshot: Vec<(WorkerId, Registration)> = self
            .registrations
            .read()
            .await
            .iter()
            .filter(|(_, reg)| reg.kind == kind)
            .map(|(id, reg)| (id.clone(), reg.clone()))
            .collect();

        let mut candidates = Vec::new();
        for (id, reg) in snapshot {
            if let Some(reason) = self.eviction_reason(&reg, &policy, now).await {
                tracing::debug!(worker_id = %id, ?reason, "Worker selected for eviction");
                candidates.push(id);
            }
        }
        candidates.sort();
        candidates
    }

    async fn eviction_reason(
        &self,
        reg: &Registration,
        policy: &EvictionPolicy,
        now: Timestamp,
    ) -> Option<EvictionReason> {
        if reg.idle_for(now) > policy.max_idle {
            return Some(EvictionReason::Idle);
        }
        if reg.active_for(now) > policy.max_active {
            return Some(EvictionReason::Active);
        }
        if !self.sessions.is_session_active(&reg.session_id).await {
            return Some(EvictionReason::SessionInactive);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    /// Session oracle over a fixed set of active session ids.
    #[derive(Default)]
    struct ActiveSessions(Mutex<HashSet<String>>);

    impl ActiveSessions {
        fn with(ids: &[&str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(ids.iter().map(|s| s.to_string()).collect())))
        }

        fn end(&self, id: &str) {
            self.0.lock().unwrap().remove(id);
        }
    }

    #[async_trait]
    impl SessionOracle for ActiveSessions {
        async fn is_session_active(&self, session_id: &str) -> bool {
            self.0.lock().unwrap().contains(session_id)
        }
    }

    fn settings(max_workers: i64, max_idle_minutes: i64, max_active_minutes: i64) -> WorkerPoolSettings {
        WorkerPoolSettings {
            max_workers_per_tenant: max_workers,
            max_idle_minutes,
            max_active_minutes,
            ..WorkerPoolSettings::default()
        }
    }

    fn minutes(n: i64) -> chrono::Duration {
        chrono::Duration::minutes(n)
    }

    // -- admission --

    #[tokio::test]
    async fn admission_stops_at_the_cap() {
        let tracker = StatsTracker::new(&settings(2, 10, 60), ActiveSessions::with(&["s"]));

        assert!(tracker.is_create_allowed().await);
        tracker.register("w1", "s").await;
        assert!(tracker.is_create_allowed().await);
        tracker.register_web_console("c1", "s").await;
        assert!(!tracker.is_create_allowed().await);

        tracker.unregister("w1").await;
        assert!(tracker.is_create_allowed().await);
    }

    #[tokio::test]
    async fn reserved_slots_count_against_the_cap() {
        let tracker = StatsTracker::new(&settings(2, 10, 60), ActiveSessions::with(&["s"]));

        let first = tracker.try_reserve().await.unwrap();
        tracker.register("w1", "s").await;
        assert!(tracker.try_reserve().await.is_none());
        assert!(!tracker.is_create_allowed().await);

        drop(first);
        let second = tracker.try_reserve().await;
        assert!(second.is_some());
        assert!(!tracker.is_create_allowed().await);

        drop(second);
        assert!(tracker.is_create_allowed().await);
        assert_eq!(tracker.registered_count().await, 1);
    }

    #[tokio::test]
    async fn registered_ids_are_split_by_kind() {
        let tracker = StatsTracker::new(&settings(4, 10, 60), ActiveSessions::with(&["s"]));
        tracker.register("w2", "s").await;
        tracker.register("w1", "s").await;
        tracker.register_web_console("c1", "s").await;

        assert_eq!(tracker.get_registered(WorkerKind::Worker).await, vec!["w1", "w2"]);
        assert_eq!(tracker.get_registered(WorkerKind::WebConsole).await, vec!["c1"]);
    }

    // -- eviction --

    #[tokio::test]
    async fn idle_threshold_is_strict() {
        let tracker = StatsTracker::new(&settings(4, 10, 60), ActiveSessions::with(&["s"]));
        let t0 = chrono::Utc::now();
        tracker.register_at(WorkerKind::Worker, "w1", "s", t0).await;

        assert!(tracker
            .evaluate_to_remove_at(WorkerKind::Worker, t0 + minutes(10))
            .await
            .is_empty());
        assert_eq!(
            tracker
                .evaluate_to_remove_at(WorkerKind::Worker, t0 + minutes(10) + chrono::Duration::seconds(1))
                .await,
            vec!["w1"]
        );
    }

    #[tokio::test]
    async fn session_activity_resets_idle_but_not_active() {
        let tracker = StatsTracker::new(&settings(4, 10, 60), ActiveSessions::with(&["s"]));
        let t0 = chrono::Utc::now();
        tracker.register_at(WorkerKind::Worker, "w1", "s", t0).await;

        // Keep the session busy every 5 minutes for 55 minutes.
        for step in 1..=11 {
            let now = t0 + minutes(5 * step);
            tracker.record_session_activity_at("s", now).await;
            assert!(tracker.evaluate_to_remove_at(WorkerKind::Worker, now).await.is_empty());
        }

        tracker.record_session_activity_at("s", t0 + minutes(60)).await;
        assert_eq!(
            tracker.evaluate_to_remove_at(WorkerKind::Worker, t0 + minutes(61)).await,
            vec!["w1"]
        );
    }

    #[tokio::test]
    async fn activity_of_another_session_does_not_count() {
        let tracker = StatsTracker::new(&settings(4, 10, 60), ActiveSessions::with(&["a", "b"]));
        let t0 = chrono::Utc::now();
        tracker.register_at(WorkerKind::Worker, "w1", "a", t0).await;

        tracker.record_session_activity_at("b", t0 + minutes(9)).await;

        assert_eq!(
            tracker.evaluate_to_remove_at(WorkerKind::Worker, t0 + minutes(11)).await,
            vec!["w1"]
        );
    }

    #[tokio::test]
    async fn inactive_session_makes_worker_a_candidate() {
        let sessions = ActiveSessions::with(&["a", "b"]);
        let tracker = StatsTracker::new(&settings(4, 10, 60), sessions.clone());
        tracker.register("w1", "a").await;
        tracker.register("w2", "b").await;

        sessions.end("a");

        assert_eq!(tracker.evaluate_to_remove(WorkerKind::Worker).await, vec!["w1"]);
    }

    #[tokio::test]
    async fn evaluation_is_per_kind_and_read_only() {
        let tracker = StatsTracker::new(&settings(4, 10, 60), ActiveSessions::with(&[]));
        tracker.register("w1", "gone").await;
        tracker.register_web_console("c1", "gone").await;

        assert_eq!(tracker.evaluate_to_remove(WorkerKind::Worker).await, vec!["w1"]);
        assert_eq!(tracker.evaluate_to_remove(WorkerKind::WebConsole).await, vec!["c1"]);
        assert_eq!(tracker.registered_count().await, 2);
    }

    // -- configuration --

    #[tokio::test]
    async fn configuration_update_swaps_limits() {
        let tracker = StatsTracker::new(&settings(1, 10, 60), ActiveSessions::with(&["s"]));
        let t0 = chrono::Utc::now();
        tracker.register_at(WorkerKind::Worker, "w1", "s", t0).await;
        assert!(!tracker.is_create_allowed().await);

        tracker.update_configuration(&settings(3, 30, 120)).await;

        assert!(tracker.is_create_allowed().await);
        assert!(tracker
            .evaluate_to_remove_at(WorkerKind::Worker, t0 + minutes(20))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn non_positive_limits_fall_back_to_defaults() {
        let tracker = StatsTracker::new(&settings(0, -1, 0), ActiveSessions::with(&[]));
        assert_eq!(
            tracker.policy().await,
            EvictionPolicy {
                max_workers: 4,
                max_idle: minutes(10),
                max_active: minutes(60),
            }
        );
    }
}
