#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use srs_core::execution::{ExecutionRecord, ExecutionState, ScriptRequest, ScriptSnapshot};
use srs_core::session::Session;
use srs_core::settings::{StorageSettings, WorkerPoolSettings};
use srs_executions::{CompletionPoller, ExecutionTrackingMediator, PollerConfig};
use srs_orchestrator::{
    StatsTracker, StsClient, StsError, TenantWorkerOrchestrator, TenantWorkerRecord, WorkerState,
};
use srs_pool::{
    CreationState, WebConsoleInfo, WorkerClient, WorkerClientError, WorkerConnector, WorkerInfo,
    WorkerPool, WorkerPoolError,
};
use srs_sessions::SessionStore;

pub const USER: &str = "alice";

fn endpoint() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5550))
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// In-memory pool. Workers are running as soon as they are created.
#[derive(Default)]
pub struct FakePool {
    running: Mutex<BTreeSet<String>>,
    consoles: Mutex<BTreeSet<String>>,
    next_id: AtomicU32,
    pub created: AtomicU32,
    pub killed: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
    /// Creation gets an id but the worker never becomes reachable.
    pub fail_unreachable: AtomicBool,
    /// Creation is accepted but fails while waiting for completion.
    pub fail_completion: AtomicBool,
    /// Latency of `start_create`, in milliseconds.
    pub create_delay_ms: AtomicU64,
    pub settings: Mutex<Option<WorkerPoolSettings>>,
}

impl FakePool {
    /// Make a worker disappear as if the backend lost it.
    pub fn vanish(&self, id: &str) {
        self.running.lock().unwrap().remove(id);
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl WorkerPool for FakePool {
    async fn start_create(&self) -> WorkerInfo {
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return WorkerInfo::failed("", WorkerPoolError::Backend("no capacity".into()));
        }
        if self.fail_unreachable.load(Ordering::SeqCst) {
            let id = self.next("w");
            return WorkerInfo::failed(
                id.clone(),
                WorkerPoolError::Unreachable {
                    worker_id: id,
                    endpoint: endpoint(),
                    attempts: 3,
                    reason: "connection refused".into(),
                },
            );
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let id = self.next("w");
        self.running.lock().unwrap().insert(id.clone());
        WorkerInfo::running(id, endpoint())
    }

    async fn wait_create_completion(&self, worker: WorkerInfo) -> WorkerInfo {
        if self.fail_completion.load(Ordering::SeqCst) {
            return WorkerInfo::failed(worker.id, WorkerPoolError::Backend("container exited".into()));
        }
        worker
    }

    async fn get(&self, id: &str) -> Result<Option<WorkerInfo>, WorkerPoolError> {
        Ok(self
            .running
            .lock()
            .unwrap()
            .contains(id)
            .then(|| WorkerInfo::running(id, endpoint())))
    }

    async fn kill(&self, id: &str) -> Result<(), WorkerPoolError> {
        self.running.lock().unwrap().remove(id);
        self.killed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkerInfo>, WorkerPoolError> {
        Ok(self
            .running
            .lock()
            .unwrap()
            .iter()
            .map(|id| WorkerInfo::running(id.clone(), endpoint()))
            .collect())
    }

    async fn update_configuration(&self, settings: &WorkerPoolSettings) -> Result<(), WorkerPoolError> {
        *self.settings.lock().unwrap() = Some(settings.clone());
        Ok(())
    }

    async fn create_web_console(
        &self,
        _vc_endpoint: &str,
        _token: &str,
        _all_linked: bool,
    ) -> Result<WebConsoleInfo, WorkerPoolError> {
        let id = self.next("c");
        self.consoles.lock().unwrap().insert(id.clone());
        Ok(WebConsoleInfo {
            id,
            creation_state: CreationState::Running,
            creation_error: None,
        })
    }

    async fn get_web_console(&self, id: &str) -> Result<Option<WebConsoleInfo>, WorkerPoolError> {
        Ok(self.consoles.lock().unwrap().contains(id).then(|| WebConsoleInfo {
            id: id.to_string(),
            creation_state: CreationState::Running,
            creation_error: None,
        }))
    }

    async fn list_web_consoles(&self) -> Result<Vec<WebConsoleInfo>, WorkerPoolError> {
        Ok(self
            .consoles
            .lock()
            .unwrap()
            .iter()
            .map(|id| WebConsoleInfo {
                id: id.clone(),
                creation_state: CreationState::Running,
                creation_error: None,
            })
            .collect())
    }

    async fn kill_web_console(&self, id: &str) -> Result<(), WorkerPoolError> {
        self.consoles.lock().unwrap().remove(id);
        self.killed.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Worker execution API
// ---------------------------------------------------------------------------

/// Worker whose scripts finish with `outcome` on the first status poll.
pub struct FakeWorker {
    scripts: Mutex<HashMap<String, ExecutionRecord>>,
    pub started: Mutex<Vec<ScriptRequest>>,
    pub outcome: Mutex<ExecutionState>,
    next_id: AtomicU32,
}

impl Default for FakeWorker {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            outcome: Mutex::new(ExecutionState::Success),
            next_id: AtomicU32::new(0),
        }
    }
}

impl FakeWorker {
    pub fn started_names(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.name.clone())
            .collect()
    }
}

#[async_trait]
impl WorkerClient for FakeWorker {
    async fn start_script(&self, request: &ScriptRequest) -> Result<ScriptSnapshot, WorkerClientError> {
        let id = format!("script-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = ExecutionRecord::running(&id, request.name.clone().unwrap_or_default());
        self.scripts.lock().unwrap().insert(id, record.clone());
        self.started.lock().unwrap().push(request.clone());
        Ok(ScriptSnapshot::new(record))
    }

    async fn get_script(&self, id: &str) -> Result<ScriptSnapshot, WorkerClientError> {
        let outcome = *self.outcome.lock().unwrap();
        let mut scripts = self.scripts.lock().unwrap();
        let record = scripts.get_mut(id).ok_or_else(|| WorkerClientError::ApiError {
            status: 404,
            body: format!("no script {id}"),
        })?;
        record.state = outcome;
        record.end_time = Some(chrono::Utc::now());
        Ok(ScriptSnapshot::new(record.clone()))
    }

    async fn get_last_script(&self) -> Result<Option<ScriptSnapshot>, WorkerClientError> {
        Ok(None)
    }

    async fn cancel_script(&self, _id: &str) -> Result<(), WorkerClientError> {
        Ok(())
    }
}

pub struct FakeConnector(pub Arc<FakeWorker>);

impl WorkerConnector for FakeConnector {
    fn connect(&self, _endpoint: SocketAddr) -> Arc<dyn WorkerClient> {
        Arc::clone(&self.0) as Arc<dyn WorkerClient>
    }
}

// ---------------------------------------------------------------------------
// Token service
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSts {
    pub fail: AtomicBool,
}

#[async_trait]
impl StsClient for FakeSts {
    async fn issue_bearer_token(&self, credential: &str) -> Result<String, StsError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StsError("token service down".into()));
        }
        Ok(format!("bearer-{credential}"))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Arc<TenantWorkerOrchestrator>,
    pub mediator: Arc<ExecutionTrackingMediator>,
    pub pool: Arc<FakePool>,
    pub worker: Arc<FakeWorker>,
    pub sessions: Arc<SessionStore>,
    pub session: Session,
    pub root: tempfile::TempDir,
}

pub async fn harness(max_workers: i64) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let settings = WorkerPoolSettings {
        max_workers_per_tenant: max_workers,
        ..WorkerPoolSettings::default()
    };

    let sessions = Arc::new(SessionStore::default());
    let session = Session::new(USER, Some("cred".to_string()));
    sessions.register(session.clone()).await.unwrap();

    let pool = Arc::new(FakePool::default());
    let worker = Arc::new(FakeWorker::default());
    let mediator = ExecutionTrackingMediator::new(
        &StorageSettings::new(root.path()),
        Arc::new(FakeConnector(Arc::clone(&worker))),
        CompletionPoller::new(PollerConfig {
            interval: Duration::from_millis(10),
            max_failures: 3,
        }),
    );
    let stats = Arc::new(StatsTracker::new(&settings, sessions.clone()));
    let orchestrator = TenantWorkerOrchestrator::new(pool.clone(), stats, Arc::clone(&mediator));

    Harness {
        orchestrator,
        mediator,
        pool,
        worker,
        sessions,
        session,
        root,
    }
}

/// Wait until worker `id` of [`USER`] reaches `state`.
pub async fn wait_for_state(h: &Harness, id: &str, state: WorkerState) -> TenantWorkerRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Some(record)) = h.orchestrator.get(USER, id).await {
                if record.state == state {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("worker {id} never reached {state:?}"))
}

/// Wait until `condition` holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}
