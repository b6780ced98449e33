//! Multi-tenant front of the worker pool.
//!
//! [`TenantWorkerOrchestrator`] owns the user → worker directory, gates
//! creation on the [`StatsTracker`] cap, finishes creation in the
//! background (optionally connecting the new worker to a VC) and
//! periodically evicts idle, overlong or orphaned workers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use srs_core::execution::{ExecutionRecord, ExecutionState, ScriptRequest};
use srs_core::session::Session;
use srs_core::settings::WorkerPoolSettings;
use srs_core::types::{ScriptId, Timestamp, WorkerId};
use srs_executions::{ExecutionTrackingMediator, MediatorError};
use srs_pool::{CreationState, WebConsoleInfo, WorkerInfo, WorkerPool, WorkerPoolError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::directory::UserDirectory;
use crate::stats::{StatsTracker, WorkerKind};
use crate::sts::{StsClient, StsError};
use crate::system_scripts;

/// Delay before the first cleanup pass.
pub const CLEANUP_INITIAL_DELAY: Duration = Duration::from_secs(30);

/// Period of the cleanup pass.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Poll period while waiting for the VC connection script.
const CONNECT_VC_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Poll period while waiting for the disconnect script before a kill.
const DISCONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Creating,
    Running,
    Error,
    Deleted,
}

/// A worker as seen by its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantWorkerRecord {
    pub worker: WorkerInfo,
    pub name: Option<String>,
    pub state: WorkerState,
    pub error_details: Option<String>,
    pub run_vc_connection_script: bool,
    pub vc_connection_script_id: Option<ScriptId>,
    pub creation_time: Timestamp,
}

impl TenantWorkerRecord {
    fn creating(worker: WorkerInfo, name: Option<String>, run_vc_connection_script: bool) -> Self {
        Self {
            worker,
            name,
            state: WorkerState::Creating,
            error_details: None,
            run_vc_connection_script,
            vc_connection_script_id: None,
            creation_time: chrono::Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.worker.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebConsoleState {
    Creating,
    Available,
    Error,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebConsoleRecord {
    pub id: WorkerId,
    pub state: WebConsoleState,
    pub error_details: Option<String>,
    pub creation_time: Timestamp,
}

impl From<WebConsoleInfo> for WebConsoleRecord {
    fn from(info: WebConsoleInfo) -> Self {
        let (state, error_details) = match info.creation_state {
            CreationState::Running => (WebConsoleState::Available, None),
            CreationState::Pending => (WebConsoleState::Creating, None),
            CreationState::Error => (
                WebConsoleState::Error,
                info.creation_error.map(|e| e.to_string()),
            ),
        };
        Self {
            id: info.id,
            state,
            error_details,
            creation_time: chrono::Utc::now(),
        }
    }
}

/// Parameters of the optional VC connection made right after creation.
#[derive(Clone)]
pub struct VcConnection {
    pub sts_client: Arc<dyn StsClient>,
    pub vc_endpoint: String,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub evicted_workers: usize,
    pub evicted_web_consoles: usize,
    pub reconciled: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Worker limit reached")]
    LimitReached,

    #[error("Invalid user id")]
    InvalidUser,

    #[error("User {0} has no workers")]
    UserNotFound(String),

    #[error("User {user_id} has no worker {worker_id}")]
    WorkerNotFound { user_id: String, worker_id: String },

    #[error("Session credential unusable: {0}")]
    Credential(String),

    #[error(transparent)]
    Pool(#[from] WorkerPoolError),
}

/// Why the VC connection of a new worker failed.
#[derive(Debug, thiserror::Error)]
enum VcConnectError {
    #[error("No credential available for session")]
    NoCredential,

    #[error(transparent)]
    Sts(#[from] StsError),

    #[error("Connect VC script could not run: {0}")]
    Script(#[from] MediatorError),

    #[error("Connect VC script ended {state}: {reason}")]
    Failed { state: ExecutionState, reason: String },
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct TenantWorkerOrchestrator {
    pool: Arc<dyn WorkerPool>,
    stats: Arc<StatsTracker>,
    mediator: Arc<ExecutionTrackingMediator>,
    workers: RwLock<UserDirectory<TenantWorkerRecord>>,
    web_consoles: RwLock<UserDirectory<WebConsoleRecord>>,
}

impl TenantWorkerOrchestrator {
    pub fn new(
        pool: Arc<dyn WorkerPool>,
        stats: Arc<StatsTracker>,
        mediator: Arc<ExecutionTrackingMediator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            stats,
            mediator,
            workers: RwLock::new(UserDirectory::new()),
            web_consoles: RwLock::new(UserDirectory::new()),
        })
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    pub async fn can_create_new_worker(&self) -> bool {
        self.stats.is_create_allowed().await
    }

    /// Apply new pool settings to the backend and the eviction policy.
    pub async fn update_configuration(&self, settings: &WorkerPoolSettings) -> Result<(), OrchestratorError> {
        let settings = settings.clone().normalized();
        self.pool.update_configuration(&settings).await?;
        self.stats.update_configuration(&settings).await;
        Ok(())
    }

    /// Note activity of `session_id`, resetting the idle clock of its workers.
    pub async fn record_session_activity(&self, session_id: &str) {
        self.stats.record_session_activity(session_id).await;
    }

    // ---- workers ----

    /// Create a worker for `user_id`.
    ///
    /// Returns as soon as the backend accepted the request; the record is
    /// `Creating` and moves to `Running` or `Error` in the background. When
    /// `vc` is given, the worker is connected to that VC before it becomes
    /// `Running`.
    pub async fn start_create(
        self: &Arc<Self>,
        user_id: &str,
        session: &Session,
        name: Option<String>,
        vc: Option<VcConnection>,
    ) -> Result<TenantWorkerRecord, OrchestratorError> {
        ensure_valid_user(user_id)?;

        let slot = self.stats.try_reserve().await.ok_or_else(|| {
            tracing::info!(user_id, "Worker creation refused, limit reached");
            OrchestratorError::LimitReached
        })?;

        let info = self.pool.start_create().await;
        tracing::debug!(
            user_id,
            worker_id = %info.id,
            creation_state = ?info.creation_state,
            "Pool accepted worker creation",
        );

        let mut record = TenantWorkerRecord::creating(info, name, vc.is_some());
        if record.worker.creation_state == CreationState::Error {
            // No usable worker exists, so it is neither tracked nor counted.
            record.state = WorkerState::Error;
            record.error_details = record.worker.creation_error.as_ref().map(ToString::to_string);
            tracing::warn!(user_id, worker_id = %record.id(), error = ?record.error_details, "Worker creation failed");
            return Ok(record);
        }

        self.workers.write().await.add(user_id, record.id(), record.clone());
        self.stats.register(record.id(), &session.session_id).await;
        drop(slot);

        tracing::info!(user_id, worker_id = %record.id(), "Worker creation started");

        let orchestrator = Arc::clone(self);
        let user_id = user_id.to_string();
        let session = session.clone();
        let worker = record.worker.clone();
        tokio::spawn(async move {
            orchestrator.complete_creation(&user_id, &session, worker, vc).await;
        });

        Ok(record)
    }

    /// Workers of `user_id` that the backend still runs. Entries whose
    /// worker vanished are dropped.
    pub async fn list(&self, user_id: &str) -> Result<Vec<TenantWorkerRecord>, OrchestratorError> {
        ensure_valid_user(user_id)?;
        let records = self.workers.read().await.list(user_id);

        let mut alive = Vec::with_capacity(records.len());
        for record in records {
            if self.pool.get(record.id()).await?.is_some() {
                alive.push(record);
            } else {
                tracing::debug!(user_id, worker_id = %record.id(), "Dropping vanished worker");
                self.workers.write().await.remove_data(user_id, record.id());
            }
        }
        Ok(alive)
    }

    /// One worker of `user_id`; `None` (and the entry dropped) when the
    /// backend no longer runs it.
    pub async fn get(&self, user_id: &str, worker_id: &str) -> Result<Option<TenantWorkerRecord>, OrchestratorError> {
        let record = self.owned_worker(user_id, worker_id).await?;

        if self.pool.get(worker_id).await?.is_none() {
            tracing::debug!(user_id, worker_id, "Dropping vanished worker");
            self.workers.write().await.remove_data(user_id, worker_id);
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Remove a worker of `user_id` and kill it on the backend.
    ///
    /// A worker connected to a VC first runs the disconnect script; that
    /// and the kill happen in the background and failures are only logged.
    pub async fn kill(&self, user_id: &str, worker_id: &str) -> Result<(), OrchestratorError> {
        self.owned_worker(user_id, worker_id).await?;
        let current = self.pool.get(worker_id).await?;
        let removed = self.workers.write().await.remove_data(user_id, worker_id);
        self.stats.unregister(worker_id).await;

        tracing::info!(user_id, worker_id, "Killing worker");

        let disconnect_first = removed.is_some_and(|r| r.run_vc_connection_script);
        match current {
            Some(worker) if disconnect_first => {
                let pool = Arc::clone(&self.pool);
                let mediator = Arc::clone(&self.mediator);
                let user_id = user_id.to_string();
                tokio::spawn(async move {
                    disconnect_all_servers(&mediator, &user_id, &worker).await;
                    if let Err(e) = pool.kill(&worker.id).await {
                        tracing::error!(worker_id = %worker.id, error = %e, "Failed to kill worker");
                    }
                });
                Ok(())
            }
            _ => Ok(self.pool.kill(worker_id).await?),
        }
    }

    // ---- web consoles ----

    pub async fn can_create_new_web_console(&self) -> bool {
        self.stats.is_create_allowed().await
    }

    /// Create a web console for `user_id` attached to `vc_endpoint`.
    pub async fn create_web_console(
        &self,
        user_id: &str,
        session: &Session,
        sts_client: &dyn StsClient,
        vc_endpoint: &str,
    ) -> Result<WebConsoleRecord, OrchestratorError> {
        ensure_valid_user(user_id)?;

        let credential = session
            .credential
            .as_deref()
            .ok_or_else(|| OrchestratorError::Credential("no credential available for session".into()))?;
        let bearer = sts_client
            .issue_bearer_token(credential)
            .await
            .map_err(|e| OrchestratorError::Credential(e.to_string()))?;
        let token = encode_console_token(&bearer);

        let slot = self.stats.try_reserve().await.ok_or(OrchestratorError::LimitReached)?;

        let info = self.pool.create_web_console(vc_endpoint, &token, true).await?;
        let record = WebConsoleRecord::from(info);
        if record.state != WebConsoleState::Error {
            self.stats.register_web_console(&record.id, &session.session_id).await;
            self.web_consoles.write().await.add(user_id, &record.id, record.clone());
        }
        drop(slot);

        tracing::info!(user_id, console_id = %record.id, state = ?record.state, "Web console created");
        Ok(record)
    }

    pub async fn get_web_console(
        &self,
        user_id: &str,
        console_id: &str,
    ) -> Result<Option<WebConsoleRecord>, OrchestratorError> {
        ensure_valid_user(user_id)?;
        let record = {
            let consoles = self.web_consoles.read().await;
            if !consoles.contains_user(user_id) {
                return Err(OrchestratorError::UserNotFound(user_id.to_string()));
            }
            consoles
                .get_data(user_id, console_id)
                .ok_or_else(|| OrchestratorError::WorkerNotFound {
                    user_id: user_id.to_string(),
                    worker_id: console_id.to_string(),
                })?
        };

        if self.pool.get_web_console(console_id).await?.is_none() {
            self.web_consoles.write().await.remove_data(user_id, console_id);
            return Ok(None);
        }
        Ok(Some(record))
    }

    pub async fn list_web_consoles(&self, user_id: &str) -> Result<Vec<WebConsoleRecord>, OrchestratorError> {
        ensure_valid_user(user_id)?;
        let records = self.web_consoles.read().await.list(user_id);
        if records.is_empty() {
            return Ok(records);
        }

        let running: HashSet<_> = self
            .pool
            .list_web_consoles()
            .await?
            .into_iter()
            .map(|info| info.id)
            .collect();

        let (alive, vanished): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| running.contains(&r.id));
        if !vanished.is_empty() {
            let mut consoles = self.web_consoles.write().await;
            for record in vanished {
                consoles.remove_data(user_id, &record.id);
            }
        }
        Ok(alive)
    }

    pub async fn kill_web_console(&self, user_id: &str, console_id: &str) -> Result<(), OrchestratorError> {
        ensure_valid_user(user_id)?;
        self.web_consoles.write().await.remove_data(user_id, console_id);
        self.stats.unregister(console_id).await;
        tracing::info!(user_id, console_id, "Killing web console");
        self.pool.kill_web_console(console_id).await?;
        Ok(())
    }

    // ---- cleanup ----

    /// Evict candidates chosen by the [`StatsTracker`], then drop
    /// directory entries and registrations of workers the backend no
    /// longer runs.
    pub async fn cleanup(&self) -> Result<CleanupReport, OrchestratorError> {
        let mut report = CleanupReport::default();
        self.cleanup_workers(&mut report).await?;
        self.cleanup_web_consoles(&mut report).await?;
        Ok(report)
    }

    async fn cleanup_workers(&self, report: &mut CleanupReport) -> Result<(), OrchestratorError> {
        for worker_id in self.stats.evaluate_to_remove(WorkerKind::Worker).await {
            let owner = self.workers.read().await.get_user(&worker_id);
            if let Some(user_id) = owner {
                match self.kill(&user_id, &worker_id).await {
                    Ok(()) => report.evicted_workers += 1,
                    Err(e) => tracing::warn!(user_id = %user_id, worker_id = %worker_id, error = %e, "Eviction kill failed"),
                }
            }
            self.stats.unregister(&worker_id).await;
        }

        let running: HashSet<_> = self.pool.list().await?.into_iter().map(|w| w.id).collect();
        report.reconciled += self.reconcile_workers(&running).await;
        Ok(())
    }

    async fn cleanup_web_consoles(&self, report: &mut CleanupReport) -> Result<(), OrchestratorError> {
        for console_id in self.stats.evaluate_to_remove(WorkerKind::WebConsole).await {
            let owner = self.web_consoles.read().await.get_user(&console_id);
            if let Some(user_id) = owner {
                match self.kill_web_console(&user_id, &console_id).await {
                    Ok(()) => report.evicted_web_consoles += 1,
                    Err(e) => tracing::warn!(user_id = %user_id, console_id = %console_id, error = %e, "Eviction kill failed"),
                }
            }
            self.stats.unregister(&console_id).await;
        }

        let running: HashSet<_> = match self.pool.list_web_consoles().await {
            Ok(consoles) => consoles.into_iter().map(|c| c.id).collect(),
            Err(WorkerPoolError::Unsupported(_)) => HashSet::new(),
            Err(e) => return Err(e.into()),
        };

        let stale: Vec<_> = {
            let mut consoles = self.web_consoles.write().await;
            let stale: Vec<_> = consoles
                .entries()
                .into_iter()
                .filter(|(_, id)| !running.contains(id))
                .collect();
            for (user_id, id) in &stale {
                consoles.remove_data(user_id, id);
            }
            stale
        };
        report.reconciled += stale.len();

        for id in self.stats.get_registered(WorkerKind::WebConsole).await {
            if !running.contains(&id) {
                self.stats.unregister(&id).await;
            }
        }
        Ok(())
    }

    /// Drop workers missing from `running`. Returns how many directory
    /// entries were removed.
    async fn reconcile_workers(&self, running: &HashSet<WorkerId>) -> usize {
        let removed = {
            let mut workers = self.workers.write().await;
            let stale: Vec<_> = workers
                .entries()
                .into_iter()
                .filter(|(_, id)| !running.contains(id))
                .collect();
            for (user_id, id) in &stale {
                tracing::debug!(user_id = %user_id, worker_id = %id, "Reconciling vanished worker");
                workers.remove_data(user_id, id);
            }
            stale.len()
        };

        for id in self.stats.get_registered(WorkerKind::Worker).await {
            if !running.contains(&id) {
                self.stats.unregister(&id).await;
            }
        }
        removed
    }

    // ---- private helpers ----

    async fn owned_worker(&self, user_id: &str, worker_id: &str) -> Result<TenantWorkerRecord, OrchestratorError> {
        ensure_valid_user(user_id)?;
        let workers = self.workers.read().await;
        if !workers.contains_user(user_id) {
            return Err(OrchestratorError::UserNotFound(user_id.to_string()));
        }
        workers
            .get_data(user_id, worker_id)
            .ok_or_else(|| OrchestratorError::WorkerNotFound {
                user_id: user_id.to_string(),
                worker_id: worker_id.to_string(),
            })
    }

    /// Apply `update` to the directory record of a worker, if still present.
    async fn update_record(&self, user_id: &str, worker_id: &str, update: impl FnOnce(&mut TenantWorkerRecord)) {
        if let Some(record) = self.workers.write().await.get_data_mut(user_id, worker_id) {
            update(record);
        }
    }

    async fn complete_creation(&self, user_id: &str, session: &Session, worker: WorkerInfo, vc: Option<VcConnection>) {
        let worker_id = worker.id.clone();
        let finished = self.pool.wait_create_completion(worker).await;

        if finished.creation_state != CreationState::Running {
            let details = finished
                .creation_error
                .as_ref()
                .map_or_else(|| "worker creation did not complete".to_string(), ToString::to_string);
            tracing::warn!(user_id, worker_id = %worker_id, error = %details, "Worker creation failed");
            self.stats.unregister(&worker_id).await;
            self.update_record(user_id, &worker_id, |record| {
                record.worker = finished;
                record.state = WorkerState::Error;
                record.error_details = Some(details);
            })
            .await;
            return;
        }

        self.update_record(user_id, &worker_id, |record| record.worker = finished.clone())
            .await;

        let outcome = match vc {
            Some(vc) => self.connect_vc(user_id, session, &finished, &vc).await,
            None => Ok(()),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(user_id, worker_id = %worker_id, "Worker running");
                self.update_record(user_id, &worker_id, |record| record.state = WorkerState::Running)
                    .await;
            }
            Err(e) => {
                tracing::error!(user_id, worker_id = %worker_id, error = %e, "Connecting worker to VC failed");
                self.update_record(user_id, &worker_id, |record| {
                    record.state = WorkerState::Error;
                    record.error_details = Some(e.to_string());
                })
                .await;
            }
        }
    }

    async fn connect_vc(
        &self,
        user_id: &str,
        session: &Session,
        worker: &WorkerInfo,
        vc: &VcConnection,
    ) -> Result<(), VcConnectError> {
        let credential = session.credential.as_deref().ok_or(VcConnectError::NoCredential)?;
        let token = vc.sts_client.issue_bearer_token(credential).await?;

        let request = system_scripts::connect_vc(&vc.vc_endpoint, &token);
        let started = self.mediator.start_script_execution(user_id, worker, &request).await?;
        self.update_record(user_id, &worker.id, |record| {
            record.vc_connection_script_id = Some(started.id.clone());
        })
        .await;

        let finished = wait_for_script(&self.mediator, user_id, started, CONNECT_VC_POLL_INTERVAL).await;
        match finished.state {
            ExecutionState::Success => Ok(()),
            state => Err(VcConnectError::Failed {
                state,
                reason: finished.reason.unwrap_or_default(),
            }),
        }
    }
}

fn ensure_valid_user(user_id: &str) -> Result<(), OrchestratorError> {
    if user_id.trim().is_empty() {
        return Err(OrchestratorError::InvalidUser);
    }
    Ok(())
}

/// Web consoles take the bearer token base64-encoded over UTF-16LE.
fn encode_console_token(token: &str) -> String {
    let bytes: Vec<u8> = token.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}

/// Re-read `record` every `interval` until it is no longer running.
async fn wait_for_script(
    mediator: &ExecutionTrackingMediator,
    user_id: &str,
    mut record: ExecutionRecord,
    interval: Duration,
) -> ExecutionRecord {
    while record.state == ExecutionState::Running {
        tokio::time::sleep(interval).await;
        if let Some(latest) = mediator.get(user_id, &record.id).await {
            record = latest;
        }
    }
    record
}

/// Run a script on `worker` and wait for it, logging any failure.
async fn run_system_script(
    mediator: &Arc<ExecutionTrackingMediator>,
    user_id: &str,
    worker: &WorkerInfo,
    request: ScriptRequest,
    interval: Duration,
) {
    let name = request.name.clone().unwrap_or_default();
    match mediator.start_script_execution(user_id, worker, &request).await {
        Ok(started) => {
            let finished = wait_for_script(mediator, user_id, started, interval).await;
            tracing::debug!(worker_id = %worker.id, script = %name, state = %finished.state, "System script finished");
        }
        Err(e) => {
            tracing::error!(worker_id = %worker.id, script = %name, error = %e, "System script failed to start");
        }
    }
}

async fn disconnect_all_servers(mediator: &Arc<ExecutionTrackingMediator>, user_id: &str, worker: &WorkerInfo) {
    run_system_script(
        mediator,
        user_id,
        worker,
        system_scripts::disconnect_all_servers(),
        DISCONNECT_POLL_INTERVAL,
    )
    .await;
}

/// Run [`TenantWorkerOrchestrator::cleanup`] after [`CLEANUP_INITIAL_DELAY`]
/// and then every [`CLEANUP_INTERVAL`] until `cancel` is triggered.
pub async fn run(orchestrator: Arc<TenantWorkerOrchestrator>, cancel: CancellationToken) {
    run_every(orchestrator, CLEANUP_INITIAL_DELAY, CLEANUP_INTERVAL, cancel).await;
}

pub async fn run_every(
    orchestrator: Arc<TenantWorkerOrchestrator>,
    initial_delay: Duration,
    period: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = period.as_secs(), "Worker cleanup job started");

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + initial_delay, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Worker cleanup job stopping");
                break;
            }
            _ = interval.tick() => {
                match orchestrator.cleanup().await {
                    Ok(report) if report != CleanupReport::default() => {
                        tracing::info!(
                            evicted_workers = report.evicted_workers,
                            evicted_web_consoles = report.evicted_web_consoles,
                            reconciled = report.reconciled,
                            "Worker cleanup: pass complete",
                        );
                    }
                    Ok(_) => tracing::debug!("Worker cleanup: nothing to do"),
                    Err(e) => tracing::error!(error = %e, "Worker cleanup failed"),
                }
            }
        }
    }
}
