//! Entry point for starting, tracking and reading script executions.
//!
//! While a script runs, its state lives in an [`ExecutionRecordStore`]
//! registered in the live map. When the poller reports completion the
//! store has already been flushed; the live entry is dropped and an
//! [`ExecutionEvent::Stored`] is broadcast. Reads check the live map first
//! and fall back to durable storage, so running and finished executions
//! look the same to callers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use srs_core::execution::{DataStreams, ExecutionOutput, ExecutionRecord, ScriptRequest};
use srs_core::settings::StorageSettings;
use srs_core::types::{ScriptId, UserId};
use srs_pool::{WorkerClient, WorkerClientError, WorkerConnector, WorkerInfo};
use tokio::sync::{broadcast, RwLock};

use crate::file_store::{self, FileRecordReader};
use crate::poller::CompletionPoller;
use crate::record_store::ExecutionRecordStore;
use crate::retention::RetentionEngine;

/// Broadcast channel capacity for execution events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// A finished execution was flushed and left the live map.
    Stored { user_id: UserId, script_id: ScriptId },
}

#[derive(Debug, thiserror::Error)]
pub enum MediatorError {
    #[error("Script {0} is already being tracked")]
    AlreadyTracked(ScriptId),

    #[error("Script {0} not found")]
    NotFound(ScriptId),

    #[error("Script {0} is not running")]
    NotRunning(ScriptId),

    #[error("Worker {0} is not ready")]
    WorkerNotReady(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Worker request failed: {0}")]
    Worker(#[from] WorkerClientError),
}

/// Bookkeeping for one running script.
struct LiveExecution {
    user_id: UserId,
    store: Arc<ExecutionRecordStore>,
    client: Arc<dyn WorkerClient>,
}

pub struct ExecutionTrackingMediator {
    live: RwLock<HashMap<ScriptId, LiveExecution>>,
    root: RwLock<PathBuf>,
    connector: Arc<dyn WorkerConnector>,
    poller: CompletionPoller,
    retention: Arc<RetentionEngine>,
    event_tx: broadcast::Sender<ExecutionEvent>,
}

impl ExecutionTrackingMediator {
    pub fn new(
        settings: &StorageSettings,
        connector: Arc<dyn WorkerConnector>,
        poller: CompletionPoller,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            live: RwLock::new(HashMap::new()),
            root: RwLock::new(settings.root_dir.clone()),
            connector,
            poller,
            retention: Arc::new(RetentionEngine::from_settings(settings)),
            event_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_tx.subscribe()
    }

    /// The retention engine over this mediator's storage root.
    pub fn retention(&self) -> Arc<RetentionEngine> {
        Arc::clone(&self.retention)
    }

    pub async fn live_count(&self) -> usize {
        self.live.read().await.len()
    }

    /// Apply new storage settings. In-flight executions keep persisting to
    /// the location they started with.
    pub async fn update_configuration(&self, settings: &StorageSettings) {
        *self.root.write().await = settings.root_dir.clone();
        self.retention.update_configuration(settings).await;
    }

    // ---- tracking ----

    /// Start a script on `worker` and track it to completion.
    pub async fn start_script_execution(
        self: &Arc<Self>,
        user_id: &str,
        worker: &WorkerInfo,
        request: &ScriptRequest,
    ) -> Result<ExecutionRecord, MediatorError> {
        let client = self.client_for(worker)?;
        let snapshot = client.start_script(request).await?;

        let mut initial = snapshot.record;
        initial.is_system = request.is_system;
        initial.output_format = request.output_format;
        if let Some(name) = &request.name {
            initial.name = name.clone();
        }

        tracing::info!(
            user_id,
            worker_id = %worker.id,
            script_id = %initial.id,
            is_system = request.is_system,
            "Script started",
        );

        self.track(user_id, client, initial).await
    }

    /// Track a script already started on `worker`.
    ///
    /// A second call for a script id that is still tracked is rejected
    /// with [`MediatorError::AlreadyTracked`].
    pub async fn start_tracking(
        self: &Arc<Self>,
        user_id: &str,
        worker: &WorkerInfo,
        script_id: &str,
        script_name: &str,
    ) -> Result<ExecutionRecord, MediatorError> {
        let client = self.client_for(worker)?;
        self.track(user_id, client, ExecutionRecord::running(script_id, script_name))
            .await
    }

    async fn track(
        self: &Arc<Self>,
        user_id: &str,
        client: Arc<dyn WorkerClient>,
        initial: ExecutionRecord,
    ) -> Result<ExecutionRecord, MediatorError> {
        let script_id = initial.id.clone();
        let dir = {
            let root = self.root.read().await;
            file_store::script_dir(&root, user_id, &script_id)
                .ok_or_else(|| MediatorError::InvalidId(format!("{user_id}/{script_id}")))?
        };

        let store = Arc::new(ExecutionRecordStore::create(dir).await);

        {
            let mut live = self.live.write().await;
            if live.contains_key(&script_id) {
                return Err(MediatorError::AlreadyTracked(script_id));
            }
            live.insert(
                script_id.clone(),
                LiveExecution {
                    user_id: user_id.to_string(),
                    store: Arc::clone(&store),
                    client: Arc::clone(&client),
                },
            );
        }

        let completed = self.poller.start(client, initial, Arc::clone(&store)).await;

        let mediator = Arc::clone(self);
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            let Ok(script_id) = completed.await else {
                tracing::error!("Completion poller dropped without reporting");
                return;
            };
            mediator.live.write().await.remove(&script_id);
            tracing::debug!(user_id = %user_id, script_id = %script_id, "Execution stored");
            let _ = mediator
                .event_tx
                .send(ExecutionEvent::Stored { user_id, script_id });
        });

        Ok(store.read_record().await.unwrap_or_else(|| ExecutionRecord::running(&script_id, "")))
    }

    /// Ask the worker running `script_id` to cancel it. The poller picks
    /// up the resulting state.
    pub async fn cancel_script_execution(&self, user_id: &str, script_id: &str) -> Result<(), MediatorError> {
        let client = {
            let live = self.live.read().await;
            match live.get(script_id) {
                Some(entry) if entry.user_id == user_id => Arc::clone(&entry.client),
                _ => return Err(MediatorError::NotRunning(script_id.to_string())),
            }
        };
        client.cancel_script(script_id).await?;
        tracing::info!(user_id, script_id, "Script cancellation requested");
        Ok(())
    }

    // ---- reads ----

    pub async fn get(&self, user_id: &str, script_id: &str) -> Option<ExecutionRecord> {
        match self.live_store(user_id, script_id).await {
            Some(store) => store.read_record().await,
            None => self.reader(user_id, script_id).await?.read_record().await,
        }
    }

    pub async fn get_output(&self, user_id: &str, script_id: &str) -> Result<ExecutionOutput, MediatorError> {
        if let Some(store) = self.live_store(user_id, script_id).await {
            return Ok(store.read_output().await);
        }
        let reader = self.persisted_reader(user_id, script_id).await?;
        Ok(reader.read_output().await)
    }

    pub async fn get_streams(&self, user_id: &str, script_id: &str) -> Result<DataStreams, MediatorError> {
        if let Some(store) = self.live_store(user_id, script_id).await {
            return Ok(store.read_streams().await);
        }
        let reader = self.persisted_reader(user_id, script_id).await?;
        Ok(reader.read_streams().await)
    }

    /// Every execution of `user_id`, running or persisted, oldest first.
    /// `skip_system` hides scripts the gateway started on its own.
    pub async fn list(&self, user_id: &str, skip_system: bool) -> Vec<ExecutionRecord> {
        let mut records: HashMap<ScriptId, ExecutionRecord> = HashMap::new();

        let live_stores: Vec<_> = self
            .live
            .read()
            .await
            .values()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| Arc::clone(&entry.store))
            .collect();
        for store in live_stores {
            if let Some(record) = store.read_record().await {
                records.insert(record.id.clone(), record);
            }
        }

        let root = self.root.read().await.clone();
        for script_id in file_store::list_script_ids(&root, user_id).await {
            if records.contains_key(&script_id) {
                continue;
            }
            if let Some(record) = self.get(user_id, &script_id).await {
                records.insert(script_id, record);
            }
        }

        let mut records: Vec<_> = records
            .into_values()
            .filter(|r| !r.id.is_empty())
            .filter(|r| !(skip_system && r.is_system))
            .collect();
        records.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        records
    }

    /// Flush every live execution, e.g. before the process exits.
    pub async fn shutdown(&self) {
        let stores: Vec<_> = self
            .live
            .read()
            .await
            .values()
            .map(|entry| Arc::clone(&entry.store))
            .collect();
        tracing::info!(count = stores.len(), "Flushing live executions");
        futures::future::join_all(stores.iter().map(|store| store.flush())).await;
    }

    // ---- private helpers ----

    fn client_for(&self, worker: &WorkerInfo) -> Result<Arc<dyn WorkerClient>, MediatorError> {
        let endpoint = worker
            .ready_endpoint()
            .ok_or_else(|| MediatorError::WorkerNotReady(worker.id.clone()))?;
        Ok(self.connector.connect(endpoint))
    }

    async fn live_store(&self, user_id: &str, script_id: &str) -> Option<Arc<ExecutionRecordStore>> {
        self.live
            .read()
            .await
            .get(script_id)
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| Arc::clone(&entry.store))
    }

    async fn reader(&self, user_id: &str, script_id: &str) -> Option<FileRecordReader> {
        let root = self.root.read().await;
        file_store::script_dir(&root, user_id, script_id).map(FileRecordReader::new)
    }

    /// Reader for a persisted execution whose record exists.
    async fn persisted_reader(&self, user_id: &str, script_id: &str) -> Result<FileRecordReader, MediatorError> {
        let reader = self
            .reader(user_id, script_id)
            .await
            .ok_or_else(|| MediatorError::NotFound(script_id.to_string()))?;
        if reader.read_record().await.is_none() {
            return Err(MediatorError::NotFound(script_id.to_string()));
        }
        Ok(reader)
    }
}
