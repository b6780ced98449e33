//! Background follower of one script execution.
//!
//! The poller asks the worker for the script status at a fixed interval
//! and writes every answer through to the execution's
//! [`ExecutionRecordStore`]. Three failed polls over the execution's
//! lifetime mean the worker is gone; the execution is then closed with an `Error` record instead
//! of being left `Running` forever.

use std::sync::Arc;
use std::time::Duration;

use srs_core::execution::{ExecutionRecord, ExecutionState};
use srs_core::types::ScriptId;
use srs_pool::WorkerClient;
use tokio::sync::oneshot;

use crate::record_store::ExecutionRecordStore;

/// Pause between two polls, regardless of the outcome.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Failed polls, counted over the whole execution, after which the
/// worker is considered lost.
pub const MAX_POLL_FAILURES: u32 = 3;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_failures: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_failures: MAX_POLL_FAILURES,
        }
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Finished(ExecutionState),
    WorkerLost,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionPoller {
    config: PollerConfig,
}

impl CompletionPoller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    /// Start following `initial.id` on `worker`.
    ///
    /// `initial` is written to `store` as `Running` before this returns.
    /// The returned receiver resolves with the script id exactly once,
    /// after the final state has been flushed.
    pub async fn start(
        &self,
        worker: Arc<dyn WorkerClient>,
        mut initial: ExecutionRecord,
        store: Arc<ExecutionRecordStore>,
    ) -> oneshot::Receiver<ScriptId> {
        initial.state = ExecutionState::Running;
        initial.end_time = None;
        store.write_record(initial.clone()).await;

        let (completed_tx, completed_rx) = oneshot::channel();
        let config = self.config.clone();

        tokio::spawn(async move {
            let script_id = initial.id.clone();
            let outcome = poll_until_done(&config, worker.as_ref(), &initial, &store).await;

            if outcome == PollOutcome::WorkerLost {
                let last_known = store.read_record().await.unwrap_or(initial);
                store
                    .write_record(ExecutionRecord::worker_lost(&last_known, chrono::Utc::now()))
                    .await;
                tracing::warn!(
                    script_id = %script_id,
                    failures = config.max_failures,
                    "Worker stopped answering, execution marked as failed",
                );
            } else {
                tracing::debug!(script_id = %script_id, ?outcome, "Execution finished");
            }

            // Flush only after the final write.
            store.flush().await;

            // The receiver may already be gone (e.g. during shutdown).
            let _ = completed_tx.send(script_id);
        });

        completed_rx
    }
}

async fn poll_until_done(
    config: &PollerConfig,
    worker: &dyn WorkerClient,
    initial: &ExecutionRecord,
    store: &ExecutionRecordStore,
) -> PollOutcome {
    let script_id = initial.id.as_str();
    let mut failures = 0u32;

    loop {
        match worker.get_script(script_id).await {
            Ok(snapshot) => {
                let mut record = snapshot.record;
                // Workers know nothing about system scripts and may not echo names.
                record.is_system = initial.is_system;
                if record.name.is_empty() {
                    record.name.clone_from(&initial.name);
                }
                let state = record.state;
                store.write_record(record).await;
                store.write_output(snapshot.output).await;
                store.write_streams(snapshot.streams).await;

                if state.is_terminal() {
                    return PollOutcome::Finished(state);
                }
            }
            Err(e) => {
                failures += 1;
                tracing::debug!(script_id, failures, error = %e, "Script status poll failed");
                if failures >= config.max_failures {
                    return PollOutcome::WorkerLost;
                }
            }
        }

        tokio::time::sleep(config.interval).await;
    }
}
