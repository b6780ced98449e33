//! Retention of persisted executions.
//!
//! [`RetentionEngine::apply`] walks every user directory under the storage
//! root, builds one [`PersistedRecordHandle`] per execution directory and
//! deletes whatever any configured [`RetentionRule`] selects. Deletion is
//! best-effort: an I/O error on one execution is logged and the sweep
//! moves on.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use srs_core::settings::StorageSettings;
use srs_core::types::Timestamp;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::file_store::RECORD_FILE;

/// How often the retention sweep runs.
pub const RETENTION_INTERVAL: Duration = Duration::from_secs(5 * 60); // 5 minutes

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Identity and freshness of one persisted execution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PersistedRecordHandle {
    pub location: PathBuf,
    pub last_update: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionRule {
    /// Keep only the `n` most recently updated records.
    KeepLastN(usize),
    /// Remove records not updated for at least this long.
    OlderThan(chrono::Duration),
}

impl RetentionRule {
    /// Handles this rule selects for removal.
    pub fn evaluate(&self, handles: &[PersistedRecordHandle], now: Timestamp) -> Vec<PersistedRecordHandle> {
        match self {
            RetentionRule::KeepLastN(n) => {
                if handles.len() <= *n {
                    return Vec::new();
                }
                let mut oldest_first = handles.to_vec();
                oldest_first.sort_by(|a, b| a.last_update.cmp(&b.last_update));
                oldest_first.truncate(handles.len() - n);
                oldest_first
            }
            RetentionRule::OlderThan(max_age) => handles
                .iter()
                .filter(|h| now - h.last_update >= *max_age)
                .cloned()
                .collect(),
        }
    }
}

impl std::fmt::Display for RetentionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionRule::KeepLastN(n) => write!(f, "keep last {n}"),
            RetentionRule::OlderThan(age) => write!(f, "older than {}h", age.num_hours()),
        }
    }
}

/// The rules derived from storage settings.
pub fn rules_from_settings(settings: &StorageSettings) -> Vec<RetentionRule> {
    let settings = settings.clone().normalized();
    vec![
        RetentionRule::KeepLastN(settings.keep_last_n as usize),
        RetentionRule::OlderThan(settings.max_age()),
    ]
}

/// Union of what every rule selects, each handle at most once.
pub fn evaluate_rules(
    rules: &[RetentionRule],
    handles: &[PersistedRecordHandle],
    now: Timestamp,
) -> Vec<PersistedRecordHandle> {
    let selected: BTreeSet<_> = rules
        .iter()
        .flat_map(|rule| rule.evaluate(handles, now))
        .collect();
    selected.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub users_scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

struct RetentionState {
    root: PathBuf,
    rules: Vec<RetentionRule>,
}

/// Applies retention rules to the storage root.
///
/// Sweeps and rule updates are serialized on one mutex, so a sweep never
/// sees a half-updated rule set.
pub struct RetentionEngine {
    state: Mutex<RetentionState>,
}

impl RetentionEngine {
    pub fn new(root: PathBuf, rules: Vec<RetentionRule>) -> Self {
        Self {
            state: Mutex::new(RetentionState { root, rules }),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(settings.root_dir.clone(), rules_from_settings(settings))
    }

    /// Swap root and rules when they differ from the current ones.
    pub async fn update_configuration(&self, settings: &StorageSettings) {
        let rules = rules_from_settings(settings);
        let mut state = self.state.lock().await;
        if state.root == settings.root_dir && state.rules == rules {
            return;
        }
        state.root = settings.root_dir.clone();
        state.rules = rules;
        tracing::info!(
            root = %state.root.display(),
            rules = ?state.rules.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Retention configuration updated",
        );
    }

    pub async fn rules(&self) -> Vec<RetentionRule> {
        self.state.lock().await.rules.clone()
    }

    pub async fn apply(&self) -> RetentionReport {
        self.apply_at(chrono::Utc::now()).await
    }

    /// Run one sweep evaluating age rules against `now`.
    pub async fn apply_at(&self, now: Timestamp) -> RetentionReport {
        let state = self.state.lock().await;
        let mut report = RetentionReport::default();

        for user_dir in subdirectories(&state.root).await {
            report.users_scanned += 1;

            let mut handles = Vec::new();
            for location in subdirectories(&user_dir).await {
                match last_update(&location).await {
                    Ok(last_update) => handles.push(PersistedRecordHandle { location, last_update }),
                    Err(e) => {
                        tracing::warn!(path = %location.display(), error = %e, "Cannot read execution timestamp");
                    }
                }
            }

            for handle in evaluate_rules(&state.rules, &handles, now) {
                match tokio::fs::remove_dir_all(&handle.location).await {
                    Ok(()) => {
                        report.removed += 1;
                        tracing::debug!(path = %handle.location.display(), "Retention removed execution");
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!(path = %handle.location.display(), error = %e, "Retention failed to remove execution");
                    }
                }
            }
        }

        report
    }
}

/// Child directories of `dir`; a missing or unreadable `dir` has none.
async fn subdirectories(dir: &Path) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::error!(path = %dir.display(), error = %e, "Failed to list directory");
            return Vec::new();
        }
    };

    let mut dirs = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs
}

/// Last update of an execution: the record file's modification time,
/// falling back to the directory's.
async fn last_update(location: &Path) -> std::io::Result<Timestamp> {
    let metadata = match tokio::fs::metadata(location.join(RECORD_FILE)).await {
        Ok(metadata) => metadata,
        Err(_) => tokio::fs::metadata(location).await?,
    };
    Ok(metadata.modified()?.into())
}

/// Run retention every [`RETENTION_INTERVAL`] (first sweep immediately)
/// until `cancel` is triggered.
pub async fn run(engine: Arc<RetentionEngine>, cancel: CancellationToken) {
    run_every(engine, RETENTION_INTERVAL, cancel).await;
}

pub async fn run_every(engine: Arc<RetentionEngine>, period: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = period.as_secs(), "Execution retention job started");

    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Execution retention job stopping");
                break;
            }
            _ = interval.tick() => {
                let report = engine.apply().await;
                if report.removed > 0 || report.failed > 0 {
                    tracing::info!(
                        users = report.users_scanned,
                        removed = report.removed,
                        failed = report.failed,
                        "Execution retention: sweep complete",
                    );
                } else {
                    tracing::debug!(users = report.users_scanned, "Execution retention: nothing to remove");
                }
            }
        }
    }
}
