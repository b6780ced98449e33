//! On-disk layout of persisted executions.
//!
//! ```text
//! <root>/<user id>/<script id>/ScriptExecution.json
//!                             /OutputObjects.json
//!                             /DataStreams.json
//! ```
//!
//! Readers never fail loudly: a missing or unparsable record file means
//! the execution is absent, missing output or streams read as empty.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use srs_core::execution::{DataStreams, ExecutionOutput, ExecutionRecord};

pub const RECORD_FILE: &str = "ScriptExecution.json";
pub const OUTPUT_FILE: &str = "OutputObjects.json";
pub const STREAMS_FILE: &str = "DataStreams.json";

/// Whether `component` can be used as a single path segment.
fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains(['/', '\\'])
}

/// Directory for one user's executions, or `None` for an unusable id.
pub fn user_dir(root: &Path, user_id: &str) -> Option<PathBuf> {
    is_safe_component(user_id).then(|| root.join(user_id))
}

/// Directory holding one execution's files.
pub fn script_dir(root: &Path, user_id: &str, script_id: &str) -> Option<PathBuf> {
    if !is_safe_component(script_id) {
        return None;
    }
    user_dir(root, user_id).map(|dir| dir.join(script_id))
}

/// Script ids persisted for `user_id`. I/O errors are logged and yield an
/// empty list.
pub async fn list_script_ids(root: &Path, user_id: &str) -> Vec<String> {
    let Some(dir) = user_dir(root, user_id) else {
        return Vec::new();
    };

    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::error!(path = %dir.display(), error = %e, "Failed to list user executions");
            return Vec::new();
        }
    };

    let mut ids = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    if let Some(name) = entry.file_name().to_str() {
                        ids.push(name.to_string());
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!(path = %dir.display(), error = %e, "Failed to read user executions");
                break;
            }
        }
    }
    ids
}

/// Reads a persisted execution from its directory.
#[derive(Debug, Clone)]
pub struct FileRecordReader {
    dir: PathBuf,
}

impl FileRecordReader {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn read_record(&self) -> Option<ExecutionRecord> {
        read_json(&self.dir.join(RECORD_FILE)).await
    }

    pub async fn read_output(&self) -> ExecutionOutput {
        read_json(&self.dir.join(OUTPUT_FILE)).await.unwrap_or_default()
    }

    pub async fn read_streams(&self) -> DataStreams {
        read_json(&self.dir.join(STREAMS_FILE)).await.unwrap_or_default()
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read execution file");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to parse execution file");
            None
        }
    }
}
