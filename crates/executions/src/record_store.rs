//! In-memory holder of one execution with explicit flush to disk.

use std::path::{Path, PathBuf};

use serde::Serialize;
use srs_core::execution::{DataStreams, ExecutionOutput, ExecutionRecord};
use tokio::sync::RwLock;

use crate::file_store::{OUTPUT_FILE, RECORD_FILE, STREAMS_FILE};

/// Live state of one execution.
///
/// Record, output and streams sit behind independent locks: a reader of
/// one field never waits on a writer of another, readers of the same
/// field share the lock, writers are exclusive per field. No lock is held
/// across I/O.
pub struct ExecutionRecordStore {
    dir: PathBuf,
    record: RwLock<Option<ExecutionRecord>>,
    output: RwLock<ExecutionOutput>,
    streams: RwLock<DataStreams>,
}

impl ExecutionRecordStore {
    /// Store persisting to `dir`. Nothing is written until [`flush`](Self::flush).
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            record: RwLock::new(None),
            output: RwLock::new(ExecutionOutput::default()),
            streams: RwLock::new(DataStreams::default()),
        }
    }

    /// Like [`new`](Self::new) but creates the directory right away so the
    /// execution shows up in directory listings while it runs.
    pub async fn create(dir: PathBuf) -> Self {
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::error!(path = %dir.display(), error = %e, "Failed to create execution directory");
        }
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // -- reads --

    pub async fn read_record(&self) -> Option<ExecutionRecord> {
        self.record.read().await.clone()
    }

    pub async fn read_output(&self) -> ExecutionOutput {
        self.output.read().await.clone()
    }

    pub async fn read_streams(&self) -> DataStreams {
        self.streams.read().await.clone()
    }

    // -- writes --

    /// Replace the record. A terminal record is never replaced by a
    /// `Running` one.
    pub async fn write_record(&self, record: ExecutionRecord) {
        let mut current = self.record.write().await;
        if let Some(existing) = current.as_ref() {
            if existing.state.is_terminal() && !record.state.is_terminal() {
                tracing::debug!(
                    script_id = %existing.id,
                    state = %existing.state,
                    "Ignoring non-terminal update of a finished execution",
                );
                return;
            }
        }
        *current = Some(record);
    }

    pub async fn write_output(&self, output: ExecutionOutput) {
        *self.output.write().await = output;
    }

    pub async fn write_streams(&self, streams: DataStreams) {
        *self.streams.write().await = streams;
    }

    /// Write a snapshot of all three fields to disk.
    ///
    /// Each field is copied under its own lock and serialized after the
    /// lock is released. Failures are logged, never returned.
    pub async fn flush(&self) {
        let record = self.read_record().await;
        let output = self.read_output().await;
        let streams = self.read_streams().await;

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::error!(path = %self.dir.display(), error = %e, "Failed to create execution directory");
            return;
        }

        if let Some(record) = record.as_ref() {
            write_json(&self.dir.join(RECORD_FILE), record).await;
        }
        write_json(&self.dir.join(OUTPUT_FILE), &output).await;
        write_json(&self.dir.join(STREAMS_FILE), &streams).await;

        tracing::debug!(path = %self.dir.display(), "Execution flushed");
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) {
    let bytes = match serde_json::to_vec_pretty(value) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to serialize execution file");
            return;
        }
    };

    if let Err(e) = tokio::fs::write(path, bytes).await {
        tracing::error!(path = %path.display(), error = %e, "Failed to write execution file");
    }
}
