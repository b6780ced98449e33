//! Execution records, outputs and data streams.
//!
//! These are the three blobs the execution tracking layer keeps in memory
//! per script and flushes to durable storage once the script is done.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{ScriptId, Timestamp};

/// Maximum number of messages retained per data stream.
pub const MAX_STREAM_MESSAGES: usize = 50;

/// Reason recorded when a worker stops answering status polls.
pub const WORKER_UNREACHABLE_REASON: &str = "worker unreachable";

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

/// Lifecycle state of a script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Success,
    Error,
    Canceled,
}

impl ExecutionState {
    /// Whether no further transitions are expected from this state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionState::Running)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Running => "running",
            ExecutionState::Success => "success",
            ExecutionState::Error => "error",
            ExecutionState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// How a worker renders the objects a script emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Each emitted object serialized to JSON.
    Json,
    /// One formatted text blob.
    #[default]
    Text,
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Tracked state of one script run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ScriptId,
    pub name: String,
    pub state: ExecutionState,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub output_format: OutputFormat,
    pub start_time: Timestamp,
    #[serde(default)]
    pub end_time: Option<Timestamp>,
    #[serde(default)]
    pub is_system: bool,
}

impl ExecutionRecord {
    /// A freshly started execution.
    pub fn running(id: impl Into<ScriptId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: ExecutionState::Running,
            reason: None,
            output_format: OutputFormat::default(),
            start_time: chrono::Utc::now(),
            end_time: None,
            is_system: false,
        }
    }

    /// Terminal `Error` record derived from the last known record of a
    /// script whose worker could no longer be reached.
    ///
    /// Identity, name, start time, format and the system flag are carried
    /// over; everything else is replaced.
    pub fn worker_lost(last_known: &ExecutionRecord, now: Timestamp) -> Self {
        Self {
            id: last_known.id.clone(),
            name: last_known.name.clone(),
            state: ExecutionState::Error,
            reason: Some(WORKER_UNREACHABLE_REASON.to_string()),
            output_format: last_known.output_format,
            start_time: last_known.start_time,
            end_time: Some(now),
            is_system: last_known.is_system,
        }
    }
}

/// Objects a script emitted. JSON mode holds one entry per object, text
/// mode holds a single formatted blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub output_objects: Vec<String>,
}

// ---------------------------------------------------------------------------
// Data streams
// ---------------------------------------------------------------------------

/// One message written to a data stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub time: Timestamp,
    pub message: String,
}

/// FIFO message buffer capped at [`MAX_STREAM_MESSAGES`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<StreamRecord>", into = "Vec<StreamRecord>")]
pub struct DataStream {
    records: VecDeque<StreamRecord>,
}

impl DataStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message stamped with the current time. Empty messages are
    /// ignored.
    pub fn append(&mut self, message: impl Into<String>) {
        let message = message.into();
        if message.is_empty() {
            return;
        }
        self.push(StreamRecord {
            time: chrono::Utc::now(),
            message,
        });
    }

    /// Append a record, evicting the oldest one when the cap is exceeded.
    pub fn push(&mut self, record: StreamRecord) {
        self.records.push_back(record);
        while self.records.len() > MAX_STREAM_MESSAGES {
            self.records.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamRecord> {
        self.records.iter()
    }
}

impl From<Vec<StreamRecord>> for DataStream {
    fn from(records: Vec<StreamRecord>) -> Self {
        let mut stream = DataStream::new();
        for record in records {
            stream.push(record);
        }
        stream
    }
}

impl From<DataStream> for Vec<StreamRecord> {
    fn from(stream: DataStream) -> Self {
        stream.records.into()
    }
}

/// The five named streams a script can write to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataStreams {
    #[serde(default)]
    pub information: DataStream,
    #[serde(default)]
    pub error: DataStream,
    #[serde(default)]
    pub warning: DataStream,
    #[serde(default)]
    pub debug: DataStream,
    #[serde(default)]
    pub verbose: DataStream,
}

// ---------------------------------------------------------------------------
// Worker execution API payloads
// ---------------------------------------------------------------------------

/// Named argument passed to a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptParameter {
    pub name: String,
    pub value: serde_json::Value,
}

impl ScriptParameter {
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Request to start a script on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub content: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub parameters: Vec<ScriptParameter>,
    #[serde(default)]
    pub name: Option<String>,
    /// System scripts are started by the gateway itself (e.g. VC login) and
    /// can be hidden from user listings.
    #[serde(default)]
    pub is_system: bool,
}

impl ScriptRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            output_format: OutputFormat::default(),
            parameters: Vec::new(),
            name: None,
            is_system: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_parameter(mut self, parameter: ScriptParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

/// Everything a worker reports about one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSnapshot {
    pub record: ExecutionRecord,
    #[serde(default)]
    pub output: ExecutionOutput,
    #[serde(default)]
    pub streams: DataStreams,
}

impl ScriptSnapshot {
    pub fn new(record: ExecutionRecord) -> Self {
        Self {
            record,
            output: ExecutionOutput::default(),
            streams: DataStreams::default(),
        }
    }
}
