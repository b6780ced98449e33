use std::net::SocketAddr;

use serde::Serialize;
use srs_core::types::WorkerId;

use crate::error::WorkerPoolError;

/// Progress of an asynchronous worker creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationState {
    Pending,
    Running,
    Error,
}

/// A worker as seen by the pool.
///
/// `endpoint` is only meaningful while `creation_state` is `Running`. A
/// creation that failed before the backend assigned an id carries an
/// empty `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub endpoint: Option<SocketAddr>,
    pub creation_state: CreationState,
    pub creation_error: Option<WorkerPoolError>,
}

impl WorkerInfo {
    pub fn pending(id: impl Into<WorkerId>) -> Self {
        Self {
            id: id.into(),
            endpoint: None,
            creation_state: CreationState::Pending,
            creation_error: None,
        }
    }

    pub fn running(id: impl Into<WorkerId>, endpoint: SocketAddr) -> Self {
        Self {
            id: id.into(),
            endpoint: Some(endpoint),
            creation_state: CreationState::Running,
            creation_error: None,
        }
    }

    pub fn failed(id: impl Into<WorkerId>, error: WorkerPoolError) -> Self {
        Self {
            id: id.into(),
            endpoint: None,
            creation_state: CreationState::Error,
            creation_error: Some(error),
        }
    }

    /// The endpoint of a running worker.
    pub fn ready_endpoint(&self) -> Option<SocketAddr> {
        match self.creation_state {
            CreationState::Running => self.endpoint,
            _ => None,
        }
    }
}

/// A browser-attached console worker pre-connected to a VC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebConsoleInfo {
    pub id: WorkerId,
    pub creation_state: CreationState,
    pub creation_error: Option<WorkerPoolError>,
}
