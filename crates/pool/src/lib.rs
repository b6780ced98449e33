//! Worker pool: starts, inspects, lists and kills script-execution
//! workers, plus the client used to talk to a running worker.
//!
//! [`WorkerPool`] is the backend-agnostic contract. [`ContainerWorkerPool`]
//! implements it on top of any [`ContainerBackend`] and owns the
//! connectivity-retry-then-compensate creation algorithm. The Docker
//! Engine backend lives in [`docker`].

pub mod backend;
pub mod client;
pub mod connectivity;
pub mod container_pool;
pub mod docker;
pub mod error;
mod http;
pub mod pool;
pub mod worker;

pub use backend::ContainerBackend;
pub use client::{HttpWorkerConnector, WorkerClient, WorkerClientError, WorkerConnector};
pub use connectivity::ConnectivityPolicy;
pub use container_pool::ContainerWorkerPool;
pub use error::WorkerPoolError;
pub use pool::WorkerPool;
pub use worker::{CreationState, WebConsoleInfo, WorkerInfo};
