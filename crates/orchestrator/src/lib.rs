//! Per-tenant worker orchestration.
//!
//! [`TenantWorkerOrchestrator`] sits between callers and the
//! [`WorkerPool`](srs_pool::WorkerPool): it keeps the user → worker
//! directory, enforces the worker cap through [`StatsTracker`] and evicts
//! workers on a timer (see [`orchestrator::run`]).

pub mod directory;
pub mod orchestrator;
pub mod stats;
pub mod sts;
pub mod system_scripts;

pub use directory::UserDirectory;
pub use orchestrator::{
    CleanupReport, OrchestratorError, TenantWorkerOrchestrator, TenantWorkerRecord, VcConnection,
    WebConsoleRecord, WebConsoleState, WorkerState,
};
pub use stats::{EvictionPolicy, SessionOracle, StatsTracker, WorkerKind};
pub use sts::{StsClient, StsError};
