//! Execution tracking: live in-memory state of running scripts, the
//! background poller that follows each one to completion, durable
//! storage of finished executions and their retention.
//!
//! [`ExecutionTrackingMediator`] is the entry point. It pairs one
//! [`ExecutionRecordStore`] with one [`CompletionPoller`] run per script
//! and answers reads uniformly for running and completed executions.

pub mod file_store;
pub mod mediator;
pub mod poller;
pub mod record_store;
pub mod retention;

pub use mediator::{ExecutionEvent, ExecutionTrackingMediator, MediatorError};
pub use poller::{CompletionPoller, PollerConfig};
pub use record_store::ExecutionRecordStore;
pub use retention::{PersistedRecordHandle, RetentionEngine, RetentionRule};
