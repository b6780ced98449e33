//! Script runtime gateway.
//!
//! Wires the worker pool, session store, execution tracking and tenant
//! orchestrator together and serves a small operational HTTP surface.
//! The library half exists so integration tests and the binary share the
//! same router.

pub mod config;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;
