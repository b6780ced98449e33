//! Authenticated-session store with sliding expiration.
//!
//! The store is constructed explicitly and injected wherever sessions are
//! checked. Expired sessions are removed by a background sweep started
//! with [`store::run`] and stopped through its cancellation token.

pub mod store;

pub use store::{SessionError, SessionStore, DEFAULT_IDLE_WINDOW, SWEEP_INTERVAL};
