//! Hot-reloadable settings for the worker pool and execution storage.
//!
//! Normalization is total: any numeric field that is zero or negative
//! silently falls back to its default. Components call
//! [`WorkerPoolSettings::normalized`] / [`StorageSettings::normalized`] on
//! every configuration update, so callers may pass raw values straight
//! from configuration sources.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// Default cap on live workers.
pub const DEFAULT_MAX_WORKERS: i64 = 4;

/// Default idle time before a worker becomes an eviction candidate.
pub const DEFAULT_MAX_IDLE_MINUTES: i64 = 10;

/// Default lifetime before a worker becomes an eviction candidate.
pub const DEFAULT_MAX_ACTIVE_MINUTES: i64 = 60;

/// Default container memory hard limit.
pub const DEFAULT_MEMORY_LIMIT_MB: i64 = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolSettings {
    pub max_workers_per_tenant: i64,
    pub max_idle_minutes: i64,
    pub max_active_minutes: i64,
    pub memory_limit_mb: i64,
    /// Backend-specific configuration, interpreted only by the pool
    /// implementation.
    #[serde(default)]
    pub backend: serde_json::Value,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            max_workers_per_tenant: DEFAULT_MAX_WORKERS,
            max_idle_minutes: DEFAULT_MAX_IDLE_MINUTES,
            max_active_minutes: DEFAULT_MAX_ACTIVE_MINUTES,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            backend: serde_json::Value::Null,
        }
    }
}

impl WorkerPoolSettings {
    /// Replace every non-positive numeric field with its default.
    pub fn normalized(mut self) -> Self {
        self.max_workers_per_tenant = or_default(self.max_workers_per_tenant, DEFAULT_MAX_WORKERS);
        self.max_idle_minutes = or_default(self.max_idle_minutes, DEFAULT_MAX_IDLE_MINUTES);
        self.max_active_minutes = or_default(self.max_active_minutes, DEFAULT_MAX_ACTIVE_MINUTES);
        self.memory_limit_mb = or_default(self.memory_limit_mb, DEFAULT_MEMORY_LIMIT_MB);
        self
    }

    pub fn max_idle(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.max_idle_minutes)
    }

    pub fn max_active(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.max_active_minutes)
    }
}

// ---------------------------------------------------------------------------
// Execution storage / retention
// ---------------------------------------------------------------------------

/// Default number of most-recent records kept per user.
pub const DEFAULT_KEEP_LAST_N: i64 = 30;

/// Default maximum age of a record before it is removed.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root directory; records live under `root_dir/<user>/<script id>/`.
    pub root_dir: PathBuf,
    pub keep_last_n: i64,
    pub max_age_days: i64,
}

impl StorageSettings {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            keep_last_n: DEFAULT_KEEP_LAST_N,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }

    pub fn normalized(mut self) -> Self {
        self.keep_last_n = or_default(self.keep_last_n, DEFAULT_KEEP_LAST_N);
        self.max_age_days = or_default(self.max_age_days, DEFAULT_MAX_AGE_DAYS);
        self
    }

    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_age_days)
    }
}

fn or_default(value: i64, default: i64) -> i64 {
    if value <= 0 {
        default
    } else {
        value
    }
}
