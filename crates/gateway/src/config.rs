use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use srs_core::settings::{StorageSettings, WorkerPoolSettings};
use srs_pool::ConnectivityPolicy;

/// Gateway configuration loaded from environment variables.
///
/// Numeric pool and storage settings that are zero or negative fall back
/// to their defaults once normalized by the component that consumes them.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Sliding idle window of a session.
    pub session_idle: Duration,
    pub storage: StorageSettings,
    pub pool: WorkerPoolSettings,
    pub connectivity: ConnectivityPolicy,
}

impl GatewayConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                       |
    /// |--------------------------|-------------------------------|
    /// | `HOST`                   | `0.0.0.0`                     |
    /// | `PORT`                   | `8080`                        |
    /// | `REQUEST_TIMEOUT_SECS`   | `30`                          |
    /// | `SESSION_IDLE_MINUTES`   | `30`                          |
    /// | `STORAGE_ROOT`           | `./data/executions`           |
    /// | `RETENTION_KEEP_LAST`    | `30`                          |
    /// | `RETENTION_MAX_AGE_DAYS` | `5`                           |
    /// | `MAX_WORKERS`            | `4`                           |
    /// | `MAX_IDLE_MINUTES`       | `10`                          |
    /// | `MAX_ACTIVE_MINUTES`     | `60`                          |
    /// | `WORKER_MEMORY_LIMIT_MB` | `512`                         |
    /// | `DOCKER_API_ENDPOINT`    | `http://localhost:2375`       |
    /// | `WORKER_IMAGE`           | `script-runtime-worker:latest`|
    /// | `WORKER_NETWORK`         | `bridge`                      |
    /// | `CONNECT_ATTEMPTS`       | `20`                          |
    /// | `CONNECT_DELAY_MS`       | `500`                         |
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = env_or("PORT", 8080u16)?;
        let request_timeout_secs = env_or("REQUEST_TIMEOUT_SECS", 30u64)?;
        let session_idle = Duration::from_secs(env_or("SESSION_IDLE_MINUTES", 30u64)? * 60);

        let storage = StorageSettings {
            root_dir: PathBuf::from(std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "./data/executions".into())),
            keep_last_n: env_or("RETENTION_KEEP_LAST", 30i64)?,
            max_age_days: env_or("RETENTION_MAX_AGE_DAYS", 5i64)?,
        };

        let backend = serde_json::json!({
            "api_endpoint": std::env::var("DOCKER_API_ENDPOINT").unwrap_or_else(|_| "http://localhost:2375".into()),
            "image": std::env::var("WORKER_IMAGE").unwrap_or_else(|_| "script-runtime-worker:latest".into()),
            "network": std::env::var("WORKER_NETWORK").unwrap_or_else(|_| "bridge".into()),
        });
        let pool = WorkerPoolSettings {
            max_workers_per_tenant: env_or("MAX_WORKERS", 4i64)?,
            max_idle_minutes: env_or("MAX_IDLE_MINUTES", 10i64)?,
            max_active_minutes: env_or("MAX_ACTIVE_MINUTES", 60i64)?,
            memory_limit_mb: env_or("WORKER_MEMORY_LIMIT_MB", 512i64)?,
            backend,
        };

        let connectivity = ConnectivityPolicy {
            attempts: env_or("CONNECT_ATTEMPTS", 20u32)?,
            delay: Duration::from_millis(env_or("CONNECT_DELAY_MS", 500u64)?),
            ..ConnectivityPolicy::default()
        }
        .normalized();

        Ok(Self {
            host,
            port,
            request_timeout_secs,
            session_idle,
            storage: storage.normalized(),
            pool: pool.normalized(),
            connectivity,
        })
    }
}

/// Parse env var `name`, or return `default` when it is unset.
fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}
