//! Docker Engine container backend.
//!
//! Each worker is one container started from the configured image on the
//! configured network. The worker endpoint is the container's address on
//! that network plus the first TCP port the image exposes.

pub mod api;

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use serde::Deserialize;
use srs_core::settings::{WorkerPoolSettings, DEFAULT_MEMORY_LIMIT_MB};
use tokio::sync::RwLock;

use crate::backend::ContainerBackend;
use crate::error::WorkerPoolError;
use crate::worker::WorkerInfo;

use api::{ContainerConfig, ContainerInspect, DockerApi, DockerApiError, HostConfig, RestartPolicy};

const BYTES_PER_MEGABYTE: i64 = 1_048_576;
const WORKER_CPU_COUNT: i64 = 1;
const RUNNING: &str = "running";

/// Backend section of [`WorkerPoolSettings`] understood by Docker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DockerPoolConfig {
    /// Engine endpoint, e.g. `http://localhost:2375`.
    pub api_endpoint: String,
    /// Worker image name.
    pub image: String,
    /// Docker network the workers join.
    pub network: String,
}

impl DockerPoolConfig {
    /// Parse and validate the opaque backend configuration.
    pub fn from_settings(settings: &WorkerPoolSettings) -> Result<Self, WorkerPoolError> {
        let config: Self = serde_json::from_value(settings.backend.clone())
            .map_err(|e| WorkerPoolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), WorkerPoolError> {
        let is_url = self.api_endpoint.starts_with("http://") || self.api_endpoint.starts_with("https://");
        if !is_url {
            return Err(WorkerPoolError::InvalidConfig(format!(
                "Docker API endpoint '{}' is not an absolute http(s) URL",
                self.api_endpoint
            )));
        }
        if self.image.is_empty() {
            return Err(WorkerPoolError::InvalidConfig("worker image is empty".into()));
        }
        if self.network.is_empty() {
            return Err(WorkerPoolError::InvalidConfig("worker network is empty".into()));
        }
        Ok(())
    }
}

/// [`ContainerBackend`] speaking the Docker Engine API.
pub struct DockerBackend {
    api: DockerApi,
    config: DockerPoolConfig,
    memory_limit_mb: RwLock<i64>,
}

impl DockerBackend {
    pub fn new(config: DockerPoolConfig, memory_limit_mb: i64) -> Result<Self, WorkerPoolError> {
        config.validate()?;
        Ok(Self {
            api: DockerApi::new(config.api_endpoint.clone()),
            config,
            memory_limit_mb: RwLock::new(if memory_limit_mb <= 0 {
                DEFAULT_MEMORY_LIMIT_MB
            } else {
                memory_limit_mb
            }),
        })
    }

    pub fn from_settings(settings: &WorkerPoolSettings) -> Result<Self, WorkerPoolError> {
        let settings = settings.clone().normalized();
        Self::new(DockerPoolConfig::from_settings(&settings)?, settings.memory_limit_mb)
    }

    async fn container_config(&self) -> ContainerConfig {
        let memory_limit_mb = *self.memory_limit_mb.read().await;
        ContainerConfig {
            image: self.config.image.clone(),
            host_config: HostConfig {
                network_mode: self.config.network.clone(),
                cpu_count: WORKER_CPU_COUNT,
                memory: memory_limit_mb * BYTES_PER_MEGABYTE,
                restart_policy: RestartPolicy { name: String::new() },
            },
        }
    }
}

impl DockerBackend {
    /// Start a freshly created container and resolve its endpoint.
    async fn start_created(&self, id: &str) -> Result<WorkerInfo, WorkerPoolError> {
        self.api
            .start_container(id)
            .await
            .map_err(|e| backend_error("start container", e))?;

        tracing::debug!(worker_id = %id, image = %self.config.image, "Worker container started");

        self.inspect(id)
            .await?
            .ok_or_else(|| WorkerPoolError::Backend(format!("container {id} stopped right after start")))
    }

    /// Best-effort removal of a container that never became a usable worker.
    async fn discard(&self, id: &str) {
        if let Err(e) = self.api.delete_container(id).await {
            tracing::warn!(worker_id = %id, error = %e, "Failed to remove unusable worker container");
        }
    }
}

fn backend_error(context: &str, e: DockerApiError) -> WorkerPoolError {
    WorkerPoolError::Backend(format!("{context}: {e}"))
}

/// Resolve the worker endpoint from an inspect response.
pub fn endpoint_from_inspect(inspect: &ContainerInspect, network: &str) -> Result<SocketAddr, WorkerPoolError> {
    let settings = inspect
        .network_settings
        .as_ref()
        .ok_or_else(|| WorkerPoolError::InvalidWorker(format!("container {} has no network settings", inspect.id)))?;

    let ip: IpAddr = settings
        .networks
        .get(network)
        .and_then(|n| n.ip_address.parse().ok())
        .ok_or_else(|| {
            WorkerPoolError::InvalidWorker(format!(
                "container {} has no valid address on network '{network}'",
                inspect.id
            ))
        })?;

    let port = settings
        .ports
        .keys()
        .filter_map(|key| key.strip_suffix("/tcp"))
        .filter_map(|port| port.parse::<u16>().ok())
        .min()
        .ok_or_else(|| WorkerPoolError::InvalidWorker(format!("container {} exposes no TCP port", inspect.id)))?;

    Ok(SocketAddr::new(ip, port))
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn create_and_start(&self) -> Result<WorkerInfo, WorkerPoolError> {
        let config = self.container_config().await;
        let created = self
            .api
            .create_container(&config)
            .await
            .map_err(|e| backend_error("create container", e))?;

        match self.start_created(&created.id).await {
            Ok(worker) => Ok(worker),
            Err(e) => {
                self.discard(&created.id).await;
                Err(e)
            }
        }
    }

    async fn inspect(&self, id: &str) -> Result<Option<WorkerInfo>, WorkerPoolError> {
        let inspect = match self.api.inspect_container(id).await {
            Ok(inspect) => inspect,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(backend_error("inspect container", e)),
        };

        if inspect.state.status != RUNNING {
            return Ok(None);
        }

        let endpoint = endpoint_from_inspect(&inspect, &self.config.network)?;
        Ok(Some(WorkerInfo::running(inspect.id, endpoint)))
    }

    /// Force-delete stops a running container and removes it in one call;
    /// a container that is already gone counts as removed.
    async fn remove(&self, id: &str) -> Result<(), WorkerPoolError> {
        match self.api.delete_container(id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(backend_error("delete container", e)),
        }
    }

    async fn list_running(&self) -> Result<Vec<WorkerInfo>, WorkerPoolError> {
        let containers = self
            .api
            .list_containers()
            .await
            .map_err(|e| backend_error("list containers", e))?;

        let mut workers = Vec::new();
        for container in containers
            .iter()
            .filter(|c| c.image == self.config.image && c.state.eq_ignore_ascii_case(RUNNING))
        {
            if let Some(worker) = self.inspect(&container.id).await? {
                workers.push(worker);
            }
        }
        Ok(workers)
    }

    async fn apply_settings(&self, settings: &WorkerPoolSettings) -> Result<(), WorkerPoolError> {
        *self.memory_limit_mb.write().await = settings.memory_limit_mb;
        tracing::info!(memory_limit_mb = settings.memory_limit_mb, "Docker worker settings updated");
        Ok(())
    }
}
