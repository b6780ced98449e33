//! Minimal Docker Engine HTTP API client.
//!
//! Covers just the container endpoints the worker pool needs: create,
//! start, inspect, list and force-delete.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::http::{ensure_success, parse_response, HttpApiError};

/// HTTP client for one Docker Engine endpoint.
pub struct DockerApi {
    client: reqwest::Client,
    base_url: String,
}

/// Errors from the Docker Engine API layer.
#[derive(Debug, thiserror::Error)]
pub enum DockerApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Docker returned a non-2xx status code.
    #[error("Docker API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl DockerApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }
}

impl HttpApiError for DockerApiError {
    fn from_status(status: u16, body: String) -> Self {
        Self::ApiError { status, body }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub image: String,
    pub host_config: HostConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    pub network_mode: String,
    pub cpu_count: i64,
    /// Memory hard limit in bytes.
    pub memory: i64,
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerCreateResponse {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    pub id: String,
    pub state: ContainerInspectState,
    #[serde(default)]
    pub network_settings: Option<NetworkSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspectState {
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    #[serde(default)]
    pub networks: HashMap<String, EndpointSettings>,
    /// Keys look like `"8086/tcp"`; values are host bindings (unused).
    #[serde(default)]
    pub ports: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    pub state: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl DockerApi {
    /// * `base_url` - Engine endpoint, e.g. `http://localhost:2375`.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /containers/create`
    pub async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerCreateResponse, DockerApiError> {
        let response = self
            .client
            .post(format!("{}/containers/create", self.base_url))
            .json(config)
            .send()
            .await?;

        parse_response(response).await
    }

    /// `POST /containers/{id}/start`
    pub async fn start_container(&self, id: &str) -> Result<(), DockerApiError> {
        let response = self
            .client
            .post(format!("{}/containers/{}/start", self.base_url, id))
            .send()
            .await?;

        ensure_success::<DockerApiError>(response).await?;
        Ok(())
    }

    /// `GET /containers/{id}/json`
    pub async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, DockerApiError> {
        let response = self
            .client
            .get(format!("{}/containers/{}/json", self.base_url, id))
            .send()
            .await?;

        parse_response(response).await
    }

    /// `GET /containers/json` (running containers only).
    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DockerApiError> {
        let response = self
            .client
            .get(format!("{}/containers/json", self.base_url))
            .send()
            .await?;

        parse_response(response).await
    }

    /// `DELETE /containers/{id}?force=true`
    pub async fn delete_container(&self, id: &str) -> Result<(), DockerApiError> {
        let response = self
            .client
            .delete(format!("{}/containers/{}", self.base_url, id))
            .query(&[("force", "true")])
            .send()
            .await?;

        ensure_success::<DockerApiError>(response).await?;
        Ok(())
    }
}
