//! Client for the execution API every running worker serves.
//!
//! Routes: `POST api/script`, `GET api/script` (last script),
//! `GET api/script/{id}`, `DELETE api/script/{id}`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use srs_core::execution::{ScriptRequest, ScriptSnapshot};

use crate::http::{ensure_success, parse_response, HttpApiError};

/// Errors talking to a worker. Any of these counts as a strike against
/// the worker when polling for script completion.
#[derive(Debug, thiserror::Error)]
pub enum WorkerClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Worker API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl HttpApiError for WorkerClientError {
    fn from_status(status: u16, body: String) -> Self {
        Self::ApiError { status, body }
    }
}

/// Script execution API of one worker.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn start_script(&self, request: &ScriptRequest) -> Result<ScriptSnapshot, WorkerClientError>;

    async fn get_script(&self, id: &str) -> Result<ScriptSnapshot, WorkerClientError>;

    /// The most recently started script, if the worker ran any.
    async fn get_last_script(&self) -> Result<Option<ScriptSnapshot>, WorkerClientError>;

    async fn cancel_script(&self, id: &str) -> Result<(), WorkerClientError>;
}

/// Builds a [`WorkerClient`] for a worker endpoint.
pub trait WorkerConnector: Send + Sync {
    fn connect(&self, endpoint: SocketAddr) -> Arc<dyn WorkerClient>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`WorkerClient`] over HTTP using [`reqwest`].
pub struct HttpWorkerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkerClient {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Reuse an existing [`reqwest::Client`] (shares its connection pool).
    pub fn with_client(client: reqwest::Client, endpoint: SocketAddr) -> Self {
        Self {
            client,
            base_url: format!("http://{endpoint}"),
        }
    }

    fn script_url(&self) -> String {
        format!("{}/api/script", self.base_url)
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn start_script(&self, request: &ScriptRequest) -> Result<ScriptSnapshot, WorkerClientError> {
        let response = self.client.post(self.script_url()).json(request).send().await?;
        parse_response(response).await
    }

    async fn get_script(&self, id: &str) -> Result<ScriptSnapshot, WorkerClientError> {
        let response = self
            .client
            .get(format!("{}/{}", self.script_url(), id))
            .send()
            .await?;
        parse_response(response).await
    }

    async fn get_last_script(&self) -> Result<Option<ScriptSnapshot>, WorkerClientError> {
        let response = self.client.get(self.script_url()).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse_response(response).await.map(Some)
    }

    async fn cancel_script(&self, id: &str) -> Result<(), WorkerClientError> {
        let response = self
            .client
            .delete(format!("{}/{}", self.script_url(), id))
            .send()
            .await?;
        ensure_success::<WorkerClientError>(response).await?;
        Ok(())
    }
}

/// Hands out [`HttpWorkerClient`]s sharing one connection pool.
#[derive(Clone, Default)]
pub struct HttpWorkerConnector {
    client: reqwest::Client,
}

impl HttpWorkerConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl WorkerConnector for HttpWorkerConnector {
    fn connect(&self, endpoint: SocketAddr) -> Arc<dyn WorkerClient> {
        Arc::new(HttpWorkerClient::with_client(self.client.clone(), endpoint))
    }
}
