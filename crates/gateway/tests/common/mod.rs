#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use srs_core::settings::{StorageSettings, WorkerPoolSettings};
use srs_executions::{CompletionPoller, ExecutionTrackingMediator, PollerConfig};
use srs_gateway::config::GatewayConfig;
use srs_gateway::router::build_app_router;
use srs_gateway::state::AppState;
use srs_orchestrator::{StatsTracker, TenantWorkerOrchestrator};
use srs_pool::{ConnectivityPolicy, HttpWorkerConnector, WorkerInfo, WorkerPool, WorkerPoolError};
use srs_sessions::SessionStore;
use tower::ServiceExt;

/// Pool that never has any worker.
pub struct EmptyPool;

#[async_trait]
impl WorkerPool for EmptyPool {
    async fn start_create(&self) -> WorkerInfo {
        WorkerInfo::failed("", WorkerPoolError::Backend("empty pool".into()))
    }

    async fn wait_create_completion(&self, worker: WorkerInfo) -> WorkerInfo {
        worker
    }

    async fn get(&self, _id: &str) -> Result<Option<WorkerInfo>, WorkerPoolError> {
        Ok(None)
    }

    async fn kill(&self, _id: &str) -> Result<(), WorkerPoolError> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkerInfo>, WorkerPoolError> {
        Ok(Vec::new())
    }

    async fn update_configuration(&self, _settings: &WorkerPoolSettings) -> Result<(), WorkerPoolError> {
        Ok(())
    }
}

pub fn test_config(root: &std::path::Path) -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
        session_idle: Duration::from_secs(30 * 60),
        storage: StorageSettings::new(root),
        pool: WorkerPoolSettings {
            max_workers_per_tenant: 3,
            ..WorkerPoolSettings::default()
        },
        connectivity: ConnectivityPolicy::default(),
    }
}

/// Build the application router over an empty pool, as `main.rs` does.
pub fn build_test_app(root: &std::path::Path) -> (Router, AppState) {
    let config = test_config(root);
    let sessions = Arc::new(SessionStore::new(config.session_idle));
    let mediator = ExecutionTrackingMediator::new(
        &config.storage,
        Arc::new(HttpWorkerConnector::default()),
        CompletionPoller::new(PollerConfig::default()),
    );
    let stats = Arc::new(StatsTracker::new(&config.pool, sessions.clone()));
    let orchestrator = TenantWorkerOrchestrator::new(Arc::new(EmptyPool), stats, Arc::clone(&mediator));

    let state = AppState {
        config: Arc::new(config),
        sessions,
        orchestrator,
        mediator,
    };
    (build_app_router(state.clone()), state)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
