use std::sync::Arc;

use srs_executions::ExecutionTrackingMediator;
use srs_orchestrator::TenantWorkerOrchestrator;
use srs_sessions::SessionStore;

use crate::config::GatewayConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub sessions: Arc<SessionStore>,
    pub orchestrator: Arc<TenantWorkerOrchestrator>,
    pub mediator: Arc<ExecutionTrackingMediator>,
}
