use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use srs_executions::{CompletionPoller, ExecutionTrackingMediator, PollerConfig};
use srs_gateway::config::GatewayConfig;
use srs_gateway::router::build_app_router;
use srs_gateway::state::AppState;
use srs_orchestrator::{StatsTracker, TenantWorkerOrchestrator};
use srs_pool::docker::DockerBackend;
use srs_pool::{ContainerWorkerPool, HttpWorkerConnector};
use srs_sessions::SessionStore;

/// How long each background task gets to stop after cancellation.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "srs_gateway=debug,srs_orchestrator=debug,srs_executions=debug,tower_http=debug".into()
    });
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = GatewayConfig::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        storage_root = %config.storage.root_dir.display(),
        max_workers = config.pool.max_workers_per_tenant,
        "Loaded gateway configuration",
    );

    // --- Worker pool ---
    let backend = DockerBackend::from_settings(&config.pool).context("Invalid Docker backend configuration")?;
    let pool = Arc::new(ContainerWorkerPool::new(backend, config.connectivity.clone()));
    tracing::info!("Docker worker pool created");

    // --- Sessions ---
    let sessions = Arc::new(SessionStore::new(config.session_idle));

    // --- Execution tracking ---
    let mediator = ExecutionTrackingMediator::new(
        &config.storage,
        Arc::new(HttpWorkerConnector::new(reqwest::Client::new())),
        CompletionPoller::new(PollerConfig::default()),
    );

    // --- Orchestrator ---
    let stats = Arc::new(StatsTracker::new(&config.pool, sessions.clone()));
    let orchestrator = TenantWorkerOrchestrator::new(pool, stats, Arc::clone(&mediator));

    // --- Background tasks ---
    let cancel = CancellationToken::new();
    let session_sweep = tokio::spawn(srs_sessions::store::run(Arc::clone(&sessions), cancel.clone()));
    let retention = tokio::spawn(srs_executions::retention::run(mediator.retention(), cancel.clone()));
    let cleanup = tokio::spawn(srs_orchestrator::orchestrator::run(
        Arc::clone(&orchestrator),
        cancel.clone(),
    ));
    tracing::info!("Background tasks started (session sweep, retention, worker cleanup)");

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        sessions,
        orchestrator,
        mediator: Arc::clone(&mediator),
    };
    let app = build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().with_context(|| format!("Invalid HOST address '{}'", config.host))?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    for (name, handle) in [
        ("session sweep", session_sweep),
        ("retention", retention),
        ("worker cleanup", cleanup),
    ] {
        if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await.is_err() {
            tracing::warn!(task = name, "Background task did not stop in time");
        }
    }

    // Running executions keep their last polled state.
    mediator.shutdown().await;
    tracing::info!(live = mediator.live_count().await, "Execution stores flushed");

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
