//! Docker backend against an in-process fake of the Engine API.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use srs_core::settings::WorkerPoolSettings;
use srs_pool::docker::DockerBackend;
use srs_pool::{ContainerBackend, WorkerPoolError};

const CREATED_ID: &str = "c1";

#[derive(Clone, Default)]
struct FakeEngine {
    calls: Arc<Mutex<Vec<String>>>,
    running: Arc<Mutex<HashSet<String>>>,
    fail_start: bool,
}

impl FakeEngine {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

async fn create(State(engine): State<FakeEngine>) -> impl IntoResponse {
    engine.record("create".into());
    (StatusCode::CREATED, Json(serde_json::json!({ "Id": CREATED_ID })))
}

async fn start(State(engine): State<FakeEngine>, Path(id): Path<String>) -> StatusCode {
    engine.record(format!("start {id}"));
    if engine.fail_start {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn inspect(State(engine): State<FakeEngine>, Path(id): Path<String>) -> axum::response::Response {
    engine.record(format!("inspect {id}"));
    if !engine.running.lock().unwrap().contains(&id) {
        let body = Json(serde_json::json!({ "message": format!("No such container: {id}") }));
        return (StatusCode::NOT_FOUND, body).into_response();
    }
    Json(serde_json::json!({
        "Id": id,
        "State": {"Status": "running"},
        "NetworkSettings": {
            "Networks": {"srs-net": {"IPAddress": "172.18.0.5"}},
            "Ports": {"8086/tcp": null}
        }
    }))
    .into_response()
}

async fn remove(
    State(engine): State<FakeEngine>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    let force = query.get("force").map(String::as_str).unwrap_or("false");
    engine.record(format!("delete {id} force={force}"));
    if engine.running.lock().unwrap().remove(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn list(State(engine): State<FakeEngine>) -> Json<serde_json::Value> {
    engine.record("list".into());
    let containers: Vec<_> = engine
        .running
        .lock()
        .unwrap()
        .iter()
        .map(|id| serde_json::json!({ "Id": id, "Image": "srs/worker:latest", "State": "running" }))
        .collect();
    Json(serde_json::Value::Array(containers))
}

/// Serve `engine` on an ephemeral port and return a backend pointed at it.
async fn backend_for(engine: FakeEngine) -> DockerBackend {
    let app = Router::new()
        .route("/containers/create", post(create))
        .route("/containers/json", get(list))
        .route("/containers/{id}/start", post(start))
        .route("/containers/{id}/json", get(inspect))
        .route("/containers/{id}", delete(remove))
        .with_state(engine);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let settings = WorkerPoolSettings {
        backend: serde_json::json!({
            "api_endpoint": format!("http://{addr}"),
            "image": "srs/worker:latest",
            "network": "srs-net",
        }),
        ..Default::default()
    };
    DockerBackend::from_settings(&settings).unwrap()
}

// ---------------------------------------------------------------------------
// Test: Inspecting a container the engine does not know yields None
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inspect_of_missing_container_is_none() {
    let engine = FakeEngine::default();
    let backend = backend_for(engine.clone()).await;

    assert_eq!(backend.inspect("gone").await.unwrap(), None);
    assert_eq!(engine.calls(), vec!["inspect gone"]);
}

// ---------------------------------------------------------------------------
// Test: Inspecting a running container resolves its endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inspect_of_running_container_resolves_endpoint() {
    let engine = FakeEngine::default();
    engine.running.lock().unwrap().insert("w1".into());
    let backend = backend_for(engine).await;

    let worker = backend.inspect("w1").await.unwrap().unwrap();
    assert_eq!(worker.id, "w1");
    assert_eq!(worker.endpoint, Some("172.18.0.5:8086".parse().unwrap()));
}

// ---------------------------------------------------------------------------
// Test: A container whose start fails is deleted again
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_start_deletes_the_created_container() {
    let engine = FakeEngine {
        fail_start: true,
        ..Default::default()
    };
    let backend = backend_for(engine.clone()).await;

    assert_matches!(backend.create_and_start().await, Err(WorkerPoolError::Backend(_)));
    assert_eq!(
        engine.calls(),
        vec!["create", "start c1", "delete c1 force=true"]
    );
}

// ---------------------------------------------------------------------------
// Test: A container that is gone right after start is deleted again
// ---------------------------------------------------------------------------

#[tokio::test]
async fn container_missing_after_start_is_deleted() {
    let engine = FakeEngine::default();
    let backend = backend_for(engine.clone()).await;

    assert_matches!(backend.create_and_start().await, Err(WorkerPoolError::Backend(_)));
    assert_eq!(
        engine.calls(),
        vec!["create", "start c1", "inspect c1", "delete c1 force=true"]
    );
}

// ---------------------------------------------------------------------------
// Test: Remove is a single forced delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_force_deletes_in_one_call() {
    let engine = FakeEngine::default();
    engine.running.lock().unwrap().insert("w1".into());
    let backend = backend_for(engine.clone()).await;

    backend.remove("w1").await.unwrap();
    assert_eq!(engine.calls(), vec!["delete w1 force=true"]);

    // Already gone.
    backend.remove("w1").await.unwrap();
    assert_eq!(engine.calls().len(), 2);
}

// ---------------------------------------------------------------------------
// Test: Listing inspects each running worker container
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_running_returns_inspected_workers() {
    let engine = FakeEngine::default();
    engine.running.lock().unwrap().insert("w1".into());
    let backend = backend_for(engine).await;

    let workers = backend.list_running().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].id, "w1");
}
