//! HTTP surface for the orchestrator

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use infermesh_core::http::{ApiError, ApiResult};
use infermesh_core::protocol::{InferenceRequest, RegisterRequest, Requirements};
use infermesh_core::Error;

use crate::orchestrator::Orchestrator;

/// Build the orchestrator router
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/workers/register", post(register_worker))
        .route("/api/workers/:worker_id/unregister", post(unregister_worker))
        .route("/api/workers/find", post(find_workers))
        .route("/api/inference/route", post(route_inference))
        .route("/api/status", get(status))
        .with_state(orchestrator)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Value> {
    Json(serde_json::to_value(orchestrator.health_report()).unwrap_or_default())
}

async fn status(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Value> {
    Json(orchestrator.status())
}

async fn register_worker(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<Value>> {
    let worker = orchestrator.register_worker(request);
    Ok(Json(serde_json::to_value(worker).map_err(Error::from)?))
}

async fn unregister_worker(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(worker_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let worker = orchestrator.unregister_worker(&worker_id).map_err(ApiError)?;
    Ok(Json(json!({"success": true, "workerId": worker.id})))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindBody {
    model_id: String,
    #[serde(default)]
    requirements: Option<Requirements>,
}

async fn find_workers(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(body): Json<FindBody>,
) -> Json<Value> {
    let workers = orchestrator.find_workers(&body.model_id, body.requirements.as_ref());
    let count = workers.len();
    Json(json!({"workers": workers, "count": count}))
}

async fn route_inference(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<InferenceRequest>,
) -> ApiResult<Json<Value>> {
    let response = orchestrator
        .route_inference(&request)
        .await
        .map_err(ApiError)?;
    Ok(Json(serde_json::to_value(response).map_err(Error::from)?))
}
