//! HTTP surface for the inference worker

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use infermesh_core::http::{ApiError, ApiResult};
use infermesh_core::protocol::InferenceOptions;
use infermesh_core::Error;

use crate::worker::InferenceWorker;

/// Build the worker router
pub fn router(worker: Arc<InferenceWorker>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/inference/:model_id", post(run_inference))
        .route("/api/capacity", get(check_capacity))
        .route("/api/models/:model_id/load", post(load_model))
        .route("/api/models/:model_id/unload", post(unload_model))
        .route("/api/history", get(history))
        .with_state(worker)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health(State(worker): State<Arc<InferenceWorker>>) -> Json<Value> {
    Json(serde_json::to_value(worker.health()).unwrap_or_default())
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct InferenceBody {
    #[serde(default)]
    input_data: Value,
    #[serde(default)]
    options: InferenceOptions,
}

async fn run_inference(
    State(worker): State<Arc<InferenceWorker>>,
    Path(model_id): Path<String>,
    Json(body): Json<InferenceBody>,
) -> ApiResult<Json<Value>> {
    let envelope = worker
        .run_inference(&model_id, &body.input_data, &body.options)
        .await
        .map_err(ApiError)?;
    Ok(Json(serde_json::to_value(envelope).map_err(Error::from)?))
}

async fn check_capacity(
    State(worker): State<Arc<InferenceWorker>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let model_id = query.get("modelId").map(String::as_str);
    Json(serde_json::to_value(worker.check_capacity(model_id)).unwrap_or_default())
}

async fn load_model(
    State(worker): State<Arc<InferenceWorker>>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let report = worker.load_model(&model_id).await.map_err(ApiError)?;
    Ok(Json(serde_json::to_value(report).map_err(Error::from)?))
}

async fn unload_model(
    State(worker): State<Arc<InferenceWorker>>,
    Path(model_id): Path<String>,
) -> Json<Value> {
    Json(json!({
        "modelId": model_id,
        "unloaded": worker.unload_model(&model_id),
    }))
}

async fn history(State(worker): State<Arc<InferenceWorker>>) -> Json<Value> {
    Json(json!({
        "stats": worker.history_stats(),
        "recent": worker.recent_records(100),
    }))
}
