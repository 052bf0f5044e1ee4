//! HTTP surface for the model manager

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use infermesh_core::http::{ApiError, ApiResult};
use infermesh_core::protocol::{ModelMetadataInput, StoreModelRequest};
use infermesh_core::Error;

use crate::catalog::SearchCriteria;
use crate::manager::ModelManager;

/// Build the model manager router
pub fn router(manager: Arc<ModelManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/models", get(list_models).post(store_model))
        .route("/api/models/search", post(search_models))
        .route(
            "/api/models/:model_id",
            get(get_model).put(update_model).delete(delete_model),
        )
        .route("/api/models/:model_id/metadata", get(get_metadata))
        .route("/api/status", get(status))
        .with_state(manager)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health(State(manager): State<Arc<ModelManager>>) -> Json<Value> {
    Json(serde_json::to_value(manager.health()).unwrap_or_default())
}

async fn status(State(manager): State<Arc<ModelManager>>) -> ApiResult<Json<Value>> {
    let status = manager.status().await.map_err(ApiError)?;
    Ok(Json(serde_json::to_value(status).map_err(Error::from)?))
}

async fn list_models(
    State(manager): State<Arc<ModelManager>>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let model_type = query.get("type").map(String::as_str);
    let limit = query.get("limit").and_then(|l| l.parse::<usize>().ok());
    let models = manager.list_models(model_type, limit);
    Ok(Json(json!({
        "success": true,
        "models": models,
        "count": models.len(),
        "timestamp": Utc::now(),
    })))
}

async fn get_model(
    State(manager): State<Arc<ModelManager>>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let download = manager.get_model(&model_id).await.map_err(ApiError)?;
    Ok(Json(serde_json::to_value(download).map_err(Error::from)?))
}

async fn get_metadata(
    State(manager): State<Arc<ModelManager>>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let metadata = manager.get_metadata(&model_id).map_err(ApiError)?;
    Ok(Json(json!({
        "success": true,
        "model": metadata,
        "timestamp": Utc::now(),
    })))
}

async fn update_model(
    State(manager): State<Arc<ModelManager>>,
    Path(model_id): Path<String>,
    Json(patch): Json<ModelMetadataInput>,
) -> ApiResult<Json<Value>> {
    let model = manager.update_metadata(&model_id, &patch).map_err(ApiError)?;
    Ok(Json(json!({
        "success": true,
        "model": model,
        "timestamp": Utc::now(),
    })))
}

async fn search_models(
    State(manager): State<Arc<ModelManager>>,
    Json(criteria): Json<SearchCriteria>,
) -> ApiResult<Json<Value>> {
    let models = manager.search(&criteria);
    let count = models.len();
    Ok(Json(json!({
        "success": true,
        "models": models,
        "count": count,
        "timestamp": Utc::now(),
    })))
}

async fn store_model(
    State(manager): State<Arc<ModelManager>>,
    Json(request): Json<StoreModelRequest>,
) -> ApiResult<Json<Value>> {
    let report = manager.store_model(&request).await.map_err(ApiError)?;
    Ok(Json(json!({
        "success": true,
        "modelId": request.model_id,
        "result": report,
        "timestamp": Utc::now(),
    })))
}

async fn delete_model(
    State(manager): State<Arc<ModelManager>>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let deleted = manager.delete_model(&model_id).await.map_err(ApiError)?;
    if !deleted {
        return Err(ApiError(Error::ModelNotFound(format!(
            "model {} is not cataloged",
            model_id
        ))));
    }
    Ok(Json(json!({
        "success": true,
        "modelId": model_id,
        "timestamp": Utc::now(),
    })))
}
