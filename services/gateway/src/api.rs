//! HTTP surface for the gateway
//!
//! Middleware order matters: the rate limiter runs before authentication,
//! so an abusive client cannot burn key lookups. Handlers check a named
//! permission each; `/health` bypasses both layers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use infermesh_core::http::{ApiError, ApiResult};
use infermesh_core::protocol::{InferenceOptions, StoreModelRequest};

use crate::gateway::Gateway;
use crate::keystore::AuthContext;

/// Build the gateway router
pub fn router(gateway: Arc<Gateway>) -> Router {
    let protected = Router::new()
        .route("/api/v1/inference/:model_id", post(run_inference))
        .route("/api/v1/models", get(list_models).post(upload_model))
        .route("/api/v1/models/:model_id", get(get_model))
        .route("/api/v1/status", get(status))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&gateway),
            authenticate,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&gateway),
            rate_limit,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(gateway)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}

/// Client key for rate limiting: proxy header first, then socket address
fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn rate_limit(
    State(gateway): State<Arc<Gateway>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client = client_key(&request);
    gateway.limiter().check(&client).map_err(ApiError)?;
    Ok(next.run(request).await)
}

async fn authenticate(
    State(gateway): State<Arc<Gateway>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    let authorization = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    let context = gateway
        .keys()
        .authenticate(api_key, authorization)
        .map_err(ApiError)?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    Json(serde_json::to_value(gateway.health()).unwrap_or_default())
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
    State(gateway): State<Arc<Gateway>>,
    Path(model_id): Path<String>,
    axum::Extension(context): axum::Extension<AuthContext>,
    Json(body): Json<InferenceBody>,
) -> ApiResult<Json<Value>> {
    gateway
        .keys()
        .authorize(&context, "inference")
        .map_err(ApiError)?;
    let response = gateway
        .infer(&model_id, &body.input_data, &body.options)
        .await
        .map_err(ApiError)?;
    Ok(Json(response))
}

async fn list_models(
    State(gateway): State<Arc<Gateway>>,
    axum::Extension(context): axum::Extension<AuthContext>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    gateway
        .keys()
        .authorize(&context, "models:read")
        .map_err(ApiError)?;
    let model_type = query.get("type").map(String::as_str);
    let limit = query.get("limit").and_then(|l| l.parse::<u64>().ok());
    let models = gateway
        .list_models(model_type, limit)
        .await
        .map_err(ApiError)?;
    Ok(Json(models))
}

async fn get_model(
    State(gateway): State<Arc<Gateway>>,
    axum::Extension(context): axum::Extension<AuthContext>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    gateway
        .keys()
        .authorize(&context, "models:read")
        .map_err(ApiError)?;
    Ok(Json(gateway.get_model(&model_id).await.map_err(ApiError)?))
}

async fn upload_model(
    State(gateway): State<Arc<Gateway>>,
    axum::Extension(context): axum::Extension<AuthContext>,
    Json(request): Json<StoreModelRequest>,
) -> ApiResult<Json<Value>> {
    gateway
        .keys()
        .authorize(&context, "models:write")
        .map_err(ApiError)?;
    Ok(Json(gateway.upload_model(&request).await.map_err(ApiError)?))
}

async fn status(
    State(gateway): State<Arc<Gateway>>,
    axum::Extension(context): axum::Extension<AuthContext>,
) -> ApiResult<Json<Value>> {
    gateway
        .keys()
        .authorize(&context, "status")
        .map_err(ApiError)?;
    Ok(Json(gateway.status().await))
}
