//! HTTP surface tests for the model manager

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use infermesh_core::config::ModelManagerConfig;
use infermesh_model_manager::{api, ModelManager};

fn router(dir: &TempDir) -> axum::Router {
    let manager = Arc::new(
        ModelManager::new(
            ModelManagerConfig::default().with_storage_path(dir.path().to_string_lossy()),
        )
        .unwrap(),
    );
    api::router(manager)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn upload_request(model_id: &str, payload: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/models")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "modelId": model_id,
                "modelData": BASE64.encode(payload),
                "metadata": {"type": "classifier", "version": "1.0"},
            })
            .to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn test_upload_then_download() {
    let dir = TempDir::new().unwrap();
    let router = router(&dir);

    let response = router
        .clone()
        .oneshot(upload_request("m1", b"weights"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["status"], "stored");

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/models/m1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["modelId"], "m1");
    assert_eq!(
        BASE64.decode(body["modelData"].as_str().unwrap()).unwrap(),
        b"weights"
    );
}

#[tokio::test]
async fn test_duplicate_upload_conflicts() {
    let dir = TempDir::new().unwrap();
    let router = router(&dir);

    router
        .clone()
        .oneshot(upload_request("m1", b"weights"))
        .await
        .unwrap();
    let response = router
        .oneshot(upload_request("m1", b"weights"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "model_already_exists");
}

#[tokio::test]
async fn test_unknown_model_is_404() {
    let dir = TempDir::new().unwrap();
    let response = router(&dir)
        .oneshot(
            Request::builder()
                .uri("/api/models/ghost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_with_type_filter() {
    let dir = TempDir::new().unwrap();
    let router = router(&dir);

    router
        .clone()
        .oneshot(upload_request("m1", b"a"))
        .await
        .unwrap();
    router
        .clone()
        .oneshot(upload_request("m2", b"b"))
        .await
        .unwrap();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/models?type=classifier&limit=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["models"][0]["modelId"], "m1");
}

#[tokio::test]
async fn test_delete_then_404() {
    let dir = TempDir::new().unwrap();
    let router = router(&dir);

    router
        .clone()
        .oneshot(upload_request("m1", b"weights"))
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/models/m1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/models/m1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_model_metadata() {
    let dir = TempDir::new().unwrap();
    let router = router(&dir);

    router
        .clone()
        .oneshot(upload_request("m1", b"weights"))
        .await
        .unwrap();

    let update = Request::builder()
        .method("PUT")
        .uri("/api/models/m1")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"type": "regressor", "description": "tuned"}).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(update).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["model"]["type"], "regressor");

    // The list surface reflects the migrated type
    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/models?type=regressor")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_search_models() {
    let dir = TempDir::new().unwrap();
    let router = router(&dir);

    for id in ["sentiment-en", "sentiment-de", "detector"] {
        router
            .clone()
            .oneshot(upload_request(id, b"w"))
            .await
            .unwrap();
    }

    let search = Request::builder()
        .method("POST")
        .uri("/api/models/search")
        .header("content-type", "application/json")
        .body(Body::from(json!({"nameContains": "sentiment"}).to_string()))
        .unwrap();
    let response = router.oneshot(search).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["models"][0]["modelId"], "sentiment-en");
}

#[tokio::test]
async fn test_status_reports_storage() {
    let dir = TempDir::new().unwrap();
    let router = router(&dir);

    router
        .clone()
        .oneshot(upload_request("m1", b"weights"))
        .await
        .unwrap();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["storage"]["fileCount"], 1);
    assert_eq!(body["catalog"]["totalModels"], 1);
}
