//! Gateway end-to-end tests
//!
//! The whole platform wired together in one process: gateway in front of a
//! real orchestrator, worker, and model manager, connected over the
//! in-process transport. Requests are driven through the axum router, so
//! auth, rate limiting, and status mapping are exercised exactly as over
//! the network.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use infermesh_core::config::{
    GatewayConfig, ModelManagerConfig, OrchestratorConfig, RateLimitSettings, WorkerConfig,
};
use infermesh_core::protocol::{
    ModelMetadataInput, RegisterRequest, StoreModelRequest, WorkerCapabilities, WorkerCapacity,
};
use infermesh_core::transport::{LocalTransport, LocalTransportFactory};
use infermesh_core::RpcHandler;
use infermesh_gateway::{api, Gateway};
use infermesh_model_manager::ModelManager;
use infermesh_orchestrator::{Orchestrator, StaticDiscovery};
use infermesh_worker::{InferenceWorker, SyntheticPredictorFactory};

const DEMO_KEY: &str = "demo-api-key-123";

struct TestStack {
    router: axum::Router,
    gateway: Arc<Gateway>,
    _storage: TempDir,
}

/// Wire the full platform in-process
///
/// `worker_capacity` bounds the single worker; `predict_latency_ms` slows
/// its synthetic runtime; `rate_limit` overrides the gateway limiter.
async fn stack(
    worker_capacity: u32,
    predict_latency_ms: u64,
    rate_limit: Option<RateLimitSettings>,
) -> TestStack {
    let storage = TempDir::new().unwrap();
    let manager = Arc::new(
        ModelManager::new(
            ModelManagerConfig::default().with_storage_path(storage.path().to_string_lossy()),
        )
        .unwrap(),
    );
    manager
        .store_model(&StoreModelRequest {
            model_id: "m1".to_string(),
            model_data: BASE64.encode(b"weights"),
            metadata: ModelMetadataInput {
                model_type: Some("classifier".to_string()),
                version: Some("1.0".to_string()),
                description: None,
            },
        })
        .await
        .unwrap();

    let manager_transport = Arc::new(LocalTransport::new(
        "local://model-manager",
        Arc::clone(&manager) as Arc<dyn RpcHandler>,
    ));

    let worker = Arc::new(InferenceWorker::new(
        WorkerConfig {
            worker_id: Some("w1".to_string()),
            models: vec!["m1".to_string()],
            ..Default::default()
        }
        .with_max_concurrent(worker_capacity),
        Arc::clone(&manager_transport) as Arc<dyn infermesh_core::RpcTransport>,
        Arc::new(SyntheticPredictorFactory::with_latency(predict_latency_ms)),
    ));
    worker.load_model("m1").await.unwrap();

    let factory = Arc::new(LocalTransportFactory::new());
    factory.register("local://w1", Arc::clone(&worker) as Arc<dyn RpcHandler>);

    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::clone(&factory) as Arc<dyn infermesh_core::TransportFactory>,
        Arc::new(StaticDiscovery::empty()),
    ));
    orchestrator.register_worker(RegisterRequest {
        id: "w1".to_string(),
        address: "local://w1".to_string(),
        capabilities: WorkerCapabilities {
            models: vec!["m1".to_string()],
            tags: vec!["cpu".to_string()],
        },
        capacity: WorkerCapacity {
            max_concurrent: worker_capacity,
        },
    });

    let mut config = GatewayConfig::default();
    if let Some(rate_limit) = rate_limit {
        config.rate_limit = rate_limit;
    }
    let gateway = Arc::new(Gateway::new(
        config,
        Arc::new(LocalTransport::new(
            "local://orchestrator",
            Arc::clone(&orchestrator) as Arc<dyn RpcHandler>,
        )),
        manager_transport,
    ));
    gateway.keys().insert(DEMO_KEY, "demo", &["*"]);

    TestStack {
        router: api::router(Arc::clone(&gateway)),
        gateway,
        _storage: storage,
    }
}

fn inference_request(key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/inference/m1")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_happy_path_inference() {
    let stack = stack(10, 0, None).await;

    let response = stack
        .router
        .oneshot(inference_request(Some(DEMO_KEY), json!({"inputData": {"x": 1}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["modelId"], "m1");
    assert_eq!(body["workerId"], "w1");
    assert_eq!(body["result"]["predictions"].as_array().unwrap().len(), 1000);
    let confidence = body["result"]["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert!(body["result"]["processingTime"].is_number());
}

#[tokio::test]
async fn test_auth_rejections() {
    let stack = stack(10, 0, None).await;

    let response = stack
        .router
        .clone()
        .oneshot(inference_request(None, json!({"inputData": {"x": 1}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = stack
        .router
        .clone()
        .oneshot(inference_request(Some("wrong"), json!({"inputData": {"x": 1}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "unauthenticated");

    let response = stack
        .router
        .oneshot(inference_request(Some(DEMO_KEY), json!({"inputData": {"x": 1}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bearer_token_accepted() {
    let stack = stack(10, 0, None).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/inference/m1")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", DEMO_KEY))
        .body(Body::from(json!({"inputData": {"x": 1}}).to_string()))
        .unwrap();
    let response = stack.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_input_data_is_bad_request() {
    let stack = stack(10, 0, None).await;

    let response = stack
        .router
        .oneshot(inference_request(Some(DEMO_KEY), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "bad_request");
}

#[tokio::test]
async fn test_capacity_exceeded_not_queued() {
    let stack = stack(1, 300, None).await;

    let busy = {
        let router = stack.router.clone();
        tokio::spawn(async move {
            router
                .oneshot(inference_request(Some(DEMO_KEY), json!({"inputData": {"x": 1}})))
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = stack
        .router
        .clone()
        .oneshot(inference_request(Some(DEMO_KEY), json!({"inputData": {"x": 2}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "capacity_exceeded");

    assert_eq!(busy.await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_timeout_maps_to_504() {
    let stack = stack(10, 200, None).await;

    let response = stack
        .router
        .oneshot(inference_request(
            Some(DEMO_KEY),
            json!({"inputData": {"x": 1}, "options": {"timeoutMs": 50}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "inference_timeout");
}

#[tokio::test]
async fn test_unknown_model_is_unavailable() {
    let stack = stack(10, 0, None).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/inference/m404")
        .header("content-type", "application/json")
        .header("x-api-key", DEMO_KEY)
        .body(Body::from(json!({"inputData": {"x": 1}}).to_string()))
        .unwrap();
    let response = stack.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "no_workers_available");
}

#[tokio::test]
async fn test_rate_limit_sequence() {
    let stack = stack(
        10,
        0,
        Some(RateLimitSettings {
            enabled: true,
            window_ms: 1000,
            max_requests: 2,
        }),
    )
    .await;

    let request = |x: u32| {
        Request::builder()
            .method("POST")
            .uri("/api/v1/inference/m1")
            .header("content-type", "application/json")
            .header("x-api-key", DEMO_KEY)
            .header("x-forwarded-for", "10.1.2.3")
            .body(Body::from(json!({"inputData": {"x": x}}).to_string()))
            .unwrap()
    };

    for x in 0..2 {
        let response = stack.router.clone().oneshot(request(x)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = stack.router.clone().oneshot(request(2)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "rate_limited");

    // A different client is unaffected
    let other = Request::builder()
        .method("POST")
        .uri("/api/v1/inference/m1")
        .header("content-type", "application/json")
        .header("x-api-key", DEMO_KEY)
        .header("x-forwarded-for", "10.9.9.9")
        .body(Body::from(json!({"inputData": {"x": 1}}).to_string()))
        .unwrap();
    assert_eq!(
        stack.router.clone().oneshot(other).await.unwrap().status(),
        StatusCode::OK
    );

    // After the window passes the original client is admitted again
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let response = stack.router.oneshot(request(3)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_permission_enforced_per_operation() {
    let stack = stack(10, 0, None).await;
    stack.gateway.keys().insert("reader-key", "reader", &["models:read"]);

    // The read-only key can list models
    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/models")
        .header("x-api-key", "reader-key")
        .body(Body::empty())
        .unwrap();
    let response = stack.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["models"][0]["modelId"], "m1");

    // But not run inference
    let response = stack
        .router
        .clone()
        .oneshot(inference_request(Some("reader-key"), json!({"inputData": {"x": 1}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "forbidden");
}

#[tokio::test]
async fn test_model_upload_and_fetch() {
    let stack = stack(10, 0, None).await;

    let upload = Request::builder()
        .method("POST")
        .uri("/api/v1/models")
        .header("content-type", "application/json")
        .header("x-api-key", DEMO_KEY)
        .body(Body::from(
            json!({
                "modelId": "m2",
                "modelData": BASE64.encode(b"more weights"),
                "metadata": {"type": "regressor", "version": "0.1"},
            })
            .to_string(),
        ))
        .unwrap();
    let response = stack.router.clone().oneshot(upload).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["modelId"], "m2");
    assert_eq!(body["result"]["status"], "stored");

    let fetch = Request::builder()
        .method("GET")
        .uri("/api/v1/models/m2")
        .header("x-api-key", DEMO_KEY)
        .body(Body::empty())
        .unwrap();
    let response = stack.router.clone().oneshot(fetch).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["model"]["type"], "regressor");

    let missing = Request::builder()
        .method("GET")
        .uri("/api/v1/models/m404")
        .header("x-api-key", DEMO_KEY)
        .body(Body::empty())
        .unwrap();
    let response = stack.router.oneshot(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_bypasses_auth() {
    let stack = stack(10, 0, None).await;

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = stack.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "gateway");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_status_aggregates_backends() {
    let stack = stack(10, 0, None).await;

    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/status")
        .header("x-api-key", DEMO_KEY)
        .body(Body::empty())
        .unwrap();
    let response = stack.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["gateway"]["service"], "gateway");
    assert_eq!(body["orchestrator"]["workerCount"], 1);
    assert_eq!(body["modelManager"]["catalog"]["totalModels"], 1);
}
