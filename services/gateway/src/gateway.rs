//! Gateway core: forwards authenticated traffic to the control plane
//!
//! Inference goes to the orchestrator, model operations to the model
//! manager. Status aggregation degrades gracefully: an unreachable backend
//! is reported as such rather than failing the whole endpoint.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use infermesh_core::config::GatewayConfig;
use infermesh_core::protocol::{
    HealthReport, InferenceOptions, RouteResponse, StoreModelRequest,
};
use infermesh_core::{Error, Result, RpcTransport};

use crate::keystore::ApiKeyStore;
use crate::ratelimit::RateLimiter;

/// Deadline for control-plane calls other than inference
const PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra margin over the orchestrator's own request deadline, so the
/// structured timeout error wins over a transport cutoff
const INFERENCE_MARGIN: Duration = Duration::from_secs(5);

/// The gateway service
pub struct Gateway {
    config: GatewayConfig,
    keys: ApiKeyStore,
    limiter: Arc<RateLimiter>,
    orchestrator: Arc<dyn RpcTransport>,
    model_manager: Arc<dyn RpcTransport>,
    started_at: Instant,
    gc_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        orchestrator: Arc<dyn RpcTransport>,
        model_manager: Arc<dyn RpcTransport>,
    ) -> Self {
        let keys = ApiKeyStore::new(config.authentication.enabled);
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Self {
            config,
            keys,
            limiter,
            orchestrator,
            model_manager,
            started_at: Instant::now(),
            gc_loop: Mutex::new(None),
        }
    }

    /// Start the rate limiter GC loop; idempotent
    pub fn start(&self) {
        let mut gc_loop = self.gc_loop.lock().expect("gc handle poisoned");
        if gc_loop.is_none() {
            *gc_loop = Some(self.limiter.spawn_gc_loop());
        }
    }

    /// Stop background work
    pub fn stop(&self) {
        if let Some(handle) = self.gc_loop.lock().expect("gc handle poisoned").take() {
            handle.abort();
        }
    }

    pub fn keys(&self) -> &ApiKeyStore {
        &self.keys
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Forward an inference request to the orchestrator
    pub async fn infer(
        &self,
        model_id: &str,
        input_data: &Value,
        options: &InferenceOptions,
    ) -> Result<Value> {
        if input_data.is_null() {
            return Err(Error::BadRequest("inputData is required".to_string()));
        }

        let value = self
            .orchestrator
            .call(
                "routeInference",
                json!({
                    "modelId": model_id,
                    "inputData": input_data,
                    "options": options,
                }),
                Duration::from_millis(
                    options.timeout_ms.unwrap_or(60_000),
                ) + INFERENCE_MARGIN,
            )
            .await?;

        let routed: RouteResponse = serde_json::from_value(value)
            .map_err(|e| Error::TransportError(format!("malformed route response: {}", e)))?;

        Ok(json!({
            "success": true,
            "modelId": model_id,
            "result": {
                "predictions": routed.result.result.predictions,
                "confidence": routed.result.result.confidence,
                "processingTime": routed.result.processing_ms,
            },
            "workerId": routed.worker_id,
            "timestamp": Utc::now(),
        }))
    }

    /// List models via the model manager
    pub async fn list_models(&self, model_type: Option<&str>, limit: Option<u64>) -> Result<Value> {
        let mut params = json!({});
        if let Some(model_type) = model_type {
            params["type"] = json!(model_type);
        }
        if let Some(limit) = limit {
            params["limit"] = json!(limit);
        }
        self.model_manager
            .call("listModels", params, PROXY_TIMEOUT)
            .await
    }

    /// Fetch one model's metadata
    pub async fn get_model(&self, model_id: &str) -> Result<Value> {
        let download = self
            .model_manager
            .call("getModel", json!({"modelId": model_id}), PROXY_TIMEOUT)
            .await?;
        Ok(json!({
            "success": true,
            "model": download.get("metadata").cloned().unwrap_or(Value::Null),
            "timestamp": Utc::now(),
        }))
    }

    /// Upload a model through to the model manager
    pub async fn upload_model(&self, request: &StoreModelRequest) -> Result<Value> {
        self.model_manager
            .call("storeModel", serde_json::to_value(request)?, PROXY_TIMEOUT)
            .await
    }

    /// Aggregate health across the platform
    pub async fn status(&self) -> Value {
        let orchestrator = match self
            .orchestrator
            .call("status", json!({}), PROXY_TIMEOUT)
            .await
        {
            Ok(status) => status,
            Err(e) => json!({"status": "unreachable", "error": e.to_string()}),
        };
        let model_manager = match self
            .model_manager
            .call("status", json!({}), PROXY_TIMEOUT)
            .await
        {
            Ok(status) => status,
            Err(e) => json!({"status": "unreachable", "error": e.to_string()}),
        };

        json!({
            "success": true,
            "gateway": self.health(),
            "orchestrator": orchestrator,
            "modelManager": model_manager,
            "timestamp": Utc::now(),
        })
    }

    /// Edge health payload
    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy".to_string(),
            service: "gateway".to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.stop();
    }
}
