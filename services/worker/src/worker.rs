//! The inference worker service
//!
//! Ties the capacity gate, model cache, pipeline, and history together.
//! Failures never recover here: the capacity slot is released (permit drop)
//! and the error propagates to the caller untouched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use infermesh_core::config::WorkerConfig;
use infermesh_core::protocol::{
    CapacityReport, InferenceEnvelope, InferenceOptions, ModelDownload, RegisterRequest,
    WorkerCapabilities, WorkerCapacity, WorkerHealth,
};
use infermesh_core::{Error, Result, RpcHandler, RpcTransport};

use crate::cache::{LoadedModel, ModelCache};
use crate::capacity::CapacityGate;
use crate::history::{InferenceHistory, InferenceRecord};
use crate::pipeline::InferencePipeline;
use crate::predictor::PredictorFactory;

/// Deadline for fetching a model blob from the manager
const MODEL_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of a load request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub model_id: String,
    pub loaded: bool,
    /// True when the model was already resident
    pub already_loaded: bool,
}

/// A single inference worker process
pub struct InferenceWorker {
    id: String,
    config: WorkerConfig,
    gate: Arc<CapacityGate>,
    cache: ModelCache,
    pipeline: InferencePipeline,
    history: InferenceHistory,
    model_manager: Arc<dyn RpcTransport>,
    predictors: Arc<dyn PredictorFactory>,
    started_at: Instant,
}

impl InferenceWorker {
    pub fn new(
        config: WorkerConfig,
        model_manager: Arc<dyn RpcTransport>,
        predictors: Arc<dyn PredictorFactory>,
    ) -> Self {
        let id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4().simple()));
        tracing::info!(
            worker_id = %id,
            max_concurrent = config.max_concurrent_inferences,
            "inference worker created"
        );
        Self {
            id,
            gate: CapacityGate::new(config.max_concurrent_inferences),
            cache: ModelCache::new(config.model_cache_size),
            pipeline: InferencePipeline::new(Duration::from_millis(config.inference_timeout_ms)),
            history: InferenceHistory::default(),
            model_manager,
            predictors,
            started_at: Instant::now(),
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registration payload this worker advertises to an orchestrator
    pub fn registration(&self, address: impl Into<String>) -> RegisterRequest {
        RegisterRequest {
            id: self.id.clone(),
            address: address.into(),
            capabilities: WorkerCapabilities {
                models: self.config.models.clone(),
                tags: self.config.capability_tags.clone(),
            },
            capacity: WorkerCapacity {
                max_concurrent: self.config.max_concurrent_inferences,
            },
        }
    }

    /// Preload a model, fetching it from the model manager on first call
    ///
    /// Idempotent: a model already resident reports `already_loaded` without
    /// another fetch, and concurrent callers share one in-flight fetch.
    pub async fn load_model(&self, model_id: &str) -> Result<LoadReport> {
        let (_, already_loaded) = self
            .cache
            .get_or_load(model_id, || self.fetch_model(model_id))
            .await?;
        if !already_loaded {
            tracing::info!(worker_id = %self.id, model_id, "model preloaded");
        }
        Ok(LoadReport {
            model_id: model_id.to_string(),
            loaded: true,
            already_loaded,
        })
    }

    async fn fetch_model(&self, model_id: &str) -> Result<LoadedModel> {
        let value = self
            .model_manager
            .call(
                "getModel",
                json!({ "modelId": model_id }),
                MODEL_FETCH_TIMEOUT,
            )
            .await?;
        let download: ModelDownload = serde_json::from_value(value)
            .map_err(|e| Error::TransportError(format!("malformed model download: {}", e)))?;

        let bytes = BASE64.decode(&download.model_data).map_err(|e| {
            Error::InvalidModelData(format!("model {} payload is not base64: {}", model_id, e))
        })?;

        if self.config.checksum_validation {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let actual = hex::encode(hasher.finalize());
            if actual != download.metadata.checksum {
                return Err(Error::IntegrityMismatch(format!(
                    "model {} hashes to {} but manager records {}",
                    model_id, actual, download.metadata.checksum
                )));
            }
        }

        let predictor = self.predictors.build(&download.metadata, &bytes)?;
        Ok(LoadedModel {
            id: model_id.to_string(),
            model_type: download.metadata.model_type.clone(),
            version: download.metadata.version.clone(),
            input_shape: None,
            metadata: download.metadata,
            predictor,
        })
    }

    /// Drop a model from the preloaded set
    pub fn unload_model(&self, model_id: &str) -> bool {
        let unloaded = self.cache.unload(model_id);
        if unloaded {
            tracing::info!(worker_id = %self.id, model_id, "model unloaded");
        }
        unloaded
    }

    /// Run one inference under the capacity gate
    ///
    /// Capacity is checked before anything else; the permit is released on
    /// every exit path, including validation failures and timeouts.
    pub async fn run_inference(
        &self,
        model_id: &str,
        input: &Value,
        options: &InferenceOptions,
    ) -> Result<InferenceEnvelope> {
        let _permit = self.gate.try_acquire()?;

        let model = self.cache.get(model_id).ok_or_else(|| {
            Error::ModelNotAvailable(format!(
                "model {} is not preloaded on worker {}",
                model_id, self.id
            ))
        })?;

        let inference_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();
        let outcome = self.pipeline.run(&model, input, options).await;
        let processing_ms = start.elapsed().as_millis() as u64;

        self.history.push(InferenceRecord {
            inference_id: inference_id.clone(),
            model_id: model_id.to_string(),
            processing_ms,
            timestamp: Utc::now(),
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
        });

        let result = outcome?;
        Ok(InferenceEnvelope {
            success: true,
            inference_id,
            model_id: model_id.to_string(),
            result,
            processing_ms,
            timestamp: Utc::now(),
        })
    }

    /// Capacity snapshot, optionally answering for one model
    pub fn check_capacity(&self, model_id: Option<&str>) -> CapacityReport {
        CapacityReport {
            max_concurrent: self.gate.max_concurrent(),
            current_load: self.gate.current_load(),
            available: self.gate.available(),
            available_models: self.cache.preloaded_models(),
            model_loaded: model_id.map(|id| self.cache.contains(id)),
        }
    }

    /// Health payload for probes
    pub fn health(&self) -> WorkerHealth {
        WorkerHealth {
            status: "healthy".to_string(),
            capacity: self.check_capacity(None),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Aggregates over the rolling history
    pub fn history_stats(&self) -> crate::history::HistoryStats {
        self.history.stats()
    }

    /// Most recent inference records, newest last
    pub fn recent_records(&self, n: usize) -> Vec<InferenceRecord> {
        self.history.recent(n)
    }
}

#[async_trait]
impl RpcHandler for InferenceWorker {
    async fn handle(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "healthCheck" => Ok(serde_json::to_value(self.health())?),
            "runInference" => {
                let model_id = params
                    .get("modelId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::BadRequest("missing modelId".into()))?;
                let input = params.get("inputData").cloned().unwrap_or(Value::Null);
                let options: InferenceOptions = params
                    .get("options")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| Error::BadRequest(format!("malformed options: {}", e)))?
                    .unwrap_or_default();
                let envelope = self.run_inference(model_id, &input, &options).await?;
                Ok(serde_json::to_value(envelope)?)
            }
            "loadModel" => {
                let model_id = params
                    .get("modelId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::BadRequest("missing modelId".into()))?;
                Ok(serde_json::to_value(self.load_model(model_id).await?)?)
            }
            "unloadModel" => {
                let model_id = params
                    .get("modelId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::BadRequest("missing modelId".into()))?;
                Ok(json!({ "modelId": model_id, "unloaded": self.unload_model(model_id) }))
            }
            "checkCapacity" => {
                let model_id = params.get("modelId").and_then(Value::as_str);
                Ok(serde_json::to_value(self.check_capacity(model_id))?)
            }
            other => Err(Error::TransportError(format!(
                "worker does not handle {}",
                other
            ))),
        }
    }
}
