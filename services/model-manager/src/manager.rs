//! Model manager: store + catalog behind one interface
//!
//! Uploads decode base64 payloads, enforce the size cap and duplicate
//! protection, and record catalog metadata. Downloads re-verify blob
//! integrity when checksum validation is enabled.

use std::time::Instant;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use infermesh_core::config::ModelManagerConfig;
use infermesh_core::protocol::{
    HealthReport, ModelDownload, ModelMetadata, ModelMetadataInput, StoreModelRequest,
};
use infermesh_core::{Error, Result, RpcHandler};

use crate::catalog::{CatalogStats, ModelCatalog, SearchCriteria};
use crate::store::{parse_size, ModelStore, StoreStats};

/// Result of a successful upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredModelReport {
    pub status: String,
    pub size: u64,
    pub checksum: String,
    pub created_at: chrono::DateTime<Utc>,
}

/// Aggregated service status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub status: String,
    pub storage: StoreStats,
    pub catalog: CatalogStats,
    pub uptime_secs: u64,
}

/// The model manager service
pub struct ModelManager {
    config: ModelManagerConfig,
    store: ModelStore,
    catalog: ModelCatalog,
    started_at: Instant,
}

impl ModelManager {
    /// Create a manager rooted at the configured storage path
    ///
    /// The catalog starts empty even when blobs already exist on disk;
    /// rebuilding it from the blob directory is a deliberate extension
    /// point, not current behavior.
    pub fn new(config: ModelManagerConfig) -> Result<Self> {
        let max_size = parse_size(&config.max_model_size);
        let store = ModelStore::open(&config.storage_path, max_size)?;
        tracing::info!(
            storage_path = %config.storage_path,
            max_model_size = max_size,
            "model store opened"
        );
        Ok(Self {
            config,
            store,
            catalog: ModelCatalog::new(),
            started_at: Instant::now(),
        })
    }

    /// Store an uploaded model and record its metadata
    pub async fn store_model(&self, request: &StoreModelRequest) -> Result<StoredModelReport> {
        if request.model_id.trim().is_empty() {
            return Err(Error::InvalidMetadata("modelId must not be empty".into()));
        }

        let model_type = request
            .metadata
            .model_type
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        if !self.config.supported_formats.is_empty()
            && !self.config.supported_formats.contains(&model_type)
        {
            return Err(Error::InvalidMetadata(format!(
                "unsupported model type: {}",
                model_type
            )));
        }

        let version = request
            .metadata
            .version
            .clone()
            .unwrap_or_else(|| "1.0.0".to_string());
        if let Some(existing) = self.catalog.get(&request.model_id, None) {
            if existing.version == version {
                return Err(Error::ModelAlreadyExists(format!(
                    "{} version {} is already stored",
                    request.model_id, version
                )));
            }
        }

        let bytes = BASE64.decode(&request.model_data).map_err(|e| {
            Error::InvalidModelData(format!("modelData is not valid base64: {}", e))
        })?;

        let receipt = self.store.store(&request.model_id, &bytes).await?;
        let now = Utc::now();
        let metadata = ModelMetadata {
            model_id: request.model_id.clone(),
            model_type,
            version,
            description: request.metadata.description.clone().unwrap_or_default(),
            storage_key: receipt.storage_key,
            checksum: receipt.checksum.clone(),
            size: receipt.size,
            created_at: now,
            updated_at: now,
        };
        self.catalog.put(metadata);

        tracing::info!(model_id = %request.model_id, size = receipt.size, "model stored");
        Ok(StoredModelReport {
            status: "stored".to_string(),
            size: receipt.size,
            checksum: receipt.checksum,
            created_at: now,
        })
    }

    /// Fetch a model's metadata and payload for a worker preload
    pub async fn get_model(&self, model_id: &str) -> Result<ModelDownload> {
        let metadata = self
            .catalog
            .get(model_id, None)
            .ok_or_else(|| Error::ModelNotFound(format!("model {} is not cataloged", model_id)))?;

        let bytes = self.store.fetch(&metadata.storage_key).await?;
        if self.config.checksum_validation {
            let actual = crate::store::sha256_hex(&bytes);
            if actual != metadata.checksum {
                return Err(Error::IntegrityMismatch(format!(
                    "blob for {} hashes to {} but catalog records {}",
                    model_id, actual, metadata.checksum
                )));
            }
        }

        Ok(ModelDownload {
            model_id: model_id.to_string(),
            model_data: BASE64.encode(&bytes),
            metadata,
        })
    }

    /// Metadata only, without touching the blob
    pub fn get_metadata(&self, model_id: &str) -> Result<ModelMetadata> {
        self.catalog
            .get(model_id, None)
            .ok_or_else(|| Error::ModelNotFound(format!("model {} is not cataloged", model_id)))
    }

    /// Update catalog fields for a model
    pub fn update_metadata(
        &self,
        model_id: &str,
        patch: &ModelMetadataInput,
    ) -> Result<ModelMetadata> {
        self.catalog.update(model_id, patch)
    }

    /// Delete a model's blob and catalog entry
    pub async fn delete_model(&self, model_id: &str) -> Result<bool> {
        let Some(metadata) = self.catalog.get(model_id, None) else {
            return Ok(false);
        };
        self.store.delete(&metadata.storage_key).await?;
        self.catalog.delete(model_id, None);
        tracing::info!(model_id, "model deleted");
        Ok(true)
    }

    /// List cataloged models
    pub fn list_models(&self, model_type: Option<&str>, limit: Option<usize>) -> Vec<ModelMetadata> {
        self.catalog.list(model_type, limit)
    }

    /// Search the catalog
    pub fn search(&self, criteria: &SearchCriteria) -> Vec<ModelMetadata> {
        self.catalog.search(criteria)
    }

    /// Aggregated storage and catalog status
    pub async fn status(&self) -> Result<ManagerStatus> {
        Ok(ManagerStatus {
            status: "healthy".to_string(),
            storage: self.store.stats().await?,
            catalog: self.catalog.stats(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        })
    }

    /// Edge health payload
    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy".to_string(),
            service: "model-manager".to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[async_trait]
impl RpcHandler for ModelManager {
    async fn handle(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "healthCheck" => Ok(serde_json::to_value(self.health())?),
            "status" => Ok(serde_json::to_value(self.status().await?)?),
            "getModel" => {
                let model_id = params
                    .get("modelId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::BadRequest("missing modelId".into()))?;
                Ok(serde_json::to_value(self.get_model(model_id).await?)?)
            }
            "storeModel" => {
                let request: StoreModelRequest = serde_json::from_value(params)
                    .map_err(|e| Error::BadRequest(format!("malformed upload: {}", e)))?;
                let report = self.store_model(&request).await?;
                Ok(json!({
                    "success": true,
                    "modelId": request.model_id,
                    "result": report,
                    "timestamp": Utc::now(),
                }))
            }
            "updateModel" => {
                let model_id = params
                    .get("modelId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::BadRequest("missing modelId".into()))?;
                let patch: ModelMetadataInput = params
                    .get("metadata")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| Error::BadRequest(format!("malformed patch: {}", e)))?
                    .unwrap_or_default();
                let model = self.update_metadata(model_id, &patch)?;
                Ok(json!({
                    "success": true,
                    "model": model,
                    "timestamp": Utc::now(),
                }))
            }
            "searchModels" => {
                let criteria: SearchCriteria = serde_json::from_value(params)
                    .map_err(|e| Error::BadRequest(format!("malformed criteria: {}", e)))?;
                let models = self.search(&criteria);
                let count = models.len();
                Ok(json!({
                    "success": true,
                    "models": models,
                    "count": count,
                    "timestamp": Utc::now(),
                }))
            }
            "deleteModel" => {
                let model_id = params
                    .get("modelId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::BadRequest("missing modelId".into()))?;
                let deleted = self.delete_model(model_id).await?;
                Ok(json!({"success": true, "deleted": deleted}))
            }
            "listModels" => {
                let model_type = params.get("type").and_then(Value::as_str);
                let limit = params
                    .get("limit")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize);
                let models = self.list_models(model_type, limit);
                let count = models.len();
                Ok(json!({
                    "success": true,
                    "models": models,
                    "count": count,
                    "timestamp": Utc::now(),
                }))
            }
            other => Err(Error::TransportError(format!(
                "model manager does not handle {}",
                other
            ))),
        }
    }
}
