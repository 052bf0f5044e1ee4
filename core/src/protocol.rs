//! Wire types shared across service boundaries
//!
//! All request and response bodies exchanged between the gateway,
//! orchestrator, workers, and model manager live here so the services agree
//! on one schema. JSON field names follow the public API convention
//! (camelCase).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a registered worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Eligible for selection
    Active,
    /// Quarantined by the health monitor, excluded from selection
    Unhealthy,
}

/// What a worker can serve and which tags it advertises
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCapabilities {
    /// Model ids this worker is able to preload and serve
    #[serde(default)]
    pub models: Vec<String>,
    /// Opaque capability tags (e.g. "gpu", "fp16")
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkerCapabilities {
    /// All capability tags, model ids included
    pub fn all_tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().chain(self.models.iter()).map(String::as_str)
    }

    /// Whether the worker advertises the given tag or model id
    pub fn has(&self, tag: &str) -> bool {
        self.all_tags().any(|t| t == tag)
    }
}

/// Concurrency budget of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCapacity {
    /// Hard ceiling on simultaneous inferences
    pub max_concurrent: u32,
}

impl Default for WorkerCapacity {
    fn default() -> Self {
        Self { max_concurrent: 10 }
    }
}

/// A worker as known to the orchestrator registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    /// Unique worker identifier
    pub id: String,
    /// Reachable address (e.g. "http://10.0.0.5:9000")
    pub address: String,
    /// Advertised capabilities
    pub capabilities: WorkerCapabilities,
    /// Concurrency budget
    pub capacity: WorkerCapacity,
    /// First registration time
    pub registered_at: DateTime<Utc>,
    /// Last time the registry heard from this worker
    pub last_seen: DateTime<Utc>,
    /// Selection eligibility
    pub status: WorkerState,
}

/// Registration request a worker (or discovery oracle) submits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub capabilities: WorkerCapabilities,
    #[serde(default)]
    pub capacity: WorkerCapacity,
}

/// Per-worker request accounting kept by the load balancer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_processing_ms: u64,
    pub average_processing_ms: f64,
    /// Requests currently in flight through the orchestrator
    pub current_load: u32,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl WorkerStats {
    /// Fraction of completed requests that succeeded; 1.0 before any traffic
    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            1.0
        } else {
            self.success_count as f64 / self.request_count as f64
        }
    }
}

/// Extra constraints a caller may attach to an inference request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirements {
    /// Tags the worker must advertise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    /// Worker is eligible only while its load is below this value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_capacity: Option<u32>,
}

/// Options accepted on every inference call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceOptions {
    /// Deadline for the predict call, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
}

/// Inference request routed from the gateway through the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    pub model_id: String,
    pub input_data: Value,
    #[serde(default)]
    pub options: InferenceOptions,
}

/// Normalized model output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceOutput {
    pub predictions: Value,
    pub confidence: f64,
    pub metadata: OutputMetadata,
}

/// Metadata attached by the worker's postprocess step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMetadata {
    pub model_version: String,
    pub processed_at: DateTime<Utc>,
}

/// Envelope a worker returns for one inference attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceEnvelope {
    pub success: bool,
    pub inference_id: String,
    pub model_id: String,
    pub result: InferenceOutput,
    pub processing_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Orchestrator response for a routed request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    pub success: bool,
    pub result: InferenceEnvelope,
    pub worker_id: String,
    pub routed_at: DateTime<Utc>,
}

/// Worker capacity snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReport {
    pub max_concurrent: u32,
    pub current_load: u32,
    pub available: u32,
    pub available_models: Vec<String>,
    /// Present when the caller asked about one model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_loaded: Option<bool>,
}

/// Health payload for a service edge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub service: String,
    pub uptime_secs: u64,
    pub version: String,
}

/// Worker-specific health payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHealth {
    pub status: String,
    pub capacity: CapacityReport,
    pub uptime_secs: u64,
}

/// Catalog record for a stored model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub model_id: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub storage_key: String,
    pub checksum: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a client supplies when uploading a model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadataInput {
    #[serde(rename = "type", default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Receipt returned by the blob store after a write
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReceipt {
    pub storage_key: String,
    pub checksum: String,
    pub size: u64,
}

/// Full model download: metadata plus base64 payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDownload {
    pub model_id: String,
    pub metadata: ModelMetadata,
    pub model_data: String,
}

/// Upload request: base64 payload plus caller-supplied metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreModelRequest {
    pub model_id: String,
    pub model_data: String,
    #[serde(default)]
    pub metadata: ModelMetadataInput,
}

/// Load-balancing disciplines the orchestrator supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    RoundRobin,
    LeastConnections,
    Weighted,
    Random,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::RoundRobin
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::RoundRobin => "round-robin",
            Strategy::LeastConnections => "least-connections",
            Strategy::Weighted => "weighted",
            Strategy::Random => "random",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Strategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Strategy::RoundRobin),
            "least-connections" => Ok(Strategy::LeastConnections),
            "weighted" => Ok(Strategy::Weighted),
            "random" => Ok(Strategy::Random),
            other => Err(crate::Error::BadRequest(format!(
                "unknown load balancing strategy: {}",
                other
            ))),
        }
    }
}

/// Error body every service returns on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}
