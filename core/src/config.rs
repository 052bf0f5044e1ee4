//! Per-service configuration
//!
//! Each service owns one config struct with defaults matching the documented
//! deployment values. Binaries load an optional JSON file and let CLI flags
//! override individual fields.

use serde::{Deserialize, Serialize};

use crate::protocol::Strategy;

/// Gateway authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// When false every request passes through unauthenticated
    pub enabled: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Gateway rate limiter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests allowed per client per window
    pub max_requests: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            max_requests: 100,
        }
    }
}

/// Gateway CORS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins; "*" means any
    pub origins: Vec<String>,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_string()],
        }
    }
}

/// API gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub port: u16,
    pub authentication: AuthSettings,
    pub rate_limit: RateLimitSettings,
    pub cors: CorsSettings,
    /// Orchestrator base URL
    pub orchestrator_url: String,
    /// Model manager base URL
    pub model_manager_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            authentication: AuthSettings::default(),
            rate_limit: RateLimitSettings::default(),
            cors: CorsSettings::default(),
            orchestrator_url: "http://127.0.0.1:8081".to_string(),
            model_manager_url: "http://127.0.0.1:8083".to_string(),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    pub port: u16,
    pub load_balancing_strategy: Strategy,
    /// Probe cadence in milliseconds
    pub health_check_interval_ms: u64,
    /// Discovery refresh cadence in milliseconds
    pub service_discovery_interval_ms: u64,
    /// Per-request RPC deadline in milliseconds
    pub request_timeout_ms: u64,
    /// Probes failing this many times in a row quarantine the worker
    pub unhealthy_threshold: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            load_balancing_strategy: Strategy::default(),
            health_check_interval_ms: 5_000,
            service_discovery_interval_ms: 10_000,
            request_timeout_ms: 60_000,
            unhealthy_threshold: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.load_balancing_strategy = strategy;
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn with_health_check_interval_ms(mut self, ms: u64) -> Self {
        self.health_check_interval_ms = ms;
        self
    }
}

/// Inference worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    pub port: u16,
    /// Stable identifier; generated when absent
    pub worker_id: Option<String>,
    pub max_concurrent_inferences: u32,
    /// Default predict deadline in milliseconds
    pub inference_timeout_ms: u64,
    /// Loaded models kept resident before eviction
    pub model_cache_size: usize,
    pub health_check_interval_ms: u64,
    /// Model manager base URL for model fetches
    pub model_manager_url: String,
    /// Verify blob checksums after fetch
    pub checksum_validation: bool,
    /// Model ids this worker advertises to the orchestrator
    pub models: Vec<String>,
    /// Extra capability tags (e.g. "gpu")
    pub capability_tags: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            port: 8082,
            worker_id: None,
            max_concurrent_inferences: 10,
            inference_timeout_ms: 30_000,
            model_cache_size: 5,
            health_check_interval_ms: 5_000,
            model_manager_url: "http://127.0.0.1:8083".to_string(),
            checksum_validation: true,
            models: Vec::new(),
            capability_tags: Vec::new(),
        }
    }
}

impl WorkerConfig {
    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent_inferences = max;
        self
    }

    pub fn with_inference_timeout_ms(mut self, ms: u64) -> Self {
        self.inference_timeout_ms = ms;
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.model_cache_size = size;
        self
    }
}

/// Model manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelManagerConfig {
    pub port: u16,
    /// Directory blobs are persisted under
    pub storage_path: String,
    /// Human-readable size cap ("1GB", "500MB", or raw bytes)
    pub max_model_size: String,
    pub checksum_validation: bool,
    /// Accepted model format tags; empty accepts anything
    pub supported_formats: Vec<String>,
}

impl Default for ModelManagerConfig {
    fn default() -> Self {
        Self {
            port: 8083,
            storage_path: "./models".to_string(),
            max_model_size: "1GB".to_string(),
            checksum_validation: true,
            supported_formats: Vec::new(),
        }
    }
}

impl ModelManagerConfig {
    pub fn with_storage_path(mut self, path: impl Into<String>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn with_max_model_size(mut self, size: impl Into<String>) -> Self {
        self.max_model_size = size.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let gw = GatewayConfig::default();
        assert_eq!(gw.rate_limit.window_ms, 60_000);
        assert_eq!(gw.rate_limit.max_requests, 100);

        let orch = OrchestratorConfig::default();
        assert_eq!(orch.health_check_interval_ms, 5_000);
        assert_eq!(orch.service_discovery_interval_ms, 10_000);
        assert_eq!(orch.request_timeout_ms, 60_000);
        assert_eq!(orch.unhealthy_threshold, 3);

        let worker = WorkerConfig::default();
        assert_eq!(worker.inference_timeout_ms, 30_000);
    }

    #[test]
    fn test_partial_json_overrides() {
        let cfg: OrchestratorConfig =
            serde_json::from_str(r#"{"loadBalancingStrategy":"weighted","requestTimeoutMs":5000}"#)
                .unwrap();
        assert_eq!(cfg.load_balancing_strategy, Strategy::Weighted);
        assert_eq!(cfg.request_timeout_ms, 5_000);
        assert_eq!(cfg.port, 8081);
    }
}
