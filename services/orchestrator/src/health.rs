//! Health monitoring with consecutive-failure quarantine
//!
//! Each registered worker is probed on a fixed cadence. Three consecutive
//! failures quarantine the worker (the registry stops offering it for
//! selection); a single successful probe readmits it. Quarantined workers
//! keep being probed, so recovery is automatic.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use infermesh_core::protocol::WorkerState;

use crate::clients::ClientCache;
use crate::registry::ServiceRegistry;

/// Deadline for one health probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe bookkeeping for one worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthState {
    pub status: WorkerState,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: WorkerState::Active,
            consecutive_failures: 0,
            total_checks: 0,
            successful_checks: 0,
            last_check: None,
        }
    }
}

/// Probes workers and drives quarantine transitions on the registry
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    clients: Arc<ClientCache>,
    states: RwLock<HashMap<String, HealthState>>,
    /// Consecutive failures that trigger quarantine
    threshold: u32,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, clients: Arc<ClientCache>, threshold: u32) -> Self {
        Self {
            registry,
            clients,
            states: RwLock::new(HashMap::new()),
            threshold: threshold.max(1),
        }
    }

    /// Probe every registered worker once
    pub async fn probe_all(&self) {
        let workers = self.registry.all_workers();
        let probes = workers.iter().map(|worker| {
            let client = self.clients.get_or_create(worker);
            async move {
                let outcome = client
                    .call("healthCheck", json!({}), PROBE_TIMEOUT)
                    .await;
                (worker.id.clone(), outcome.is_ok())
            }
        });

        for (worker_id, healthy) in futures::future::join_all(probes).await {
            if healthy {
                self.record_success(&worker_id);
            } else {
                self.record_failure(&worker_id);
            }
        }
    }

    /// A probe succeeded: reset failures and readmit the worker
    pub fn record_success(&self, worker_id: &str) {
        let mut states = self.states.write().expect("health states poisoned");
        let state = states.entry(worker_id.to_string()).or_default();
        state.total_checks += 1;
        state.successful_checks += 1;
        state.consecutive_failures = 0;
        state.last_check = Some(Utc::now());

        if state.status == WorkerState::Unhealthy {
            tracing::info!(worker_id, "worker recovered, readmitting");
        }
        state.status = WorkerState::Active;
        drop(states);

        self.registry.set_state(worker_id, WorkerState::Active);
    }

    /// A probe failed: count it and quarantine past the threshold
    pub fn record_failure(&self, worker_id: &str) {
        let mut states = self.states.write().expect("health states poisoned");
        let state = states.entry(worker_id.to_string()).or_default();
        state.total_checks += 1;
        state.consecutive_failures += 1;
        state.last_check = Some(Utc::now());

        let quarantine = state.consecutive_failures >= self.threshold;
        if quarantine && state.status == WorkerState::Active {
            tracing::warn!(
                worker_id,
                failures = state.consecutive_failures,
                "worker quarantined"
            );
        }
        if quarantine {
            state.status = WorkerState::Unhealthy;
        }
        drop(states);

        if quarantine {
            self.registry.set_state(worker_id, WorkerState::Unhealthy);
        }
    }

    /// Forget probe state for a departed worker
    pub fn forget(&self, worker_id: &str) {
        self.states
            .write()
            .expect("health states poisoned")
            .remove(worker_id);
    }

    /// Probe state for one worker
    pub fn state_for(&self, worker_id: &str) -> Option<HealthState> {
        self.states
            .read()
            .expect("health states poisoned")
            .get(worker_id)
            .cloned()
    }

    /// Probe state for every tracked worker
    pub fn all_states(&self) -> HashMap<String, HealthState> {
        self.states.read().expect("health states poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infermesh_core::protocol::{
        RegisterRequest, WorkerCapabilities, WorkerCapacity,
    };
    use infermesh_core::transport::LocalTransportFactory;

    fn fixture() -> (Arc<ServiceRegistry>, HealthMonitor) {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(RegisterRequest {
            id: "w1".to_string(),
            address: "local://w1".to_string(),
            capabilities: WorkerCapabilities {
                models: vec!["m1".to_string()],
                tags: vec![],
            },
            capacity: WorkerCapacity::default(),
        });
        let clients = Arc::new(ClientCache::new(Arc::new(LocalTransportFactory::new())));
        let monitor = HealthMonitor::new(Arc::clone(&registry), clients, 3);
        (registry, monitor)
    }

    #[test]
    fn test_quarantine_after_three_consecutive_failures() {
        let (registry, monitor) = fixture();

        monitor.record_failure("w1");
        monitor.record_failure("w1");
        assert_eq!(registry.workers_for_model("m1").len(), 1);

        monitor.record_failure("w1");
        assert!(registry.workers_for_model("m1").is_empty());

        let state = monitor.state_for("w1").unwrap();
        assert_eq!(state.consecutive_failures, 3);
        assert_eq!(state.status, WorkerState::Unhealthy);
    }

    #[test]
    fn test_one_success_readmits() {
        let (registry, monitor) = fixture();
        for _ in 0..5 {
            monitor.record_failure("w1");
        }
        assert!(registry.workers_for_model("m1").is_empty());

        monitor.record_success("w1");
        assert_eq!(registry.workers_for_model("m1").len(), 1);

        let state = monitor.state_for("w1").unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.total_checks, 6);
        assert_eq!(state.successful_checks, 1);
    }

    #[test]
    fn test_success_between_failures_resets_count() {
        let (registry, monitor) = fixture();
        monitor.record_failure("w1");
        monitor.record_failure("w1");
        monitor.record_success("w1");
        monitor.record_failure("w1");
        monitor.record_failure("w1");

        // Never reached three in a row
        assert_eq!(registry.workers_for_model("m1").len(), 1);
    }

    #[tokio::test]
    async fn test_probe_all_marks_unreachable_worker() {
        let (registry, monitor) = fixture();

        // No handler registered at local://w1, so the probe fails
        for _ in 0..3 {
            monitor.probe_all().await;
        }
        assert!(registry.workers_for_model("m1").is_empty());
    }
}
