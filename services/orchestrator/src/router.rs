//! Request routing: candidate selection, dispatch, stat accounting
//!
//! A transport failure against the selected worker is NOT retried against
//! another candidate; the error surfaces as `Unavailable` and the health
//! monitor deals with the worker on its next tick. Silent failover would
//! hide capacity loss from operators.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;

use infermesh_core::protocol::{
    InferenceEnvelope, InferenceRequest, Requirements, RouteResponse, WorkerInfo,
};
use infermesh_core::{Error, Result};

use crate::balancer::LoadBalancer;
use crate::clients::ClientCache;
use crate::registry::ServiceRegistry;

/// Routes inference requests to a selected worker
pub struct RequestRouter {
    registry: Arc<ServiceRegistry>,
    balancer: Arc<LoadBalancer>,
    clients: Arc<ClientCache>,
    request_timeout: Duration,
}

impl RequestRouter {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        balancer: Arc<LoadBalancer>,
        clients: Arc<ClientCache>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            balancer,
            clients,
            request_timeout,
        }
    }

    /// Route one inference request end to end
    pub async fn route(&self, request: &InferenceRequest) -> Result<RouteResponse> {
        let candidates = self.registry.workers_for_model(&request.model_id);
        if candidates.is_empty() {
            return Err(Error::NoWorkersAvailable(format!(
                "no active workers serve model {}",
                request.model_id
            )));
        }

        let candidates = match &request.options.requirements {
            Some(requirements) => {
                let filtered = self.filter_by_requirements(candidates, requirements);
                if filtered.is_empty() {
                    return Err(Error::NoWorkersMatchRequirements(format!(
                        "no worker for model {} satisfies the request requirements",
                        request.model_id
                    )));
                }
                filtered
            }
            None => candidates,
        };

        let worker = self.balancer.pick(&candidates, &request.model_id);
        tracing::debug!(
            model_id = %request.model_id,
            worker_id = %worker.id,
            candidates = candidates.len(),
            "routing inference"
        );

        // In-flight slot held for the whole dispatch; the guard releases it
        // on every exit path below, timeout and transport failure included.
        let _slot = self.balancer.begin_request(&worker.id);
        let client = self.clients.get_or_create(&worker);

        let started = Instant::now();
        let outcome = client
            .call(
                "runInference",
                json!({
                    "modelId": request.model_id,
                    "inputData": request.input_data,
                    "options": request.options,
                }),
                self.request_timeout,
            )
            .await;

        match outcome {
            Ok(value) => {
                let envelope: InferenceEnvelope = serde_json::from_value(value)
                    .map_err(|e| Error::TransportError(format!("malformed envelope: {}", e)))?;
                self.balancer
                    .complete(&worker.id, envelope.processing_ms, envelope.success);
                Ok(RouteResponse {
                    success: true,
                    worker_id: worker.id.clone(),
                    routed_at: Utc::now(),
                    result: envelope,
                })
            }
            Err(Error::TransportError(message)) => {
                // The worker itself is suspect: drop its client so the next
                // call reconnects, count the failure, and surface the loss.
                self.balancer
                    .complete(&worker.id, started.elapsed().as_millis() as u64, false);
                self.clients.remove(&worker.id);
                tracing::warn!(worker_id = %worker.id, "transport failure: {}", message);
                Err(Error::Unavailable(format!(
                    "worker {} unreachable: {}",
                    worker.id, message
                )))
            }
            Err(other) => {
                // The worker answered with a structured failure; pass it up
                self.balancer
                    .complete(&worker.id, started.elapsed().as_millis() as u64, false);
                Err(other)
            }
        }
    }

    /// Keep only workers satisfying the caller's requirements
    fn filter_by_requirements(
        &self,
        candidates: Vec<WorkerInfo>,
        requirements: &Requirements,
    ) -> Vec<WorkerInfo> {
        candidates
            .into_iter()
            .filter(|worker| {
                if let Some(required) = &requirements.capabilities {
                    if !required.iter().all(|tag| worker.capabilities.has(tag)) {
                        return false;
                    }
                }
                if let Some(min_capacity) = requirements.min_capacity {
                    let load = self
                        .balancer
                        .stats_for(&worker.id)
                        .map(|s| s.current_load)
                        .unwrap_or(0);
                    if load >= min_capacity {
                        return false;
                    }
                }
                true
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infermesh_core::protocol::{
        RegisterRequest, Strategy, WorkerCapabilities, WorkerCapacity,
    };
    use infermesh_core::transport::LocalTransportFactory;

    fn fixture(strategy: Strategy) -> (Arc<ServiceRegistry>, Arc<LoadBalancer>, RequestRouter) {
        let registry = Arc::new(ServiceRegistry::new());
        let balancer = Arc::new(LoadBalancer::new(strategy));
        let clients = Arc::new(ClientCache::new(Arc::new(LocalTransportFactory::new())));
        let router = RequestRouter::new(
            Arc::clone(&registry),
            Arc::clone(&balancer),
            clients,
            Duration::from_secs(5),
        );
        (registry, balancer, router)
    }

    fn register(registry: &ServiceRegistry, id: &str, models: &[&str], tags: &[&str]) {
        registry.register(RegisterRequest {
            id: id.to_string(),
            address: format!("local://{}", id),
            capabilities: WorkerCapabilities {
                models: models.iter().map(|s| s.to_string()).collect(),
                tags: tags.iter().map(|s| s.to_string()).collect(),
            },
            capacity: WorkerCapacity::default(),
        });
    }

    fn inference(model_id: &str, requirements: Option<Requirements>) -> InferenceRequest {
        InferenceRequest {
            model_id: model_id.to_string(),
            input_data: json!({"x": 1}),
            options: infermesh_core::protocol::InferenceOptions {
                timeout_ms: None,
                requirements,
            },
        }
    }

    #[tokio::test]
    async fn test_no_workers_for_model() {
        let (_registry, _balancer, router) = fixture(Strategy::RoundRobin);
        let err = router.route(&inference("m1", None)).await.unwrap_err();
        assert!(matches!(err, Error::NoWorkersAvailable(_)));
    }

    #[tokio::test]
    async fn test_requirements_filter_empties_candidates() {
        let (registry, _balancer, router) = fixture(Strategy::RoundRobin);
        register(&registry, "w1", &["m1"], &[]);

        let requirements = Requirements {
            capabilities: Some(vec!["gpu".to_string()]),
            min_capacity: None,
        };
        let err = router
            .route(&inference("m1", Some(requirements)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoWorkersMatchRequirements(_)));
    }

    #[tokio::test]
    async fn test_unreachable_worker_surfaces_unavailable_without_failover() {
        let (registry, balancer, router) = fixture(Strategy::RoundRobin);
        // Neither address has a handler; both probes would fail. Round-robin
        // picks w1 first; the router must NOT silently try w2.
        register(&registry, "w1", &["m1"], &[]);
        register(&registry, "w2", &["m1"], &[]);

        let err = router.route(&inference("m1", None)).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));

        // Exactly one worker took the failure; the other was never touched
        let w1 = balancer.stats_for("w1").unwrap();
        assert_eq!(w1.failure_count, 1);
        assert!(balancer.stats_for("w2").is_none());
        assert_eq!(w1.current_load, 0, "in-flight slot must be released");
    }

    #[tokio::test]
    async fn test_min_capacity_filters_loaded_workers() {
        let (registry, balancer, router) = fixture(Strategy::LeastConnections);
        register(&registry, "w1", &["m1"], &[]);
        register(&registry, "w2", &["m1"], &[]);

        // w1 is busy with two requests; requirements demand load < 2
        let _a = balancer.begin_request("w1");
        let _b = balancer.begin_request("w1");

        let requirements = Requirements {
            capabilities: None,
            min_capacity: Some(2),
        };
        // w2 is the only candidate left; it is unreachable so the route
        // fails, but the error names w2
        let err = router
            .route(&inference("m1", Some(requirements)))
            .await
            .unwrap_err();
        match err {
            Error::Unavailable(message) => assert!(message.contains("w2")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }
}
