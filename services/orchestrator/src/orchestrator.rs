//! The orchestrator service struct
//!
//! Owns the registry, balancer, health monitor, client cache, and router,
//! plus the two singleton background loops (health tick and discovery
//! tick). Tests instantiate fresh copies; nothing here is global.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use infermesh_core::config::OrchestratorConfig;
use infermesh_core::protocol::{
    HealthReport, InferenceRequest, RegisterRequest, Requirements, RouteResponse, WorkerInfo,
};
use infermesh_core::{Error, Result, RpcHandler, TransportFactory};

use crate::balancer::LoadBalancer;
use crate::clients::ClientCache;
use crate::discovery::DiscoveryOracle;
use crate::health::HealthMonitor;
use crate::registry::ServiceRegistry;
use crate::router::RequestRouter;

/// Control plane for a fleet of inference workers
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<ServiceRegistry>,
    balancer: Arc<LoadBalancer>,
    clients: Arc<ClientCache>,
    health: Arc<HealthMonitor>,
    router: RequestRouter,
    oracle: Arc<dyn DiscoveryOracle>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        factory: Arc<dyn TransportFactory>,
        oracle: Arc<dyn DiscoveryOracle>,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::new());
        let balancer = Arc::new(LoadBalancer::new(config.load_balancing_strategy));
        let clients = Arc::new(ClientCache::new(factory));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&clients),
            config.unhealthy_threshold,
        ));
        let router = RequestRouter::new(
            Arc::clone(&registry),
            Arc::clone(&balancer),
            Arc::clone(&clients),
            Duration::from_millis(config.request_timeout_ms),
        );
        Self {
            config,
            registry,
            balancer,
            clients,
            health,
            router,
            oracle,
            loops: Mutex::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    /// Start the health and discovery loops
    ///
    /// Both are singletons per orchestrator instance; calling start twice is
    /// a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut loops = self.loops.lock().expect("loop handles poisoned");
        if !loops.is_empty() {
            return;
        }

        let health = Arc::clone(&self.health);
        let health_interval = Duration::from_millis(self.config.health_check_interval_ms);
        loops.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                health.probe_all().await;
            }
        }));

        let this = Arc::clone(self);
        let discovery_interval = Duration::from_millis(self.config.service_discovery_interval_ms);
        loops.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(discovery_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match this.oracle.discover().await {
                    Ok(discovered) => {
                        for request in discovered {
                            this.registry.register(request);
                        }
                    }
                    Err(e) => tracing::warn!("discovery tick failed: {}", e),
                }
            }
        }));

        tracing::info!(
            health_interval_ms = self.config.health_check_interval_ms,
            discovery_interval_ms = self.config.service_discovery_interval_ms,
            "orchestrator background loops started"
        );
    }

    /// Stop the background loops
    pub fn stop(&self) {
        let mut loops = self.loops.lock().expect("loop handles poisoned");
        for handle in loops.drain(..) {
            handle.abort();
        }
    }

    /// Register (or refresh) a worker
    pub fn register_worker(&self, request: RegisterRequest) -> WorkerInfo {
        self.registry.register(request)
    }

    /// Unregister a worker, dropping its client and probe state
    pub fn unregister_worker(&self, worker_id: &str) -> Result<WorkerInfo> {
        let worker = self.registry.unregister(worker_id)?;
        self.clients.remove(worker_id);
        self.health.forget(worker_id);
        self.balancer.forget(worker_id);
        Ok(worker)
    }

    /// Active workers for a model, after requirements filtering
    pub fn find_workers(
        &self,
        model_id: &str,
        requirements: Option<&Requirements>,
    ) -> Vec<WorkerInfo> {
        let candidates = self.registry.workers_for_model(model_id);
        match requirements {
            Some(requirements) => candidates
                .into_iter()
                .filter(|worker| {
                    requirements
                        .capabilities
                        .as_ref()
                        .map_or(true, |tags| tags.iter().all(|t| worker.capabilities.has(t)))
                })
                .collect(),
            None => candidates,
        }
    }

    /// Route one inference request
    pub async fn route_inference(&self, request: &InferenceRequest) -> Result<RouteResponse> {
        self.router.route(request).await
    }

    /// Aggregated orchestrator status
    pub fn status(&self) -> Value {
        let workers = self.registry.all_workers();
        json!({
            "status": "healthy",
            "strategy": self.balancer.strategy().to_string(),
            "workers": workers,
            "workerCount": workers.len(),
            "stats": self.balancer.all_stats(),
            "health": self.health.all_states(),
            "uptimeSecs": self.started_at.elapsed().as_secs(),
        })
    }

    /// Edge health payload
    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            status: "healthy".to_string(),
            service: "orchestrator".to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// The health monitor, for tests and the API layer
    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// The registry, for tests and the API layer
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The balancer, for tests and the API layer
    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl RpcHandler for Orchestrator {
    async fn handle(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "healthCheck" => Ok(serde_json::to_value(self.health_report())?),
            "status" => Ok(self.status()),
            "registerWorker" => {
                let request: RegisterRequest = serde_json::from_value(params)
                    .map_err(|e| Error::BadRequest(format!("malformed registration: {}", e)))?;
                Ok(serde_json::to_value(self.register_worker(request))?)
            }
            "unregisterWorker" => {
                let worker_id = params
                    .get("workerId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::BadRequest("missing workerId".into()))?;
                let worker = self.unregister_worker(worker_id)?;
                Ok(json!({"success": true, "workerId": worker.id}))
            }
            "findWorkers" => {
                let model_id = params
                    .get("modelId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::BadRequest("missing modelId".into()))?;
                let requirements: Option<Requirements> = params
                    .get("requirements")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| Error::BadRequest(format!("malformed requirements: {}", e)))?;
                let workers = self.find_workers(model_id, requirements.as_ref());
                let count = workers.len();
                Ok(json!({"workers": workers, "count": count}))
            }
            "routeInference" => {
                let request: InferenceRequest = serde_json::from_value(params)
                    .map_err(|e| Error::BadRequest(format!("malformed request: {}", e)))?;
                Ok(serde_json::to_value(self.route_inference(&request).await?)?)
            }
            other => Err(Error::TransportError(format!(
                "orchestrator does not handle {}",
                other
            ))),
        }
    }
}
