//! Service registry: which workers exist and what they can do
//!
//! Three maps move together under one lock: the primary worker map, the
//! capability index, and the model index. Removal is atomic across all
//! three, so an index entry always points at a live, registered worker.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::Utc;

use infermesh_core::protocol::{RegisterRequest, WorkerInfo, WorkerState};
use infermesh_core::{Error, Result};

#[derive(Default)]
struct RegistryInner {
    workers: HashMap<String, WorkerInfo>,
    capability_index: HashMap<String, HashSet<String>>,
    model_index: HashMap<String, HashSet<String>>,
}

impl RegistryInner {
    fn index(&mut self, worker: &WorkerInfo) {
        for tag in worker.capabilities.all_tags() {
            self.capability_index
                .entry(tag.to_string())
                .or_default()
                .insert(worker.id.clone());
        }
        for model in &worker.capabilities.models {
            self.model_index
                .entry(model.clone())
                .or_default()
                .insert(worker.id.clone());
        }
    }

    fn unindex(&mut self, worker: &WorkerInfo) {
        for tag in worker.capabilities.all_tags() {
            if let Some(ids) = self.capability_index.get_mut(tag) {
                ids.remove(&worker.id);
                if ids.is_empty() {
                    self.capability_index.remove(tag);
                }
            }
        }
        for model in &worker.capabilities.models {
            if let Some(ids) = self.model_index.get_mut(model) {
                ids.remove(&worker.id);
                if ids.is_empty() {
                    self.model_index.remove(model);
                }
            }
        }
    }
}

/// In-memory worker registry with capability and model indices
#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<RegistryInner>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, or refresh one that re-registers
    ///
    /// Re-registration overwrites the mutable fields (address,
    /// capabilities, last_seen) and re-indexes; identity and the original
    /// registration time are kept.
    pub fn register(&self, request: RegisterRequest) -> WorkerInfo {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let now = Utc::now();

        let worker = match inner.workers.get(&request.id).cloned() {
            Some(existing) => {
                inner.unindex(&existing);
                tracing::debug!(worker_id = %request.id, "worker re-registered");
                WorkerInfo {
                    address: request.address,
                    capabilities: request.capabilities,
                    capacity: request.capacity,
                    last_seen: now,
                    ..existing
                }
            }
            None => {
                tracing::info!(worker_id = %request.id, address = %request.address, "worker registered");
                WorkerInfo {
                    id: request.id.clone(),
                    address: request.address,
                    capabilities: request.capabilities,
                    capacity: request.capacity,
                    registered_at: now,
                    last_seen: now,
                    status: WorkerState::Active,
                }
            }
        };

        inner.index(&worker);
        inner.workers.insert(worker.id.clone(), worker.clone());
        worker
    }

    /// Remove a worker from the registry and every index
    pub fn unregister(&self, worker_id: &str) -> Result<WorkerInfo> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let Some(worker) = inner.workers.remove(worker_id) else {
            return Err(Error::BadRequest(format!(
                "worker {} is not registered",
                worker_id
            )));
        };
        inner.unindex(&worker);
        tracing::info!(worker_id, "worker unregistered");
        Ok(worker)
    }

    /// Look up one worker
    pub fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .workers
            .get(worker_id)
            .cloned()
    }

    /// Active workers able to serve `model_id`
    pub fn workers_for_model(&self, model_id: &str) -> Vec<WorkerInfo> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let Some(ids) = inner.model_index.get(model_id) else {
            return Vec::new();
        };
        let mut workers: Vec<WorkerInfo> = ids
            .iter()
            .filter_map(|id| inner.workers.get(id))
            .filter(|w| w.status == WorkerState::Active)
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Active workers advertising a capability tag
    pub fn workers_with_capability(&self, tag: &str) -> Vec<WorkerInfo> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let Some(ids) = inner.capability_index.get(tag) else {
            return Vec::new();
        };
        let mut workers: Vec<WorkerInfo> = ids
            .iter()
            .filter_map(|id| inner.workers.get(id))
            .filter(|w| w.status == WorkerState::Active)
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Flip a worker's selection eligibility; stamps `last_seen`
    pub fn set_state(&self, worker_id: &str, state: WorkerState) -> bool {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        match inner.workers.get_mut(worker_id) {
            Some(worker) => {
                if worker.status != state {
                    tracing::info!(worker_id, ?state, "worker state changed");
                }
                worker.status = state;
                worker.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Refresh a worker's liveness timestamp
    pub fn touch(&self, worker_id: &str) -> bool {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        match inner.workers.get_mut(worker_id) {
            Some(worker) => {
                worker.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// All registered workers, any state
    pub fn all_workers(&self) -> Vec<WorkerInfo> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut workers: Vec<WorkerInfo> = inner.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index sanity check: every indexed id resolves to a registered worker
    #[cfg(test)]
    pub(crate) fn indices_consistent(&self) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .capability_index
            .values()
            .chain(inner.model_index.values())
            .flatten()
            .all(|id| inner.workers.contains_key(id))
    }
}
