//! RPC client cache
//!
//! One transport per worker id, created lazily from the configured factory.
//! Dropped on unregister or after an unrecoverable transport failure; the
//! next call re-creates it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use infermesh_core::protocol::WorkerInfo;
use infermesh_core::{RpcTransport, TransportFactory};

/// Lazily populated cache of per-worker transports
pub struct ClientCache {
    factory: Arc<dyn TransportFactory>,
    clients: RwLock<HashMap<String, Arc<dyn RpcTransport>>>,
}

impl ClientCache {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Get the cached transport for a worker, creating one if needed
    ///
    /// A cached client pointing at a stale address (the worker re-registered
    /// elsewhere) is replaced.
    pub fn get_or_create(&self, worker: &WorkerInfo) -> Arc<dyn RpcTransport> {
        {
            let clients = self.clients.read().expect("client cache poisoned");
            if let Some(client) = clients.get(&worker.id) {
                if client.address() == worker.address {
                    return Arc::clone(client);
                }
            }
        }

        let mut clients = self.clients.write().expect("client cache poisoned");
        // Double-checked: another task may have created it while we waited
        if let Some(client) = clients.get(&worker.id) {
            if client.address() == worker.address {
                return Arc::clone(client);
            }
        }
        let client = self.factory.connect(&worker.address);
        clients.insert(worker.id.clone(), Arc::clone(&client));
        tracing::debug!(worker_id = %worker.id, address = %worker.address, "rpc client created");
        client
    }

    /// Drop a worker's cached transport
    pub fn remove(&self, worker_id: &str) {
        self.clients
            .write()
            .expect("client cache poisoned")
            .remove(worker_id);
    }

    /// Number of cached transports
    pub fn len(&self) -> usize {
        self.clients.read().expect("client cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
