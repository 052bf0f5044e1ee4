//! In-process implementation of the RPC boundary
//!
//! Dispatches calls straight into an `RpcHandler` behind the same timeout
//! semantics as the HTTP transport. Tests wire a whole control plane out of
//! these without opening a socket.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{RpcHandler, RpcTransport, TransportFactory};
use crate::{Error, Result};

/// Transport that invokes a handler in the same process
pub struct LocalTransport {
    address: String,
    handler: Arc<dyn RpcHandler>,
}

impl LocalTransport {
    pub fn new(address: impl Into<String>, handler: Arc<dyn RpcHandler>) -> Self {
        Self {
            address: address.into(),
            handler,
        }
    }
}

#[async_trait]
impl RpcTransport for LocalTransport {
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, self.handler.handle(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(Error::TransportError(format!(
                "{} to {} timed out after {}ms",
                method,
                self.address,
                timeout.as_millis()
            ))),
        }
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Factory resolving addresses to in-process handlers
///
/// Unknown addresses still produce a transport; calls through it fail with
/// `TransportError`, mirroring an unreachable network peer.
#[derive(Default)]
pub struct LocalTransportFactory {
    handlers: RwLock<HashMap<String, Arc<dyn RpcHandler>>>,
}

impl LocalTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handler` reachable at `address`
    pub fn register(&self, address: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.handlers
            .write()
            .expect("handler map poisoned")
            .insert(address.into(), handler);
    }

    /// Simulate a peer going away
    pub fn disconnect(&self, address: &str) {
        self.handlers
            .write()
            .expect("handler map poisoned")
            .remove(address);
    }
}

/// Handler that always fails, standing in for an unreachable peer
struct UnreachableHandler {
    address: String,
}

#[async_trait]
impl RpcHandler for UnreachableHandler {
    async fn handle(&self, method: &str, _params: Value) -> Result<Value> {
        Err(Error::TransportError(format!(
            "{}: connection refused at {}",
            method, self.address
        )))
    }
}

impl TransportFactory for LocalTransportFactory {
    fn connect(&self, address: &str) -> Arc<dyn RpcTransport> {
        let handler = self
            .handlers
            .read()
            .expect("handler map poisoned")
            .get(address)
            .cloned();
        match handler {
            Some(handler) => Arc::new(LocalTransport::new(address, handler)),
            None => Arc::new(LocalTransport::new(
                address,
                Arc::new(UnreachableHandler {
                    address: address.to_string(),
                }),
            )),
        }
    }
}
