//! Transport abstraction for inter-service RPC
//!
//! The control plane talks to its peers through one narrow interface:
//! `call(method, params, timeout)`. The HTTP implementation is used in
//! production; the in-process implementation lets tests exercise
//! orchestrator and gateway logic against real worker state without a
//! network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

pub mod http;
pub mod local;

pub use http::{HttpTransport, HttpTransportFactory};
pub use local::{LocalTransport, LocalTransportFactory};

/// One RPC hop to a single peer service
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Invoke `method` with `params`, bounded by `timeout`
    ///
    /// Errors raised by the peer come back as their original taxonomy kind;
    /// connection and deadline failures surface as `TransportError`.
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value>;

    /// Address this transport points at, for logging and cache keys
    fn address(&self) -> &str;
}

/// Server side of the RPC boundary
///
/// Services implement this once; the HTTP layer and the in-process
/// transport both dispatch into it.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, method: &str, params: Value) -> Result<Value>;
}

/// Creates transports for dynamically discovered peers
pub trait TransportFactory: Send + Sync {
    fn connect(&self, address: &str) -> Arc<dyn RpcTransport>;
}
