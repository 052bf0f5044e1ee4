//! Shared foundation for the InferMesh services
//!
//! This crate holds everything the four services (gateway, orchestrator,
//! worker, model manager) agree on: the error taxonomy, the wire types,
//! per-service configuration, and the transport abstraction that lets the
//! control plane talk to workers over HTTP in production and in-process in
//! tests.

pub mod config;
pub mod error;
pub mod http;
pub mod protocol;
pub mod transport;

pub use error::{Error, Result};
pub use transport::{RpcHandler, RpcTransport, TransportFactory};
