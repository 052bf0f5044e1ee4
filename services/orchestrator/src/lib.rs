//! Orchestrator service
//!
//! The single authority for worker lifecycle and request routing: a service
//! registry indexed by capability and model, a load balancer with four
//! selection disciplines, a health monitor that quarantines workers after
//! consecutive probe failures, and a cache of RPC clients.

pub mod api;
pub mod balancer;
pub mod clients;
pub mod discovery;
pub mod health;
pub mod orchestrator;
pub mod registry;
pub mod router;

pub use balancer::LoadBalancer;
pub use clients::ClientCache;
pub use discovery::{DiscoveryOracle, StaticDiscovery};
pub use health::HealthMonitor;
pub use orchestrator::Orchestrator;
pub use registry::ServiceRegistry;
