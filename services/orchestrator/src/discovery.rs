//! Pluggable service discovery
//!
//! The discovery tick asks an oracle for the current worker set and
//! re-registers whatever it reports. The static implementation serves two
//! deployments: an empty seed list is a no-op (workers self-register), and
//! a fixed seed list re-announces the fleet every tick.

use async_trait::async_trait;

use infermesh_core::protocol::RegisterRequest;
use infermesh_core::Result;

/// Source of truth for worker registrations outside the orchestrator
#[async_trait]
pub trait DiscoveryOracle: Send + Sync {
    /// Workers that should currently be registered
    async fn discover(&self) -> Result<Vec<RegisterRequest>>;
}

/// Fixed-seed oracle
#[derive(Default)]
pub struct StaticDiscovery {
    seeds: Vec<RegisterRequest>,
}

impl StaticDiscovery {
    /// No-op oracle: discovery ticks find nothing to add
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(seeds: Vec<RegisterRequest>) -> Self {
        Self { seeds }
    }
}

#[async_trait]
impl DiscoveryOracle for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<RegisterRequest>> {
        Ok(self.seeds.clone())
    }
}
