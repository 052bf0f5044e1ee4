//! API gateway service
//!
//! The authenticated edge of the platform: validates API keys, enforces a
//! per-client sliding-window rate limit, and forwards inference and model
//! operations to the orchestrator and model manager.

pub mod api;
pub mod gateway;
pub mod keystore;
pub mod ratelimit;

pub use gateway::Gateway;
pub use keystore::{ApiKeyStore, AuthContext};
pub use ratelimit::RateLimiter;
