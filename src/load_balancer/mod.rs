//! Pool and endpoint model plus load balancing strategies.
//!
//! # Data Flow
//! ```text
//! Registration → pool.rs (put/remove by address, publish snapshot)
//! Lookup       → PoolSnapshot (immutable, point-in-time)
//!     → Selection::Instance → exact app id + instance index match
//!     → Selection::Any      → strategy:
//!         - round_robin.rs (rotate through endpoints)
//!         - random.rs (uniform pick)
//! ```
//!
//! # Design Decisions
//! - The strategy instance lives on the pool, so rotation state survives
//!   snapshot republishing
//! - Exact instance selection is deterministic and never consults the strategy
//! - Selection over an empty set returns None, never panics

pub mod endpoint;
pub mod pool;
pub mod random;
pub mod round_robin;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use endpoint::{Endpoint, EndpointSummary};
pub use pool::{
    Pool, PoolOptions, PoolSnapshot, PoolSummary, RoutePool, Selection, StaleEndpoints,
};

/// Strategy for picking one endpoint out of a pool.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>>;

    fn name(&self) -> &'static str;
}

/// Configurable strategy kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
}

impl Strategy {
    /// Build a fresh strategy instance for a new pool.
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            Strategy::RoundRobin => Arc::new(round_robin::RoundRobin::new()),
            Strategy::Random => Arc::new(random::RandomChoice::new()),
        }
    }
}
