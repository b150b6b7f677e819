//! Route registry subsystem.
//!
//! # Data Flow
//! ```text
//! Heartbeat subscriber / other sources
//!     → route_registry.rs register / unregister
//!         → fetch-or-create Pool under the map entry
//!         → Pool::put / Pool::remove
//!
//! pruner.rs (every prune interval)
//!     → suspend.rs predicate? → skip sweep
//!     → Pool::prune_stale on every pool
//!     → drop empty pools past their TTL
//!
//! Lookup middleware
//!     → RouteTable::lookup / lookup_with_instance → PoolSnapshot
//! ```
//!
//! # Design Decisions
//! - One explicitly constructed registry, shared as `Arc<RouteRegistry>`
//! - Readers never take a pool lock, they load the published snapshot
//! - Suspension is an injected capability, not a global flag

pub mod pruner;
pub mod route_registry;
pub mod suspend;

pub use pruner::PruningController;
pub use route_registry::{PruneReport, RegistryOptions, RouteRegistry};
pub use suspend::{BusConnectivity, NeverSuspend, SuspendPruning};
