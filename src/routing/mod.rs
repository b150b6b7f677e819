//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (Host, path, instance header)
//!     → resolver.rs (parse instance header, pick lookup kind)
//!     → RouteTable (registry): key.rs candidates, most specific first
//!     → Return: PoolSnapshot or LookupError
//!
//! Registration:
//!     route string → key.rs RouteKey::parse → registry key
//! ```
//!
//! # Design Decisions
//! - Malformed instance headers fail before any table access
//! - All lookup failures share one client-visible marker
//! - Deterministic: same input and table always match the same pool

pub mod key;
pub mod resolver;

pub use key::{strip_port, RouteKey, RouteKeyError, RouteUri};
pub use resolver::{parse_instance_header, resolve, InstanceSelector, LookupError, RouteTable};
