//! Heartbeat subscriber subsystem.
//!
//! # Data Flow
//! ```text
//! connect → SUB router.register / router.unregister / router.greet
//!         → PUB router.start {id, minimumRegisterIntervalInSeconds, pruneThresholdInSeconds}
//!         → connectivity = connected, ready signal
//!
//! MSG router.register   → messages.rs decode → registry.register (per route)
//! MSG router.unregister → messages.rs decode → registry.unregister (per route)
//! MSG router.greet      → reply with the start message
//!
//! connection lost → connectivity = disconnected → backoff → reconnect
//! ```
//!
//! # Design Decisions
//! - Each message is a pure transformation into registry calls
//! - Malformed messages never stop the loop
//! - Timing is enforced by the pruner, not by the subscriber

pub mod heartbeat;
pub mod messages;

pub use heartbeat::{subscriber_id, Subscriber, SubscriberOptions};
pub use messages::{RegistryEvent, RegistryMessage, StartMessage, SubscriberError};
