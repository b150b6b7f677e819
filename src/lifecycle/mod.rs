//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → metrics → registry → subscriber
//!     → first ready signal + start response delay
//!     → pruner → admin → HTTP listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → listeners drain, loops exit → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Traffic is accepted only after the route table had a chance to fill
//! - Pruning starts after the first registrations, never on an empty view
//! - Shutdown has a deadline: stuck tasks are aborted

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
