//! Pruning suspension.
//!
//! The registry asks an injected predicate before every sweep. While the
//! heartbeat source is unreachable nothing can refresh endpoints, so sweeping
//! would evict live routes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single question asked before each prune sweep.
pub trait SuspendPruning: Send + Sync {
    fn should_suspend(&self) -> bool;
}

impl<F> SuspendPruning for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn should_suspend(&self) -> bool {
        self()
    }
}

/// Always prune.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSuspend;

impl SuspendPruning for NeverSuspend {
    fn should_suspend(&self) -> bool {
        false
    }
}

/// Shared message-bus connection flag.
///
/// The subscriber flips it; the registry reads it as a suspend predicate.
/// Starts out disconnected.
#[derive(Debug, Clone, Default)]
pub struct BusConnectivity {
    connected: Arc<AtomicBool>,
}

impl BusConnectivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl SuspendPruning for BusConnectivity {
    fn should_suspend(&self) -> bool {
        !self.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_suspends_while_disconnected() {
        let connectivity = BusConnectivity::new();
        let seen_by_registry = connectivity.clone();
        assert!(seen_by_registry.should_suspend());

        connectivity.set_connected(true);
        assert!(!seen_by_registry.should_suspend());

        connectivity.set_connected(false);
        assert!(seen_by_registry.should_suspend());
    }

    #[test]
    fn closures_are_predicates() {
        let always = || true;
        assert!(always.should_suspend());
        assert!(!NeverSuspend.should_suspend());
    }
}
