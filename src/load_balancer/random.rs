//! Uniform random load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{Endpoint, LoadBalancer};

/// Picks an endpoint uniformly at random.
#[derive(Debug, Default)]
pub struct RandomChoice;

impl RandomChoice {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomChoice {
    fn next_endpoint(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        if endpoints.is_empty() {
            return None;
        }
        Some(endpoints[fastrand::usize(..endpoints.len())].clone())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
