//! Endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single routable backend instance
//! - Carry application identity and instance index for exact selection
//! - Track when the endpoint was last announced (staleness clock)

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

/// A single backend instance registered under a route.
///
/// Endpoints are immutable values. A heartbeat replaces the endpoint with a
/// fresh copy carrying the new timestamp, so snapshots already handed out
/// never observe a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    address: String,
    app_id: String,
    instance_index: String,
    private_instance_id: String,
    tags: BTreeMap<String, String>,
    tls: bool,
    stale_threshold: Option<Duration>,
    updated_at: Instant,
}

impl Endpoint {
    /// Create an endpoint for `address` (`host:port`) last seen at `updated_at`.
    pub fn new(address: impl Into<String>, updated_at: Instant) -> Self {
        Self {
            address: address.into(),
            app_id: String::new(),
            instance_index: String::new(),
            private_instance_id: String::new(),
            tags: BTreeMap::new(),
            tls: false,
            stale_threshold: None,
            updated_at,
        }
    }

    pub fn with_app(mut self, app_id: impl Into<String>, instance_index: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self.instance_index = instance_index.into();
        self
    }

    pub fn with_private_instance_id(mut self, id: impl Into<String>) -> Self {
        self.private_instance_id = id.into();
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Per-endpoint TTL hint. Caps the registry-wide stale threshold.
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = Some(threshold);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn instance_index(&self) -> &str {
        &self.instance_index
    }

    pub fn private_instance_id(&self) -> &str {
        &self.private_instance_id
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }

    /// True when both identify the same application instance.
    /// Endpoints without an instance index never collide.
    pub fn same_instance(&self, other: &Endpoint) -> bool {
        !self.instance_index.is_empty()
            && self.app_id == other.app_id
            && self.instance_index == other.instance_index
    }

    pub fn matches_instance(&self, app_id: &str, instance_index: &str) -> bool {
        self.app_id == app_id && self.instance_index == instance_index
    }

    /// The threshold that applies to this endpoint given the registry default.
    pub fn effective_threshold(&self, default: Duration) -> Duration {
        match self.stale_threshold {
            Some(hint) => hint.min(default),
            None => default,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.updated_at)
    }

    pub fn is_stale(&self, now: Instant, default_threshold: Duration) -> bool {
        self.age(now) > self.effective_threshold(default_threshold)
    }

    pub fn summary(&self, now: Instant) -> EndpointSummary {
        EndpointSummary {
            address: self.address.clone(),
            app_id: self.app_id.clone(),
            instance_index: self.instance_index.clone(),
            private_instance_id: self.private_instance_id.clone(),
            tags: self.tags.clone(),
            tls: self.tls,
            ttl_secs: self.stale_threshold.map(|t| t.as_secs()),
            age_secs: self.age(now).as_secs(),
        }
    }
}

/// Serializable view of an endpoint for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSummary {
    pub address: String,
    pub app_id: String,
    pub instance_index: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_instance_id: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub tls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    pub age_secs: u64,
}
