//! Route pool management.
//!
//! # Responsibilities
//! - Hold the endpoints registered under one route key
//! - Apply insert/refresh/move/remove semantics by address
//! - Publish an immutable snapshot after every mutation
//! - Answer staleness and expiry questions for the prune sweep

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::load_balancer::{Endpoint, EndpointSummary, LoadBalancer, Strategy};
use crate::routing::RouteKey;

/// Settings applied to a pool when the registry creates it.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Time an empty pool survives after its last mutation.
    pub ttl: Duration,
    /// Strip the route's context path before forwarding.
    pub strip_context_path: bool,
    pub strategy: Strategy,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            strip_context_path: false,
            strategy: Strategy::RoundRobin,
        }
    }
}

/// How to pick an endpoint out of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Let the pool's strategy decide.
    Any,
    /// Exactly this application instance.
    Instance { app_id: String, instance_index: String },
}

/// Immutable, point-in-time view of a pool.
#[derive(Debug)]
pub struct PoolSnapshot {
    key: RouteKey,
    endpoints: Vec<Arc<Endpoint>>,
    strip_context_path: bool,
    balancer: Arc<dyn LoadBalancer>,
}

impl PoolSnapshot {
    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn strip_context_path(&self) -> bool {
        self.strip_context_path
    }

    pub fn select_endpoint(&self, selection: &Selection) -> Option<Arc<Endpoint>> {
        match selection {
            Selection::Any => self.balancer.next_endpoint(&self.endpoints),
            Selection::Instance { app_id, instance_index } => self
                .endpoints
                .iter()
                .find(|e| e.matches_instance(app_id, instance_index))
                .cloned(),
        }
    }

    /// A copy restricted to one application instance, or None if absent.
    pub fn with_instance(&self, app_id: &str, instance_index: &str) -> Option<PoolSnapshot> {
        let endpoints: Vec<_> = self
            .endpoints
            .iter()
            .filter(|e| e.matches_instance(app_id, instance_index))
            .cloned()
            .collect();
        if endpoints.is_empty() {
            return None;
        }
        Some(PoolSnapshot {
            key: self.key.clone(),
            endpoints,
            strip_context_path: self.strip_context_path,
            balancer: self.balancer.clone(),
        })
    }

    /// The path the forwarding layer should send upstream.
    pub fn forward_path<'a>(&self, path: &'a str) -> Cow<'a, str> {
        let context = match (self.strip_context_path, self.key.context_path()) {
            (true, Some(context)) => context,
            _ => return Cow::Borrowed(path),
        };
        match path.strip_prefix(context) {
            Some("") => Cow::Borrowed("/"),
            Some(rest) if rest.starts_with('/') => Cow::Borrowed(rest),
            _ => Cow::Borrowed(path),
        }
    }
}

/// Request extension carrying the pool resolved for this request.
#[derive(Debug, Clone)]
pub struct RoutePool(pub Arc<PoolSnapshot>);

#[derive(Debug)]
struct PoolState {
    endpoints: Vec<Arc<Endpoint>>,
    last_updated: Instant,
}

/// The live set of endpoints for one route key. Owned by the registry.
#[derive(Debug)]
pub struct Pool {
    key: RouteKey,
    options: PoolOptions,
    balancer: Arc<dyn LoadBalancer>,
    state: Mutex<PoolState>,
    published: ArcSwap<PoolSnapshot>,
}

impl Pool {
    pub fn new(key: RouteKey, options: PoolOptions, now: Instant) -> Self {
        let balancer = options.strategy.build();
        let published = ArcSwap::from_pointee(PoolSnapshot {
            key: key.clone(),
            endpoints: Vec::new(),
            strip_context_path: options.strip_context_path,
            balancer: balancer.clone(),
        });
        Self {
            key,
            options,
            balancer,
            state: Mutex::new(PoolState {
                endpoints: Vec::new(),
                last_updated: now,
            }),
            published,
        }
    }

    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.options.ttl
    }

    /// Insert or refresh an endpoint by address.
    ///
    /// Another endpoint of the same application instance at a different
    /// address is dropped: the newer incarnation wins. Returns true when the
    /// address was not in the pool before.
    pub fn put(&self, endpoint: Endpoint) -> bool {
        let endpoint = Arc::new(endpoint);
        let mut state = self.state.lock();

        state.endpoints.retain(|existing| {
            let moved = existing.address() != endpoint.address() && existing.same_instance(&endpoint);
            if moved {
                tracing::info!(
                    route = %self.key,
                    app_id = endpoint.app_id(),
                    instance_index = endpoint.instance_index(),
                    old_address = existing.address(),
                    new_address = endpoint.address(),
                    "Instance moved"
                );
            }
            !moved
        });

        let updated_at = endpoint.updated_at();
        let added = match state
            .endpoints
            .iter()
            .position(|e| e.address() == endpoint.address())
        {
            Some(index) => {
                state.endpoints[index] = endpoint;
                false
            }
            None => {
                state.endpoints.push(endpoint);
                true
            }
        };
        state.last_updated = state.last_updated.max(updated_at);

        self.publish(&state);
        added
    }

    /// Remove by address. Unknown addresses are a no-op.
    pub fn remove(&self, address: &str, now: Instant) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.endpoints.iter().position(|e| e.address() == address) else {
            return false;
        };
        state.endpoints.remove(index);
        state.last_updated = state.last_updated.max(now);
        self.publish(&state);
        true
    }

    /// Endpoints not refreshed within `threshold`, as of `now`. A per-endpoint
    /// TTL hint shorter than `threshold` wins, exactly as in [`Pool::prune_stale`].
    ///
    /// Iterates the snapshot current at call time; clone the iterator or call
    /// again to restart.
    pub fn endpoints_older_than(&self, threshold: Duration, now: Instant) -> StaleEndpoints {
        StaleEndpoints {
            snapshot: self.snapshot(),
            next: 0,
            threshold,
            now,
        }
    }

    /// Drop every endpoint past its stale threshold and return them.
    ///
    /// Runs under the pool lock, so a heartbeat that landed before the lock
    /// was taken is seen with its refreshed timestamp.
    pub fn prune_stale(&self, default_threshold: Duration, now: Instant) -> Vec<Arc<Endpoint>> {
        let mut state = self.state.lock();
        if !state.endpoints.iter().any(|e| e.is_stale(now, default_threshold)) {
            return Vec::new();
        }
        let (stale, fresh): (Vec<_>, Vec<_>) = state
            .endpoints
            .drain(..)
            .partition(|e| e.is_stale(now, default_threshold));
        state.endpoints = fresh;
        self.publish(&state);
        stale
    }

    /// Empty and untouched for longer than the pool TTL.
    pub fn is_expired(&self, now: Instant) -> bool {
        let state = self.state.lock();
        state.endpoints.is_empty() && now.saturating_duration_since(state.last_updated) > self.options.ttl
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Current published view. Never blocks on writers.
    pub fn snapshot(&self) -> Arc<PoolSnapshot> {
        self.published.load_full()
    }

    pub fn summary(&self, now: Instant) -> PoolSummary {
        let snapshot = self.snapshot();
        PoolSummary {
            route: self.key.to_string(),
            ttl_secs: self.options.ttl.as_secs(),
            strategy: self.balancer.name(),
            endpoints: snapshot.endpoints.iter().map(|e| e.summary(now)).collect(),
        }
    }

    fn publish(&self, state: &PoolState) {
        self.published.store(Arc::new(PoolSnapshot {
            key: self.key.clone(),
            endpoints: state.endpoints.clone(),
            strip_context_path: self.options.strip_context_path,
            balancer: self.balancer.clone(),
        }));
    }
}

/// Lazy iterator over stale endpoints of one pool snapshot.
#[derive(Debug, Clone)]
pub struct StaleEndpoints {
    snapshot: Arc<PoolSnapshot>,
    next: usize,
    threshold: Duration,
    now: Instant,
}

impl Iterator for StaleEndpoints {
    type Item = Arc<Endpoint>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(endpoint) = self.snapshot.endpoints.get(self.next) {
            self.next += 1;
            if endpoint.is_stale(self.now, self.threshold) {
                return Some(endpoint.clone());
            }
        }
        None
    }
}

/// Serializable view of a pool for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub route: String,
    pub ttl_secs: u64,
    pub strategy: &'static str,
    pub endpoints: Vec<EndpointSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(now: Instant) -> Pool {
        Pool::new(RouteKey::parse("example.com").unwrap(), PoolOptions::default(), now)
    }

    #[test]
    fn put_reports_new_addresses_only() {
        let now = Instant::now();
        let pool = pool(now);
        assert!(pool.put(Endpoint::new("10.0.0.1:80", now)));
        assert!(!pool.put(Endpoint::new("10.0.0.1:80", now + Duration::from_secs(1))));
        assert_eq!(pool.len(), 1);
        assert_eq!(
            pool.snapshot().endpoints()[0].updated_at(),
            now + Duration::from_secs(1)
        );
    }

    #[test]
    fn moved_instance_supersedes_old_address() {
        let now = Instant::now();
        let pool = pool(now);
        pool.put(Endpoint::new("10.0.0.1:80", now).with_app("app", "0"));
        pool.put(Endpoint::new("10.0.0.9:80", now).with_app("other", "0"));
        assert!(pool.put(Endpoint::new("10.0.0.2:80", now).with_app("app", "0")));

        let addresses: Vec<_> = pool
            .snapshot()
            .endpoints()
            .iter()
            .map(|e| e.address().to_string())
            .collect();
        assert_eq!(addresses, vec!["10.0.0.9:80", "10.0.0.2:80"]);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let now = Instant::now();
        let pool = pool(now);
        pool.put(Endpoint::new("10.0.0.1:80", now));
        assert!(!pool.remove("10.0.0.2:80", now));
        assert!(pool.remove("10.0.0.1:80", now));
        assert!(pool.is_empty());
    }

    #[test]
    fn older_than_is_restartable() {
        let now = Instant::now();
        let pool = pool(now);
        pool.put(Endpoint::new("10.0.0.1:80", now));
        pool.put(Endpoint::new("10.0.0.2:80", now + Duration::from_secs(50)));

        let later = now + Duration::from_secs(60);
        let stale = pool.endpoints_older_than(Duration::from_secs(30), later);
        let first: Vec<_> = stale.clone().map(|e| e.address().to_string()).collect();
        let second: Vec<_> = stale.map(|e| e.address().to_string()).collect();
        assert_eq!(first, vec!["10.0.0.1:80"]);
        assert_eq!(first, second);
    }

    #[test]
    fn older_than_agrees_with_prune_for_ttl_hint() {
        let now = Instant::now();
        let pool = pool(now);
        pool.put(Endpoint::new("10.0.0.1:80", now).with_stale_threshold(Duration::from_secs(10)));
        pool.put(Endpoint::new("10.0.0.2:80", now));

        let later = now + Duration::from_secs(20);
        let default_threshold = Duration::from_secs(120);
        let reported: Vec<_> = pool
            .endpoints_older_than(default_threshold, later)
            .map(|e| e.address().to_string())
            .collect();
        let pruned: Vec<_> = pool
            .prune_stale(default_threshold, later)
            .iter()
            .map(|e| e.address().to_string())
            .collect();
        assert_eq!(reported, vec!["10.0.0.1:80"]);
        assert_eq!(reported, pruned);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn exact_selection_is_deterministic() {
        let now = Instant::now();
        let pool = pool(now);
        pool.put(Endpoint::new("10.0.0.1:80", now).with_app("app", "0"));
        pool.put(Endpoint::new("10.0.0.2:80", now).with_app("app", "1"));

        let wanted = Selection::Instance {
            app_id: "app".into(),
            instance_index: "1".into(),
        };
        let snapshot = pool.snapshot();
        for _ in 0..5 {
            assert_eq!(snapshot.select_endpoint(&wanted).unwrap().address(), "10.0.0.2:80");
        }
        let missing = Selection::Instance {
            app_id: "app".into(),
            instance_index: "7".into(),
        };
        assert!(snapshot.select_endpoint(&missing).is_none());
        assert!(snapshot.select_endpoint(&Selection::Any).is_some());
    }

    #[test]
    fn empty_pool_expires_after_ttl_only() {
        let now = Instant::now();
        let pool = pool(now);
        pool.put(Endpoint::new("10.0.0.1:80", now));
        pool.remove("10.0.0.1:80", now);

        assert!(!pool.is_expired(now + Duration::from_secs(60)));
        assert!(pool.is_expired(now + Duration::from_secs(121)));
    }

    #[test]
    fn non_empty_pool_never_expires() {
        let now = Instant::now();
        let pool = pool(now);
        pool.put(Endpoint::new("10.0.0.1:80", now));
        assert!(!pool.is_expired(now + Duration::from_secs(10_000)));
    }

    #[test]
    fn prune_keeps_refreshed_endpoints() {
        let now = Instant::now();
        let pool = pool(now);
        pool.put(Endpoint::new("10.0.0.1:80", now));
        pool.put(Endpoint::new("10.0.0.2:80", now));
        // Heartbeat for the second endpoint lands before the sweep.
        pool.put(Endpoint::new("10.0.0.2:80", now + Duration::from_secs(100)));

        let removed = pool.prune_stale(Duration::from_secs(30), now + Duration::from_secs(110));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].address(), "10.0.0.1:80");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn snapshot_is_not_affected_by_later_mutation() {
        let now = Instant::now();
        let pool = pool(now);
        pool.put(Endpoint::new("10.0.0.1:80", now));
        let before = pool.snapshot();
        pool.remove("10.0.0.1:80", now);
        assert_eq!(before.len(), 1);
        assert!(pool.snapshot().is_empty());
    }

    #[test]
    fn forward_path_strips_context_when_enabled() {
        let now = Instant::now();
        let options = PoolOptions {
            strip_context_path: true,
            ..PoolOptions::default()
        };
        let pool = Pool::new(RouteKey::parse("example.com/api").unwrap(), options, now);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.forward_path("/api/v1/users"), "/v1/users");
        assert_eq!(snapshot.forward_path("/api"), "/");
        assert_eq!(snapshot.forward_path("/apix"), "/apix");

        let plain = Pool::new(RouteKey::parse("example.com/api").unwrap(), PoolOptions::default(), now);
        assert_eq!(plain.snapshot().forward_path("/api/v1"), "/api/v1");
    }
}
