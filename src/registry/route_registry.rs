//! The route table.
//!
//! # Responsibilities
//! - Map normalized route keys to pools
//! - Create pools on first registration, never twice for one key
//! - Resolve request URIs (longest path, exact host before wildcard)
//! - Sweep stale endpoints and expired empty pools
//!
//! # Locking
//! `DashMap` shards guard the key → pool mapping. Each pool has its own
//! mutex for writers and a lock-free snapshot for readers. Locks are always
//! taken shard first, pool second.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::load_balancer::{Endpoint, Pool, PoolOptions, PoolSnapshot, PoolSummary};
use crate::observability::metrics;
use crate::registry::suspend::{NeverSuspend, SuspendPruning};
use crate::routing::{LookupError, RouteKey, RouteTable, RouteUri};

/// Defaults applied to endpoints and to pools created by the registry.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Age after which an endpoint without a shorter TTL hint is stale.
    pub stale_threshold: Duration,
    pub pool: PoolOptions,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(120),
            pool: PoolOptions::default(),
        }
    }
}

/// What one prune sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub endpoints_removed: usize,
    pub pools_removed: usize,
    /// The sweep was skipped by the suspend predicate.
    pub suspended: bool,
}

pub struct RouteRegistry {
    pools: DashMap<String, Arc<Pool>>,
    /// Deepest context path ever registered. Bounds the lookup walk.
    max_depth: AtomicUsize,
    options: RegistryOptions,
    suspend: Arc<dyn SuspendPruning>,
}

impl RouteRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            pools: DashMap::new(),
            max_depth: AtomicUsize::new(0),
            options,
            suspend: Arc::new(NeverSuspend),
        }
    }

    /// Replace the suspend predicate consulted by [`RouteRegistry::prune`].
    pub fn with_suspend(mut self, suspend: Arc<dyn SuspendPruning>) -> Self {
        self.suspend = suspend;
        self
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Add or refresh `endpoint` under `key`. Returns true for a new address.
    pub fn register(&self, key: &RouteKey, endpoint: Endpoint) -> bool {
        let address = endpoint.address().to_string();
        // Raised before the pool becomes visible, so no lookup can see the
        // pool with a walk too shallow to reach it.
        self.max_depth.fetch_max(key.depth(), Ordering::Release);
        // The entry guard is held across create and put, so a concurrent
        // sweep cannot drop the pool between the two.
        let pool = self.pools.entry(key.to_string()).or_insert_with(|| {
            tracing::info!(route = %key, "Route created");
            Arc::new(Pool::new(
                key.clone(),
                self.options.pool.clone(),
                endpoint.updated_at(),
            ))
        });
        let added = pool.put(endpoint);
        drop(pool);

        if added {
            tracing::debug!(route = %key, address = %address, "Endpoint registered");
        }
        added
    }

    /// Remove `address` from `key`. Unknown routes and addresses are ignored.
    ///
    /// An emptied pool stays until its TTL runs out.
    pub fn unregister(&self, key: &RouteKey, address: &str) -> bool {
        let removed = self
            .pools
            .get(&key.to_string())
            .map(|pool| pool.remove(address, Instant::now()))
            .unwrap_or(false);
        if removed {
            tracing::debug!(route = %key, address = %address, "Endpoint unregistered");
        }
        removed
    }

    /// Most specific non-empty pool for `uri`.
    pub fn lookup(&self, uri: &RouteUri) -> Result<Arc<PoolSnapshot>, LookupError> {
        let max_depth = self.max_depth.load(Ordering::Acquire);
        uri.find_candidate(max_depth, |candidate| {
            let snapshot = self.pools.get(candidate)?.snapshot();
            (!snapshot.is_empty()).then_some(snapshot)
        })
        .ok_or(LookupError::RouteNotFound)
    }

    /// Resolve `uri`, then keep only the endpoints of one instance.
    pub fn lookup_with_instance(
        &self,
        uri: &RouteUri,
        app_id: &str,
        instance_index: &str,
    ) -> Result<Arc<PoolSnapshot>, LookupError> {
        let snapshot = self.lookup(uri)?;
        snapshot
            .with_instance(app_id, instance_index)
            .map(Arc::new)
            .ok_or_else(|| LookupError::InstanceNotFound {
                app_id: app_id.to_string(),
                instance_index: instance_index.to_string(),
            })
    }

    /// Remove stale endpoints, then expired empty pools.
    pub fn prune(&self, now: Instant) -> PruneReport {
        if self.suspend.should_suspend() {
            metrics::record_prune_suspended();
            return PruneReport {
                suspended: true,
                ..PruneReport::default()
            };
        }

        let mut report = PruneReport::default();
        for entry in self.pools.iter() {
            for endpoint in entry.value().prune_stale(self.options.stale_threshold, now) {
                tracing::info!(
                    route = %entry.key(),
                    address = endpoint.address(),
                    age_secs = endpoint.age(now).as_secs(),
                    "Pruned stale endpoint"
                );
                report.endpoints_removed += 1;
            }
        }

        self.pools.retain(|route, pool| {
            if pool.is_expired(now) {
                tracing::info!(route = %route, "Pruned expired route");
                report.pools_removed += 1;
                false
            } else {
                true
            }
        });

        metrics::record_prune(report.endpoints_removed, report.pools_removed);
        metrics::record_table_size(self.route_count(), self.endpoint_count());
        report
    }

    /// Every route with its endpoints, sorted by route.
    pub fn routes(&self, now: Instant) -> Vec<PoolSummary> {
        let mut routes: Vec<_> = self.pools.iter().map(|entry| entry.value().summary(now)).collect();
        routes.sort_by(|a, b| a.route.cmp(&b.route));
        routes
    }

    pub fn route_count(&self) -> usize {
        self.pools.len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.pools.iter().map(|entry| entry.value().len()).sum()
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new(RegistryOptions::default())
    }
}

impl std::fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRegistry")
            .field("routes", &self.pools.len())
            .field("options", &self.options)
            .finish()
    }
}

impl RouteTable for RouteRegistry {
    fn lookup(&self, uri: &RouteUri) -> Result<Arc<PoolSnapshot>, LookupError> {
        RouteRegistry::lookup(self, uri)
    }

    fn lookup_with_instance(
        &self,
        uri: &RouteUri,
        app_id: &str,
        instance_index: &str,
    ) -> Result<Arc<PoolSnapshot>, LookupError> {
        RouteRegistry::lookup_with_instance(self, uri, app_id, instance_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn key(route: &str) -> RouteKey {
        RouteKey::parse(route).unwrap()
    }

    fn uri(host: &str, path: &str) -> RouteUri {
        RouteUri::new(host, path)
    }

    #[test]
    fn lookup_strips_port_and_ignores_case() {
        let registry = RouteRegistry::default();
        registry.register(&key("app.example.com"), Endpoint::new("10.0.0.1:80", Instant::now()));

        let pool = registry.lookup(&uri("APP.example.com:8080", "/")).unwrap();
        assert_eq!(pool.key().host(), "app.example.com");
        assert_eq!(
            registry.lookup(&uri("other.example.com", "/")).unwrap_err(),
            LookupError::RouteNotFound
        );
    }

    #[test]
    fn longest_context_path_wins() {
        let registry = RouteRegistry::default();
        let now = Instant::now();
        registry.register(&key("example.com"), Endpoint::new("10.0.0.1:80", now));
        registry.register(&key("example.com/api"), Endpoint::new("10.0.0.2:80", now));
        registry.register(&key("example.com/api/v2"), Endpoint::new("10.0.0.3:80", now));

        let hit = |path| registry.lookup(&uri("example.com", path)).unwrap().key().to_string();
        assert_eq!(hit("/api/v2/users"), "example.com/api/v2");
        assert_eq!(hit("/api/v1"), "example.com/api");
        assert_eq!(hit("/apix"), "example.com");
        assert_eq!(hit("/"), "example.com");
    }

    #[test]
    fn long_request_paths_resolve_cheaply() {
        let registry = RouteRegistry::default();
        let deep_host = format!("{}example.com", "x.".repeat(20));
        let long_path = "/a".repeat(8_000);

        let start = Instant::now();
        assert!(registry.lookup(&uri(&deep_host, &long_path)).is_err());

        registry.register(&key("app.example.com/api"), Endpoint::new("10.0.0.1:80", Instant::now()));
        let hit = registry
            .lookup(&uri("app.example.com", &format!("/api{}", long_path)))
            .unwrap();
        assert_eq!(hit.key().to_string(), "app.example.com/api");
        assert!(registry.lookup(&uri(&deep_host, &long_path)).is_err());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn exact_host_beats_wildcard() {
        let registry = RouteRegistry::default();
        let now = Instant::now();
        registry.register(&key("*.example.com"), Endpoint::new("10.0.0.1:80", now));
        registry.register(&key("www.example.com"), Endpoint::new("10.0.0.2:80", now));

        let exact = registry.lookup(&uri("www.example.com", "/")).unwrap();
        assert_eq!(exact.endpoints()[0].address(), "10.0.0.2:80");
        let wild = registry.lookup(&uri("api.example.com", "/")).unwrap();
        assert_eq!(wild.endpoints()[0].address(), "10.0.0.1:80");
    }

    #[test]
    fn repeated_register_only_refreshes() {
        let registry = RouteRegistry::default();
        let now = Instant::now();
        assert!(registry.register(&key("example.com"), Endpoint::new("10.0.0.1:80", now)));
        assert!(!registry.register(
            &key("example.com"),
            Endpoint::new("10.0.0.1:80", now + Duration::from_secs(5))
        ));

        let pool = registry.lookup(&uri("example.com", "/")).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(registry.route_count(), 1);
        assert_eq!(pool.endpoints()[0].updated_at(), now + Duration::from_secs(5));
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = RouteRegistry::default();
        assert!(!registry.unregister(&key("nowhere.com"), "10.0.0.1:80"));
        registry.register(&key("example.com"), Endpoint::new("10.0.0.1:80", Instant::now()));
        assert!(!registry.unregister(&key("example.com"), "10.0.0.2:80"));
        assert!(registry.unregister(&key("example.com"), "10.0.0.1:80"));
    }

    #[test]
    fn emptied_pool_survives_until_ttl() {
        let registry = RouteRegistry::default();
        let now = Instant::now();
        registry.register(&key("example.com"), Endpoint::new("10.0.0.1:80", now));
        registry.unregister(&key("example.com"), "10.0.0.1:80");

        // Empty pool is not a route, but it still exists.
        assert!(registry.lookup(&uri("example.com", "/")).is_err());
        assert_eq!(registry.route_count(), 1);

        let report = registry.prune(Instant::now() + Duration::from_secs(10));
        assert_eq!(report.pools_removed, 0);
        assert_eq!(registry.route_count(), 1);

        let report = registry.prune(Instant::now() + Duration::from_secs(200));
        assert_eq!(report.pools_removed, 1);
        assert_eq!(registry.route_count(), 0);
    }

    #[test]
    fn prune_removes_stale_endpoints() {
        let registry = RouteRegistry::default();
        let now = Instant::now();
        registry.register(&key("example.com"), Endpoint::new("10.0.0.1:80", now));
        registry.register(
            &key("example.com"),
            Endpoint::new("10.0.0.2:80", now + Duration::from_secs(100)),
        );

        let report = registry.prune(now + Duration::from_secs(130));
        assert_eq!(report.endpoints_removed, 1);
        let pool = registry.lookup(&uri("example.com", "/")).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.endpoints()[0].address(), "10.0.0.2:80");
    }

    #[test]
    fn ttl_hint_prunes_early() {
        let registry = RouteRegistry::default();
        let now = Instant::now();
        registry.register(
            &key("example.com"),
            Endpoint::new("10.0.0.1:80", now).with_stale_threshold(Duration::from_secs(10)),
        );
        let report = registry.prune(now + Duration::from_secs(11));
        assert_eq!(report.endpoints_removed, 1);
    }

    #[test]
    fn suspended_sweep_touches_nothing() {
        let suspended = Arc::new(AtomicBool::new(true));
        let flag = suspended.clone();
        let registry = RouteRegistry::default()
            .with_suspend(Arc::new(move || flag.load(Ordering::SeqCst)));
        let now = Instant::now();
        registry.register(&key("example.com"), Endpoint::new("10.0.0.1:80", now));

        let far = now + Duration::from_secs(100_000);
        let report = registry.prune(far);
        assert!(report.suspended);
        assert_eq!(registry.endpoint_count(), 1);

        suspended.store(false, Ordering::SeqCst);
        let report = registry.prune(far);
        assert!(!report.suspended);
        assert_eq!(report.endpoints_removed, 1);
    }

    #[test]
    fn instance_lookup_distinguishes_failures() {
        let registry = RouteRegistry::default();
        let now = Instant::now();
        registry.register(&key("example.com"), Endpoint::new("10.0.0.1:80", now).with_app("app", "0"));
        registry.register(&key("example.com"), Endpoint::new("10.0.0.2:80", now).with_app("app", "1"));

        let pool = registry
            .lookup_with_instance(&uri("example.com", "/"), "app", "1")
            .unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.endpoints()[0].address(), "10.0.0.2:80");

        assert!(matches!(
            registry.lookup_with_instance(&uri("example.com", "/"), "app", "9"),
            Err(LookupError::InstanceNotFound { .. })
        ));
        assert_eq!(
            registry
                .lookup_with_instance(&uri("missing.com", "/"), "app", "1")
                .unwrap_err(),
            LookupError::RouteNotFound
        );
    }

    #[test]
    fn returned_snapshot_is_point_in_time() {
        let registry = RouteRegistry::default();
        registry.register(&key("example.com"), Endpoint::new("10.0.0.1:80", Instant::now()));
        let pool = registry.lookup(&uri("example.com", "/")).unwrap();
        registry.unregister(&key("example.com"), "10.0.0.1:80");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn routes_are_sorted() {
        let registry = RouteRegistry::default();
        let now = Instant::now();
        registry.register(&key("b.example.com"), Endpoint::new("10.0.0.1:80", now));
        registry.register(&key("a.example.com"), Endpoint::new("10.0.0.2:80", now));
        let routes: Vec<_> = registry.routes(now).into_iter().map(|r| r.route).collect();
        assert_eq!(routes, vec!["a.example.com", "b.example.com"]);
        assert_eq!(registry.endpoint_count(), 2);
    }
}
