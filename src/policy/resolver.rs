//! Route → policy resolution over immutable, atomically swapped snapshots

use super::route::Route;
use super::types::Policy;
use crate::config::{AnzenConfig, PolicyConfig};
use crate::error::Result;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Upper bound on memoized routes per snapshot
pub const MAX_CACHED_ROUTES: usize = 4096;

/// Immutable policy table captured by one or more decision cycles
#[derive(Debug)]
pub struct PolicySnapshot {
    version: u64,
    table: BTreeMap<String, Arc<Policy>>,
    fallback: Arc<Policy>,
    cache: DashMap<String, Arc<Policy>>,
}

impl PolicySnapshot {
    /// Build a snapshot from route-prefix keyed policy entries.
    pub fn from_policies(version: u64, policies: &BTreeMap<String, PolicyConfig>) -> Self {
        let table = policies
            .iter()
            .map(|(prefix, entry)| {
                let route = Route::parse(prefix);
                let policy = Policy {
                    id: route.as_str().to_string(),
                    block_entities: entry.block_entities.clone().into(),
                    redact_entities: entry.redact_entities.clone().into(),
                    risk_threshold: entry.risk_threshold,
                    min_confidence: entry.min_confidence.clone(),
                    rejection_message: AnzenConfig::rejection_message(entry),
                };
                (route.as_str().to_string(), Arc::new(policy))
            })
            .collect();

        Self::with_table(version, table)
    }

    /// Build a snapshot from already-constructed policies, keyed by `Policy::id`.
    pub fn from_table(version: u64, policies: impl IntoIterator<Item = Policy>) -> Self {
        let table = policies
            .into_iter()
            .map(|p| (Route::parse(&p.id).as_str().to_string(), Arc::new(p)))
            .collect();
        Self::with_table(version, table)
    }

    fn with_table(version: u64, table: BTreeMap<String, Arc<Policy>>) -> Self {
        Self {
            version,
            table,
            fallback: Arc::new(Policy::restrictive_default()),
            cache: DashMap::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of memoized routes
    pub fn cached_routes(&self) -> usize {
        self.cache.len()
    }

    /// Configured route prefixes in order
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Resolve a route: first (most specific) configured prefix wins,
    /// otherwise the restrictive default.
    pub fn resolve(&self, route: &Route) -> Arc<Policy> {
        if let Some(hit) = self.cache.get(route.as_str()) {
            return Arc::clone(hit.value());
        }

        let hit = route
            .candidates()
            .into_iter()
            .find_map(|candidate| self.table.get(candidate))
            .cloned();

        match hit {
            Some(policy) => {
                // Only hits are memoized, up to a fixed number of routes.
                if self.cache.len() < MAX_CACHED_ROUTES {
                    self.cache
                        .insert(route.as_str().to_string(), Arc::clone(&policy));
                }
                policy
            }
            None => {
                tracing::debug!(route = %route, "No policy matched, using restrictive default");
                Arc::clone(&self.fallback)
            }
        }
    }
}

/// Policy resolver holding the current snapshot
///
/// Readers clone the snapshot `Arc` and work against it for the rest of the
/// request; `reload` replaces the `Arc` and never touches a published table.
#[derive(Debug)]
pub struct PolicyResolver {
    current: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyResolver {
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Build the initial snapshot (version 1) from configuration.
    pub fn from_config(config: &AnzenConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(PolicySnapshot::from_policies(1, &config.policies)))
    }

    /// Current snapshot; hold on to it for a consistent view across calls.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Resolve against the current snapshot.
    pub fn resolve(&self, route: &Route) -> Arc<Policy> {
        self.snapshot().resolve(route)
    }

    /// Validate `config` and publish a new snapshot. On error the current
    /// snapshot stays in place.
    pub fn reload(&self, config: &AnzenConfig) -> Result<u64> {
        config.validate()?;
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let version = guard.version + 1;
        *guard = Arc::new(PolicySnapshot::from_policies(version, &config.policies));
        tracing::info!(version, policies = config.policies.len(), "Policy snapshot reloaded");
        Ok(version)
    }
}
