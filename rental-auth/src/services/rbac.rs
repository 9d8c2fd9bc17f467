//! Role-based permission evaluation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::{permission::default_grants, Permission, Role};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

type GrantSet = Arc<HashSet<Permission>>;

/// Resolves role grants once per role and caches them for a short TTL.
/// Evaluation itself has no side effects beyond that cache.
pub struct RbacEvaluator {
    table: HashMap<Role, Vec<Permission>>,
    cache: DashMap<Role, (Instant, GrantSet)>,
    ttl: Duration,
}

impl Default for RbacEvaluator {
    fn default() -> Self {
        Self::new(default_grants(), DEFAULT_CACHE_TTL)
    }
}

impl RbacEvaluator {
    pub fn new(table: HashMap<Role, Vec<Permission>>, ttl: Duration) -> Self {
        Self {
            table,
            cache: DashMap::new(),
            ttl,
        }
    }

    fn grants_for(&self, role: Role) -> GrantSet {
        if let Some(entry) = self.cache.get(&role) {
            let (resolved_at, grants) = entry.value();
            if resolved_at.elapsed() < self.ttl {
                return grants.clone();
            }
        }
        let grants: GrantSet = Arc::new(
            self.table
                .get(&role)
                .map(|g| g.iter().cloned().collect())
                .unwrap_or_default(),
        );
        self.cache.insert(role, (Instant::now(), grants.clone()));
        grants
    }

    /// True when any grant of `role` covers `(action, resource)`, wildcards
    /// included.
    pub fn has_permission(&self, role: Role, action: &str, resource: &str) -> bool {
        if role == Role::SuperAdmin {
            return true;
        }
        self.grants_for(role)
            .iter()
            .any(|grant| grant.grants(action, resource))
    }
}
