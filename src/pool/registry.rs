use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use super::AnyPool;

#[derive(Debug, Default)]
struct Inner {
    pools: HashMap<String, Arc<AnyPool>>,
    /// table (lowercase) -> pool name
    routes: HashMap<String, String>,
    default: Option<String>,
}

/// Process-wide set of named pools with explicit init and shutdown. Shared by `Arc`.
///
/// Lookups never fail: an unknown name resolves to a `Missing` sentinel pool that errors
/// on use.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    inner: RwLock<Inner>,
}

impl PoolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        match self.inner.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        match self.inner.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Register a pool, replacing (and shutting down) one with the same name. The first pool
    /// registered becomes the default.
    pub fn insert(&self, pool: AnyPool) -> Arc<AnyPool> {
        let pool = Arc::new(pool);
        let name = pool.name().to_string();
        let previous = self.write(|inner| {
            inner.default.get_or_insert_with(|| name.clone());
            inner.pools.insert(name.clone(), Arc::clone(&pool))
        });
        if let Some(previous) = previous {
            previous.shutdown();
        }
        info!("pool: registered {name}");
        pool
    }

    pub fn set_default(&self, name: impl Into<String>) {
        let name = name.into();
        self.write(|inner| inner.default = Some(name));
    }

    /// Route a table to a pool when the call does not name one.
    pub fn route(&self, table: &str, pool: impl Into<String>) {
        let pool = pool.into();
        self.write(|inner| inner.routes.insert(table.to_lowercase(), pool));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Arc<AnyPool> {
        self.read(|inner| inner.pools.get(name).cloned())
            .unwrap_or_else(|| Arc::new(AnyPool::missing(name)))
    }

    /// Pool for a call: explicit name, then the table route, then the default pool.
    #[must_use]
    pub fn resolve(&self, explicit: Option<&str>, table: &str) -> Arc<AnyPool> {
        let name = self.read(|inner| {
            explicit
                .map(str::to_string)
                .or_else(|| inner.routes.get(&table.to_lowercase()).cloned())
                .or_else(|| inner.default.clone())
        });
        match name {
            Some(name) => self.get(&name),
            None => Arc::new(AnyPool::missing("default")),
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read(|inner| inner.pools.keys().cloned().collect());
        names.sort();
        names
    }

    #[must_use]
    pub fn pools(&self) -> Vec<Arc<AnyPool>> {
        self.read(|inner| inner.pools.values().cloned().collect())
    }

    /// Drop every pool. In-flight requests keep their `Arc` and finish; idle clients close
    /// when the last handle goes.
    pub fn shutdown(&self) {
        let pools: Vec<Arc<AnyPool>> = self.write(|inner| {
            inner.routes.clear();
            inner.default = None;
            inner.pools.drain().map(|(_, pool)| pool).collect()
        });
        for pool in pools {
            info!("pool: shutdown {}", pool.name());
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolyDbError;

    #[test]
    fn unknown_pools_fail_loudly() {
        let registry = PoolRegistry::new();
        let pool = registry.resolve(None, "users");
        assert!(pool.is_missing());
        assert!(matches!(pool.schema(), Err(PolyDbError::PoolNotFound(_))));

        let named = registry.get("nope");
        assert_eq!(named.name(), "nope");
    }
}
