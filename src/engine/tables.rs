use tracing::{debug, info};

use super::Engine;
use crate::error::PolyDbError;
use crate::request::{Payload, RequestOptions};
use crate::schema::Tables;
use crate::types::Op;

impl Engine {
    /// Declared tables served by `pool`: routed to it, or unrouted when it is the default.
    #[must_use]
    pub fn tables_for(&self, pool: &str) -> Tables {
        let tables = match self.tables.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tables
            .iter()
            .filter(|(name, _)| self.pools.resolve(None, name).name() == pool)
            .map(|(name, def)| (name.clone(), def.clone()))
            .collect()
    }

    /// Re-read the live schema of a pool and overlay its declared tables.
    ///
    /// # Errors
    /// `PoolNotFound`, pool or introspection errors.
    pub async fn cache_columns(&self, pool: &str) -> Result<(), PolyDbError> {
        let declared = self.tables_for(pool);
        self.pools.get(pool).cache_columns(&declared).await
    }

    /// Create the declared tables missing from a pool and upgrade the others, then re-read the
    /// schema if anything changed. Returns the number of changed tables.
    ///
    /// # Errors
    /// The first failing create or upgrade, or schema errors.
    pub async fn init_tables(&self, pool: &str) -> Result<usize, PolyDbError> {
        self.cache_columns(pool).await?;
        let handle = self.pools.get(pool);
        let schema = handle.schema()?;
        let opts = RequestOptions::new().pool(pool);

        let mut changes = 0;
        for (table, def) in self.tables_for(pool) {
            if schema.is_live(&table) {
                if self.prepare(Op::Upgrade, &table, Payload::Table(&def), &opts)?.is_some() {
                    self.upgrade(&table, &def, &opts).await?;
                    changes += 1;
                }
            } else {
                self.create(&table, &def, &opts).await?;
                changes += 1;
            }
        }
        debug!("engine: {pool}: {changes} tables changed");
        if changes > 0 {
            self.cache_columns(pool).await?;
            info!("engine: {pool}: created or upgraded {changes} tables");
        }
        Ok(changes)
    }
}
