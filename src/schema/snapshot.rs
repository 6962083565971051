use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::column::ColumnDef;
use super::table::{IndexSpec, TableDef};

/// Declared tables keyed by name.
pub type Tables = BTreeMap<String, TableDef>;

/// Per-pool metadata: table → columns, primary keys and indexes.
///
/// Table names are stored lowercase; lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaSnapshot {
    pub columns: BTreeMap<String, BTreeMap<String, ColumnDef>>,
    pub keys: BTreeMap<String, Vec<String>>,
    pub indexes: BTreeMap<String, Vec<IndexSpec>>,
    /// Leading primary keys forming the partition key, for backends that report one.
    pub partitions: BTreeMap<String, usize>,
}

impl SchemaSnapshot {
    #[must_use]
    pub fn table(&self, table: &str) -> Option<&BTreeMap<String, ColumnDef>> {
        self.columns.get(&table.to_lowercase())
    }

    #[must_use]
    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnDef> {
        self.table(table).and_then(|cols| cols.get(column))
    }

    /// Primary keys, empty when unknown.
    #[must_use]
    pub fn keys(&self, table: &str) -> &[String] {
        self.keys
            .get(&table.to_lowercase())
            .map_or(&[], Vec::as_slice)
    }

    /// Partition key columns: the reported prefix of the primary key, else its first column.
    #[must_use]
    pub fn partition_keys(&self, table: &str) -> &[String] {
        let keys = self.keys(table);
        let n = self.partitions.get(&table.to_lowercase()).copied().unwrap_or(1);
        &keys[..n.min(keys.len())]
    }

    #[must_use]
    pub fn indexes(&self, table: &str) -> &[IndexSpec] {
        self.indexes
            .get(&table.to_lowercase())
            .map_or(&[], Vec::as_slice)
    }

    /// Column definitions that exist in the live schema (not `fake`).
    pub fn live_columns<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a ColumnDef> + use<'a> {
        self.table(table)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|c| !c.fake)
    }

    /// Register a live column as reported by introspection.
    pub fn insert_column(&mut self, table: &str, column: ColumnDef) {
        self.columns
            .entry(table.to_lowercase())
            .or_default()
            .insert(column.name.clone(), column);
    }

    /// Overlay declared definitions onto the live columns.
    ///
    /// Declared columns missing live are inserted with `fake = true`; columns present in both
    /// get `fake` cleared and the declared flags copied. Applying it again is a no-op.
    pub fn merge_columns(&mut self, declared: &Tables) {
        for (table, def) in declared {
            let lower = table.to_lowercase();
            let live = self.columns.entry(lower.clone()).or_default();
            for (position, col) in def.columns.iter().enumerate() {
                match live.get_mut(&col.name) {
                    Some(existing) => existing.overlay(col),
                    None => {
                        let mut fake = col.clone();
                        fake.fake = true;
                        if fake.position.is_none() {
                            fake.position = u32::try_from(position + 1).ok();
                        }
                        live.insert(col.name.clone(), fake);
                    }
                }
            }

            let indexes = self.indexes.entry(lower).or_default();
            for spec in def.index_specs(table) {
                if !indexes.iter().any(|ix| ix.name == spec.name) {
                    indexes.push(IndexSpec { fake: true, ..spec });
                }
            }
        }
    }

    /// Fill primary keys from `primary` flags when the backend did not report any,
    /// and flag the key columns as primary.
    pub fn merge_keys(&mut self, declared: &Tables) {
        for (table, def) in declared {
            let lower = table.to_lowercase();
            let keys = self.keys.entry(lower.clone()).or_default();
            if keys.is_empty() {
                *keys = def.primary_keys();
            }
            if let Some(cols) = self.columns.get_mut(&lower) {
                for key in keys.iter() {
                    if let Some(col) = cols.get_mut(key) {
                        col.primary = true;
                    }
                }
            }
        }
    }

    /// True when at least one column of the table exists in the live schema.
    #[must_use]
    pub fn is_live(&self, table: &str) -> bool {
        self.live_columns(table).next().is_some()
    }
}

/// Shared, swappable snapshot. Readers clone the `Arc` and never see a partial update.
#[derive(Debug, Default)]
pub struct SchemaCache {
    current: RwLock<Arc<SchemaSnapshot>>,
}

impl SchemaCache {
    #[must_use]
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, snapshot: SchemaSnapshot) {
        let next = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    fn declared() -> Tables {
        let mut tables = Tables::new();
        tables.insert(
            "Users".into(),
            TableDef::new()
                .column(ColumnDef::new("id").primary())
                .column(ColumnDef::new("name"))
                .column(ColumnDef::new("meta").with_type(ColumnType::Json).hidden()),
        );
        tables
    }

    fn live() -> SchemaSnapshot {
        let mut snap = SchemaSnapshot::default();
        snap.insert_column("users", ColumnDef::new("id"));
        snap.insert_column("users", ColumnDef::new("name"));
        snap
    }

    #[test]
    fn missing_columns_become_fake() {
        let mut snap = live();
        snap.merge_columns(&declared());
        snap.merge_keys(&declared());
        let meta = snap.column("USERS", "meta").unwrap();
        assert!(meta.fake);
        assert!(meta.hidden);
        assert!(!snap.column("users", "id").unwrap().fake);
        assert_eq!(snap.keys("users"), ["id".to_string()]);
        assert!(snap.column("users", "id").unwrap().primary);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut once = live();
        once.merge_columns(&declared());
        once.merge_keys(&declared());
        let mut twice = once.clone();
        twice.merge_columns(&declared());
        twice.merge_keys(&declared());
        assert_eq!(once, twice);
    }

    #[test]
    fn cache_swaps_whole_snapshot() {
        let cache = SchemaCache::default();
        let before = cache.snapshot();
        cache.replace(live());
        assert!(before.table("users").is_none());
        assert!(cache.snapshot().table("users").is_some());
    }
}
