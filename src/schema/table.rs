use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

use super::column::{ColumnBody, ColumnDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Unique,
    Index,
    /// Secondary index on the first primary key plus the flagged columns.
    HashIndex,
}

/// A named, ordered composite index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
    /// Declared but not present in the live schema.
    #[serde(skip)]
    pub fake: bool,
}

impl IndexSpec {
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, kind: IndexKind, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            kind,
            fake: false,
        }
    }

    #[must_use]
    pub fn unique<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, IndexKind::Unique, columns)
    }

    #[must_use]
    pub fn index<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, IndexKind::Index, columns)
    }
}

/// A declared table: columns in declaration order plus explicit index specs.
///
/// From JSON, a table is an object keyed by column name; the reserved `_indexes` key holds
/// a list of [`IndexSpec`]s. Key order in the document is preserved, so composite primary
/// keys follow declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDef {
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexSpec>,
}

impl TableDef {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key columns in declaration order.
    #[must_use]
    pub fn primary_keys(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Explicit index specs followed by the ones implied by column flags:
    /// `{table}_udx` (unique), `{table}_idx` (index), `{table}_rdx` (hashindex).
    #[must_use]
    pub fn index_specs(&self, table: &str) -> Vec<IndexSpec> {
        let mut specs = self.indexes.clone();
        let flagged = |pred: fn(&ColumnDef) -> bool| -> Vec<String> {
            self.columns
                .iter()
                .filter(|c| pred(c) && !c.primary)
                .map(|c| c.name.clone())
                .collect()
        };

        let unique = flagged(|c| c.unique);
        if !unique.is_empty() {
            specs.push(IndexSpec::unique(format!("{table}_udx"), unique));
        }
        let index = flagged(|c| c.index);
        if !index.is_empty() {
            specs.push(IndexSpec::index(format!("{table}_idx"), index));
        }
        let hash = flagged(|c| c.hashindex);
        if !hash.is_empty() {
            let mut cols: Vec<String> = self.primary_keys().into_iter().take(1).collect();
            cols.extend(hash);
            specs.push(IndexSpec::new(format!("{table}_rdx"), IndexKind::HashIndex, cols));
        }
        specs
    }
}

impl<'de> Deserialize<'de> for TableDef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = TableDef;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object keyed by column name")
            }

            fn visit_map<A>(self, mut map: A) -> Result<TableDef, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut table = TableDef::default();
                while let Some(name) = map.next_key::<String>()? {
                    if name == "_indexes" {
                        table.indexes = map.next_value()?;
                        continue;
                    }
                    if name.starts_with('_') {
                        return Err(de::Error::custom(format!(
                            "reserved column name: {name}"
                        )));
                    }
                    let body: ColumnBody = map.next_value()?;
                    table.columns.push(body.into_def(name));
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    #[test]
    fn json_keeps_declaration_order() {
        let table: TableDef = serde_json::from_str(
            r#"{
                "name": {"primary": true},
                "domain": {"primary": true},
                "hits": {"type": "counter", "index": true},
                "_indexes": [{"name": "c_hits", "columns": ["hits", "name"], "kind": "index"}]
            }"#,
        )
        .unwrap();
        assert_eq!(table.primary_keys(), vec!["name", "domain"]);
        assert_eq!(table.get("hits").unwrap().ty, ColumnType::Counter);
        let specs = table.index_specs("c");
        assert_eq!(specs[0].name, "c_hits");
        assert_eq!(specs[1].name, "c_idx");
        assert_eq!(specs[1].columns, vec!["hits"]);
    }

    #[test]
    fn hashindex_leads_with_partition_key() {
        let table = TableDef::new()
            .column(ColumnDef::new("id").primary())
            .column(ColumnDef::new("geohash").hashindex());
        let specs = table.index_specs("loc");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].kind, IndexKind::HashIndex);
        assert_eq!(specs[0].columns, vec!["id", "geohash"]);
    }
}
