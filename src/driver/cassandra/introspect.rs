use std::collections::BTreeMap;

use super::CqlSession;
use crate::error::PolyDbError;
use crate::schema::{ColumnDef, IndexSpec, SchemaSnapshot};
use crate::types::{ColumnType, Record, RowValues};

const COLUMNS: &str = "SELECT table_name, column_name, kind, position, type \
     FROM system_schema.columns WHERE keyspace_name = ?";

const INDEXES: &str = "SELECT table_name, index_name, options \
     FROM system_schema.indexes WHERE keyspace_name = ?";

fn text(row: &Record, name: &str) -> Option<String> {
    row.get(name).and_then(RowValues::as_text).map(str::to_string)
}

/// Target column of a secondary index: `options` is a map with a `target` entry.
fn index_target(options: Option<&RowValues>) -> Option<String> {
    match options? {
        RowValues::JSON(json) => json.get("target")?.as_str().map(str::to_string),
        RowValues::Text(s) => serde_json::from_str::<serde_json::Value>(s)
            .ok()?
            .get("target")?
            .as_str()
            .map(str::to_string),
        _ => None,
    }
}

pub(crate) async fn introspect(session: &dyn CqlSession, keyspace: &str) -> Result<SchemaSnapshot, PolyDbError> {
    let mut snap = SchemaSnapshot::default();
    let ks = [RowValues::Text(keyspace.to_string())];

    // table -> (kind rank, position, column)
    let mut keys: BTreeMap<String, Vec<(u8, i64, String)>> = BTreeMap::new();
    for row in session.execute(COLUMNS, &ks).await? {
        let (Some(table), Some(name)) = (text(&row, "table_name"), text(&row, "column_name")) else {
            continue;
        };
        let kind = text(&row, "kind").unwrap_or_default();
        let native = text(&row, "type").unwrap_or_default();
        let position = row.get("position").and_then(RowValues::as_int).copied().unwrap_or(0);

        let mut col = ColumnDef::new(&name).with_type(ColumnType::parse(&native));
        col.data_type = Some(native);
        let rank = match kind.as_str() {
            "partition_key" => Some(0),
            "clustering" => Some(1),
            _ => None,
        };
        if let Some(rank) = rank {
            col.primary = true;
            col.nullable = false;
            keys.entry(table.to_lowercase()).or_default().push((rank, position, name));
        }
        snap.insert_column(&table, col);
    }
    for (table, mut cols) in keys {
        cols.sort();
        let partition = cols.iter().filter(|(rank, _, _)| *rank == 0).count();
        snap.partitions.insert(table.clone(), partition);
        snap.keys.insert(table, cols.into_iter().map(|(_, _, name)| name).collect());
    }

    for row in session.execute(INDEXES, &ks).await? {
        let (Some(table), Some(name)) = (text(&row, "table_name"), text(&row, "index_name")) else {
            continue;
        };
        if let Some(target) = index_target(row.get("options")) {
            snap.indexes
                .entry(table.to_lowercase())
                .or_default()
                .push(IndexSpec::index(name, [target]));
        }
    }
    Ok(snap)
}
