use std::collections::BTreeMap;

use tokio_postgres::Client;

use crate::error::PolyDbError;
use crate::schema::{ColumnDef, IndexKind, IndexSpec, SchemaSnapshot};
use crate::types::ColumnType;

const COLUMNS: &str = "SELECT table_name::text, column_name::text, data_type::text, udt_name::text, \
     column_default::text, is_nullable::text, ordinal_position::int \
     FROM information_schema.columns WHERE table_schema = $1 \
     ORDER BY table_name, ordinal_position";

const CONSTRAINTS: &str = "SELECT tc.table_name::text, kcu.column_name::text, tc.constraint_type::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
     WHERE tc.table_schema = $1 AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE') \
     ORDER BY tc.table_name, kcu.ordinal_position";

const INDEXES: &str = "SELECT tablename::text, indexname::text, indexdef FROM pg_indexes WHERE schemaname = $1";

/// Logical type of an `information_schema` column; arrays keep their element type name.
fn column_type(data_type: &str, udt_name: &str) -> ColumnType {
    match data_type {
        "ARRAY" => ColumnType::Other(udt_name.trim_start_matches('_').to_string() + "[]"),
        "USER-DEFINED" => ColumnType::parse(udt_name),
        other => ColumnType::parse(other),
    }
}

/// Column list of an index definition: `CREATE INDEX x ON public.t USING btree (a, b)`.
fn index_def_columns(def: &str) -> Vec<String> {
    let Some(open) = def.rfind('(') else {
        return Vec::new();
    };
    def[open + 1..]
        .trim_end_matches(')')
        .split(',')
        .map(|c| c.trim().trim_matches('"').to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Columns, primary/unique keys and indexes of one schema.
pub(crate) async fn introspect(client: &Client, schema: &str) -> Result<SchemaSnapshot, PolyDbError> {
    let mut snap = SchemaSnapshot::default();

    for row in client.query(COLUMNS, &[&schema]).await? {
        let table: String = row.try_get(0)?;
        let name: String = row.try_get(1)?;
        let data_type: String = row.try_get(2)?;
        let udt_name: String = row.try_get(3)?;
        let default: Option<String> = row.try_get(4)?;
        let nullable: String = row.try_get(5)?;
        let position: i32 = row.try_get(6)?;

        let mut col = ColumnDef::new(name).with_type(column_type(&data_type, &udt_name));
        col.serial = default.as_deref().is_some_and(|d| d.starts_with("nextval("));
        col.nullable = nullable == "YES";
        col.position = u32::try_from(position).ok();
        col.data_type = Some(if data_type == "ARRAY" { udt_name } else { data_type });
        snap.insert_column(&table, col);
    }

    let mut primary: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in client.query(CONSTRAINTS, &[&schema]).await? {
        let table: String = row.try_get(0)?;
        let column: String = row.try_get(1)?;
        let kind: String = row.try_get(2)?;
        let lower = table.to_lowercase();
        let Some(col) = snap.columns.get_mut(&lower).and_then(|cols| cols.get_mut(&column)) else {
            continue;
        };
        if kind == "PRIMARY KEY" {
            col.primary = true;
            primary.entry(lower).or_default().push(column);
        } else if !col.primary {
            col.unique = true;
        }
    }
    snap.keys.extend(primary);

    for row in client.query(INDEXES, &[&schema]).await? {
        let table: String = row.try_get(0)?;
        let name: String = row.try_get(1)?;
        let def: String = row.try_get(2)?;
        let kind = if def.starts_with("CREATE UNIQUE") {
            IndexKind::Unique
        } else {
            IndexKind::Index
        };
        snap.indexes
            .entry(table.to_lowercase())
            .or_default()
            .push(IndexSpec::new(name, kind, index_def_columns(&def)));
    }
    Ok(snap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_definition_columns() {
        assert_eq!(
            index_def_columns("CREATE UNIQUE INDEX t_udx ON public.t USING btree (email, \"Name\")"),
            vec!["email", "Name"]
        );
        assert_eq!(column_type("ARRAY", "_int8"), ColumnType::Other("int8[]".into()));
        assert_eq!(column_type("USER-DEFINED", "tsvector"), ColumnType::TsVector);
        assert_eq!(column_type("character varying", "varchar"), ColumnType::Text);
    }
}
