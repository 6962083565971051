use serde_json::Value as JsonValue;

use super::RowHook;
use crate::error::PolyDbError;
use crate::request::RequestOptions;
use crate::schema::SchemaSnapshot;
use crate::types::{ColumnType, Record, RowValues};

/// Parse JSON text of `json` columns and fill the component columns of joined values.
fn convert_row(row: &mut Record, table: &str, opts: &RequestOptions, schema: &SchemaSnapshot) {
    let Some(columns) = schema.table(table) else {
        return;
    };
    for col in columns.values() {
        let ty = opts.types.get(&col.name).unwrap_or(&col.ty);
        if *ty != ColumnType::Json {
            continue;
        }
        if let Some(value) = row.get_mut(&col.name) {
            if let RowValues::Text(text) = value {
                if let Ok(json) = serde_json::from_str::<JsonValue>(text) {
                    *value = RowValues::JSON(json);
                }
            }
        }
    }
    for col in columns.values().filter(|c| !c.join.is_empty()) {
        let Some(RowValues::Text(joined)) = row.get(&col.name) else {
            continue;
        };
        let parts: Vec<String> = joined.split('|').map(str::to_string).collect();
        if parts.len() != col.join.len() {
            continue;
        }
        for (name, part) in col.join.iter().zip(parts) {
            if !row.contains_key(name) {
                let ty = columns.get(name).map_or(ColumnType::Text, |c| c.ty.clone());
                row.insert(name.clone(), crate::request::coerce_value(RowValues::Text(part), &ty));
            }
        }
    }
}

/// Post-process returned rows in order: conversions, row hooks, the result filter, the async
/// filter, then removal of hidden columns unless `all_columns`.
///
/// # Errors
/// The async filter's error; no partial row set is returned.
pub(super) async fn process_rows(
    rows: Vec<Record>,
    table: &str,
    opts: &RequestOptions,
    schema: &SchemaSnapshot,
    hooks: &[RowHook],
) -> Result<Vec<Record>, PolyDbError> {
    let hidden: Vec<String> = if opts.is_all_columns() {
        Vec::new()
    } else {
        schema
            .table(table)
            .into_iter()
            .flat_map(|cols| cols.values())
            .filter(|c| c.hidden)
            .map(|c| c.name.clone())
            .collect()
    };

    let mut out = Vec::with_capacity(rows.len());
    for mut row in rows {
        convert_row(&mut row, table, opts, schema);
        if hooks.iter().any(|hook| hook(&mut row, opts)) {
            continue;
        }
        if opts.filter.as_ref().is_some_and(|f| !f.keep(&row)) {
            continue;
        }
        let row = match &opts.async_filter {
            Some(filter) => match filter.apply(row).await? {
                Some(row) => row,
                None => continue,
            },
            None => row,
        };
        out.push(row);
    }
    if !hidden.is_empty() {
        for row in &mut out {
            for name in &hidden {
                row.remove(name);
            }
        }
    }
    Ok(out)
}
