use chrono::Utc;

use super::options::RequestOptions;
use crate::schema::{ColumnDef, SchemaSnapshot};
use crate::types::{ColumnType, Op, Record, RowValues};

const LIST_OPS: [&str; 4] = ["in", "not in", "between", "not between"];

/// Current time in the representation a column type expects.
#[must_use]
pub fn now_value(ty: &ColumnType) -> RowValues {
    let now = Utc::now();
    match ty {
        ColumnType::Int | ColumnType::Mtime | ColumnType::Counter => {
            RowValues::Int(now.timestamp_millis())
        }
        #[allow(clippy::cast_precision_loss)]
        ColumnType::Real => RowValues::Float(now.timestamp_millis() as f64),
        ColumnType::Date => RowValues::Timestamp(now.naive_utc()),
        _ => RowValues::Text(now.to_rfc3339()),
    }
}

/// Split a `,`- (numeric) or `|`-separated string into a list for `in`/`between`.
#[must_use]
pub fn split_list(value: &RowValues, ty: &ColumnType) -> RowValues {
    match value {
        RowValues::Text(s) => {
            let sep = if ty.is_numeric() { ',' } else { '|' };
            RowValues::List(
                s.split(sep)
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| coerce_value(RowValues::Text(part.to_string()), ty))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

/// Convert a value to the representation of a column type. Values that do not fit are
/// returned unchanged; empty strings for numeric and JSON types become NULL.
#[must_use]
pub fn coerce_value(value: RowValues, ty: &ColumnType) -> RowValues {
    match (ty, value) {
        (ColumnType::Int | ColumnType::Counter | ColumnType::Mtime, RowValues::Text(s)) => {
            let s = s.trim();
            if s.is_empty() {
                RowValues::Null
            } else if let Ok(i) = s.parse::<i64>() {
                RowValues::Int(i)
            } else if let Ok(f) = s.parse::<f64>() {
                RowValues::Float(f)
            } else {
                RowValues::Text(s.to_string())
            }
        }
        (ColumnType::Int | ColumnType::Counter | ColumnType::Mtime, RowValues::Bool(b)) => {
            RowValues::Int(i64::from(b))
        }
        (ColumnType::Real, RowValues::Text(s)) => {
            if s.trim().is_empty() {
                return RowValues::Null;
            }
            let parsed = s.trim().parse::<f64>();
            parsed.map_or(RowValues::Text(s), RowValues::Float)
        }
        #[allow(clippy::cast_precision_loss)]
        (ColumnType::Real, RowValues::Int(i)) => RowValues::Float(i as f64),
        (ColumnType::Bool, RowValues::Text(s)) => {
            match s.trim().to_ascii_lowercase().as_str() {
                "" => RowValues::Null,
                "1" | "t" | "true" | "yes" | "on" => RowValues::Bool(true),
                "0" | "f" | "false" | "no" | "off" => RowValues::Bool(false),
                _ => RowValues::Text(s),
            }
        }
        (ColumnType::Bool, RowValues::Int(i)) => RowValues::Bool(i != 0),
        (ColumnType::Date, RowValues::Int(ms)) => chrono::DateTime::from_timestamp_millis(ms)
            .map_or(RowValues::Int(ms), |dt| RowValues::Timestamp(dt.naive_utc())),
        (ColumnType::Date, RowValues::Text(s)) => {
            let text = RowValues::Text(s);
            match text.as_timestamp() {
                Some(ts) => RowValues::Timestamp(ts),
                None => match &text {
                    RowValues::Text(s) if s.is_empty() => RowValues::Null,
                    _ => text,
                },
            }
        }
        (ColumnType::Json, RowValues::Text(s)) if s.is_empty() => RowValues::Null,
        (ColumnType::Text | ColumnType::Uuid, v @ (RowValues::Int(_) | RowValues::Float(_) | RowValues::Bool(_))) => {
            RowValues::Text(v.to_text())
        }
        (_, v) => v,
    }
}

fn column_type<'a>(opts: &'a RequestOptions, col: Option<&'a ColumnDef>, name: &str) -> ColumnType {
    opts.types
        .get(name)
        .cloned()
        .or_else(|| col.map(|c| c.ty.clone()))
        .unwrap_or_default()
}

/// Generic, backend-independent preparation of a record before a driver compiles it.
///
/// Writes get defaults, generated values, joined columns and coercions; `del` keeps only
/// key values; reads get list-valued operator arguments normalised.
#[must_use]
pub fn prepare_record(
    op: Op,
    table: &str,
    obj: &Record,
    opts: &RequestOptions,
    schema: &SchemaSnapshot,
) -> Record {
    let columns = schema.table(table);
    let keys: Vec<String> = opts
        .keys
        .clone()
        .unwrap_or_else(|| schema.keys(table).to_vec());
    let strict = opts.is_strict_types();

    if op.is_read() {
        return obj
            .iter()
            .map(|(name, value)| {
                let col = columns.and_then(|c| c.get(name));
                let ty = column_type(opts, col, name);
                let value = match opts.op_for(name) {
                    Some(op) if LIST_OPS.contains(&op.as_str()) => split_list(value, &ty),
                    _ if strict => coerce_value(value.clone(), &ty),
                    _ => value.clone(),
                };
                (name.clone(), value)
            })
            .collect();
    }

    if op == Op::Del {
        return obj
            .iter()
            .filter(|(name, _)| keys.is_empty() || keys.contains(name))
            .map(|(name, value)| {
                let col = columns.and_then(|c| c.get(name));
                let value = if strict {
                    coerce_value(value.clone(), &column_type(opts, col, name))
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect();
    }

    if !op.is_write() {
        return obj.clone();
    }

    let adding = matches!(op, Op::Add | Op::Put);
    let mut out = Record::new();

    for (name, value) in obj {
        if name.starts_with('_') || opts.skip_columns.contains(name) {
            continue;
        }
        let col = columns.and_then(|c| c.get(name));
        if columns.is_some() && col.is_none() && !opts.is_all_columns() {
            continue;
        }
        let is_key = keys.contains(name);
        if let Some(col) = col {
            if adding && col.writeonly {
                continue;
            }
            if !adding && col.readonly && !is_key {
                continue;
            }
        }
        let ty = column_type(opts, col, name);
        let mut value = if is_key && !strict {
            value.clone()
        } else if strict || matches!(ty, ColumnType::Counter) || value.is_empty() {
            coerce_value(value.clone(), &ty)
        } else {
            value.clone()
        };
        if let (Some(max), RowValues::Text(s)) = (col.and_then(|c| c.maxlength), &mut value) {
            if s.chars().count() > max {
                *s = s.chars().take(max).collect();
            }
        }
        out.insert(name.clone(), value);
    }

    if let Some(columns) = columns {
        for col in columns.values() {
            if opts.skip_columns.contains(&col.name) {
                continue;
            }
            if col.now && !out.contains_key(&col.name) {
                out.insert(col.name.clone(), now_value(&col.ty));
                continue;
            }
            if !adding || out.get(&col.name).is_some_and(|v| !v.is_null()) {
                continue;
            }
            if let Some(default) = &col.value {
                out.insert(col.name.clone(), default.clone());
            } else if col.ty == ColumnType::Uuid {
                out.insert(
                    col.name.clone(),
                    RowValues::Text(uuid::Uuid::new_v4().simple().to_string()),
                );
            }
        }
        for col in columns.values().filter(|c| !c.join.is_empty()) {
            if out.contains_key(&col.name) {
                continue;
            }
            let parts: Option<Vec<String>> = col
                .join
                .iter()
                .map(|part| out.get(part).filter(|v| !v.is_null()).map(RowValues::to_text))
                .collect();
            if let Some(parts) = parts {
                out.insert(col.name.clone(), RowValues::Text(parts.join("|")));
            }
        }
    }

    if let Some(mtime) = &opts.mtime {
        out.insert(mtime.clone(), now_value(&ColumnType::Mtime));
    }

    out
}

/// Options for `search`: text values without an explicit operator match by prefix, or by
/// full text for `tsvector` columns.
#[must_use]
pub fn search_options(
    table: &str,
    obj: &Record,
    opts: &RequestOptions,
    schema: &SchemaSnapshot,
    full_text: bool,
) -> RequestOptions {
    let mut out = opts.clone();
    for (name, value) in obj {
        if opts.ops.contains_key(name) || !matches!(value, RowValues::Text(_)) {
            continue;
        }
        let ty = column_type(opts, schema.column(table, name), name);
        let op = if full_text && ty == ColumnType::TsVector {
            "@@"
        } else {
            "like%"
        };
        out.ops.insert(name.clone(), op.to_string());
    }
    out
}
