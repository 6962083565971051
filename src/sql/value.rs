use std::fmt::Write;

use super::dialect::{Dialect, TIMESTAMP_TEXT};
use crate::types::{ColumnType, RowValues};

/// Quote a string literal. Every string that reaches SQL text goes through here.
#[must_use]
pub fn sql_quote(value: &str, dialect: Dialect) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if dialect.escapes_backslash() => out.push_str("\\\\"),
            '\0' => {}
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn number(value: &RowValues, integer: bool) -> String {
    match value {
        RowValues::Int(i) => i.to_string(),
        other => {
            let n = other.to_number().filter(|n| n.is_finite()).unwrap_or(0.0);
            if integer {
                #[allow(clippy::cast_possible_truncation)]
                let i = n.trunc() as i64;
                i.to_string()
            } else {
                n.to_string()
            }
        }
    }
}

fn truthy(value: &RowValues) -> bool {
    match value {
        RowValues::Bool(b) => *b,
        RowValues::Int(i) => *i != 0,
        RowValues::Float(f) => *f != 0.0,
        RowValues::Text(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "t" | "true" | "yes" | "on"
        ),
        _ => false,
    }
}

fn blob_literal(bytes: &[u8], dialect: Dialect) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(hex, "{b:02x}");
    }
    match dialect {
        Dialect::Postgres => format!("'\\x{hex}'"),
        Dialect::Cql => format!("0x{hex}"),
        Dialect::Sqlite | Dialect::Mysql => format!("X'{hex}'"),
    }
}

/// Literal for a value formatted according to the column type.
///
/// Numbers and booleans are rendered from parsed values; everything else is quoted.
#[must_use]
pub fn sql_value(value: &RowValues, ty: &ColumnType, dialect: Dialect) -> String {
    match value {
        RowValues::Null => return "NULL".to_string(),
        RowValues::Text(s) if s == "null" => return "NULL".to_string(),
        RowValues::List(items) => return sql_value_in(items, ty, dialect),
        RowValues::Blob(bytes) => return blob_literal(bytes, dialect),
        _ => {}
    }
    match ty {
        ColumnType::Int | ColumnType::Counter => number(value, true),
        ColumnType::Real => number(value, false),
        ColumnType::Bool => dialect.bool_literal(truthy(value)).to_string(),
        ColumnType::Mtime => match value {
            RowValues::Int(_) | RowValues::Float(_) => number(value, true),
            RowValues::Text(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.') => {
                number(value, true)
            }
            other => timestamp_literal(other, dialect),
        },
        ColumnType::Date => timestamp_literal(value, dialect),
        ColumnType::Json => sql_quote(&value.to_json().to_string(), dialect),
        ColumnType::Text | ColumnType::Uuid | ColumnType::TsVector => {
            sql_quote(&value.to_text(), dialect)
        }
        ColumnType::Blob | ColumnType::Other(_) => match value {
            RowValues::Int(_) => number(value, true),
            RowValues::Float(_) => number(value, false),
            RowValues::Bool(b) => dialect.bool_literal(*b).to_string(),
            RowValues::Timestamp(_) => timestamp_literal(value, dialect),
            RowValues::JSON(v) => sql_quote(&v.to_string(), dialect),
            other => sql_quote(&other.to_text(), dialect),
        },
    }
}

fn timestamp_literal(value: &RowValues, dialect: Dialect) -> String {
    let ts = match value {
        RowValues::Int(ms) => chrono::DateTime::from_timestamp_millis(*ms).map(|d| d.naive_utc()),
        other => other.as_timestamp(),
    };
    match ts {
        Some(ts) => sql_quote(&ts.format(TIMESTAMP_TEXT).to_string(), dialect),
        None => sql_quote(&value.to_text(), dialect),
    }
}

/// Comma-separated literals for `IN (...)`; empty for an empty list.
#[must_use]
pub fn sql_value_in(list: &[RowValues], ty: &ColumnType, dialect: Dialect) -> String {
    list.iter()
        .map(|v| sql_value(v, ty, dialect))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_are_doubled() {
        assert_eq!(sql_quote("it's", Dialect::Sqlite), "'it''s'");
        assert_eq!(sql_quote("a\\b", Dialect::Mysql), "'a\\\\b'");
        assert_eq!(sql_quote("a\\b", Dialect::Postgres), "'a\\b'");
    }

    #[test]
    fn numeric_types_never_emit_raw_text() {
        let evil = RowValues::Text("1; DROP TABLE t".into());
        assert_eq!(sql_value(&evil, &ColumnType::Int, Dialect::Postgres), "0");
        assert_eq!(sql_value(&RowValues::Text("2.5".into()), &ColumnType::Real, Dialect::Sqlite), "2.5");
        assert_eq!(sql_value(&RowValues::Int(7), &ColumnType::Text, Dialect::Sqlite), "'7'");
    }

    #[test]
    fn bools_follow_dialect() {
        assert_eq!(sql_value(&RowValues::Bool(true), &ColumnType::Bool, Dialect::Sqlite), "1");
        assert_eq!(sql_value(&RowValues::Text("no".into()), &ColumnType::Bool, Dialect::Postgres), "FALSE");
    }

    #[test]
    fn null_text_is_null() {
        assert_eq!(sql_value(&RowValues::Text("null".into()), &ColumnType::Text, Dialect::Cql), "NULL");
    }
}
