use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Values that can be stored in a record, used as query parameters, or carried in a key.
///
/// The same enum is used by every backend so engine code never branches on driver types:
/// ```rust
/// use polydb::prelude::*;
///
/// let mut record = Record::new();
/// record.insert("id".into(), RowValues::Text("1".into()));
/// record.insert("hits".into(), RowValues::Int(3));
/// # let _ = record;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
    /// List of values, used for `in`/`between` conditions and list keys
    List(Vec<RowValues>),
}

/// A record: column name to value.
pub type Record = BTreeMap<String, RowValues>;

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
];

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// NULL or an empty string; such values are treated as "not supplied" by filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            RowValues::Null => true,
            RowValues::Text(s) => s.is_empty(),
            RowValues::List(items) => items.is_empty(),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            return TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok());
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RowValues::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[RowValues]> {
        if let RowValues::List(items) = self {
            Some(items)
        } else {
            None
        }
    }

    /// Best-effort numeric view: numbers as-is, numeric strings parsed, booleans as 0/1.
    #[must_use]
    pub fn to_number(&self) -> Option<f64> {
        match self {
            RowValues::Text(s) => s.trim().parse::<f64>().ok(),
            RowValues::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            RowValues::JSON(JsonValue::Number(n)) => n.as_f64(),
            other => other.as_float(),
        }
    }

    /// Plain text rendering used for cache keys, geohash prefixes and list splitting.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            RowValues::Int(i) => i.to_string(),
            RowValues::Float(f) => f.to_string(),
            RowValues::Text(s) => s.clone(),
            RowValues::Bool(b) => b.to_string(),
            RowValues::Timestamp(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            RowValues::Null => String::new(),
            RowValues::JSON(JsonValue::String(s)) => s.clone(),
            RowValues::JSON(v) => v.to_string(),
            RowValues::Blob(b) => String::from_utf8_lossy(b).into_owned(),
            RowValues::List(items) => items
                .iter()
                .map(RowValues::to_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Convert into a JSON value; blobs become arrays of bytes, timestamps ISO strings.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            RowValues::Int(i) => JsonValue::from(*i),
            RowValues::Float(f) => JsonValue::from(*f),
            RowValues::Text(s) => JsonValue::String(s.clone()),
            RowValues::Bool(b) => JsonValue::Bool(*b),
            RowValues::Timestamp(dt) => {
                JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            RowValues::Null => JsonValue::Null,
            RowValues::JSON(v) => v.clone(),
            RowValues::Blob(b) => JsonValue::from(b.clone()),
            RowValues::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Inverse of [`RowValues::to_json`] for scalars; objects stay JSON, arrays become lists.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => RowValues::Null,
            JsonValue::Bool(b) => RowValues::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => RowValues::Int(i),
                None => RowValues::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => RowValues::Text(s.clone()),
            JsonValue::Array(items) => RowValues::List(items.iter().map(Self::from_json).collect()),
            JsonValue::Object(_) => RowValues::JSON(value.clone()),
        }
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_string())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<i32> for RowValues {
    fn from(value: i32) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<JsonValue> for RowValues {
    fn from(value: JsonValue) -> Self {
        RowValues::JSON(value)
    }
}

impl<T: Into<RowValues>> From<Vec<T>> for RowValues {
    fn from(value: Vec<T>) -> Self {
        RowValues::List(value.into_iter().map(Into::into).collect())
    }
}

/// Build a [`Record`] from `name => value` pairs.
///
/// ```rust
/// use polydb::record;
///
/// let rec = record! { "id" => "1", "count" => 2_i64 };
/// assert_eq!(rec.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::types::Record::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut rec = $crate::types::Record::new();
        $( rec.insert(String::from($name), $crate::types::RowValues::from($value)); )+
        rec
    }};
}

/// The backend a pool talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// `SQLite` database file
    Sqlite,
    /// `PostgreSQL` server
    Postgres,
    /// Amazon `DynamoDB` (or a compatible endpoint)
    #[value(name = "dynamodb")]
    DynamoDb,
    /// Apache Cassandra / `ScyllaDB`
    Cassandra,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgres",
            BackendKind::DynamoDb => "dynamodb",
            BackendKind::Cassandra => "cassandra",
        };
        f.write_str(name)
    }
}

/// Logical column types. Declared tables use these; drivers map them to native types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    Int,
    Real,
    #[default]
    Text,
    Bool,
    Date,
    /// Epoch milliseconds stamped on every write.
    Mtime,
    Json,
    Uuid,
    Counter,
    Blob,
    /// Full text search vector (Postgres `tsvector`).
    TsVector,
    Other(String),
}

impl ColumnType {
    /// Parse a logical or native type name, e.g. `"bigint"`, `"jsonb"`, `"counter"`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let lower = name.trim().to_ascii_lowercase();
        let base = lower.split('(').next().unwrap_or_default().trim();
        match base {
            "int" | "integer" | "bigint" | "smallint" | "int2" | "int4" | "int8" | "tinyint"
            | "long" | "number" | "serial" | "bigserial" => ColumnType::Int,
            "real" | "float" | "float4" | "float8" | "double" | "double precision" | "numeric"
            | "decimal" => ColumnType::Real,
            "bool" | "boolean" => ColumnType::Bool,
            "date" | "time" | "datetime" | "timestamp" | "timestamptz"
            | "timestamp without time zone" | "timestamp with time zone" => ColumnType::Date,
            "mtime" => ColumnType::Mtime,
            "json" | "jsonb" | "obj" | "object" | "array" | "map" | "list" => ColumnType::Json,
            "uuid" | "timeuuid" => ColumnType::Uuid,
            "counter" => ColumnType::Counter,
            "blob" | "bytea" | "buffer" | "binary" => ColumnType::Blob,
            "tsvector" => ColumnType::TsVector,
            "" | "text" | "string" | "varchar" | "char" | "character varying" | "character"
            | "ascii" | "clob" | "s" => ColumnType::Text,
            "n" => ColumnType::Real,
            "b" => ColumnType::Blob,
            other => ColumnType::Other(other.to_string()),
        }
    }

    /// Numeric types take `,`-separated lists in `in`/`between`; others use `|`.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Int | ColumnType::Real | ColumnType::Counter | ColumnType::Mtime
        )
    }
}

impl From<String> for ColumnType {
    fn from(value: String) -> Self {
        ColumnType::parse(&value)
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Int => "int",
            ColumnType::Real => "real",
            ColumnType::Text => "text",
            ColumnType::Bool => "bool",
            ColumnType::Date => "date",
            ColumnType::Mtime => "mtime",
            ColumnType::Json => "json",
            ColumnType::Uuid => "uuid",
            ColumnType::Counter => "counter",
            ColumnType::Blob => "blob",
            ColumnType::TsVector => "tsvector",
            ColumnType::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// Engine operations; each maps to a prepared backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Put,
    Update,
    Incr,
    Del,
    Get,
    Select,
    List,
    Search,
    Create,
    Upgrade,
    Drop,
}

impl Op {
    /// Operations that return rows.
    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(self, Op::Get | Op::Select | Op::List | Op::Search)
    }

    /// Operations that change stored records.
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Op::Add | Op::Put | Op::Update | Op::Incr | Op::Del)
    }

    #[must_use]
    pub fn is_ddl(self) -> bool {
        matches!(self, Op::Create | Op::Upgrade | Op::Drop)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Add => "add",
            Op::Put => "put",
            Op::Update => "update",
            Op::Incr => "incr",
            Op::Del => "del",
            Op::Get => "get",
            Op::Select => "select",
            Op::List => "list",
            Op::Search => "search",
            Op::Create => "create",
            Op::Upgrade => "upgrade",
            Op::Drop => "drop",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_native_type_names() {
        assert_eq!(ColumnType::parse("BIGINT"), ColumnType::Int);
        assert_eq!(ColumnType::parse("varchar(255)"), ColumnType::Text);
        assert_eq!(ColumnType::parse("jsonb"), ColumnType::Json);
        assert_eq!(ColumnType::parse("timestamp with time zone"), ColumnType::Date);
        assert_eq!(ColumnType::parse("geometry"), ColumnType::Other("geometry".into()));
    }

    #[test]
    fn json_conversion_keeps_lists() {
        let v = RowValues::from(vec![1_i64, 2]);
        let json = v.to_json();
        assert_eq!(json, serde_json::json!([1, 2]));
        assert_eq!(RowValues::from_json(&json), v);
    }

    #[test]
    fn text_timestamps_parse() {
        let v = RowValues::Text("2024-03-01 10:20:30".into());
        assert!(v.as_timestamp().is_some());
        assert!(RowValues::Text(String::new()).is_empty());
        assert!(!RowValues::Int(0).is_empty());
    }
}
