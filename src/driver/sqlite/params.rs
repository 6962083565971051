use rusqlite::types::Value;

use crate::sql::TIMESTAMP_TEXT;
use crate::types::RowValues;

/// Convert a single `RowValues` to a rusqlite `Value`.
///
/// Booleans become integers, timestamps and JSON become text, lists are stored as JSON arrays.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format(TIMESTAMP_TEXT).to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(json) => Value::Text(json.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
        RowValues::List(_) => Value::Text(value.to_json().to_string()),
    }
}

/// Owned `SQLite` parameters for one statement.
pub struct Params(pub Vec<Value>);

impl Params {
    #[must_use]
    pub fn convert(params: &[RowValues]) -> Self {
        Params(params.iter().map(row_value_to_sqlite_value).collect())
    }

    #[must_use]
    pub fn as_refs(&self) -> Vec<&dyn rusqlite::ToSql> {
        self.0.iter().map(|v| v as &dyn rusqlite::ToSql).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bools_and_lists() {
        assert_eq!(row_value_to_sqlite_value(&RowValues::Bool(true)), Value::Integer(1));
        let list = RowValues::List(vec![RowValues::Int(1), RowValues::Text("a".into())]);
        assert_eq!(row_value_to_sqlite_value(&list), Value::Text("[1,\"a\"]".into()));
    }
}
