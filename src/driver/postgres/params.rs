use std::error::Error;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;
use tokio_postgres::types::{IsNull, Kind, ToSql, Type, to_sql_checked};
use tokio_util::bytes;

use crate::types::RowValues;

/// Borrowed `PostgreSQL` parameters for one statement.
pub struct Params<'a> {
    references: Vec<&'a (dyn ToSql + Sync)>,
}

impl<'a> Params<'a> {
    #[must_use]
    pub fn convert(params: &'a [RowValues]) -> Params<'a> {
        let mut references = Vec::with_capacity(params.len());
        for p in params {
            references.push(p as &(dyn ToSql + Sync));
        }
        Params { references }
    }

    #[must_use]
    pub fn as_refs(&self) -> &[&(dyn ToSql + Sync)] {
        &self.references
    }
}

type BoxError = Box<dyn Error + Sync + Send>;

fn int_to_sql(i: i64, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(i)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(i)?.to_sql(ty, out),
        #[allow(clippy::cast_precision_loss)]
        Type::FLOAT4 | Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::BOOL => (i != 0).to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => i.to_string().to_sql(ty, out),
        Type::JSON | Type::JSONB => JsonValue::from(i).to_sql(ty, out),
        _ => i.to_sql(ty, out),
    }
}

fn float_to_sql(f: f64, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        #[allow(clippy::cast_possible_truncation)]
        Type::FLOAT4 => (f as f32).to_sql(ty, out),
        #[allow(clippy::cast_possible_truncation)]
        Type::INT8 if f.fract() == 0.0 => (f as i64).to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => f.to_string().to_sql(ty, out),
        Type::JSON | Type::JSONB => JsonValue::from(f).to_sql(ty, out),
        _ => f.to_sql(ty, out),
    }
}

fn text_to_sql(s: &str, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(s.trim().parse::<i64>()?, ty, out),
        Type::FLOAT4 | Type::FLOAT8 => float_to_sql(s.trim().parse::<f64>()?, ty, out),
        Type::BOOL => matches!(s, "1" | "t" | "true").to_sql(ty, out),
        Type::TIMESTAMP | Type::TIMESTAMPTZ | Type::DATE => {
            match RowValues::Text(s.to_string()).as_timestamp() {
                Some(dt) => timestamp_to_sql(dt, ty, out),
                None => Err(format!("invalid timestamp: {s}").into()),
            }
        }
        Type::JSON | Type::JSONB => serde_json::from_str::<JsonValue>(s)
            .unwrap_or_else(|_| JsonValue::String(s.to_string()))
            .to_sql(ty, out),
        Type::BYTEA => s.as_bytes().to_sql(ty, out),
        _ => s.to_sql(ty, out),
    }
}

fn timestamp_to_sql(dt: NaiveDateTime, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::TIMESTAMPTZ => dt.and_utc().to_sql(ty, out),
        Type::DATE => dt.date().to_sql(ty, out),
        Type::INT8 => dt.and_utc().timestamp_millis().to_sql(ty, out),
        _ => dt.to_sql(ty, out),
    }
}

impl ToSql for RowValues {
    fn to_sql(&self, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
        match self {
            RowValues::Int(i) => int_to_sql(*i, ty, out),
            RowValues::Float(f) => float_to_sql(*f, ty, out),
            RowValues::Text(s) => text_to_sql(s, ty, out),
            RowValues::Bool(b) => match *ty {
                Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(i64::from(*b), ty, out),
                _ => (*b).to_sql(ty, out),
            },
            RowValues::Timestamp(dt) => timestamp_to_sql(*dt, ty, out),
            RowValues::Null => Ok(IsNull::Yes),
            RowValues::JSON(jsval) => match *ty {
                Type::TEXT | Type::VARCHAR => jsval.to_string().to_sql(ty, out),
                _ => jsval.to_sql(ty, out),
            },
            RowValues::Blob(bytes) => bytes.to_sql(ty, out),
            RowValues::List(items) => match ty.kind() {
                Kind::Array(_) => items.to_sql(ty, out),
                _ => self.to_json().to_sql(ty, out),
            },
        }
    }

    fn accepts(ty: &Type) -> bool {
        match ty.kind() {
            Kind::Array(member) => Self::accepts(member),
            _ => matches!(
                *ty,
                Type::INT2
                    | Type::INT4
                    | Type::INT8
                    | Type::FLOAT4
                    | Type::FLOAT8
                    | Type::TEXT
                    | Type::VARCHAR
                    | Type::BPCHAR
                    | Type::NAME
                    | Type::BOOL
                    | Type::TIMESTAMP
                    | Type::TIMESTAMPTZ
                    | Type::DATE
                    | Type::JSON
                    | Type::JSONB
                    | Type::BYTEA
            ),
        }
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_of_accepted_members() {
        assert!(RowValues::accepts(&Type::INT8_ARRAY));
        assert!(RowValues::accepts(&Type::TEXT_ARRAY));
        assert!(!RowValues::accepts(&Type::POINT));
    }

    #[test]
    fn ints_fit_narrow_columns() {
        let mut buf = bytes::BytesMut::new();
        RowValues::Int(7).to_sql(&Type::INT4, &mut buf).unwrap();
        assert_eq!(buf.len(), 4);
        buf.clear();
        assert!(RowValues::Int(i64::MAX).to_sql(&Type::INT2, &mut buf).is_err());
    }
}
