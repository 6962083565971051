use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::Value;
use tokio_postgres::types::Kind;
use tokio_postgres::{Client, Row};

use super::params::Params;
use crate::driver::DriverOutput;
use crate::error::PolyDbError;
use crate::request::BackendRequest;
use crate::results::ResultSet;
use crate::types::RowValues;

fn extract_array(row: &Row, idx: usize, member: &str) -> Result<RowValues, PolyDbError> {
    let list = match member {
        "int2" => row
            .try_get::<_, Option<Vec<Option<i16>>>>(idx)?
            .map(|v| v.into_iter().map(|x| x.map_or(RowValues::Null, |x| RowValues::Int(i64::from(x)))).collect()),
        "int4" => row
            .try_get::<_, Option<Vec<Option<i32>>>>(idx)?
            .map(|v| v.into_iter().map(|x| x.map_or(RowValues::Null, |x| RowValues::Int(i64::from(x)))).collect()),
        "int8" => row
            .try_get::<_, Option<Vec<Option<i64>>>>(idx)?
            .map(|v| v.into_iter().map(|x| x.map_or(RowValues::Null, RowValues::Int)).collect()),
        "float8" => row
            .try_get::<_, Option<Vec<Option<f64>>>>(idx)?
            .map(|v| v.into_iter().map(|x| x.map_or(RowValues::Null, RowValues::Float)).collect()),
        "bool" => row
            .try_get::<_, Option<Vec<Option<bool>>>>(idx)?
            .map(|v| v.into_iter().map(|x| x.map_or(RowValues::Null, RowValues::Bool)).collect()),
        _ => row
            .try_get::<_, Option<Vec<Option<String>>>>(idx)?
            .map(|v| v.into_iter().map(|x| x.map_or(RowValues::Null, RowValues::Text)).collect()),
    };
    Ok(list.map_or(RowValues::Null, RowValues::List))
}

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns `PolyDbError` if the column cannot be retrieved.
pub fn postgres_extract_value(row: &Row, idx: usize) -> Result<RowValues, PolyDbError> {
    let type_info = row.columns()[idx].type_();
    if let Kind::Array(member) = type_info.kind() {
        return extract_array(row, idx, member.name());
    }

    Ok(match type_info.name() {
        "int2" => row
            .try_get::<_, Option<i16>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.map_or(RowValues::Null, RowValues::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Float(f64::from(v))),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.map_or(RowValues::Null, RowValues::Float),
        "bool" => row.try_get::<_, Option<bool>>(idx)?.map_or(RowValues::Null, RowValues::Bool),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map_or(RowValues::Null, RowValues::Timestamp),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Timestamp(v.naive_utc())),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(RowValues::Null, RowValues::Timestamp),
        "json" | "jsonb" => row.try_get::<_, Option<Value>>(idx)?.map_or(RowValues::Null, RowValues::JSON),
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx)?.map_or(RowValues::Null, RowValues::Blob),
        _ => row.try_get::<_, Option<String>>(idx)?.map_or(RowValues::Null, RowValues::Text),
    })
}

/// Build a result set from raw Postgres rows.
///
/// # Errors
/// Returns errors from result processing.
pub fn build_result_set_from_rows(rows: &[Row]) -> Result<ResultSet, PolyDbError> {
    let mut result_set = ResultSet::with_capacity(rows.len());
    if let Some(row) = rows.first() {
        let cols: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
        result_set.set_column_names(Arc::new(cols));
    }
    for row in rows {
        let col_count = row.columns().len();
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(postgres_extract_value(row, i)?);
        }
        result_set.add_row_values(row_values);
    }
    Ok(result_set)
}

/// Run one prepared request on a client.
pub(crate) async fn execute(client: &Client, req: &BackendRequest) -> Result<DriverOutput, PolyDbError> {
    if !req.statements.is_empty() {
        client.batch_execute(&req.text).await?;
        return Ok(DriverOutput::default());
    }

    let stmt = client.prepare(&req.text).await?;
    let params = Params::convert(&req.values);
    if stmt.columns().is_empty() {
        let affected = client.execute(&stmt, params.as_refs()).await?;
        return Ok(DriverOutput::affected(affected));
    }

    let rows = client.query(&stmt, params.as_refs()).await?;
    let records = build_result_set_from_rows(&rows)?.into_records();
    let affected_rows = if req.op.is_write() { records.len() as u64 } else { 0 };
    Ok(DriverOutput {
        affected_rows,
        ..DriverOutput::rows(records)
    })
}
