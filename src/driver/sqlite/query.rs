use std::sync::{Arc, Mutex};

use rusqlite::types::Value;
use rusqlite::{Statement, ToSql};

use super::params::Params;
use crate::driver::DriverOutput;
use crate::error::PolyDbError;
use crate::request::BackendRequest;
use crate::results::ResultSet;
use crate::types::{Op, RowValues};

/// One pooled `SQLite` connection, shared with the blocking worker that runs statements.
pub type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// Run synchronous `rusqlite` work on the blocking thread pool.
///
/// # Errors
/// The callback's error, or `ExecutionError` when the worker panicked or was cancelled.
pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, PolyDbError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, PolyDbError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn
            .lock()
            .map_err(|_| PolyDbError::ExecutionError("sqlite connection lock poisoned".into()))?;
        func(&mut guard)
    })
    .await?
}

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `PolyDbError` if the value cannot be read.
pub fn sqlite_extract_value_sync(row: &rusqlite::Row, idx: usize) -> Result<RowValues, PolyDbError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Run a row-returning statement and collect a result set.
///
/// # Errors
/// Returns `PolyDbError` if query execution or result processing fails.
pub fn build_result_set(stmt: &mut Statement, params: &[Value]) -> Result<ResultSet, PolyDbError> {
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
    let column_names: Arc<Vec<String>> = Arc::new(
        stmt.column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect(),
    );
    let col_count = column_names.len();

    let mut rows_iter = stmt.query(&param_refs[..])?;
    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(column_names);

    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value_sync(row, i)?);
        }
        result_set.add_row_values(row_values);
    }
    Ok(result_set)
}

/// Execute a prepared request on a locked connection.
///
/// DDL batches go through `execute_batch`; statements returning columns (selects and
/// `RETURNING` writes) are collected; everything else reports affected rows.
pub(crate) fn execute_sync(
    conn: &mut rusqlite::Connection,
    req: &BackendRequest,
) -> Result<DriverOutput, PolyDbError> {
    if !req.statements.is_empty() {
        conn.execute_batch(&req.text)?;
        return Ok(DriverOutput::default());
    }

    let params = Params::convert(&req.values);
    let mut stmt = conn.prepare(&req.text)?;
    if stmt.column_count() > 0 {
        let rows = build_result_set(&mut stmt, &params.0)?.into_records();
        let affected_rows = if req.op.is_write() { rows.len() as u64 } else { 0 };
        return Ok(DriverOutput {
            affected_rows,
            ..DriverOutput::rows(rows)
        });
    }

    let affected = stmt.execute(&params.as_refs()[..])?;
    drop(stmt);
    let inserted_oid = matches!(req.op, Op::Add | Op::Put).then(|| conn.last_insert_rowid());
    Ok(DriverOutput {
        affected_rows: affected as u64,
        inserted_oid,
        ..DriverOutput::default()
    })
}
