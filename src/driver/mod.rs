//! Backend drivers. Each backend family implements [`Driver`]; the concrete variant is
//! chosen when its pool is built and never at call time.

#[cfg(feature = "cassandra")]
pub mod cassandra;
#[cfg(feature = "dynamodb")]
pub mod dynamodb;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::PolyDbError;
use crate::request::{BackendRequest, Payload, RequestOptions};
use crate::results::NextToken;
use crate::schema::{ColumnDef, SchemaSnapshot};
use crate::sql::bind_by_type;
use crate::types::{BackendKind, Op, Record, RowValues};

/// Raw outcome of one executed request, before engine post-processing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverOutput {
    pub rows: Vec<Record>,
    pub affected_rows: u64,
    pub inserted_oid: Option<i64>,
    /// Native continuation key reported by key-paged backends.
    pub last_key: Option<Record>,
}

impl DriverOutput {
    #[must_use]
    pub fn rows(rows: Vec<Record>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Self::default()
        }
    }
}

/// Offset continuation shared by the SQL family: more rows are implied when a full page came
/// back.
#[must_use]
pub fn offset_token(req: &BackendRequest, rows: usize) -> Option<NextToken> {
    match req.count {
        Some(count) if count > 0 && rows == count => Some(NextToken::Offset(req.offset + count)),
        _ => None,
    }
}

/// Backend family contract.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Native client handle owned by one pool slot.
    type Client: Send + 'static;

    fn kind(&self) -> BackendKind;

    async fn connect(&self) -> Result<Self::Client, PolyDbError>;

    /// Release a client that is not going back into the pool.
    fn close(&self, client: Self::Client) {
        drop(client);
    }

    /// Cheap liveness check run when a client is checked out.
    async fn ping(&self, _client: &mut Self::Client) -> Result<(), PolyDbError> {
        Ok(())
    }

    async fn query(
        &self,
        client: &mut Self::Client,
        req: &BackendRequest,
    ) -> Result<DriverOutput, PolyDbError>;

    /// Introspect the live schema: columns, primary keys and indexes of every table.
    async fn cache_columns(&self, client: &mut Self::Client) -> Result<SchemaSnapshot, PolyDbError>;

    /// Compile an operation into a self-contained request.
    ///
    /// `Ok(None)` asks the engine to emulate the operation (e.g. `put` as update-then-add) or,
    /// for `upgrade`, reports nothing to do.
    ///
    /// # Errors
    /// `EmptyStatement` when nothing can be derived, `InvalidRequest` for malformed input.
    fn prepare(
        &self,
        op: Op,
        table: &str,
        payload: Payload<'_>,
        opts: &RequestOptions,
        schema: &SchemaSnapshot,
    ) -> Result<Option<BackendRequest>, PolyDbError>;

    fn next_token(&self, req: &BackendRequest, out: &DriverOutput) -> Option<NextToken> {
        offset_token(req, out.rows.len())
    }

    /// Convert a value before it is bound to a statement parameter.
    fn bind_value(value: RowValues, column: Option<&ColumnDef>) -> RowValues
    where
        Self: Sized,
    {
        bind_by_type(value, column)
    }

    /// Normalise a native error before it reaches the caller.
    fn convert_error(&self, _table: &str, _op: Op, err: PolyDbError) -> PolyDbError {
        err
    }

    /// File whose replacement invalidates every open client.
    fn watch_path(&self) -> Option<PathBuf> {
        None
    }
}
