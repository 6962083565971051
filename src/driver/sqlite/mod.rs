//! `SQLite` driver: `rusqlite` connections run on the blocking pool.

mod config;
mod introspect;
mod params;
mod query;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

pub use config::{SqliteOptions, SqliteOptionsBuilder};
pub use params::{Params, row_value_to_sqlite_value};
pub use query::{SharedSqliteConnection, build_result_set, sqlite_extract_value_sync};

use super::{Driver, DriverOutput};
use crate::error::PolyDbError;
use crate::request::{BackendRequest, Payload, RequestOptions};
use crate::schema::SchemaSnapshot;
use crate::sql::{Dialect, SqlContext, prepare_sql};
use crate::types::{BackendKind, Op};

/// `REGEXP` is not built into `SQLite`; `x REGEXP p` calls `regexp(p, x)`.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: String = ctx.get(0)?;
            let text: Option<String> = ctx.get(1)?;
            let re = Regex::new(&pattern)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(text.is_some_and(|t| re.is_match(&t)))
        },
    )
}

fn open(options: &SqliteOptions) -> Result<Connection, PolyDbError> {
    let conn = if options.is_memory() {
        Connection::open_in_memory()?
    } else if options.readonly {
        Connection::open_with_flags(
            &options.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?
    } else {
        Connection::open(&options.db_path)?
    };
    conn.busy_timeout(options.busy_timeout)?;
    register_regexp(&conn)?;
    for sql in options.init_statements() {
        conn.execute_batch(&sql)?;
    }
    Ok(conn)
}

/// Driver for one `SQLite` database file.
///
/// Every pooled client is a separate connection; an in-memory database is private to its
/// connection, so in-memory pools should keep `max = 1`.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    options: SqliteOptions,
}

impl SqliteDriver {
    #[must_use]
    pub fn new(options: SqliteOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    type Client = SharedSqliteConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn connect(&self) -> Result<Self::Client, PolyDbError> {
        let options = self.options.clone();
        let conn = tokio::task::spawn_blocking(move || open(&options)).await??;
        debug!("sqlite: opened {}", self.options.db_path);
        Ok(Arc::new(Mutex::new(conn)))
    }

    async fn ping(&self, client: &mut Self::Client) -> Result<(), PolyDbError> {
        query::run_blocking(Arc::clone(client), |conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    async fn query(
        &self,
        client: &mut Self::Client,
        req: &BackendRequest,
    ) -> Result<DriverOutput, PolyDbError> {
        let req = req.clone();
        query::run_blocking(Arc::clone(client), move |conn| query::execute_sync(conn, &req)).await
    }

    async fn cache_columns(&self, client: &mut Self::Client) -> Result<SchemaSnapshot, PolyDbError> {
        query::run_blocking(Arc::clone(client), |conn| introspect::introspect(conn)).await
    }

    fn prepare(
        &self,
        op: Op,
        table: &str,
        payload: Payload<'_>,
        opts: &RequestOptions,
        schema: &SchemaSnapshot,
    ) -> Result<Option<BackendRequest>, PolyDbError> {
        let ctx = SqlContext::new(Dialect::Sqlite, schema).with_bind(Self::bind_value);
        prepare_sql(&ctx, op, table, payload, opts)
    }

    fn watch_path(&self) -> Option<PathBuf> {
        self.options.watch_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn regexp_function_is_available() {
        let driver = SqliteDriver::new(SqliteOptions::new(":memory:"));
        let mut client = driver.connect().await.unwrap();
        let req = BackendRequest::sql(
            Op::Select,
            "",
            "SELECT 'abc' REGEXP '^a' AS m, 'xyz' REGEXP '^a' AS n",
            Vec::new(),
        );
        let out = driver.query(&mut client, &req).await.unwrap();
        let row = &out.rows[0];
        assert_eq!(row.get("m"), Some(&crate::types::RowValues::Int(1)));
        assert_eq!(row.get("n"), Some(&crate::types::RowValues::Int(0)));
    }
}
