use std::sync::Arc;

use super::{ConnectionPool, StatsSnapshot};
#[cfg(feature = "cassandra")]
use crate::driver::cassandra::CassandraDriver;
#[cfg(feature = "dynamodb")]
use crate::driver::dynamodb::DynamoDriver;
#[cfg(feature = "postgres")]
use crate::driver::postgres::PostgresDriver;
#[cfg(feature = "sqlite")]
use crate::driver::sqlite::SqliteDriver;
use crate::driver::Driver;
use crate::error::PolyDbError;
use crate::request::{BackendRequest, Payload, RequestOptions};
use crate::results::QueryResult;
use crate::schema::{SchemaSnapshot, Tables};
use crate::types::{BackendKind, Op};

/// A pool of any configured backend. The variant is fixed when the pool is built.
///
/// `Missing` stands in for a pool that was never initialised: every operation on it fails
/// with `PoolNotFound`.
pub enum AnyPool {
    #[cfg(feature = "sqlite")]
    Sqlite(ConnectionPool<SqliteDriver>),
    #[cfg(feature = "postgres")]
    Postgres(ConnectionPool<PostgresDriver>),
    #[cfg(feature = "dynamodb")]
    DynamoDb(ConnectionPool<DynamoDriver>),
    #[cfg(feature = "cassandra")]
    Cassandra(ConnectionPool<CassandraDriver>),
    Missing { name: String },
}

macro_rules! dispatch {
    ($self:expr, $pool:ident => $body:expr, $missing:ident => $fallback:expr) => {
        match $self {
            #[cfg(feature = "sqlite")]
            AnyPool::Sqlite($pool) => $body,
            #[cfg(feature = "postgres")]
            AnyPool::Postgres($pool) => $body,
            #[cfg(feature = "dynamodb")]
            AnyPool::DynamoDb($pool) => $body,
            #[cfg(feature = "cassandra")]
            AnyPool::Cassandra($pool) => $body,
            AnyPool::Missing { name: $missing } => $fallback,
        }
    };
    ($self:expr, $pool:ident => $body:expr) => {
        dispatch!($self, $pool => $body, name => Err(PolyDbError::PoolNotFound(name.clone())))
    };
}

impl std::fmt::Debug for AnyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = self.kind().map_or_else(|| "missing".to_string(), |k| k.to_string());
        f.debug_struct("AnyPool")
            .field("name", &self.name())
            .field("kind", &kind)
            .finish()
    }
}

impl AnyPool {
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        AnyPool::Missing { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        dispatch!(self, pool => pool.name(), name => name.as_str())
    }

    #[must_use]
    pub fn kind(&self) -> Option<BackendKind> {
        dispatch!(self, pool => Some(pool.driver().kind()), _name => None)
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, AnyPool::Missing { .. })
    }

    /// # Errors
    /// `PoolNotFound` for the sentinel pool.
    pub fn schema(&self) -> Result<Arc<SchemaSnapshot>, PolyDbError> {
        dispatch!(self, pool => Ok(pool.schema()))
    }

    /// # Errors
    /// `PoolNotFound` for the sentinel pool.
    pub fn defaults(&self) -> Result<&RequestOptions, PolyDbError> {
        dispatch!(self, pool => Ok(pool.defaults()))
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        dispatch!(self, pool => pool.stats().snapshot(), _name => StatsSnapshot::default())
    }

    pub fn incr(&self, stat: super::Stat) {
        dispatch!(self, pool => pool.stats().incr(stat), _name => ())
    }

    #[must_use]
    pub fn serial(&self) -> u64 {
        dispatch!(self, pool => pool.serial(), _name => 0)
    }

    pub fn bump_serial(&self) -> u64 {
        dispatch!(self, pool => pool.bump_serial(), _name => 0)
    }

    /// # Errors
    /// See [`ConnectionPool::prepare`].
    pub fn prepare(
        &self,
        op: Op,
        table: &str,
        payload: Payload<'_>,
        opts: &RequestOptions,
    ) -> Result<Option<BackendRequest>, PolyDbError> {
        dispatch!(self, pool => pool.prepare(op, table, payload, opts))
    }

    /// # Errors
    /// See [`ConnectionPool::query`].
    pub async fn query(&self, req: &BackendRequest) -> Result<QueryResult, PolyDbError> {
        dispatch!(self, pool => pool.query(req).await)
    }

    /// # Errors
    /// See [`ConnectionPool::cache_columns`].
    pub async fn cache_columns(&self, declared: &Tables) -> Result<(), PolyDbError> {
        dispatch!(self, pool => pool.cache_columns(declared).await)
    }

    pub fn shutdown(&self) {
        dispatch!(self, pool => pool.shutdown(), _name => ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolSettings;

    #[cfg(feature = "dynamodb")]
    #[tokio::test]
    async fn kind_comes_from_the_driver() -> Result<(), PolyDbError> {
        let pool = ConnectionPool::new(
            "ddb",
            DynamoDriver::memory(),
            &PoolSettings { max: None, ..PoolSettings::default() },
            RequestOptions::new(),
        )
        .await?;
        let pool = AnyPool::DynamoDb(pool);
        assert_eq!(pool.kind(), Some(BackendKind::DynamoDb));
        assert!(format!("{pool:?}").contains("dynamodb"));
        Ok(())
    }

    #[test]
    fn missing_pools_have_no_kind() {
        assert_eq!(AnyPool::missing("gone").kind(), None);
    }
}
