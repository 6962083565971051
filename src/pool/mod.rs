//! Named, bounded pools of driver clients with serial-number invalidation.

mod any;
mod manager;
mod registry;
mod stats;
mod watch;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bb8::{Pool, PooledConnection};
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub use any::AnyPool;
pub use manager::{PoolManager, Stamped};
pub use registry::PoolRegistry;
pub use stats::{PoolStats, Stat, StatsSnapshot};

use crate::driver::Driver;
use crate::error::PolyDbError;
use crate::request::{BackendRequest, Payload, RequestOptions};
use crate::results::{QueryInfo, QueryResult};
use crate::schema::{SchemaCache, SchemaSnapshot, Tables};
use crate::types::Op;

/// Capacity and lifecycle settings for one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub min: u32,
    /// `None` means unbounded: every `get` manufactures a fresh handle.
    pub max: Option<u32>,
    pub idle: Duration,
    /// Longest wait for a free client before `PoolExhausted`.
    pub timeout: Duration,
    /// Poll interval of the file watch, when the driver has a file to watch.
    pub watch: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min: 0,
            max: Some(1),
            idle: Duration::from_secs(86_400),
            timeout: Duration::from_secs(30),
            watch: None,
        }
    }
}

enum PoolInner<D: Driver> {
    Bounded(Pool<PoolManager<D>>),
    Unbounded,
}

/// A checked-out client. Dropping it releases the client exactly once: back into the pool,
/// or closed when its serial is stale or the pool is unbounded.
pub enum PoolConnection<D: Driver> {
    Pooled(PooledConnection<'static, PoolManager<D>>),
    Owned(Stamped<D>),
}

impl<D: Driver> PoolConnection<D> {
    /// Pool serial the client was opened under.
    #[must_use]
    pub fn serial(&self) -> u64 {
        match self {
            PoolConnection::Pooled(conn) => conn.serial(),
            PoolConnection::Owned(conn) => conn.serial(),
        }
    }

    /// # Errors
    /// Fails only if the client was already closed.
    pub fn client_mut(&mut self) -> Result<&mut D::Client, PolyDbError> {
        match self {
            PoolConnection::Pooled(conn) => conn.client_mut(),
            PoolConnection::Owned(conn) => conn.client_mut(),
        }
    }
}

/// One pool: driver, clients, schema snapshot, option defaults and counters.
pub struct ConnectionPool<D: Driver> {
    manager: PoolManager<D>,
    inner: PoolInner<D>,
    schema: Arc<SchemaCache>,
    stats: Arc<PoolStats>,
    defaults: RequestOptions,
    watch: Option<JoinHandle<()>>,
}

impl<D: Driver> ConnectionPool<D> {
    /// Build the pool and arm the file watch when the driver has a file and `settings.watch`
    /// is set.
    ///
    /// # Errors
    /// Returns `ConnectionError` if the bounded pool cannot be created.
    pub async fn new(
        name: impl Into<String>,
        driver: D,
        settings: &PoolSettings,
        defaults: RequestOptions,
    ) -> Result<Self, PolyDbError> {
        let manager = PoolManager::new(name, driver);
        let inner = match settings.max {
            None => PoolInner::Unbounded,
            Some(max) => {
                let pool = Pool::builder()
                    .max_size(max.max(1))
                    .min_idle((settings.min > 0).then_some(settings.min))
                    .idle_timeout(Some(settings.idle))
                    .max_lifetime(None)
                    .connection_timeout(settings.timeout)
                    .test_on_check_out(true)
                    .build(manager.clone())
                    .await
                    .map_err(|e| {
                        PolyDbError::ConnectionError(format!("{} pool error: {e}", manager.name))
                    })?;
                PoolInner::Bounded(pool)
            }
        };
        let watch = match (settings.watch, manager.driver.watch_path()) {
            (Some(interval), Some(path)) => Some(watch::spawn_watch(manager.clone(), path, interval)),
            _ => None,
        };
        debug!("pool: init {} ({})", manager.name, manager.driver.kind());
        Ok(Self {
            manager,
            inner,
            schema: Arc::new(SchemaCache::default()),
            stats: Arc::new(PoolStats::default()),
            defaults,
            watch,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.manager.name
    }

    #[must_use]
    pub fn driver(&self) -> &D {
        &self.manager.driver
    }

    #[must_use]
    pub fn serial(&self) -> u64 {
        self.manager.current_serial()
    }

    /// Invalidate all clients, as the file watch does.
    pub fn bump_serial(&self) -> u64 {
        self.manager.bump_serial()
    }

    #[must_use]
    pub fn schema(&self) -> Arc<SchemaSnapshot> {
        self.schema.snapshot()
    }

    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    #[must_use]
    pub fn defaults(&self) -> &RequestOptions {
        &self.defaults
    }

    /// Check out a client, waiting while the pool is exhausted.
    ///
    /// # Errors
    /// `PoolExhausted` on timeout, or the driver's connect error.
    pub async fn get(&self) -> Result<PoolConnection<D>, PolyDbError> {
        let conn = match &self.inner {
            PoolInner::Bounded(pool) => pool.get_owned().await.map(PoolConnection::Pooled).map_err(
                |e| match PolyDbError::from(e) {
                    PolyDbError::PoolExhausted(_) => PolyDbError::PoolExhausted(self.name().to_string()),
                    other => other,
                },
            ),
            PoolInner::Unbounded => self.manager.open().await.map(PoolConnection::Owned),
        };
        if let Err(err) = &conn {
            error!("pool: {}: {err}", self.name());
        }
        conn
    }

    /// Compile an operation against the current schema snapshot.
    ///
    /// # Errors
    /// See [`Driver::prepare`].
    pub fn prepare(
        &self,
        op: Op,
        table: &str,
        payload: Payload<'_>,
        opts: &RequestOptions,
    ) -> Result<Option<BackendRequest>, PolyDbError> {
        let schema = self.schema.snapshot();
        self.manager.driver.prepare(op, table, payload, opts, &schema)
    }

    /// Run a prepared request on a pooled client and normalise the outcome.
    ///
    /// The client goes back to the pool (or is closed) before this returns, on every path.
    ///
    /// # Errors
    /// Pool errors, or the driver error after `convert_error`.
    pub async fn query(&self, req: &BackendRequest) -> Result<QueryResult, PolyDbError> {
        let started = Instant::now();
        self.stats.incr(Stat::Query);
        let outcome = async {
            let mut conn = self.get().await?;
            self.manager.driver.query(conn.client_mut()?, req).await
        }
        .await;

        match outcome {
            Ok(out) => {
                let info = QueryInfo {
                    affected_rows: out.affected_rows,
                    inserted_oid: out.inserted_oid,
                    next_token: self.manager.driver.next_token(req, &out),
                };
                debug!(
                    "{}: {} ms {} rows {} {:?}",
                    self.name(),
                    started.elapsed().as_millis(),
                    out.rows.len(),
                    req.text,
                    info
                );
                Ok(QueryResult::new(out.rows, info))
            }
            Err(err) => {
                self.stats.incr(Stat::Err);
                let err = self.manager.driver.convert_error(&req.table, req.op, err);
                error!("{}: {} {}: {err} {}", self.name(), req.op, req.table, req.text);
                Err(err)
            }
        }
    }

    /// Re-read the live schema, overlay the declared tables and swap the snapshot in one step.
    ///
    /// # Errors
    /// Pool or introspection errors; the previous snapshot stays in place.
    pub async fn cache_columns(&self, declared: &Tables) -> Result<(), PolyDbError> {
        let mut snapshot = {
            let mut conn = self.get().await?;
            self.manager.driver.cache_columns(conn.client_mut()?).await?
        };
        snapshot.merge_columns(declared);
        snapshot.merge_keys(declared);
        debug!("{}: cached {} tables", self.name(), snapshot.columns.len());
        self.schema.replace(snapshot);
        Ok(())
    }

    /// Stop the file watch. Idle clients close when the last handle to the pool drops.
    pub fn shutdown(&self) {
        if let Some(watch) = &self.watch {
            watch.abort();
        }
    }
}

impl<D: Driver> Drop for ConnectionPool<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
