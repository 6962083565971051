//! The public data-access API: one set of CRUD/query operations over every configured pool.
//!
//! Every operation follows the same path: resolve the pool, merge its option defaults with
//! the call's options, run the generic record preparation, compile through the pool's driver,
//! execute, then post-process the rows. A compiled request that turns out to be empty is an
//! empty success, never an error.

mod builder;
mod bulk;
mod locations;
mod process;
mod replace;
mod tables;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::debug;

pub use builder::EngineBuilder;
pub use bulk::BatchItem;
pub use locations::{GeoCursor, GeoQuery, LocationsPage};

use crate::cache::{Cache, cache_key};
use crate::config::EngineConfig;
use crate::error::PolyDbError;
use crate::pool::{AnyPool, PoolRegistry, Stat, StatsSnapshot};
use crate::request::{BackendRequest, Payload, RequestOptions, prepare_record, search_options};
use crate::results::QueryResult;
use crate::schema::{SchemaSnapshot, TableDef, Tables};
use crate::types::{BackendKind, Op, Record};

/// Row hook: runs on every row returned from its table, in registration order. Returning
/// `true` drops the row.
pub type RowHook = Arc<dyn Fn(&mut Record, &RequestOptions) -> bool + Send + Sync>;

/// What compiling an operation produced.
enum Compiled {
    Request(BackendRequest),
    /// The driver has no single-request form; the engine emulates it.
    Emulate,
    /// Nothing to run.
    Empty,
}

pub struct Engine {
    pools: Arc<PoolRegistry>,
    tables: RwLock<Tables>,
    hooks: RwLock<HashMap<String, Vec<RowHook>>>,
    cache: Option<Arc<dyn Cache>>,
    cached: HashSet<String>,
    ttl: Option<Duration>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pools", &self.pools.names())
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine over pools registered by hand. No tables are declared and no cache is attached.
    #[must_use]
    pub fn new(pools: Arc<PoolRegistry>) -> Self {
        Self {
            pools,
            tables: RwLock::new(Tables::new()),
            hooks: RwLock::new(HashMap::new()),
            cache: None,
            cached: HashSet::new(),
            ttl: None,
        }
    }

    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    #[must_use]
    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    /// Pool serving `table` when the call names `pool` (or none).
    #[must_use]
    pub fn pool(&self, pool: Option<&str>, table: &str) -> Arc<AnyPool> {
        self.pools.resolve(pool, table)
    }

    /// Register a row hook for a table.
    pub fn add_hook<F>(&self, table: &str, hook: F)
    where
        F: Fn(&mut Record, &RequestOptions) -> bool + Send + Sync + 'static,
    {
        let mut hooks = match self.hooks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hooks.entry(table.to_lowercase()).or_default().push(Arc::new(hook));
    }

    fn hooks_for(&self, table: &str) -> Vec<RowHook> {
        let hooks = match self.hooks.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hooks.get(&table.to_lowercase()).cloned().unwrap_or_default()
    }

    /// Declared definition of a table, if any.
    #[must_use]
    pub fn table_def(&self, table: &str) -> Option<TableDef> {
        let tables = match self.tables.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tables.get(table).cloned()
    }

    /// Declare (or redeclare) a table; takes effect at the next `cache_columns`.
    pub fn declare_table(&self, table: impl Into<String>, def: TableDef) {
        let mut tables = match self.tables.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tables.insert(table.into(), def);
    }

    /// Cached columns, keys and indexes of the pool serving `table`.
    ///
    /// # Errors
    /// `PoolNotFound` when no such pool exists.
    pub fn schema(&self, table: &str, opts: &RequestOptions) -> Result<Arc<SchemaSnapshot>, PolyDbError> {
        self.pool(opts.pool.as_deref(), table).schema()
    }

    #[must_use]
    pub fn stats(&self, pool: &str) -> StatsSnapshot {
        self.pools.get(pool).stats()
    }

    /// Drop every pool. Further calls fail with `PoolNotFound`.
    pub fn shutdown(&self) {
        self.pools.shutdown();
    }

    /// Insert a new record; fails when one with the same primary key exists.
    ///
    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn add(&self, table: &str, obj: &Record, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Add, table, Payload::Record(obj), opts).await
    }

    /// Insert or fully replace a record.
    ///
    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn put(&self, table: &str, obj: &Record, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Put, table, Payload::Record(obj), opts).await
    }

    /// Update the columns present in `obj` of the record matching its primary key.
    ///
    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn update(&self, table: &str, obj: &Record, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Update, table, Payload::Record(obj), opts).await
    }

    /// Like `update`, but numeric and counter columns are added to their current value.
    ///
    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn incr(&self, table: &str, obj: &Record, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Incr, table, Payload::Record(obj), opts).await
    }

    /// Delete by primary key; deleting a missing record is not an error.
    ///
    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn del(&self, table: &str, obj: &Record, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Del, table, Payload::Record(obj), opts).await
    }

    /// One record by primary key (or `opts.keys`); at most one row.
    ///
    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn get(&self, table: &str, obj: &Record, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Get, table, Payload::Record(obj), opts).await
    }

    /// Records matching the values in `obj`, compared with the per-column operators.
    ///
    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn select(&self, table: &str, obj: &Record, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Select, table, Payload::Record(obj), opts).await
    }

    /// Records for a list of primary keys.
    ///
    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn list(&self, table: &str, keys: &[Record], opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::List, table, Payload::List(keys), opts).await
    }

    /// `select` where text values without an explicit operator match by prefix, or by full
    /// text on `PostgreSQL` `tsvector` columns.
    ///
    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn search(&self, table: &str, obj: &Record, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Search, table, Payload::Record(obj), opts).await
    }

    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn create(&self, table: &str, def: &TableDef, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Create, table, Payload::Table(def), opts).await
    }

    /// Add the declared columns and indexes missing from the live table. Nothing to add is an
    /// empty success.
    ///
    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn upgrade(&self, table: &str, def: &TableDef, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Upgrade, table, Payload::Table(def), opts).await
    }

    /// # Errors
    /// Pool, compile or backend errors.
    pub async fn drop(&self, table: &str, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        self.run(Op::Drop, table, Payload::Record(&Record::new()), opts).await
    }

    /// Compile without executing, against the pool serving `table`.
    ///
    /// # Errors
    /// `PoolNotFound`, or the driver's compile error. `Ok(None)` when the operation has no
    /// single-request form on this backend or nothing to do.
    pub fn prepare(
        &self,
        op: Op,
        table: &str,
        payload: Payload<'_>,
        opts: &RequestOptions,
    ) -> Result<Option<BackendRequest>, PolyDbError> {
        let pool = self.pool(opts.pool.as_deref(), table);
        let opts = pool.defaults()?.merge(opts);
        let schema = pool.schema()?;
        let prepared = Prepared::new(op, table, payload, &opts, &schema, pool.kind());
        match compile(&pool, op, table, prepared.payload(payload), &prepared.opts)? {
            Compiled::Request(req) => Ok(Some(req)),
            Compiled::Emulate | Compiled::Empty => Ok(None),
        }
    }

    /// Run an already prepared request (SQL text or native call) on the pool serving its
    /// table, with the same row post-processing as the typed operations.
    ///
    /// # Errors
    /// `EmptyStatement` for a request without text or native call, otherwise pool and
    /// backend errors.
    pub async fn query(&self, req: &BackendRequest, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        if req.is_empty() {
            return Err(PolyDbError::EmptyStatement(format!("{} {}", req.op, req.table)));
        }
        let pool = self.pool(opts.pool.as_deref(), &req.table);
        let opts = pool.defaults()?.merge(opts);
        let schema = pool.schema()?;
        let result = pool.query(req).await?;
        self.finish(&pool, &req.table, result, &opts, &schema).await
    }

    async fn run(&self, op: Op, table: &str, payload: Payload<'_>, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        let pool = self.pool(opts.pool.as_deref(), table);
        let opts = pool.defaults()?.merge(opts);
        let schema = pool.schema()?;
        let prepared = Prepared::new(op, table, payload, &opts, &schema, pool.kind());
        let payload = prepared.payload(payload);
        let opts = &prepared.opts;

        let result = match compile(&pool, op, table, payload, opts)? {
            Compiled::Request(req) => pool.query(&req).await?,
            Compiled::Empty => QueryResult::default(),
            Compiled::Emulate if op == Op::Put => {
                // update first; a missing record is then added
                let updated = self.run_compiled(&pool, Op::Update, table, payload, opts).await?;
                if updated.info.affected_rows > 0 {
                    updated
                } else {
                    self.run_compiled(&pool, Op::Add, table, payload, opts).await?
                }
            }
            Compiled::Emulate => QueryResult::default(),
        };

        if matches!(op, Op::Put | Op::Update | Op::Incr | Op::Del) {
            if let Some(obj) = payload.record() {
                self.invalidate(&pool, table, obj, opts, &schema).await;
            }
        }
        self.finish(&pool, table, result, opts, &schema).await
    }

    async fn run_compiled(
        &self,
        pool: &AnyPool,
        op: Op,
        table: &str,
        payload: Payload<'_>,
        opts: &RequestOptions,
    ) -> Result<QueryResult, PolyDbError> {
        match compile(pool, op, table, payload, opts)? {
            Compiled::Request(req) => pool.query(&req).await,
            Compiled::Emulate | Compiled::Empty => Ok(QueryResult::default()),
        }
    }

    async fn finish(
        &self,
        pool: &AnyPool,
        table: &str,
        mut result: QueryResult,
        opts: &RequestOptions,
        schema: &SchemaSnapshot,
    ) -> Result<QueryResult, PolyDbError> {
        if result.rows.is_empty() {
            return Ok(result);
        }
        let hooks = self.hooks_for(table);
        let rows = std::mem::take(&mut result.rows);
        result.rows = process::process_rows(rows, table, opts, schema, &hooks)
            .await
            .inspect_err(|_| pool.incr(Stat::Err))?;
        Ok(result)
    }

    fn caches(&self, table: &str, opts: &RequestOptions) -> bool {
        self.cache.is_some() && (opts.cached == Some(true) || self.cached.contains(&table.to_lowercase()))
    }

    async fn invalidate(&self, pool: &AnyPool, table: &str, obj: &Record, opts: &RequestOptions, schema: &SchemaSnapshot) {
        let Some(cache) = self.cache.as_ref().filter(|_| self.caches(table, opts)) else {
            return;
        };
        let keys = opts.keys.clone().unwrap_or_else(|| schema.keys(table).to_vec());
        let Some(key) = cache_key(opts.prefix.as_deref().unwrap_or(table), &keys, obj) else {
            return;
        };
        pool.incr(Stat::Del);
        if let Err(err) = cache.del(&key).await {
            debug!("cache: del {key}: {err}");
        }
    }
}

/// The call after generic preparation: coerced record(s) and, for `search`, the options
/// with default operators filled in.
struct Prepared {
    record: Option<Record>,
    list: Option<Vec<Record>>,
    opts: RequestOptions,
}

impl Prepared {
    fn new(
        op: Op,
        table: &str,
        payload: Payload<'_>,
        opts: &RequestOptions,
        schema: &SchemaSnapshot,
        kind: Option<BackendKind>,
    ) -> Self {
        let opts = match (op, payload) {
            (Op::Search, Payload::Record(obj)) => {
                search_options(table, obj, opts, schema, kind == Some(BackendKind::Postgres))
            }
            _ => opts.clone(),
        };
        let (record, list) = match payload {
            Payload::Record(obj) if op != Op::Drop => (Some(prepare_record(op, table, obj, &opts, schema)), None),
            Payload::List(list) => (
                None,
                Some(list.iter().map(|obj| prepare_record(op, table, obj, &opts, schema)).collect()),
            ),
            _ => (None, None),
        };
        Self { record, list, opts }
    }

    fn payload<'a>(&'a self, original: Payload<'a>) -> Payload<'a> {
        match (&self.record, &self.list) {
            (Some(record), _) => Payload::Record(record),
            (None, Some(list)) => Payload::List(list),
            (None, None) => original,
        }
    }
}

fn compile(
    pool: &AnyPool,
    op: Op,
    table: &str,
    payload: Payload<'_>,
    opts: &RequestOptions,
) -> Result<Compiled, PolyDbError> {
    match pool.prepare(op, table, payload, opts) {
        Ok(Some(req)) if req.is_empty() => Ok(Compiled::Empty),
        Ok(Some(req)) => Ok(Compiled::Request(req)),
        Ok(None) => Ok(Compiled::Emulate),
        Err(err) if err.is_empty_statement() => {
            debug!("{}: {op} {table}: {err}", pool.name());
            Ok(Compiled::Empty)
        }
        Err(err) => {
            pool.incr(Stat::Err);
            Err(err)
        }
    }
}
