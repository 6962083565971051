//! Engine configuration: pools, routing, caching and declared tables.
//!
//! An [`EngineConfig`] comes from JSON ([`EngineConfig::from_json`]), from the command line
//! ([`DbArgs`]) or from the builder methods below.

use std::collections::BTreeMap;
use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use crate::error::PolyDbError;
use crate::pool::PoolSettings;
use crate::request::RequestOptions;
use crate::schema::{ColumnDef, Tables, TableDef};
use crate::types::{BackendKind, ColumnType};

const DEFAULT_IDLE_MS: u64 = 86_400_000;

/// Option defaults applied to every call on a pool before the call's own options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolDefaults {
    pub count: Option<usize>,
    pub ops: BTreeMap<String, String>,
    pub ops_map: BTreeMap<String, String>,
    pub types_map: BTreeMap<String, String>,
    pub concurrency: Option<usize>,
    pub strict_types: Option<bool>,
    pub all_columns: Option<bool>,
    pub consistent: Option<bool>,
}

impl From<&PoolDefaults> for RequestOptions {
    fn from(defaults: &PoolDefaults) -> Self {
        RequestOptions {
            count: defaults.count,
            ops: defaults.ops.clone(),
            ops_map: defaults.ops_map.clone(),
            types_map: defaults.types_map.clone(),
            concurrency: defaults.concurrency,
            strict_types: defaults.strict_types,
            all_columns: defaults.all_columns,
            consistent: defaults.consistent,
            ..RequestOptions::default()
        }
    }
}

/// One pool to open at init.
///
/// `url` is the database file for `sqlite`, the connection string for `postgres`, the
/// endpoint for `dynamodb` (absent: in-process store) and the keyspace for `cassandra`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    pub name: String,
    pub kind: BackendKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub min: u32,
    /// `0` means unbounded; absent means the backend's default.
    #[serde(default)]
    pub max: Option<u32>,
    #[serde(default)]
    pub idle_ms: Option<u64>,
    /// Poll interval of the file watch (`sqlite` only).
    #[serde(default)]
    pub watch_ms: Option<u64>,
    #[serde(default)]
    pub init: Vec<String>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub defaults: PoolDefaults,
}

impl PoolConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            url: None,
            min: 0,
            max: None,
            idle_ms: None,
            watch_ms: None,
            init: Vec::new(),
            readonly: false,
            defaults: PoolDefaults::default(),
        }
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn max(mut self, max: u32) -> Self {
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn idle(mut self, idle: Duration) -> Self {
        self.idle_ms = Some(u64::try_from(idle.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn watch(mut self, interval: Duration) -> Self {
        self.watch_ms = Some(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    #[must_use]
    pub fn init_statement(mut self, statement: impl Into<String>) -> Self {
        self.init.push(statement.into());
        self
    }

    #[must_use]
    pub fn defaults(mut self, defaults: PoolDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// In-memory `SQLite` databases are private to one connection, and `DynamoDB` clients are
    /// shared handles, so their defaults differ from the other backends.
    #[must_use]
    pub fn settings(&self) -> PoolSettings {
        let max = match (self.max, self.kind) {
            (Some(0), _) | (None, BackendKind::DynamoDb) => None,
            (Some(_), BackendKind::Sqlite) if self.is_memory() => Some(1),
            (Some(max), _) => Some(max),
            (None, _) => Some(1),
        };
        PoolSettings {
            min: self.min,
            max,
            idle: Duration::from_millis(self.idle_ms.unwrap_or(DEFAULT_IDLE_MS)),
            watch: self.watch_ms.map(Duration::from_millis),
            ..PoolSettings::default()
        }
    }

    fn is_memory(&self) -> bool {
        self.kind == BackendKind::Sqlite
            && self.url.as_deref().is_none_or(|u| u.is_empty() || u == ":memory:")
    }
}

/// Everything the engine needs at init.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Pool used when a call names none and its table has no route; else the first pool.
    pub default_pool: Option<String>,
    pub pools: Vec<PoolConfig>,
    /// table -> pool
    pub routes: BTreeMap<String, String>,
    /// Tables served through the record cache.
    pub cached: Vec<String>,
    /// Declared tables, created or upgraded by `init_tables`.
    pub tables: Tables,
    pub cache_ttl_ms: Option<u64>,
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `ConfigError` when the document does not describe a valid configuration.
    pub fn from_json(text: &str) -> Result<Self, PolyDbError> {
        let config: EngineConfig =
            serde_json::from_str(text).map_err(|e| PolyDbError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `ConfigError` for duplicate pool names or routes to unknown pools.
    pub fn validate(&self) -> Result<(), PolyDbError> {
        let mut seen = Vec::with_capacity(self.pools.len());
        for pool in &self.pools {
            if seen.contains(&pool.name.as_str()) {
                return Err(PolyDbError::ConfigError(format!("duplicate pool {}", pool.name)));
            }
            seen.push(pool.name.as_str());
        }
        let known = |name: &String| seen.contains(&name.as_str());
        if let Some(name) = self.default_pool.as_ref().filter(|n| !known(n)) {
            return Err(PolyDbError::ConfigError(format!("unknown default pool {name}")));
        }
        if let Some((table, pool)) = self.routes.iter().find(|(_, pool)| !known(pool)) {
            return Err(PolyDbError::ConfigError(format!(
                "table {table} routed to unknown pool {pool}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pools.push(pool);
        self
    }

    #[must_use]
    pub fn default_pool(mut self, name: impl Into<String>) -> Self {
        self.default_pool = Some(name.into());
        self
    }

    #[must_use]
    pub fn route(mut self, table: impl Into<String>, pool: impl Into<String>) -> Self {
        self.routes.insert(table.into(), pool.into());
        self
    }

    #[must_use]
    pub fn table(mut self, name: impl Into<String>, def: TableDef) -> Self {
        self.tables.insert(name.into(), def);
        self
    }

    #[must_use]
    pub fn cached(mut self, table: impl Into<String>) -> Self {
        self.cached.push(table.into());
        self
    }

    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Add the engine's own bookkeeping tables without overriding declared ones.
    #[must_use]
    pub fn with_default_tables(mut self) -> Self {
        for (name, def) in default_tables() {
            self.tables.entry(name).or_insert(def);
        }
        self
    }
}

/// Bookkeeping tables every deployment gets: properties, cookies, a request queue and jobs.
#[must_use]
pub fn default_tables() -> Tables {
    let mut tables = Tables::new();
    tables.insert(
        "backend_property".into(),
        TableDef::new()
            .column(ColumnDef::new("name").primary())
            .column(ColumnDef::new("value"))
            .column(ColumnDef::new("mtime")),
    );
    tables.insert(
        "backend_cookies".into(),
        TableDef::new()
            .column(ColumnDef::new("name").primary())
            .column(ColumnDef::new("domain").primary())
            .column(ColumnDef::new("path").primary())
            .column(ColumnDef::new("value"))
            .column(ColumnDef::new("expires")),
    );
    tables.insert(
        "backend_queue".into(),
        TableDef::new()
            .column(ColumnDef::new("id").primary())
            .column(ColumnDef::new("url"))
            .column(ColumnDef::new("postdata"))
            .column(ColumnDef::new("counter").with_type(ColumnType::Int))
            .column(ColumnDef::new("mtime")),
    );
    tables.insert(
        "backend_jobs".into(),
        TableDef::new()
            .column(ColumnDef::new("id").primary())
            .column(ColumnDef::new("type").default_value("local"))
            .column(ColumnDef::new("host").default_value(""))
            .column(ColumnDef::new("job"))
            .column(ColumnDef::new("mtime").with_type(ColumnType::Int)),
    );
    tables
}

/// Command line options for the database layer, flattened into an application's parser.
#[derive(Debug, Clone, Args)]
pub struct DbArgs {
    /// Default pool for calls that name none
    #[arg(long = "db-pool", default_value = "sqlite")]
    pub pool: String,
    /// Open only the local sqlite pool
    #[arg(long = "db-no-pools")]
    pub no_pools: bool,
    /// Database file of the local sqlite pool
    #[arg(long = "db-sqlite-path", default_value = ":memory:")]
    pub sqlite_path: String,
    /// Max open connections of the sqlite pool
    #[arg(long = "db-sqlite-max", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub sqlite_max: u32,
    /// Idle ms before a sqlite connection is closed
    #[arg(long = "db-sqlite-idle", default_value_t = DEFAULT_IDLE_MS, value_parser = clap::value_parser!(u64).range(1000..=86_400_000))]
    pub sqlite_idle: u64,
    /// PostgreSQL connection url or options string
    #[arg(long = "db-pg-pool")]
    pub pg_pool: Option<String>,
    /// Max open connections of the pg pool
    #[arg(long = "db-pg-max", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub pg_max: u32,
    /// Idle ms before a pg connection is closed
    #[arg(long = "db-pg-idle", default_value_t = DEFAULT_IDLE_MS, value_parser = clap::value_parser!(u64).range(1000..=86_400_000))]
    pub pg_idle: u64,
    /// DynamoDB endpoint url; `memory` for the in-process store
    #[arg(long = "db-ddb-pool")]
    pub ddb_pool: Option<String>,
}

impl From<DbArgs> for EngineConfig {
    fn from(args: DbArgs) -> Self {
        let mut config = EngineConfig::new().default_pool(args.pool).pool(
            PoolConfig::new("sqlite", BackendKind::Sqlite)
                .url(args.sqlite_path)
                .max(args.sqlite_max)
                .idle(Duration::from_millis(args.sqlite_idle)),
        );
        if !args.no_pools {
            if let Some(url) = args.pg_pool {
                config = config.pool(
                    PoolConfig::new("pg", BackendKind::Postgres)
                        .url(url)
                        .max(args.pg_max)
                        .idle(Duration::from_millis(args.pg_idle)),
                );
            }
            if let Some(url) = args.ddb_pool {
                let pool = PoolConfig::new("ddb", BackendKind::DynamoDb);
                config = config.pool(if url == "memory" { pool } else { pool.url(url) });
            }
        }
        config.with_default_tables()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        db: DbArgs,
    }

    #[test]
    fn json_config_parses_pools_and_tables() {
        let config = EngineConfig::from_json(
            r#"{
                "default_pool": "pg",
                "pools": [
                    {"name": "local", "kind": "sqlite", "url": "/tmp/x.db", "max": 4, "watch_ms": 500},
                    {"name": "pg", "kind": "postgres", "url": "host=localhost dbname=app",
                     "defaults": {"count": 50, "ops": {"name": "begins_with"}}},
                    {"name": "ddb", "kind": "dynamodb"}
                ],
                "routes": {"events": "ddb"},
                "cached": ["users"],
                "tables": {"users": {"id": {"primary": true}, "name": {}}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.pools.len(), 3);
        let local = config.pools[0].settings();
        assert_eq!(local.max, Some(4));
        assert_eq!(local.watch, Some(Duration::from_millis(500)));
        assert_eq!(config.pools[2].settings().max, None);
        let defaults = RequestOptions::from(&config.pools[1].defaults);
        assert_eq!(defaults.count, Some(50));
        assert_eq!(config.tables["users"].primary_keys(), vec!["id"]);
    }

    #[test]
    fn routes_must_name_known_pools() {
        let err = EngineConfig::from_json(
            r#"{"pools": [{"name": "a", "kind": "sqlite"}], "routes": {"t": "b"}}"#,
        );
        assert!(matches!(err, Err(PolyDbError::ConfigError(_))));
    }

    #[test]
    fn memory_sqlite_keeps_one_connection() {
        let pool = PoolConfig::new("s", BackendKind::Sqlite).max(8);
        assert_eq!(pool.settings().max, Some(1));
    }

    #[test]
    fn command_line_adds_optional_pools() {
        let cli = Cli::parse_from(["app", "--db-pg-pool", "host=db dbname=app", "--db-pg-max", "5"]);
        let config = EngineConfig::from(cli.db);
        let names: Vec<&str> = config.pools.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["sqlite", "pg"]);
        assert_eq!(config.pools[1].settings().max, Some(5));
        assert!(config.tables.contains_key("backend_jobs"));

        let cli = Cli::parse_from(["app", "--db-no-pools", "--db-ddb-pool", "memory"]);
        let config = EngineConfig::from(cli.db);
        assert_eq!(config.pools.len(), 1);
    }
}
