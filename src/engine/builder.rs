#[cfg(any(feature = "dynamodb", feature = "cassandra"))]
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::info;

use super::Engine;
use crate::cache::Cache;
use crate::config::{EngineConfig, PoolConfig};
#[cfg(feature = "cassandra")]
use crate::driver::cassandra::{CassandraDriver, CqlConnector, ScyllaConnector};
#[cfg(feature = "dynamodb")]
use crate::driver::dynamodb::{DynamoApi, DynamoDriver, HttpDynamo};
#[cfg(feature = "postgres")]
use crate::driver::postgres::{PostgresDriver, PostgresOptionsBuilder};
#[cfg(feature = "sqlite")]
use crate::driver::sqlite::{SqliteDriver, SqliteOptionsBuilder};
use crate::error::PolyDbError;
#[allow(unused_imports)]
use crate::pool::{AnyPool, ConnectionPool, PoolRegistry};
use crate::request::RequestOptions;
use crate::types::BackendKind;

/// Builds an [`Engine`] from an [`EngineConfig`] plus the collaborators a config file cannot
/// name: the record cache, `DynamoDB` transports and CQL connectors.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    cache: Option<Arc<dyn Cache>>,
    #[cfg(feature = "dynamodb")]
    dynamo: HashMap<String, Arc<dyn DynamoApi>>,
    #[cfg(feature = "cassandra")]
    cql: HashMap<String, Arc<dyn CqlConnector>>,
    init_tables: bool,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("init_tables", &self.init_tables)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            init_tables: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Transport for a `dynamodb` pool. Otherwise a pool with a url signs HTTP requests with
    /// credentials from the environment, and a pool without one uses the in-process store.
    #[cfg(feature = "dynamodb")]
    #[must_use]
    pub fn dynamo_api(mut self, pool: impl Into<String>, api: Arc<dyn DynamoApi>) -> Self {
        self.dynamo.insert(pool.into(), api);
        self
    }

    /// Session factory for a `cassandra` pool. Pools without one connect with the `scylla`
    /// client to the contact points in their url.
    #[cfg(feature = "cassandra")]
    #[must_use]
    pub fn cql_connector(mut self, pool: impl Into<String>, connector: Arc<dyn CqlConnector>) -> Self {
        self.cql.insert(pool.into(), connector);
        self
    }

    /// With `false`, `build` only reads the live schema and never creates or alters tables.
    #[must_use]
    pub fn init_tables(mut self, init: bool) -> Self {
        self.init_tables = init;
        self
    }

    /// Open every configured pool, register routes, then create or upgrade the declared tables
    /// (or just cache columns).
    ///
    /// # Errors
    /// `ConfigError` for invalid configuration or a backend not compiled in, otherwise the
    /// first pool or schema error.
    pub async fn build(self) -> Result<Engine, PolyDbError> {
        self.config.validate()?;
        let registry = Arc::new(PoolRegistry::new());
        for pool in &self.config.pools {
            registry.insert(self.open(pool).await?);
        }
        if let Some(name) = &self.config.default_pool {
            registry.set_default(name.clone());
        }
        for (table, pool) in &self.config.routes {
            registry.route(table, pool.clone());
        }

        let engine = Engine {
            tables: RwLock::new(self.config.tables.clone()),
            cache: self.cache,
            cached: self.config.cached.iter().map(|t| t.to_lowercase()).collect(),
            ttl: self.config.cache_ttl_ms.map(Duration::from_millis),
            ..Engine::new(registry)
        };

        for pool in engine.pools.names() {
            if self.init_tables {
                engine.init_tables(&pool).await?;
            } else {
                engine.cache_columns(&pool).await?;
            }
        }
        info!("engine: ready with pools {:?}", engine.pools.names());
        Ok(engine)
    }

    async fn open(&self, config: &PoolConfig) -> Result<AnyPool, PolyDbError> {
        let settings = config.settings();
        let defaults = RequestOptions::from(&config.defaults);
        let name = config.name.clone();
        match config.kind {
            #[cfg(feature = "sqlite")]
            BackendKind::Sqlite => {
                let mut options = SqliteOptionsBuilder::new(config.url.clone().unwrap_or_else(|| ":memory:".into()))
                    .readonly(config.readonly)
                    .watch(settings.watch.is_some());
                for sql in &config.init {
                    options = options.init_statement(sql.clone());
                }
                let driver = SqliteDriver::new(options.finish());
                Ok(AnyPool::Sqlite(ConnectionPool::new(name, driver, &settings, defaults).await?))
            }
            #[cfg(feature = "postgres")]
            BackendKind::Postgres => {
                let url = config
                    .url
                    .clone()
                    .ok_or_else(|| PolyDbError::ConfigError(format!("pool {name}: url is required")))?;
                let mut options = PostgresOptionsBuilder::new(url);
                for sql in &config.init {
                    options = options.init_statement(sql.clone());
                }
                let driver = PostgresDriver::new(options.finish()?);
                Ok(AnyPool::Postgres(ConnectionPool::new(name, driver, &settings, defaults).await?))
            }
            #[cfg(feature = "dynamodb")]
            BackendKind::DynamoDb => {
                let driver = match (self.dynamo.get(&name), &config.url) {
                    (Some(api), _) => DynamoDriver::new(Arc::clone(api)),
                    (None, None) => DynamoDriver::memory(),
                    // an http(s) endpoint, or `aws`/`dynamodb://` for the regional one
                    (None, Some(url)) => {
                        let endpoint = url.starts_with("http").then_some(url.as_str());
                        DynamoDriver::new(Arc::new(HttpDynamo::from_env(endpoint)?))
                    }
                };
                Ok(AnyPool::DynamoDb(ConnectionPool::new(name, driver, &settings, defaults).await?))
            }
            #[cfg(feature = "cassandra")]
            BackendKind::Cassandra => {
                // `host:port,host:port/keyspace`, or just the keyspace with a registered connector
                let url = config.url.clone().unwrap_or_else(|| name.clone());
                let bare = url.trim_start_matches("cassandra://").trim_start_matches("scylla://");
                let (nodes, keyspace) = match bare.rsplit_once('/') {
                    Some((nodes, keyspace)) => (Some(nodes), keyspace.to_string()),
                    None => (None, url.clone()),
                };
                let connector: Arc<dyn CqlConnector> = match (self.cql.get(&name), nodes) {
                    (Some(connector), _) => Arc::clone(connector),
                    (None, Some(nodes)) => Arc::new(ScyllaConnector::from_contact_points(nodes)),
                    (None, None) => {
                        return Err(PolyDbError::ConfigError(format!(
                            "pool {name}: no contact points in {url} and no cql connector"
                        )));
                    }
                };
                let mut driver = CassandraDriver::new(connector, keyspace);
                for cql in &config.init {
                    driver = driver.init_statement(cql.clone());
                }
                Ok(AnyPool::Cassandra(ConnectionPool::new(name, driver, &settings, defaults).await?))
            }
            #[allow(unreachable_patterns)]
            other => Err(PolyDbError::ConfigError(format!(
                "pool {name}: backend {other} is not enabled in this build"
            ))),
        }
    }
}
