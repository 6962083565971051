use std::str::FromStr;
use std::time::Duration;

use crate::error::PolyDbError;

/// Options for a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub config: tokio_postgres::Config,
    /// Schema introspected by `cache_columns`.
    pub schema: String,
    /// Statements run on every new connection.
    pub init: Vec<String>,
}

impl PostgresOptions {
    /// Parse a connection string, either `postgresql://user:pw@host/db` or
    /// `host=... dbname=...`.
    ///
    /// # Errors
    /// `ConfigError` when the string does not parse or names no host or database.
    pub fn from_url(url: &str) -> Result<Self, PolyDbError> {
        let config = tokio_postgres::Config::from_str(url)
            .map_err(|e| PolyDbError::ConfigError(format!("postgres url: {e}")))?;
        Self::from_config(config)
    }

    /// # Errors
    /// `ConfigError` when no host or database is set.
    pub fn from_config(config: tokio_postgres::Config) -> Result<Self, PolyDbError> {
        if config.get_hosts().is_empty() {
            return Err(PolyDbError::ConfigError("host is required".to_string()));
        }
        if config.get_dbname().is_none() {
            return Err(PolyDbError::ConfigError("dbname is required".to_string()));
        }
        Ok(Self {
            config,
            schema: "public".to_string(),
            init: Vec::new(),
        })
    }
}

/// Fluent builder for [`PostgresOptions`].
#[derive(Debug, Clone)]
pub struct PostgresOptionsBuilder {
    url: String,
    schema: Option<String>,
    init: Vec<String>,
    connect_timeout: Option<Duration>,
}

impl PostgresOptionsBuilder {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            schema: None,
            init: Vec::new(),
            connect_timeout: None,
        }
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn init_statement(mut self, sql: impl Into<String>) -> Self {
        self.init.push(sql.into());
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// # Errors
    /// See [`PostgresOptions::from_url`].
    pub fn finish(self) -> Result<PostgresOptions, PolyDbError> {
        let mut opts = PostgresOptions::from_url(&self.url)?;
        if let Some(timeout) = self.connect_timeout {
            opts.config.connect_timeout(timeout);
        }
        if let Some(schema) = self.schema {
            opts.schema = schema;
        }
        opts.init = self.init;
        Ok(opts)
    }
}
