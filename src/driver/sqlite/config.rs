use std::path::PathBuf;
use std::time::Duration;

/// Options for a `SQLite` pool.
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteOptions {
    pub db_path: String,
    pub readonly: bool,
    /// Arm the file watch: a replaced database file invalidates every open client.
    pub watch: bool,
    pub busy_timeout: Duration,
    pub journal_mode: Option<String>,
    pub cache_size: Option<i64>,
    pub synchronous: Option<String>,
    /// Statements run on every new connection after the pragmas.
    pub init: Vec<String>,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            readonly: false,
            watch: false,
            busy_timeout: Duration::from_secs(5),
            journal_mode: Some("WAL".to_string()),
            cache_size: None,
            synchronous: None,
            init: Vec::new(),
        }
    }

    /// In-memory databases cannot be watched and are never opened read-only.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.db_path == ":memory:" || self.db_path.is_empty()
    }

    #[must_use]
    pub fn watch_path(&self) -> Option<PathBuf> {
        (self.watch && !self.is_memory()).then(|| PathBuf::from(&self.db_path))
    }

    /// Pragmas followed by the custom init statements.
    #[must_use]
    pub fn init_statements(&self) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some(mode) = self.journal_mode.as_ref().filter(|_| !self.readonly && !self.is_memory()) {
            statements.push(format!("PRAGMA journal_mode = {mode}"));
        }
        if let Some(size) = self.cache_size {
            statements.push(format!("PRAGMA cache_size = -{}", size.abs()));
        }
        if let Some(sync) = &self.synchronous {
            statements.push(format!("PRAGMA synchronous = {sync}"));
        }
        statements.extend(self.init.iter().cloned());
        statements
    }
}

/// Fluent builder for [`SqliteOptions`].
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.opts.readonly = readonly;
        self
    }

    #[must_use]
    pub fn watch(mut self, watch: bool) -> Self {
        self.opts.watch = watch;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.opts.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn journal_mode(mut self, mode: Option<String>) -> Self {
        self.opts.journal_mode = mode;
        self
    }

    #[must_use]
    pub fn cache_size(mut self, pages: i64) -> Self {
        self.opts.cache_size = Some(pages);
        self
    }

    #[must_use]
    pub fn synchronous(mut self, mode: impl Into<String>) -> Self {
        self.opts.synchronous = Some(mode.into());
        self
    }

    #[must_use]
    pub fn init_statement(mut self, sql: impl Into<String>) -> Self {
        self.opts.init.push(sql.into());
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pragmas_then_init() {
        let opts = SqliteOptionsBuilder::new("/tmp/x.db")
            .cache_size(2000)
            .init_statement("PRAGMA foreign_keys = ON")
            .finish();
        assert_eq!(
            opts.init_statements(),
            vec![
                "PRAGMA journal_mode = WAL".to_string(),
                "PRAGMA cache_size = -2000".to_string(),
                "PRAGMA foreign_keys = ON".to_string(),
            ]
        );
    }

    #[test]
    fn readonly_skips_journal_mode() {
        let opts = SqliteOptionsBuilder::new("/tmp/x.db").readonly(true).watch(true).finish();
        assert!(opts.init_statements().is_empty());
        assert_eq!(opts.watch_path(), Some(PathBuf::from("/tmp/x.db")));
        assert!(SqliteOptions::new(":memory:").watch_path().is_none());
    }
}
