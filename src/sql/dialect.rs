use crate::translation::PlaceholderStyle;
use crate::types::ColumnType;

/// Text format for timestamps inlined into statements or bound as text.
pub const TIMESTAMP_TEXT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// SQL-family dialects understood by the statement builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
    /// Cassandra Query Language
    Cql,
}

impl Dialect {
    #[must_use]
    pub fn placeholder_style(self) -> PlaceholderStyle {
        match self {
            Dialect::Sqlite => PlaceholderStyle::Sqlite,
            Dialect::Postgres => PlaceholderStyle::Postgres,
            Dialect::Mysql | Dialect::Cql => PlaceholderStyle::Positional,
        }
    }

    #[must_use]
    pub fn bool_literal(self, value: bool) -> &'static str {
        match (self, value) {
            (Dialect::Sqlite, true) => "1",
            (Dialect::Sqlite, false) => "0",
            (Dialect::Cql, true) => "true",
            (Dialect::Cql, false) => "false",
            (_, true) => "TRUE",
            (_, false) => "FALSE",
        }
    }

    /// `LIKE` exists natively; CQL needs range emulation for prefixes.
    #[must_use]
    pub fn has_like(self) -> bool {
        !matches!(self, Dialect::Cql)
    }

    /// Backslash is an escape character inside string literals.
    #[must_use]
    pub fn escapes_backslash(self) -> bool {
        matches!(self, Dialect::Mysql)
    }

    #[must_use]
    pub fn supports_returning(self) -> bool {
        matches!(self, Dialect::Sqlite | Dialect::Postgres)
    }

    #[must_use]
    pub fn supports_offset(self) -> bool {
        !matches!(self, Dialect::Cql)
    }

    /// Native column type for a logical type; `types_map` entries win.
    #[must_use]
    pub fn native_type(
        self,
        ty: &ColumnType,
        types_map: &std::collections::BTreeMap<String, String>,
    ) -> String {
        if let Some(mapped) = types_map.get(&ty.to_string()) {
            return mapped.clone();
        }
        let name = match (self, ty) {
            (Dialect::Sqlite, ColumnType::Int | ColumnType::Counter | ColumnType::Mtime) => "INTEGER",
            (Dialect::Sqlite, ColumnType::Real) => "REAL",
            (Dialect::Sqlite, ColumnType::Bool) => "BOOLEAN",
            (Dialect::Sqlite, ColumnType::Date) => "TIMESTAMP",
            (Dialect::Sqlite, ColumnType::Blob) => "BLOB",
            (Dialect::Sqlite, _) => "TEXT",

            (Dialect::Postgres, ColumnType::Int | ColumnType::Counter | ColumnType::Mtime) => "BIGINT",
            (Dialect::Postgres, ColumnType::Real) => "DOUBLE PRECISION",
            (Dialect::Postgres, ColumnType::Bool) => "BOOLEAN",
            (Dialect::Postgres, ColumnType::Date) => "TIMESTAMP",
            (Dialect::Postgres, ColumnType::Json) => "JSONB",
            (Dialect::Postgres, ColumnType::Blob) => "BYTEA",
            (Dialect::Postgres, ColumnType::TsVector) => "TSVECTOR",
            (Dialect::Postgres, _) => "TEXT",

            (Dialect::Mysql, ColumnType::Int | ColumnType::Counter | ColumnType::Mtime) => "BIGINT",
            (Dialect::Mysql, ColumnType::Real) => "DOUBLE",
            (Dialect::Mysql, ColumnType::Bool) => "BOOLEAN",
            (Dialect::Mysql, ColumnType::Date) => "DATETIME(3)",
            (Dialect::Mysql, ColumnType::Json) => "JSON",
            (Dialect::Mysql, ColumnType::Blob) => "BLOB",
            (Dialect::Mysql, ColumnType::Uuid) => "VARCHAR(36)",
            (Dialect::Mysql, _) => "TEXT",

            (Dialect::Cql, ColumnType::Int | ColumnType::Mtime) => "bigint",
            (Dialect::Cql, ColumnType::Counter) => "counter",
            (Dialect::Cql, ColumnType::Real) => "double",
            (Dialect::Cql, ColumnType::Bool) => "boolean",
            (Dialect::Cql, ColumnType::Date) => "timestamp",
            (Dialect::Cql, ColumnType::Blob) => "blob",
            (Dialect::Cql, _) => "text",
        };
        match ty {
            ColumnType::Other(native) if self != Dialect::Cql => native.to_uppercase(),
            ColumnType::Other(native) => native.clone(),
            _ => name.to_string(),
        }
    }
}
