//! `scylla`-backed sessions for Cassandra and `ScyllaDB` clusters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use dashmap::DashMap;
use scylla::frame::response::result::{ColumnType as CqlType, CqlValue, Row};
use scylla::frame::value::{Counter, CqlTimestamp};
use scylla::prepared_statement::PreparedStatement;
use scylla::{QueryResult, Session, SessionBuilder};
use tracing::debug;

use super::{CqlConnector, CqlSession};
use crate::error::PolyDbError;
use crate::types::{Record, RowValues};

fn cql_error(e: impl std::fmt::Display) -> PolyDbError {
    PolyDbError::Backend {
        pool: "cassandra".to_string(),
        message: e.to_string(),
    }
}

/// Opens one `scylla` session per pooled client.
#[derive(Debug, Clone)]
pub struct ScyllaConnector {
    nodes: Vec<String>,
    credentials: Option<(String, String)>,
}

impl ScyllaConnector {
    #[must_use]
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            credentials: None,
        }
    }

    /// Nodes from a `host:port,host:port` list; a `cassandra://` scheme is ignored.
    #[must_use]
    pub fn from_contact_points(list: &str) -> Self {
        let list = list.trim_start_matches("cassandra://").trim_start_matches("scylla://");
        Self::new(list.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }
}

#[async_trait]
impl CqlConnector for ScyllaConnector {
    async fn connect(&self, keyspace: &str) -> Result<Arc<dyn CqlSession>, PolyDbError> {
        let mut builder = SessionBuilder::new().known_nodes(&self.nodes);
        if let Some((user, password)) = &self.credentials {
            builder = builder.user(user, password);
        }
        let session = builder
            .build()
            .await
            .map_err(|e| PolyDbError::ConnectionError(format!("cassandra {:?}: {e}", self.nodes)))?;
        if !keyspace.is_empty() {
            session.use_keyspace(keyspace, false).await.map_err(cql_error)?;
        }
        debug!("cassandra: session on {:?}", self.nodes);
        Ok(Arc::new(ScyllaSession::new(session)))
    }
}

/// A `scylla` session. Statements with bound values are prepared once and reused, so each
/// value is converted to the type the server expects for its placeholder.
pub struct ScyllaSession {
    session: Session,
    prepared: DashMap<String, PreparedStatement>,
}

impl ScyllaSession {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            session,
            prepared: DashMap::new(),
        }
    }

    async fn prepare(&self, cql: &str) -> Result<PreparedStatement, PolyDbError> {
        if let Some(stmt) = self.prepared.get(cql) {
            return Ok(stmt.clone());
        }
        let stmt = self.session.prepare(cql).await.map_err(cql_error)?;
        self.prepared.insert(cql.to_string(), stmt.clone());
        Ok(stmt)
    }
}

#[async_trait]
impl CqlSession for ScyllaSession {
    async fn execute(&self, cql: &str, values: &[RowValues]) -> Result<Vec<Record>, PolyDbError> {
        let result = if values.is_empty() {
            self.session.query(cql, ()).await.map_err(cql_error)?
        } else {
            let stmt = self.prepare(cql).await?;
            let bound: Vec<Option<CqlValue>> = stmt
                .get_variable_col_specs()
                .iter()
                .zip(values)
                .map(|(spec, value)| to_cql(value, &spec.typ))
                .collect();
            self.session.execute(&stmt, bound).await.map_err(cql_error)?
        };
        Ok(records(result))
    }
}

fn records(result: QueryResult) -> Vec<Record> {
    let names: Vec<String> = result.col_specs.iter().map(|spec| spec.name.clone()).collect();
    result
        .rows
        .unwrap_or_default()
        .into_iter()
        .map(|Row { columns }| {
            names
                .iter()
                .cloned()
                .zip(columns.into_iter().map(|v| v.map_or(RowValues::Null, from_cql)))
                .collect()
        })
        .collect()
}

fn from_cql(value: CqlValue) -> RowValues {
    match value {
        CqlValue::Ascii(s) | CqlValue::Text(s) => RowValues::Text(s),
        CqlValue::Boolean(b) => RowValues::Bool(b),
        CqlValue::Blob(bytes) => RowValues::Blob(bytes),
        CqlValue::TinyInt(n) => RowValues::Int(i64::from(n)),
        CqlValue::SmallInt(n) => RowValues::Int(i64::from(n)),
        CqlValue::Int(n) => RowValues::Int(i64::from(n)),
        CqlValue::BigInt(n) => RowValues::Int(n),
        CqlValue::Counter(Counter(n)) => RowValues::Int(n),
        CqlValue::Float(f) => RowValues::Float(f64::from(f)),
        CqlValue::Double(f) => RowValues::Float(f),
        CqlValue::Timestamp(CqlTimestamp(ms)) => DateTime::from_timestamp_millis(ms)
            .map_or(RowValues::Null, |at| RowValues::Timestamp(at.naive_utc())),
        CqlValue::Uuid(id) => RowValues::Text(id.to_string()),
        CqlValue::List(items) | CqlValue::Set(items) => RowValues::JSON(serde_json::Value::Array(
            items.into_iter().map(|v| from_cql(v).to_json()).collect(),
        )),
        CqlValue::Map(pairs) => RowValues::JSON(serde_json::Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (from_cql(k).to_text(), from_cql(v).to_json()))
                .collect(),
        )),
        CqlValue::Empty => RowValues::Null,
        other => RowValues::Text(format!("{other:?}")),
    }
}

/// Convert a bound value to the placeholder's column type; `None` binds NULL.
fn to_cql(value: &RowValues, target: &CqlType) -> Option<CqlValue> {
    let cql = match (target, value) {
        (_, RowValues::Null) => return None,
        (CqlType::Int, RowValues::Int(n)) => i32::try_from(*n).map_or(CqlValue::BigInt(*n), CqlValue::Int),
        (CqlType::SmallInt, RowValues::Int(n)) => i16::try_from(*n).map_or(CqlValue::BigInt(*n), CqlValue::SmallInt),
        (CqlType::TinyInt, RowValues::Int(n)) => i8::try_from(*n).map_or(CqlValue::BigInt(*n), CqlValue::TinyInt),
        (CqlType::Counter, RowValues::Int(n)) => CqlValue::Counter(Counter(*n)),
        (CqlType::Double, v) => CqlValue::Double(v.to_number()?),
        #[allow(clippy::cast_possible_truncation)]
        (CqlType::Float, v) => CqlValue::Float(v.to_number()? as f32),
        (CqlType::Timestamp, RowValues::Timestamp(at)) => {
            CqlValue::Timestamp(CqlTimestamp(at.and_utc().timestamp_millis()))
        }
        (CqlType::Timestamp, RowValues::Int(ms)) => CqlValue::Timestamp(CqlTimestamp(*ms)),
        (CqlType::Uuid, RowValues::Text(s)) => CqlValue::Uuid(uuid::Uuid::parse_str(s).ok()?),
        (CqlType::Text | CqlType::Ascii, v) => CqlValue::Text(v.to_text()),
        (_, other) => by_value(other)?,
    };
    Some(cql)
}

fn by_value(value: &RowValues) -> Option<CqlValue> {
    Some(match value {
        RowValues::Null => return None,
        RowValues::Int(n) => CqlValue::BigInt(*n),
        RowValues::Float(f) => CqlValue::Double(*f),
        RowValues::Text(s) => CqlValue::Text(s.clone()),
        RowValues::Bool(b) => CqlValue::Boolean(*b),
        RowValues::Timestamp(at) => CqlValue::Timestamp(CqlTimestamp(at.and_utc().timestamp_millis())),
        RowValues::JSON(json) => CqlValue::Text(json.to_string()),
        RowValues::Blob(bytes) => CqlValue::Blob(bytes.clone()),
        RowValues::List(items) => CqlValue::List(items.iter().filter_map(by_value).collect()),
    })
}
