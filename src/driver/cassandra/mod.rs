//! Cassandra / `ScyllaDB` driver: CQL text from the shared SQL compiler, run over a
//! [`CqlSession`] (the `scylla` client by default, or one supplied by the application).
//!
//! CQL has no `OFFSET`, so continuation tokens carry the last row's primary key and the next
//! page restarts after it. A call pinning the whole partition key resumes with a clustering
//! tuple comparison; otherwise the page finishes the last row's partition and then moves on
//! with `token(pk) > token(...)`.

mod introspect;
mod session;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Driver, DriverOutput};
use crate::error::PolyDbError;
use crate::request::{BackendRequest, Payload, RequestOptions};
use crate::results::NextToken;
use crate::schema::SchemaSnapshot;
use crate::sql::{Dialect, SqlContext, column_type, prepare_sql, sql_value};
use crate::types::{BackendKind, Op, Record, RowValues};

pub use session::{ScyllaConnector, ScyllaSession};

/// An open CQL session. Values bind to `?` placeholders in order.
#[async_trait]
pub trait CqlSession: Send + Sync + 'static {
    async fn execute(&self, cql: &str, values: &[RowValues]) -> Result<Vec<Record>, PolyDbError>;
}

/// Opens sessions for a pool.
#[async_trait]
pub trait CqlConnector: Send + Sync + 'static {
    async fn connect(&self, keyspace: &str) -> Result<Arc<dyn CqlSession>, PolyDbError>;
}

#[derive(Clone)]
pub struct CassandraDriver {
    connector: Arc<dyn CqlConnector>,
    keyspace: String,
    init: Vec<String>,
}

impl std::fmt::Debug for CassandraDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CassandraDriver")
            .field("keyspace", &self.keyspace)
            .finish_non_exhaustive()
    }
}

impl CassandraDriver {
    #[must_use]
    pub fn new(connector: Arc<dyn CqlConnector>, keyspace: impl Into<String>) -> Self {
        Self {
            connector,
            keyspace: keyspace.into(),
            init: Vec::new(),
        }
    }

    /// Statement run on every new session.
    #[must_use]
    pub fn init_statement(mut self, cql: impl Into<String>) -> Self {
        self.init.push(cql.into());
        self
    }

    #[must_use]
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }
}

fn pins_partition(obj: &Record, partition: &[String], opts: &RequestOptions) -> bool {
    !partition.is_empty()
        && partition.iter().all(|k| {
            obj.get(k).is_some_and(|v| !v.is_empty() && !matches!(v, RowValues::List(_)))
                && opts.op_for(k).is_none_or(|op| op == "=")
        })
}

/// Where the next page starts relative to the last row returned.
#[derive(Debug, Clone, PartialEq)]
enum Resume {
    /// A single condition: the clustering slice of a pinned partition, or the partitions
    /// after the last one when there are no clustering keys.
    After(String),
    /// The rest of the last row's partition first, then the partitions after it.
    Split { rest: String, next: String },
}

/// Resume point after `last`, or `None` when `last` lacks a needed key.
fn resume_condition(
    table: &str,
    obj: &Record,
    last: &Record,
    opts: &RequestOptions,
    schema: &SchemaSnapshot,
) -> Option<Resume> {
    let keys = schema.keys(table);
    let partition = schema.partition_keys(table);
    let clustering = &keys[partition.len()..];
    let columns = schema.table(table);
    let literal = |name: &String| -> Option<String> {
        let ty = column_type(name, opts, columns);
        last.get(name).map(|v| sql_value(v, &ty, Dialect::Cql))
    };
    let slice = |op: &str| -> Option<String> {
        let values = clustering.iter().map(literal).collect::<Option<Vec<_>>>()?;
        Some(format!("({}) {op} ({})", clustering.join(","), values.join(",")))
    };

    if pins_partition(obj, partition, opts) && !clustering.is_empty() {
        let desc = opts
            .sort_keys()
            .first()
            .is_some_and(|(name, desc)| *desc && clustering.first().is_some_and(|c| c == name));
        return slice(if desc { "<" } else { ">" }).map(Resume::After);
    }
    if partition.is_empty() {
        return None;
    }
    let values = partition.iter().map(literal).collect::<Option<Vec<_>>>()?;
    let next = format!("token({}) > token({})", partition.join(","), values.join(","));
    if clustering.is_empty() {
        return Some(Resume::After(next));
    }
    let pinned = partition
        .iter()
        .zip(&values)
        .map(|(name, value)| format!("{name} = {value}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    Some(Resume::Split {
        rest: format!("{pinned} AND {}", slice(">")?),
        next,
    })
}

/// Splice an extra condition into a compiled `SELECT`. The first ` WHERE ` is always the
/// statement's own, since only identifiers precede it.
fn add_condition(text: &str, condition: &str) -> String {
    if let Some(at) = text.find(" WHERE ") {
        let split = at + " WHERE ".len();
        return format!("{}{condition} AND {}", &text[..split], &text[split..]);
    }
    let tail = [" ORDER BY ", " LIMIT ", " ALLOW FILTERING"]
        .iter()
        .filter_map(|marker| text.find(marker))
        .min()
        .unwrap_or(text.len());
    format!("{} WHERE {condition}{}", &text[..tail], &text[tail..])
}

fn applied(rows: &[Record]) -> Option<bool> {
    rows.first()?.get("[applied]").and_then(RowValues::as_bool).copied()
}

#[async_trait]
impl Driver for CassandraDriver {
    type Client = Arc<dyn CqlSession>;

    fn kind(&self) -> BackendKind {
        BackendKind::Cassandra
    }

    async fn connect(&self) -> Result<Self::Client, PolyDbError> {
        let session = self.connector.connect(&self.keyspace).await?;
        for cql in &self.init {
            session.execute(cql, &[]).await?;
        }
        debug!("cassandra: connected {}", self.keyspace);
        Ok(session)
    }

    async fn ping(&self, client: &mut Self::Client) -> Result<(), PolyDbError> {
        client.execute("SELECT release_version FROM system.local", &[]).await?;
        Ok(())
    }

    async fn query(
        &self,
        client: &mut Self::Client,
        req: &BackendRequest,
    ) -> Result<DriverOutput, PolyDbError> {
        if req.op.is_read() && !req.statements.is_empty() {
            // resumed page: each statement continues where the previous one ran out
            let count = req.count.unwrap_or(usize::MAX);
            let mut rows = Vec::new();
            for cql in &req.statements {
                if rows.len() >= count {
                    break;
                }
                rows.extend(client.execute(cql, &req.values).await?);
            }
            rows.truncate(count);
            return Ok(DriverOutput::rows(rows));
        }
        if !req.statements.is_empty() {
            for cql in &req.statements {
                client.execute(cql, &[]).await?;
            }
            return Ok(DriverOutput::default());
        }
        let rows = client.execute(&req.text, &req.values).await?;
        if req.op.is_read() {
            return Ok(DriverOutput::rows(rows));
        }
        match applied(&rows) {
            Some(false) if req.op == Op::Add => Err(PolyDbError::Backend {
                pool: "cassandra".to_string(),
                message: format!("ConditionalCheckFailed: {} already exists", req.table),
            }),
            Some(false) => Ok(DriverOutput::affected(0)),
            _ if req.op.is_write() => Ok(DriverOutput::affected(1)),
            _ => Ok(DriverOutput::rows(rows)),
        }
    }

    async fn cache_columns(&self, client: &mut Self::Client) -> Result<SchemaSnapshot, PolyDbError> {
        introspect::introspect(client.as_ref(), &self.keyspace).await
    }

    fn prepare(
        &self,
        op: Op,
        table: &str,
        payload: Payload<'_>,
        opts: &RequestOptions,
        schema: &SchemaSnapshot,
    ) -> Result<Option<BackendRequest>, PolyDbError> {
        let ctx = SqlContext::new(Dialect::Cql, schema).with_bind(Self::bind_value);
        let resume = match (op, payload, opts.start.as_ref()) {
            (Op::Select | Op::Search, Payload::Record(obj), Some(NextToken::Key(last))) => {
                resume_condition(table, obj, last, opts, schema)
            }
            _ => None,
        };
        let Some(resume) = resume else {
            return prepare_sql(&ctx, op, table, payload, opts);
        };
        let fresh = RequestOptions {
            start: None,
            ..opts.clone()
        };
        Ok(prepare_sql(&ctx, op, table, payload, &fresh)?.map(|mut req| {
            match resume {
                Resume::After(condition) => req.text = add_condition(&req.text, &condition),
                Resume::Split { rest, next } => {
                    req.statements = vec![add_condition(&req.text, &rest), add_condition(&req.text, &next)];
                    req.text = req.statements.join(";\n");
                }
            }
            req.start = opts.start.clone();
            req
        }))
    }

    /// A full page continues after its last row's primary key.
    fn next_token(&self, req: &BackendRequest, out: &DriverOutput) -> Option<NextToken> {
        let count = req.count.filter(|c| *c > 0)?;
        if out.rows.len() < count || req.keys.is_empty() {
            return None;
        }
        let last = out.rows.last()?;
        let key = req
            .keys
            .iter()
            .map(|k| last.get(k).map(|v| (k.clone(), v.clone())))
            .collect::<Option<Record>>()?;
        Some(NextToken::Key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::schema::ColumnDef;
    use crate::types::ColumnType;

    fn schema() -> SchemaSnapshot {
        let mut snap = SchemaSnapshot::default();
        snap.insert_column("events", ColumnDef::new("site").primary());
        snap.insert_column("events", ColumnDef::new("at").with_type(ColumnType::Int).primary());
        snap.insert_column("events", ColumnDef::new("name"));
        snap.keys.insert("events".into(), vec!["site".into(), "at".into()]);
        snap.partitions.insert("events".into(), 1);
        snap
    }

    struct Nothing;

    #[async_trait]
    impl CqlConnector for Nothing {
        async fn connect(&self, _keyspace: &str) -> Result<Arc<dyn CqlSession>, PolyDbError> {
            Err(PolyDbError::ConnectionError("offline".into()))
        }
    }

    fn driver() -> CassandraDriver {
        CassandraDriver::new(Arc::new(Nothing), "ks")
    }

    #[test]
    fn resumes_inside_the_partition_before_moving_on() {
        let opts = RequestOptions::new()
            .count(2_usize)
            .start(NextToken::Key(record! { "site" => "a", "at" => 5_i64 }));
        let req = driver()
            .prepare(Op::Select, "events", Payload::Record(&Record::new()), &opts, &schema())
            .unwrap()
            .unwrap();
        assert_eq!(
            req.statements,
            vec![
                "SELECT * FROM events WHERE site = 'a' AND (at) > (5) LIMIT 2".to_string(),
                "SELECT * FROM events WHERE token(site) > token('a') LIMIT 2".to_string(),
            ]
        );
    }

    #[test]
    fn resumes_by_token_without_clustering_keys() {
        let mut snap = SchemaSnapshot::default();
        snap.insert_column("sites", ColumnDef::new("site").primary());
        snap.insert_column("sites", ColumnDef::new("name"));
        snap.keys.insert("sites".into(), vec!["site".into()]);
        snap.partitions.insert("sites".into(), 1);
        let opts = RequestOptions::new()
            .count(2_usize)
            .start(NextToken::Key(record! { "site" => "a" }));
        let req = driver()
            .prepare(Op::Select, "sites", Payload::Record(&Record::new()), &opts, &snap)
            .unwrap()
            .unwrap();
        assert!(req.statements.is_empty());
        assert_eq!(req.text, "SELECT * FROM sites WHERE token(site) > token('a') LIMIT 2");
    }

    #[test]
    fn resumes_by_clustering_within_partition() {
        let opts = RequestOptions::new()
            .count(2_usize)
            .start(NextToken::Key(record! { "site" => "a", "at" => 5_i64 }));
        let obj = record! { "site" => "a" };
        let req = driver()
            .prepare(Op::Select, "events", Payload::Record(&obj), &opts, &schema())
            .unwrap()
            .unwrap();
        assert_eq!(
            req.text,
            "SELECT * FROM events WHERE (at) > (5) AND site = 'a' LIMIT 2 ALLOW FILTERING"
        );
    }

    #[test]
    fn full_pages_yield_key_tokens() {
        let req = BackendRequest::sql(Op::Select, "events", "SELECT", Vec::new())
            .with_paging(Some(1), 0, None)
            .with_keys(vec!["site".into(), "at".into()]);
        let out = DriverOutput::rows(vec![record! { "site" => "a", "at" => 5_i64, "name" => "x" }]);
        assert_eq!(
            driver().next_token(&req, &out),
            Some(NextToken::Key(record! { "site" => "a", "at" => 5_i64 }))
        );
        assert_eq!(driver().next_token(&req, &DriverOutput::default()), None);
    }
}
