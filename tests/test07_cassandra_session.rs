#![cfg(feature = "cassandra")]

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use polydb::prelude::*;

/// In-process stand-in for a cluster holding one `events` table: partition key `site`,
/// clustering key `at`. It understands the statement shapes the CQL compiler emits.
#[derive(Default)]
struct LocalCluster {
    rows: Mutex<Vec<Record>>,
    log: Mutex<Vec<String>>,
}

fn token(site: &RowValues) -> i64 {
    // FNV-1a, so partition order differs from key order
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in site.to_text().bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    i64::from_ne_bytes(hash.to_ne_bytes())
}

fn literal(text: &str) -> RowValues {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        return RowValues::Text(inner.replace("''", "'"));
    }
    text.parse::<i64>().map_or_else(|_| RowValues::Text(text.to_string()), RowValues::Int)
}

fn compare(a: &RowValues, b: &RowValues) -> Ordering {
    match (a, b) {
        (RowValues::Int(x), RowValues::Int(y)) => x.cmp(y),
        _ => a.to_text().cmp(&b.to_text()),
    }
}

fn order(a: &Record, b: &Record) -> Ordering {
    let site = |r: &Record| r.get("site").map_or(0, token);
    site(a)
        .cmp(&site(b))
        .then_with(|| compare(&a["at"], &b["at"]))
}

fn inside(text: &str, open: &str, close: char) -> String {
    let start = text.find(open).map_or(0, |i| i + open.len());
    let end = text[start..].find(close).map_or(text.len(), |i| start + i);
    text[start..end].to_string()
}

fn matches(row: &Record, condition: &str) -> bool {
    let condition = condition.trim();
    if condition.starts_with("token(") {
        let (_, right) = condition.split_once('>').unwrap_or_default();
        let bound = literal(&inside(right, "token(", ')'));
        return row.get("site").map_or(0, token) > token(&bound);
    }
    if let Some(rest) = condition.strip_prefix('(') {
        let (columns, rest) = rest.split_once(')').unwrap_or_default();
        let (op, value) = rest.trim().split_at(1);
        let bound = literal(&inside(value, "(", ')'));
        let current = &row[columns.trim()];
        return match op {
            ">" => compare(current, &bound) == Ordering::Greater,
            _ => compare(current, &bound) == Ordering::Less,
        };
    }
    let (column, value) = condition.split_once(" = ").unwrap_or_default();
    row.get(column.trim()) == Some(&literal(value))
}

impl LocalCluster {
    fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn schema_rows() -> Vec<Record> {
        [
            ("site", "partition_key", 0_i64, "text"),
            ("at", "clustering", 0, "int"),
            ("name", "regular", -1, "text"),
        ]
        .into_iter()
        .map(|(column, kind, position, ty)| {
            record! {
                "table_name" => "events",
                "column_name" => column,
                "kind" => kind,
                "position" => position,
                "type" => ty,
            }
        })
        .collect()
    }

    fn insert(&self, cql: &str, values: &[RowValues]) -> Vec<Record> {
        let columns = inside(cql, "(", ')');
        let row: Record = columns
            .split(',')
            .map(str::trim)
            .map(String::from)
            .zip(values.iter().cloned())
            .collect();
        let mut rows = self.rows.lock().unwrap();
        let conditional = cql.ends_with("IF NOT EXISTS");
        let exists = rows.iter().any(|r| r["site"] == row["site"] && r["at"] == row["at"]);
        if exists && conditional {
            return vec![record! { "[applied]" => false }];
        }
        rows.retain(|r| !(r["site"] == row["site"] && r["at"] == row["at"]));
        rows.push(row);
        if conditional {
            vec![record! { "[applied]" => true }]
        } else {
            Vec::new()
        }
    }

    fn select(&self, cql: &str) -> Vec<Record> {
        let limit = cql
            .split(" LIMIT ")
            .nth(1)
            .and_then(|tail| tail.split_whitespace().next())
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(usize::MAX);
        let conditions = cql.split_once(" WHERE ").map_or(String::new(), |(_, tail)| {
            let end = [" LIMIT ", " ALLOW FILTERING", " ORDER BY "]
                .iter()
                .filter_map(|marker| tail.find(marker))
                .min()
                .unwrap_or(tail.len());
            tail[..end].to_string()
        });
        let mut rows: Vec<Record> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| {
                conditions.is_empty() || conditions.split(" AND ").all(|c| matches(row, c))
            })
            .cloned()
            .collect();
        rows.sort_by(order);
        rows.truncate(limit);
        rows
    }
}

struct Handle(Arc<LocalCluster>);

#[async_trait]
impl CqlSession for Handle {
    async fn execute(&self, cql: &str, values: &[RowValues]) -> Result<Vec<Record>, PolyDbError> {
        self.0.log.lock().unwrap().push(cql.to_string());
        Ok(if cql.contains("system.local") {
            vec![record! { "release_version" => "4.1" }]
        } else if cql.contains("system_schema.columns") {
            LocalCluster::schema_rows()
        } else if cql.contains("system_schema.") {
            Vec::new()
        } else if cql.starts_with("INSERT INTO events") {
            self.0.insert(cql, values)
        } else if cql.starts_with("SELECT * FROM events") {
            self.0.select(cql)
        } else {
            return Err(PolyDbError::ExecutionError(format!("unsupported: {cql}")));
        })
    }
}

#[async_trait]
impl CqlConnector for Handle {
    async fn connect(&self, _keyspace: &str) -> Result<Arc<dyn CqlSession>, PolyDbError> {
        Ok(Arc::new(Handle(Arc::clone(&self.0))))
    }
}

async fn engine(cluster: &Arc<LocalCluster>) -> Result<Engine, PolyDbError> {
    let config = EngineConfig::new().pool(PoolConfig::new("cql", BackendKind::Cassandra).url("ks"));
    let engine = Engine::builder(config)
        .cql_connector("cql", Arc::new(Handle(Arc::clone(cluster))))
        .init_tables(false)
        .build()
        .await?;
    for site in ["north", "south", "east"] {
        for at in 1..=4_i64 {
            let rec = record! { "site" => site, "at" => at, "name" => format!("{site}-{at}") };
            engine.add("events", &rec, &RequestOptions::new()).await?;
        }
    }
    Ok(engine)
}

fn names(rows: &[Record]) -> Vec<String> {
    rows.iter()
        .filter_map(|r| r.get("name")?.as_text().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn pages_concatenate_to_the_full_table() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = Arc::new(LocalCluster::default());
    let db = engine(&cluster).await?;
    assert_eq!(db.schema("events", &RequestOptions::new())?.keys("events"), ["site", "at"]);

    let everything = names(&db.select("events", &Record::new(), &RequestOptions::new()).await?.rows);
    assert_eq!(everything.len(), 12);

    let mut paged = Vec::new();
    let mut opts = RequestOptions::new().count(5_usize);
    for _ in 0..10 {
        let page = db.select("events", &Record::new(), &opts).await?;
        assert!(page.rows.len() <= 5);
        paged.extend(names(&page.rows));
        match page.info.next_token {
            Some(token) => opts = RequestOptions::new().count(5_usize).start(token),
            None => break,
        }
    }
    assert_eq!(paged, everything);
    assert!(
        cluster
            .statements()
            .iter()
            .any(|cql| cql.contains("(at) > (") && !cql.contains("token("))
    );
    Ok(())
}

#[tokio::test]
async fn pinned_partition_pages_by_clustering_key() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = Arc::new(LocalCluster::default());
    let db = engine(&cluster).await?;
    let query = record! { "site" => "south" };

    let mut seen = Vec::new();
    let mut opts = RequestOptions::new().count(3_usize);
    loop {
        let page = db.select("events", &query, &opts).await?;
        seen.extend(names(&page.rows));
        match page.info.next_token {
            Some(token) => opts = RequestOptions::new().count(3_usize).start(token),
            None => break,
        }
    }
    assert_eq!(seen, vec!["south-1", "south-2", "south-3", "south-4"]);
    assert_eq!(seen.iter().collect::<BTreeSet<_>>().len(), 4);
    Ok(())
}

#[tokio::test]
async fn conditional_add_refuses_existing_rows() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = Arc::new(LocalCluster::default());
    let db = engine(&cluster).await?;
    let dup = record! { "site" => "north", "at" => 1_i64, "name" => "again" };

    let err = db.add("events", &dup, &RequestOptions::new()).await.unwrap_err();
    assert!(err.to_string().contains("ConditionalCheckFailed"));

    let put = db.put("events", &dup, &RequestOptions::new()).await?;
    assert_eq!(put.info.affected_rows, 1);
    let rows = db
        .select("events", &record! { "site" => "north", "at" => 1_i64 }, &RequestOptions::new())
        .await?
        .rows;
    assert_eq!(names(&rows), vec!["again"]);
    Ok(())
}
