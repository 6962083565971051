//! Amazon `DynamoDB` driver.
//!
//! Requests are JSON-protocol bodies (`codec`, `request`); transport is whatever implements
//! [`DynamoApi`]. [`HttpDynamo`] signs requests for a real endpoint; [`MemoryDynamo`]
//! answers the same protocol in process.

mod codec;
mod http;
mod memory;
mod request;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

pub use codec::{attr_to_json, compare_attrs, from_attr, item_to_record, record_to_item, to_attr};
pub use http::{AwsCredentials, HttpDynamo};
pub use memory::MemoryDynamo;

use super::{Driver, DriverOutput};
use crate::error::PolyDbError;
use crate::request::{BackendRequest, NativeCall, Payload, RequestOptions};
use crate::results::NextToken;
use crate::schema::{ColumnDef, IndexKind, IndexSpec, SchemaSnapshot};
use crate::types::{BackendKind, ColumnType, Op, Record, RowValues};

/// Transport for one `DynamoDB` endpoint: `action` is the `X-Amz-Target` operation name
/// (`Query`, `PutItem`, ...), `body` the JSON request.
///
/// Signing, retries and HTTP live behind this trait.
#[async_trait]
pub trait DynamoApi: Send + Sync + 'static {
    async fn call(&self, action: &str, body: JsonValue) -> Result<JsonValue, PolyDbError>;
}

/// Driver for a `DynamoDB` endpoint. Clients are shared handles to the transport, so pools
/// of this kind are normally unbounded.
#[derive(Clone)]
pub struct DynamoDriver {
    api: Arc<dyn DynamoApi>,
}

impl std::fmt::Debug for DynamoDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDriver").finish_non_exhaustive()
    }
}

impl DynamoDriver {
    #[must_use]
    pub fn new(api: Arc<dyn DynamoApi>) -> Self {
        Self { api }
    }

    /// Driver over a fresh in-process store.
    #[must_use]
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryDynamo::new()))
    }
}

fn items(out: &JsonValue, field: &str) -> Result<Vec<Record>, PolyDbError> {
    out.get(field)
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .map(item_to_record)
        .collect()
}

fn has_entries(value: &JsonValue) -> bool {
    value.as_object().is_some_and(|m| !m.is_empty())
}

/// `Query`/`Scan`, following `LastEvaluatedKey` until `count` rows are in or the table
/// is exhausted. With `Select: COUNT` every page is counted and one `{count}` row returned.
async fn paged(api: &dyn DynamoApi, req: &BackendRequest, call: &NativeCall) -> Result<DriverOutput, PolyDbError> {
    let mut body = call.body.clone();
    let counting = body.get("Select").and_then(JsonValue::as_str) == Some("COUNT");
    if counting {
        if let Some(obj) = body.as_object_mut() {
            obj.remove("Limit");
        }
    }
    let mut rows = Vec::new();
    let mut total: i64 = 0;
    let last_key = loop {
        if let (Some(count), false) = (req.count.filter(|c| *c > 0), counting) {
            body["Limit"] = JsonValue::from(count - rows.len());
        }
        let out = api.call(&call.action, body.clone()).await?;
        total += out.get("Count").and_then(JsonValue::as_i64).unwrap_or_default();
        rows.extend(items(&out, "Items")?);

        let Some(key) = out.get("LastEvaluatedKey").filter(|k| has_entries(k)) else {
            break None;
        };
        if !counting && req.count.is_some_and(|c| c > 0 && rows.len() >= c) {
            break Some(item_to_record(key)?);
        }
        body["ExclusiveStartKey"] = key.clone();
    };

    if counting {
        let mut row = Record::new();
        row.insert("count".into(), RowValues::Int(total));
        return Ok(DriverOutput::rows(vec![row]));
    }
    Ok(DriverOutput {
        last_key,
        ..DriverOutput::rows(rows)
    })
}

/// `BatchGetItem`, re-issuing `UnprocessedKeys` until none are left.
async fn batch_get(api: &dyn DynamoApi, req: &BackendRequest, call: &NativeCall) -> Result<DriverOutput, PolyDbError> {
    let mut body = call.body.clone();
    let mut rows = Vec::new();
    loop {
        let out = api.call(&call.action, body).await?;
        if let Some(responses) = out.get("Responses").and_then(JsonValue::as_object) {
            for table in responses.values() {
                rows.extend(items(&json!({ "Items": table }), "Items")?);
            }
        }
        match out.get("UnprocessedKeys").filter(|u| has_entries(u)) {
            Some(unprocessed) => {
                debug!("dynamodb: {} unprocessed keys, retrying", req.table);
                body = json!({ "RequestItems": unprocessed });
            }
            None => break,
        }
    }
    Ok(DriverOutput::rows(rows))
}

fn column_type(attribute_type: &str) -> ColumnType {
    match attribute_type {
        "N" => ColumnType::Int,
        "B" => ColumnType::Blob,
        _ => ColumnType::Text,
    }
}

fn key_names(schema: Option<&JsonValue>) -> Vec<(String, String)> {
    schema
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(|k| {
            Some((
                k.get("AttributeName")?.as_str()?.to_string(),
                k.get("KeyType")?.as_str()?.to_string(),
            ))
        })
        .collect()
}

fn describe(snap: &mut SchemaSnapshot, table: &str, desc: &JsonValue) {
    for attr in desc
        .get("AttributeDefinitions")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
    {
        let (Some(name), Some(ty)) = (
            attr.get("AttributeName").and_then(JsonValue::as_str),
            attr.get("AttributeType").and_then(JsonValue::as_str),
        ) else {
            continue;
        };
        let mut col = ColumnDef::new(name).with_type(column_type(ty));
        col.data_type = Some(ty.to_string());
        snap.insert_column(table, col);
    }

    let mut keys: Vec<(String, String)> = key_names(desc.get("KeySchema"));
    keys.sort_by_key(|(_, kind)| kind != "HASH");
    let lower = table.to_lowercase();
    for (name, _) in &keys {
        if let Some(col) = snap.columns.get_mut(&lower).and_then(|c| c.get_mut(name)) {
            col.primary = true;
            col.nullable = false;
        }
    }
    snap.keys.insert(lower.clone(), keys.into_iter().map(|(name, _)| name).collect());

    for index in desc
        .get("LocalSecondaryIndexes")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
    {
        let Some(name) = index.get("IndexName").and_then(JsonValue::as_str) else {
            continue;
        };
        let mut cols = key_names(index.get("KeySchema"));
        cols.sort_by_key(|(_, kind)| kind != "HASH");
        snap.indexes.entry(lower.clone()).or_default().push(IndexSpec::new(
            name,
            IndexKind::HashIndex,
            cols.into_iter().map(|(c, _)| c),
        ));
    }
}

#[async_trait]
impl Driver for DynamoDriver {
    type Client = Arc<dyn DynamoApi>;

    fn kind(&self) -> BackendKind {
        BackendKind::DynamoDb
    }

    async fn connect(&self) -> Result<Self::Client, PolyDbError> {
        Ok(Arc::clone(&self.api))
    }

    async fn query(
        &self,
        client: &mut Self::Client,
        req: &BackendRequest,
    ) -> Result<DriverOutput, PolyDbError> {
        let call = req.native.as_ref().ok_or_else(|| {
            PolyDbError::InvalidRequest(format!("{}: dynamodb needs a native request", req.table))
        })?;
        let api = client.as_ref();
        match call.action.as_str() {
            "Query" | "Scan" => paged(api, req, call).await,
            "BatchGetItem" => batch_get(api, req, call).await,
            "GetItem" => {
                let out = api.call(&call.action, call.body.clone()).await?;
                let rows = match out.get("Item").filter(|i| has_entries(i)) {
                    Some(item) => vec![item_to_record(item)?],
                    None => Vec::new(),
                };
                Ok(DriverOutput::rows(rows))
            }
            "PutItem" | "UpdateItem" | "DeleteItem" => {
                match api.call(&call.action, call.body.clone()).await {
                    Ok(_) => Ok(DriverOutput::affected(1)),
                    // the record to update is gone
                    Err(err) if req.op == Op::Update && err.is_condition_failed() => {
                        Ok(DriverOutput::affected(0))
                    }
                    Err(err) => Err(err),
                }
            }
            _ => {
                let out = api.call(&call.action, call.body.clone()).await?;
                debug!("dynamodb: {} {}", call.action, out);
                Ok(DriverOutput::default())
            }
        }
    }

    async fn cache_columns(&self, client: &mut Self::Client) -> Result<SchemaSnapshot, PolyDbError> {
        let mut snap = SchemaSnapshot::default();
        let mut body = json!({});
        loop {
            let out = client.call("ListTables", body).await?;
            for name in out
                .get("TableNames")
                .and_then(JsonValue::as_array)
                .into_iter()
                .flatten()
                .filter_map(JsonValue::as_str)
            {
                let desc = client.call("DescribeTable", json!({ "TableName": name })).await?;
                describe(&mut snap, name, desc.get("Table").unwrap_or(&JsonValue::Null));
            }
            match out.get("LastEvaluatedTableName").and_then(JsonValue::as_str) {
                Some(last) => body = json!({ "ExclusiveStartTableName": last }),
                None => break,
            }
        }
        Ok(snap)
    }

    fn prepare(
        &self,
        op: Op,
        table: &str,
        payload: Payload<'_>,
        opts: &RequestOptions,
        schema: &SchemaSnapshot,
    ) -> Result<Option<BackendRequest>, PolyDbError> {
        request::prepare_native(op, table, payload, opts, schema)
    }

    fn next_token(&self, _req: &BackendRequest, out: &DriverOutput) -> Option<NextToken> {
        out.last_key.clone().map(NextToken::Key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::schema::{TableDef, Tables};

    async fn seeded(page_size: usize) -> (DynamoDriver, Arc<dyn DynamoApi>, SchemaSnapshot) {
        let api: Arc<dyn DynamoApi> = Arc::new(MemoryDynamo::new().with_page_size(page_size));
        let driver = DynamoDriver::new(Arc::clone(&api));
        let def = TableDef::new()
            .column(ColumnDef::new("id").primary())
            .column(ColumnDef::new("n").with_type(ColumnType::Int).primary())
            .column(ColumnDef::new("tag"));
        let mut client = driver.connect().await.unwrap();
        let create = driver
            .prepare(Op::Create, "items", Payload::Table(&def), &RequestOptions::new(), &SchemaSnapshot::default())
            .unwrap()
            .unwrap();
        driver.query(&mut client, &create).await.unwrap();

        let mut snap = driver.cache_columns(&mut client).await.unwrap();
        let mut declared = Tables::new();
        declared.insert("items".into(), def);
        snap.merge_columns(&declared);
        for n in 1..=7_i64 {
            let rec = record! { "id" => "a", "n" => n, "tag" => if n % 2 == 0 { "even" } else { "odd" } };
            let add = driver
                .prepare(Op::Add, "items", Payload::Record(&rec), &RequestOptions::new(), &snap)
                .unwrap()
                .unwrap();
            driver.query(&mut client, &add).await.unwrap();
        }
        (driver, api, snap)
    }

    #[tokio::test]
    async fn introspects_keys() {
        let (_, _, snap) = seeded(100).await;
        assert_eq!(snap.keys("items"), ["id", "n"]);
        assert_eq!(snap.column("items", "n").unwrap().ty, ColumnType::Int);
    }

    #[tokio::test]
    async fn chains_native_pages_to_fill_count() {
        let (driver, api, snap) = seeded(2).await;
        let mut client = api;
        let opts = RequestOptions::new().count(5_usize);
        let req = driver
            .prepare(Op::Select, "items", Payload::Record(&record! { "id" => "a" }), &opts, &snap)
            .unwrap()
            .unwrap();
        let out = driver.query(&mut client, &req).await.unwrap();
        let ns: Vec<i64> = out.rows.iter().map(|r| *r["n"].as_int().unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3, 4, 5]);
        let Some(NextToken::Key(key)) = driver.next_token(&req, &out) else {
            panic!("expected a key token");
        };
        assert_eq!(key["n"], RowValues::Int(5));
    }

    #[tokio::test]
    async fn filtered_pages_still_fill_count() {
        let (driver, api, snap) = seeded(2).await;
        let mut client = api;
        let opts = RequestOptions::new().count(3_usize);
        let obj = record! { "id" => "a", "tag" => "even" };
        let req = driver
            .prepare(Op::Select, "items", Payload::Record(&obj), &opts, &snap)
            .unwrap()
            .unwrap();
        let out = driver.query(&mut client, &req).await.unwrap();
        let ns: Vec<i64> = out.rows.iter().map(|r| *r["n"].as_int().unwrap()).collect();
        assert_eq!(ns, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn duplicate_add_fails_the_condition() {
        let (driver, api, snap) = seeded(100).await;
        let mut client = api;
        let rec = record! { "id" => "a", "n" => 1_i64 };
        let add = driver
            .prepare(Op::Add, "items", Payload::Record(&rec), &RequestOptions::new(), &snap)
            .unwrap()
            .unwrap();
        let err = driver.query(&mut client, &add).await.unwrap_err();
        assert!(err.is_condition_failed());
    }
}
