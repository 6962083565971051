//! In-process store answering the DynamoDB JSON protocol subset the driver speaks.
//!
//! Pages are capped at `page_size` evaluated items and batch reads at `batch_size` keys, so
//! callers see `LastEvaluatedKey` and `UnprocessedKeys` the way a remote table returns them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue, json};
use tracing::debug;

use super::DynamoApi;
use super::codec::{compare_attrs, from_attr, to_attr};
use crate::error::PolyDbError;
use crate::types::RowValues;

type Item = Map<String, JsonValue>;

fn api_error(code: &str, message: impl std::fmt::Display) -> PolyDbError {
    PolyDbError::Backend {
        pool: "dynamodb".to_string(),
        message: format!("{code}: {message}"),
    }
}

fn validation(message: impl std::fmt::Display) -> PolyDbError {
    api_error("ValidationException", message)
}

fn text<'a>(body: &'a JsonValue, field: &str) -> Result<&'a str, PolyDbError> {
    body.get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| validation(format!("{field} is required")))
}

fn object<'a>(body: &'a JsonValue, field: &str) -> Result<&'a Item, PolyDbError> {
    body.get(field)
        .and_then(JsonValue::as_object)
        .ok_or_else(|| validation(format!("{field} is required")))
}

#[derive(Debug, Clone)]
struct MemTable {
    description: JsonValue,
    hash: String,
    range: Option<String>,
    /// index name -> range attribute
    indexes: BTreeMap<String, String>,
    items: Vec<Item>,
}

impl MemTable {
    fn key_attrs(&self) -> Vec<String> {
        std::iter::once(self.hash.clone()).chain(self.range.clone()).collect()
    }

    fn key_of(&self, item: &Item) -> Item {
        self.key_attrs()
            .into_iter()
            .filter_map(|k| item.get(&k).map(|v| (k, v.clone())))
            .collect()
    }

    fn position(&self, key: &Item) -> Result<Option<usize>, PolyDbError> {
        for attr in self.key_attrs() {
            if !key.contains_key(&attr) {
                return Err(validation(format!("missing key attribute {attr}")));
            }
        }
        Ok(self.items.iter().position(|item| {
            key.iter()
                .all(|(k, v)| item.get(k).and_then(|x| compare_attrs(x, v)) == Some(Ordering::Equal))
        }))
    }
}

fn condition_holds(value: Option<&JsonValue>, cond: &JsonValue) -> Result<bool, PolyDbError> {
    let op = text(cond, "ComparisonOperator")?;
    let list: &[JsonValue] = cond
        .get("AttributeValueList")
        .and_then(JsonValue::as_array)
        .map_or(&[], Vec::as_slice);
    let arg = |i: usize| {
        list.get(i)
            .ok_or_else(|| validation(format!("{op} needs {} values", i + 1)))
    };
    let cmp = |i: usize| -> Result<Option<Ordering>, PolyDbError> {
        Ok(value.and_then(|v| compare_attrs(v, list.get(i)?)))
    };
    let as_text = |v: &JsonValue| from_attr(v).ok().and_then(|v| v.as_text().map(str::to_string));

    Ok(match op {
        "EQ" => cmp(0)? == Some(Ordering::Equal),
        "NE" => cmp(0)? != Some(Ordering::Equal),
        "LT" => cmp(0)? == Some(Ordering::Less),
        "LE" => matches!(cmp(0)?, Some(Ordering::Less | Ordering::Equal)),
        "GT" => cmp(0)? == Some(Ordering::Greater),
        "GE" => matches!(cmp(0)?, Some(Ordering::Greater | Ordering::Equal)),
        "BETWEEN" => {
            arg(1)?;
            matches!(cmp(0)?, Some(Ordering::Greater | Ordering::Equal))
                && matches!(cmp(1)?, Some(Ordering::Less | Ordering::Equal))
        }
        "BEGINS_WITH" => {
            let prefix = as_text(arg(0)?).unwrap_or_default();
            value.and_then(as_text).is_some_and(|s| s.starts_with(&prefix))
        }
        "CONTAINS" | "NOT_CONTAINS" => {
            let needle = arg(0)?;
            let found = match value.map(from_attr).transpose()? {
                Some(RowValues::Text(s)) => as_text(needle).is_some_and(|n| s.contains(&n)),
                Some(RowValues::List(items)) => {
                    let needle = from_attr(needle)?;
                    items.contains(&needle)
                }
                _ => false,
            };
            found == (op == "CONTAINS")
        }
        "IN" => value.is_some_and(|v| {
            list.iter()
                .any(|x| compare_attrs(v, x) == Some(Ordering::Equal))
        }),
        "NULL" => value.is_none(),
        "NOT_NULL" => value.is_some(),
        other => return Err(validation(format!("unsupported operator {other}"))),
    })
}

fn conditions_hold(item: &Item, conds: Option<&Item>) -> Result<bool, PolyDbError> {
    for (name, cond) in conds.into_iter().flatten() {
        if !condition_holds(item.get(name), cond)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Legacy `Expected`: `{"Exists": false}` or `{"Value": v}`.
fn check_expected(current: Option<&Item>, body: &JsonValue) -> Result<(), PolyDbError> {
    let Some(expected) = body.get("Expected").and_then(JsonValue::as_object) else {
        return Ok(());
    };
    for (name, rule) in expected {
        let actual = current.and_then(|item| item.get(name));
        let ok = match (rule.get("Value"), rule.get("Exists").and_then(JsonValue::as_bool)) {
            (Some(value), _) => actual.and_then(|a| compare_attrs(a, value)) == Some(Ordering::Equal),
            (None, Some(false)) => actual.is_none(),
            (None, _) => actual.is_some(),
        };
        if !ok {
            return Err(api_error(
                "ConditionalCheckFailedException",
                "The conditional request failed",
            ));
        }
    }
    Ok(())
}

fn project(item: &Item, body: &JsonValue) -> Item {
    match body.get("AttributesToGet").and_then(JsonValue::as_array) {
        Some(names) => names
            .iter()
            .filter_map(JsonValue::as_str)
            .filter_map(|n| item.get(n).map(|v| (n.to_string(), v.clone())))
            .collect(),
        None => item.clone(),
    }
}

fn cmp_tuples(a: &[JsonValue], b: &[JsonValue]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => compare_attrs(x, y).unwrap_or(Ordering::Equal),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn tuple(item: &Item, attrs: &[String]) -> Vec<JsonValue> {
    attrs
        .iter()
        .map(|a| item.get(a).cloned().unwrap_or(JsonValue::Null))
        .collect()
}

/// In-process DynamoDB-compatible store.
#[derive(Debug)]
pub struct MemoryDynamo {
    tables: Mutex<BTreeMap<String, MemTable>>,
    page_size: usize,
    batch_size: usize,
}

impl Default for MemoryDynamo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDynamo {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            page_size: 100,
            batch_size: 100,
        }
    }

    /// Most items evaluated by one `Query`/`Scan` page.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Most keys served by one `BatchGetItem`; the rest come back as `UnprocessedKeys`.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn with_tables<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, MemTable>) -> Result<R, PolyDbError>,
    ) -> Result<R, PolyDbError> {
        let mut guard = self
            .tables
            .lock()
            .map_err(|_| PolyDbError::ExecutionError("dynamodb store lock poisoned".into()))?;
        f(&mut guard)
    }

    fn create_table(tables: &mut BTreeMap<String, MemTable>, body: &JsonValue) -> Result<JsonValue, PolyDbError> {
        let name = text(body, "TableName")?.to_string();
        if tables.contains_key(&name) {
            return Err(api_error("ResourceInUseException", format!("table {name} exists")));
        }
        let key_of_type = |schema: &JsonValue, kind: &str| {
            schema.as_array().and_then(|keys| {
                keys.iter()
                    .find(|k| k.get("KeyType").and_then(JsonValue::as_str) == Some(kind))
                    .and_then(|k| k.get("AttributeName").and_then(JsonValue::as_str))
                    .map(str::to_string)
            })
        };
        let key_schema = body.get("KeySchema").cloned().unwrap_or(JsonValue::Null);
        let hash = key_of_type(&key_schema, "HASH")
            .ok_or_else(|| validation("KeySchema needs a HASH key"))?;
        let range = key_of_type(&key_schema, "RANGE");
        let mut indexes = BTreeMap::new();
        for index in body
            .get("LocalSecondaryIndexes")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
        {
            let index_name = text(index, "IndexName")?;
            let schema = index.get("KeySchema").cloned().unwrap_or(JsonValue::Null);
            if let Some(attr) = key_of_type(&schema, "RANGE") {
                indexes.insert(index_name.to_string(), attr);
            }
        }

        let mut description = body.clone();
        description["TableStatus"] = JsonValue::from("ACTIVE");
        tables.insert(
            name.clone(),
            MemTable {
                description: description.clone(),
                hash,
                range,
                indexes,
                items: Vec::new(),
            },
        );
        debug!("dynamodb: created {name}");
        Ok(json!({ "TableDescription": description }))
    }

    fn table<'a>(
        tables: &'a mut BTreeMap<String, MemTable>,
        body: &JsonValue,
    ) -> Result<&'a mut MemTable, PolyDbError> {
        let name = text(body, "TableName")?;
        tables
            .get_mut(name)
            .ok_or_else(|| api_error("ResourceNotFoundException", format!("table {name} not found")))
    }

    fn put_item(table: &mut MemTable, body: &JsonValue) -> Result<JsonValue, PolyDbError> {
        let item = object(body, "Item")?.clone();
        let key = table.key_of(&item);
        let pos = table.position(&key)?;
        check_expected(pos.map(|i| &table.items[i]), body)?;
        match pos {
            Some(i) => table.items[i] = item,
            None => table.items.push(item),
        }
        Ok(json!({}))
    }

    fn update_item(table: &mut MemTable, body: &JsonValue) -> Result<JsonValue, PolyDbError> {
        let key = object(body, "Key")?.clone();
        let pos = table.position(&key)?;
        check_expected(pos.map(|i| &table.items[i]), body)?;
        let mut item = pos.map_or_else(|| key.clone(), |i| table.items[i].clone());

        for (name, update) in body
            .get("AttributeUpdates")
            .and_then(JsonValue::as_object)
            .into_iter()
            .flatten()
        {
            let action = update.get("Action").and_then(JsonValue::as_str).unwrap_or("PUT");
            let value = update.get("Value");
            match (action, value) {
                ("DELETE", _) => {
                    item.remove(name);
                }
                ("ADD", Some(value)) => {
                    let current = item.get(name).map(from_attr).transpose()?;
                    let delta = from_attr(value)?;
                    let sum = match (current, delta) {
                        (None | Some(RowValues::Null), delta) => delta,
                        (Some(RowValues::Int(a)), RowValues::Int(b)) => RowValues::Int(a + b),
                        (Some(a), b) => match (a.as_float(), b.as_float()) {
                            (Some(a), Some(b)) => RowValues::Float(a + b),
                            _ => return Err(validation(format!("ADD on non-numeric {name}"))),
                        },
                    };
                    item.insert(name.clone(), to_attr(&sum));
                }
                (_, Some(value)) => {
                    item.insert(name.clone(), value.clone());
                }
                (_, None) => return Err(validation(format!("{action} on {name} needs a value"))),
            }
        }

        match pos {
            Some(i) => table.items[i] = item,
            None => table.items.push(item),
        }
        Ok(json!({}))
    }

    fn paged(table: &MemTable, body: &JsonValue, query: bool, page_size: usize) -> Result<JsonValue, PolyDbError> {
        let key_attrs = table.key_attrs();
        let (order, key_conds, filter) = if query {
            let conds = object(body, "KeyConditions")?;
            if !conds.contains_key(&table.hash) {
                return Err(validation("KeyConditions must match the hash key"));
            }
            let mut order = Vec::new();
            let index_range = match body.get("IndexName").and_then(JsonValue::as_str) {
                Some(index) => Some(
                    table
                        .indexes
                        .get(index)
                        .ok_or_else(|| validation(format!("unknown index {index}")))?
                        .clone(),
                ),
                None => None,
            };
            order.extend(index_range.clone());
            order.extend(table.range.clone());
            order.push(table.hash.clone());
            (order, Some(conds), body.get("QueryFilter").and_then(JsonValue::as_object))
        } else {
            (key_attrs.clone(), None, body.get("ScanFilter").and_then(JsonValue::as_object))
        };

        let index_attr = body
            .get("IndexName")
            .and_then(JsonValue::as_str)
            .and_then(|i| table.indexes.get(i));
        let mut candidates: Vec<&Item> = Vec::new();
        for item in &table.items {
            if index_attr.is_some_and(|attr| !item.contains_key(attr)) {
                continue;
            }
            if conditions_hold(item, key_conds)? {
                candidates.push(item);
            }
        }
        candidates.sort_by(|a, b| cmp_tuples(&tuple(a, &order), &tuple(b, &order)));
        let forward = body
            .get("ScanIndexForward")
            .and_then(JsonValue::as_bool)
            .unwrap_or(true);
        if !forward {
            candidates.reverse();
        }

        if let Some(start) = body.get("ExclusiveStartKey").and_then(JsonValue::as_object) {
            let start = tuple(start, &order);
            candidates.retain(|item| {
                let ord = cmp_tuples(&tuple(item, &order), &start);
                if forward { ord == Ordering::Greater } else { ord == Ordering::Less }
            });
        }

        let limit = body
            .get("Limit")
            .and_then(JsonValue::as_u64)
            .and_then(|l| usize::try_from(l).ok())
            .map_or(page_size, |l| l.min(page_size));
        let counting = body.get("Select").and_then(JsonValue::as_str) == Some("COUNT");
        let mut items = Vec::new();
        let mut last = None;
        for item in candidates.iter().take(limit) {
            last = Some(*item);
            if conditions_hold(item, filter)? {
                items.push(JsonValue::Object(project(item, body)));
            }
        }
        let scanned = candidates.len().min(limit);

        let mut out = json!({ "Count": items.len(), "ScannedCount": scanned });
        if !counting {
            out["Items"] = JsonValue::Array(items);
        }
        if candidates.len() > limit {
            if let Some(last) = last {
                let mut attrs = key_attrs;
                attrs.extend(index_attr.cloned());
                let key: Item = attrs
                    .into_iter()
                    .filter_map(|a| last.get(&a).map(|v| (a, v.clone())))
                    .collect();
                out["LastEvaluatedKey"] = JsonValue::Object(key);
            }
        }
        Ok(out)
    }

    fn batch_get(
        tables: &mut BTreeMap<String, MemTable>,
        body: &JsonValue,
        batch_size: usize,
    ) -> Result<JsonValue, PolyDbError> {
        let mut budget = batch_size;
        let mut responses = Map::new();
        let mut unprocessed = Map::new();
        for (name, request) in object(body, "RequestItems")? {
            let table = tables
                .get(name)
                .ok_or_else(|| api_error("ResourceNotFoundException", format!("table {name} not found")))?;
            let keys = request
                .get("Keys")
                .and_then(JsonValue::as_array)
                .ok_or_else(|| validation("Keys is required"))?;
            let take = keys.len().min(budget);
            budget -= take;

            let mut found = Vec::new();
            for key in &keys[..take] {
                let key = key.as_object().ok_or_else(|| validation("key must be an object"))?;
                if let Some(i) = table.position(key)? {
                    found.push(JsonValue::Object(project(&table.items[i], request)));
                }
            }
            responses.insert(name.clone(), JsonValue::Array(found));
            if take < keys.len() {
                let mut rest = request.clone();
                rest["Keys"] = JsonValue::Array(keys[take..].to_vec());
                unprocessed.insert(name.clone(), rest);
            }
        }
        Ok(json!({ "Responses": responses, "UnprocessedKeys": unprocessed }))
    }
}

#[async_trait]
impl DynamoApi for MemoryDynamo {
    async fn call(&self, action: &str, body: JsonValue) -> Result<JsonValue, PolyDbError> {
        let page_size = self.page_size;
        let batch_size = self.batch_size;
        self.with_tables(|tables| match action {
            "CreateTable" => Self::create_table(tables, &body),
            "DeleteTable" => {
                let name = text(&body, "TableName")?;
                let table = tables
                    .remove(name)
                    .ok_or_else(|| api_error("ResourceNotFoundException", format!("table {name} not found")))?;
                Ok(json!({ "TableDescription": table.description }))
            }
            "ListTables" => Ok(json!({ "TableNames": tables.keys().collect::<Vec<_>>() })),
            "DescribeTable" => {
                let table = Self::table(tables, &body)?;
                let mut description = table.description.clone();
                description["ItemCount"] = JsonValue::from(table.items.len());
                Ok(json!({ "Table": description }))
            }
            "PutItem" => Self::put_item(Self::table(tables, &body)?, &body),
            "UpdateItem" => Self::update_item(Self::table(tables, &body)?, &body),
            "GetItem" => {
                let table = Self::table(tables, &body)?;
                let key = object(&body, "Key")?;
                Ok(match table.position(key)? {
                    Some(i) => json!({ "Item": project(&table.items[i], &body) }),
                    None => json!({}),
                })
            }
            "DeleteItem" => {
                let table = Self::table(tables, &body)?;
                let key = object(&body, "Key")?;
                let pos = table.position(key)?;
                check_expected(pos.map(|i| &table.items[i]), &body)?;
                if let Some(i) = pos {
                    table.items.remove(i);
                }
                Ok(json!({}))
            }
            "Query" => Self::paged(Self::table(tables, &body)?, &body, true, page_size),
            "Scan" => Self::paged(Self::table(tables, &body)?, &body, false, page_size),
            "BatchGetItem" => Self::batch_get(tables, &body, batch_size),
            other => Err(validation(format!("unsupported action {other}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table(store: &MemoryDynamo) {
        store
            .call(
                "CreateTable",
                json!({
                    "TableName": "t",
                    "KeySchema": [
                        {"AttributeName": "id", "KeyType": "HASH"},
                        {"AttributeName": "n", "KeyType": "RANGE"}
                    ]
                }),
            )
            .await
            .unwrap();
        for n in 1..=5 {
            store
                .call(
                    "PutItem",
                    json!({"TableName": "t", "Item": {"id": {"S": "a"}, "n": {"N": n.to_string()}}}),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn query_pages_by_last_evaluated_key() {
        let store = MemoryDynamo::new().with_page_size(2);
        table(&store).await;
        let query = json!({
            "TableName": "t",
            "KeyConditions": {"id": {"AttributeValueList": [{"S": "a"}], "ComparisonOperator": "EQ"}}
        });
        let first = store.call("Query", query.clone()).await.unwrap();
        assert_eq!(first["Count"], 2);
        let mut next = query;
        next["ExclusiveStartKey"] = first["LastEvaluatedKey"].clone();
        let second = store.call("Query", next).await.unwrap();
        assert_eq!(second["Items"][0]["n"], json!({"N": "3"}));
    }

    #[tokio::test]
    async fn expected_guards_writes() {
        let store = MemoryDynamo::new();
        table(&store).await;
        let err = store
            .call(
                "PutItem",
                json!({
                    "TableName": "t",
                    "Item": {"id": {"S": "a"}, "n": {"N": "1"}},
                    "Expected": {"id": {"Exists": false}}
                }),
            )
            .await
            .unwrap_err();
        assert!(err.is_condition_failed());
    }

    #[tokio::test]
    async fn batch_get_leaves_unprocessed_keys() {
        let store = MemoryDynamo::new().with_batch_size(1);
        table(&store).await;
        let out = store
            .call(
                "BatchGetItem",
                json!({"RequestItems": {"t": {"Keys": [
                    {"id": {"S": "a"}, "n": {"N": "1"}},
                    {"id": {"S": "a"}, "n": {"N": "2"}}
                ]}}}),
            )
            .await
            .unwrap();
        assert_eq!(out["Responses"]["t"].as_array().unwrap().len(), 1);
        assert_eq!(out["UnprocessedKeys"]["t"]["Keys"].as_array().unwrap().len(), 1);
    }
}
