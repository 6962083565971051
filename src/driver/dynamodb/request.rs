//! Native request bodies in the DynamoDB JSON protocol, using the classic condition maps
//! (`KeyConditions`, `QueryFilter`, `Expected`, `AttributeUpdates`).

use serde_json::{Map, Value as JsonValue, json};

use super::codec::{record_to_item, to_attr};
use crate::error::PolyDbError;
use crate::request::{BackendRequest, Payload, RequestOptions};
use crate::results::NextToken;
use crate::schema::{IndexKind, IndexSpec, SchemaSnapshot, TableDef};
use crate::sql::{is_identifier, normalize_op};
use crate::types::{ColumnType, Op, Record, RowValues};

/// Operators usable in `KeyConditions` on a range key.
const RANGE_OPS: [&str; 8] = ["=", "<", "<=", ">", ">=", "between", "begins_with", "like%"];

/// Default capacity for tables created without explicit throughput.
const READ_CAPACITY: u32 = 10;
const WRITE_CAPACITY: u32 = 5;

fn empty(op: Op, table: &str) -> PolyDbError {
    PolyDbError::EmptyStatement(format!("{op} {table}"))
}

/// One local secondary index per range column of a `hashindex` spec.
pub(crate) fn local_indexes(spec: &IndexSpec) -> Vec<(String, String)> {
    if spec.kind != IndexKind::HashIndex || spec.columns.len() < 2 {
        return Vec::new();
    }
    let single = spec.columns.len() == 2;
    spec.columns[1..]
        .iter()
        .map(|col| {
            let name = if single {
                spec.name.clone()
            } else {
                format!("{}_{col}", spec.name)
            };
            (col.clone(), name)
        })
        .collect()
}

fn attribute_type(ty: &ColumnType) -> &'static str {
    match ty {
        ty if ty.is_numeric() => "N",
        ColumnType::Blob => "B",
        _ => "S",
    }
}

/// `{"AttributeValueList": [...], "ComparisonOperator": "..."}` for one condition.
fn condition(name: &str, op: &str, value: &RowValues) -> Result<JsonValue, PolyDbError> {
    let values = |v: &RowValues| -> Vec<JsonValue> {
        match v {
            RowValues::List(items) => items.iter().map(to_attr).collect(),
            other => vec![to_attr(other)],
        }
    };
    let (operator, list) = match op {
        "=" => ("EQ", vec![to_attr(value)]),
        "<>" => ("NE", vec![to_attr(value)]),
        "<" => ("LT", vec![to_attr(value)]),
        "<=" => ("LE", vec![to_attr(value)]),
        ">" => ("GT", vec![to_attr(value)]),
        ">=" => ("GE", vec![to_attr(value)]),
        "in" => ("IN", values(value)),
        "between" => {
            let list = values(value);
            if list.len() != 2 {
                return Err(PolyDbError::InvalidRequest(format!(
                    "between on {name} needs two values"
                )));
            }
            ("BETWEEN", list)
        }
        "begins_with" | "like%" => ("BEGINS_WITH", vec![to_attr(value)]),
        "contains" | "like" => ("CONTAINS", vec![to_attr(value)]),
        "not contains" | "not like" => ("NOT_CONTAINS", vec![to_attr(value)]),
        "null" => ("NULL", Vec::new()),
        "not null" => ("NOT_NULL", Vec::new()),
        other => {
            return Err(PolyDbError::InvalidRequest(format!(
                "operator {other} is not supported on {name}"
            )));
        }
    };
    let mut cond = Map::new();
    if !list.is_empty() {
        cond.insert("AttributeValueList".into(), JsonValue::Array(list));
    }
    cond.insert("ComparisonOperator".into(), JsonValue::from(operator));
    Ok(JsonValue::Object(cond))
}

fn operator(name: &str, value: &RowValues, opts: &RequestOptions) -> String {
    match opts.op_for(name) {
        Some(op) => normalize_op(&op),
        None if value.is_null() => "null".to_string(),
        None if matches!(value, RowValues::List(_)) => "in".to_string(),
        None => "=".to_string(),
    }
}

/// Key object of a record, or `None` when a key is missing.
fn key_of(keys: &[String], obj: &Record) -> Option<JsonValue> {
    if keys.is_empty() {
        return None;
    }
    keys.iter()
        .map(|k| {
            obj.get(k)
                .filter(|v| !v.is_empty())
                .map(|v| (k.clone(), to_attr(v)))
        })
        .collect::<Option<Map<_, _>>>()
        .map(JsonValue::Object)
}

fn projection(body: &mut Map<String, JsonValue>, opts: &RequestOptions) {
    if let Some(select) = &opts.select {
        let names: Vec<&String> = select.iter().filter(|c| is_identifier(c)).collect();
        if !names.is_empty() {
            body.insert("AttributesToGet".into(), json!(names));
        }
    }
    if opts.consistent == Some(true) {
        body.insert("ConsistentRead".into(), JsonValue::Bool(true));
    }
}

fn create_table(table: &str, def: &TableDef) -> Result<JsonValue, PolyDbError> {
    let keys = def.primary_keys();
    let Some(hash) = keys.first() else {
        return Err(PolyDbError::InvalidRequest(format!("{table}: no primary key")));
    };
    let ty_of = |name: &str| def.get(name).map(|c| c.ty.clone()).unwrap_or_default();

    let mut attrs: Vec<String> = keys.iter().take(2).cloned().collect();
    let mut key_schema = vec![json!({"AttributeName": hash, "KeyType": "HASH"})];
    if let Some(range) = keys.get(1) {
        key_schema.push(json!({"AttributeName": range, "KeyType": "RANGE"}));
    }

    let mut local = Vec::new();
    for spec in def.index_specs(table) {
        for (col, name) in local_indexes(&spec) {
            if !attrs.contains(&col) {
                attrs.push(col.clone());
            }
            local.push(json!({
                "IndexName": name,
                "KeySchema": [
                    {"AttributeName": hash, "KeyType": "HASH"},
                    {"AttributeName": col, "KeyType": "RANGE"}
                ],
                "Projection": {"ProjectionType": "ALL"}
            }));
        }
    }

    let definitions: Vec<JsonValue> = attrs
        .iter()
        .map(|name| json!({"AttributeName": name, "AttributeType": attribute_type(&ty_of(name))}))
        .collect();
    let mut body = json!({
        "TableName": table,
        "AttributeDefinitions": definitions,
        "KeySchema": key_schema,
        "ProvisionedThroughput": {"ReadCapacityUnits": READ_CAPACITY, "WriteCapacityUnits": WRITE_CAPACITY}
    });
    if !local.is_empty() {
        body["LocalSecondaryIndexes"] = JsonValue::Array(local);
    }
    Ok(body)
}

/// `Query` when the hash key is matched exactly, `Scan` otherwise. Range conditions on the
/// table's range key or on a local index go to `KeyConditions`, the rest is filtered.
fn select(
    op: Op,
    table: &str,
    obj: &Record,
    opts: &RequestOptions,
    schema: &SchemaSnapshot,
) -> Result<BackendRequest, PolyDbError> {
    let keys = schema.keys(table);
    let hash = keys.first().map(String::as_str);
    let mut key_conds = Map::new();
    let mut filter = Map::new();
    let mut index: Option<String> = None;
    let mut range_used = false;

    for (name, value) in obj {
        if name.starts_with('_') {
            continue;
        }
        let op = operator(name, value, opts);
        if value.is_empty() && !matches!(op.as_str(), "null" | "not null") {
            continue;
        }
        let cond = condition(name, &op, value)?;
        let is_range_op = RANGE_OPS.contains(&op.as_str());

        if Some(name.as_str()) == hash && op == "=" {
            key_conds.insert(name.clone(), cond);
        } else if !range_used && is_range_op && keys.get(1) == Some(name) {
            range_used = true;
            key_conds.insert(name.clone(), cond);
        } else if let Some(ix) = (!range_used && is_range_op)
            .then(|| {
                schema
                    .indexes(table)
                    .iter()
                    .flat_map(local_indexes)
                    .find(|(col, _)| col == name)
            })
            .flatten()
        {
            range_used = true;
            index = Some(ix.1);
            key_conds.insert(name.clone(), cond);
        } else {
            filter.insert(name.clone(), cond);
        }
    }

    let querying = hash.is_some_and(|h| key_conds.contains_key(h));
    let mut body = Map::new();
    body.insert("TableName".into(), JsonValue::from(table));
    let action = if querying {
        body.insert("KeyConditions".into(), JsonValue::Object(key_conds));
        if !filter.is_empty() {
            body.insert("QueryFilter".into(), JsonValue::Object(filter));
        }
        if let Some(index) = index {
            body.insert("IndexName".into(), JsonValue::from(index));
        }
        if let Some((_, desc)) = opts.sort_keys().first() {
            body.insert("ScanIndexForward".into(), JsonValue::Bool(!desc));
        }
        "Query"
    } else {
        filter.extend(key_conds);
        if !filter.is_empty() {
            body.insert("ScanFilter".into(), JsonValue::Object(filter));
        }
        "Scan"
    };

    if opts.total == Some(true) {
        body.insert("Select".into(), JsonValue::from("COUNT"));
        if opts.consistent == Some(true) {
            body.insert("ConsistentRead".into(), JsonValue::Bool(true));
        }
    } else {
        projection(&mut body, opts);
    }
    if let Some(count) = opts.count.filter(|c| *c > 0) {
        body.insert("Limit".into(), JsonValue::from(count));
    }
    let start = opts.start.clone().filter(|s| s.as_key().is_some());
    if let Some(NextToken::Key(last)) = &start {
        body.insert("ExclusiveStartKey".into(), record_to_item(last));
    }

    Ok(BackendRequest::native(op, table, action, JsonValue::Object(body))
        .with_paging(opts.count, 0, start)
        .with_keys(keys.to_vec()))
}

fn update(
    op: Op,
    table: &str,
    obj: &Record,
    opts: &RequestOptions,
    schema: &SchemaSnapshot,
) -> Result<BackendRequest, PolyDbError> {
    let keys = schema.keys(table);
    let key = key_of(keys, obj).ok_or_else(|| empty(op, table))?;

    let mut updates = Map::new();
    for (name, value) in obj {
        if name.starts_with('_') || value.is_null() || keys.contains(name) {
            continue;
        }
        let ty = opts
            .types
            .get(name)
            .cloned()
            .or_else(|| schema.column(table, name).map(|c| c.ty.clone()))
            .unwrap_or_default();
        let add = opts.op_for(name).as_deref() == Some("incr")
            || (op == Op::Incr && ty.is_numeric());
        let action = if add { "ADD" } else { "PUT" };
        updates.insert(name.clone(), json!({"Action": action, "Value": to_attr(value)}));
    }
    if updates.is_empty() {
        return Err(empty(op, table));
    }

    let mut body = json!({
        "TableName": table,
        "Key": key.clone(),
        "AttributeUpdates": updates,
    });
    if op == Op::Update {
        let expected: Map<String, JsonValue> = key
            .as_object()
            .into_iter()
            .flatten()
            .map(|(k, v)| (k.clone(), json!({"Value": v, "Exists": true})))
            .collect();
        body["Expected"] = JsonValue::Object(expected);
    }
    Ok(BackendRequest::native(op, table, "UpdateItem", body).with_keys(keys.to_vec()))
}

/// Compile an operation into a native call.
///
/// # Errors
/// `EmptyStatement` when keys or values are missing, `InvalidRequest` for unsupported
/// operators or malformed key lists.
pub(crate) fn prepare_native(
    op: Op,
    table: &str,
    payload: Payload<'_>,
    opts: &RequestOptions,
    schema: &SchemaSnapshot,
) -> Result<Option<BackendRequest>, PolyDbError> {
    let keys = schema.keys(table);
    let req = match (op, payload) {
        (Op::Create, Payload::Table(def)) => {
            BackendRequest::native(op, table, "CreateTable", create_table(table, def)?)
        }
        (Op::Upgrade, _) => return Ok(None),
        (Op::Drop, _) => BackendRequest::native(op, table, "DeleteTable", json!({"TableName": table})),
        (Op::Get, Payload::Record(obj)) => {
            let key = key_of(keys, obj).ok_or_else(|| empty(op, table))?;
            let mut body = Map::new();
            body.insert("TableName".into(), JsonValue::from(table));
            body.insert("Key".into(), key);
            projection(&mut body, opts);
            BackendRequest::native(op, table, "GetItem", JsonValue::Object(body))
        }
        (Op::Select | Op::Search, Payload::Record(obj)) => select(op, table, obj, opts, schema)?,
        (Op::List, Payload::List(list)) => {
            let keys_list = list
                .iter()
                .map(|obj| key_of(keys, obj))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| PolyDbError::InvalidRequest(format!("{table}: invalid key list")))?;
            if keys_list.is_empty() {
                return Err(empty(op, table));
            }
            let mut entry = Map::new();
            entry.insert("Keys".into(), JsonValue::Array(keys_list));
            projection(&mut entry, opts);
            let mut items = Map::new();
            items.insert(table.to_string(), JsonValue::Object(entry));
            BackendRequest::native(op, table, "BatchGetItem", json!({"RequestItems": items}))
        }
        (Op::Add | Op::Put, Payload::Record(obj)) => {
            let item: Record = obj
                .iter()
                .filter(|(k, v)| !k.starts_with('_') && !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if item.is_empty() {
                return Err(empty(op, table));
            }
            let mut body = json!({"TableName": table, "Item": record_to_item(&item)});
            if op == Op::Add && !keys.is_empty() {
                let expected: Map<String, JsonValue> = keys
                    .iter()
                    .map(|k| (k.clone(), json!({"Exists": false})))
                    .collect();
                body["Expected"] = JsonValue::Object(expected);
            }
            BackendRequest::native(op, table, "PutItem", body)
        }
        (Op::Update | Op::Incr, Payload::Record(obj)) => update(op, table, obj, opts, schema)?,
        (Op::Del, Payload::Record(obj)) => {
            let key = key_of(keys, obj).ok_or_else(|| empty(op, table))?;
            BackendRequest::native(op, table, "DeleteItem", json!({"TableName": table, "Key": key}))
        }
        _ => return Err(empty(op, table)),
    };
    Ok(Some(req.with_keys(keys.to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::schema::{ColumnDef, Tables};

    fn schema() -> SchemaSnapshot {
        let mut snap = SchemaSnapshot::default();
        let mut tables = Tables::new();
        tables.insert(
            "loc".into(),
            TableDef::new()
                .column(ColumnDef::new("id").primary())
                .column(ColumnDef::new("ts").with_type(ColumnType::Int).primary())
                .column(ColumnDef::new("geohash").hashindex())
                .column(ColumnDef::new("hits").with_type(ColumnType::Counter)),
        );
        snap.merge_columns(&tables);
        snap.merge_keys(&tables);
        snap
    }

    #[test]
    fn hash_key_match_queries() {
        let snap = schema();
        let obj = record! { "id" => "a", "ts" => 5_i64, "name" => "x" };
        let opts = RequestOptions::new().op("ts", "gt").count(10_usize);
        let req = prepare_native(Op::Select, "loc", Payload::Record(&obj), &opts, &snap)
            .unwrap()
            .unwrap();
        let call = req.native.unwrap();
        assert_eq!(call.action, "Query");
        assert_eq!(call.body["KeyConditions"]["ts"]["ComparisonOperator"], "GT");
        assert_eq!(call.body["QueryFilter"]["name"]["ComparisonOperator"], "EQ");
        assert_eq!(call.body["Limit"], 10);
    }

    #[test]
    fn local_index_range_uses_index_name() {
        let snap = schema();
        let obj = record! { "id" => "a", "geohash" => "9q8" };
        let opts = RequestOptions::new().op("geohash", "begins_with");
        let req = prepare_native(Op::Select, "loc", Payload::Record(&obj), &opts, &snap)
            .unwrap()
            .unwrap();
        let call = req.native.unwrap();
        assert_eq!(call.body["IndexName"], "loc_rdx");
        assert_eq!(call.body["KeyConditions"]["geohash"]["ComparisonOperator"], "BEGINS_WITH");
    }

    #[test]
    fn without_hash_key_scans() {
        let snap = schema();
        let obj = record! { "name" => "x" };
        let req = prepare_native(Op::Select, "loc", Payload::Record(&obj), &RequestOptions::new(), &snap)
            .unwrap()
            .unwrap();
        assert_eq!(req.native.unwrap().action, "Scan");
    }

    #[test]
    fn add_expects_absent_keys_and_incr_adds() {
        let snap = schema();
        let obj = record! { "id" => "a", "ts" => 1_i64, "hits" => 2_i64 };
        let add = prepare_native(Op::Add, "loc", Payload::Record(&obj), &RequestOptions::new(), &snap)
            .unwrap()
            .unwrap();
        assert_eq!(add.native.unwrap().body["Expected"]["id"], json!({"Exists": false}));

        let incr = prepare_native(Op::Incr, "loc", Payload::Record(&obj), &RequestOptions::new(), &snap)
            .unwrap()
            .unwrap();
        let body = incr.native.unwrap().body;
        assert_eq!(body["AttributeUpdates"]["hits"]["Action"], "ADD");
        assert!(body.get("Expected").is_none());
    }

    #[test]
    fn missing_key_is_empty_statement() {
        let snap = schema();
        let obj = record! { "id" => "a" };
        let err = prepare_native(Op::Del, "loc", Payload::Record(&obj), &RequestOptions::new(), &snap)
            .unwrap_err();
        assert!(err.is_empty_statement());
    }

    #[test]
    fn create_declares_local_index() {
        let def = TableDef::new()
            .column(ColumnDef::new("id").primary())
            .column(ColumnDef::new("geohash").hashindex());
        let body = create_table("loc", &def).unwrap();
        assert_eq!(body["LocalSecondaryIndexes"][0]["IndexName"], "loc_rdx");
        assert_eq!(body["AttributeDefinitions"].as_array().unwrap().len(), 2);
    }
}
