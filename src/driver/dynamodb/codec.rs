//! DynamoDB attribute-value JSON: `{"S": "a"}`, `{"N": "1"}`, `{"M": {...}}`, ...

use std::cmp::Ordering;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value as JsonValue, json};

use crate::error::PolyDbError;
use crate::types::{Record, RowValues};

fn bad(msg: impl Into<String>) -> PolyDbError {
    PolyDbError::ParameterError(msg.into())
}

/// Plain JSON (inside `json` values) to an attribute value.
fn json_to_attr(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Null => json!({"NULL": true}),
        JsonValue::Bool(b) => json!({"BOOL": b}),
        JsonValue::Number(n) => json!({"N": n.to_string()}),
        JsonValue::String(s) => json!({"S": s}),
        JsonValue::Array(items) => json!({"L": items.iter().map(json_to_attr).collect::<Vec<_>>()}),
        JsonValue::Object(map) => {
            let items: Map<String, JsonValue> =
                map.iter().map(|(k, v)| (k.clone(), json_to_attr(v))).collect();
            json!({"M": items})
        }
    }
}

/// Convert a value to its attribute form. Timestamps are stored as epoch seconds.
#[must_use]
pub fn to_attr(value: &RowValues) -> JsonValue {
    match value {
        RowValues::Null => json!({"NULL": true}),
        RowValues::Bool(b) => json!({"BOOL": b}),
        RowValues::Int(i) => json!({"N": i.to_string()}),
        RowValues::Float(f) => json!({"N": f.to_string()}),
        RowValues::Text(s) => json!({"S": s}),
        RowValues::Timestamp(dt) => json!({"N": dt.and_utc().timestamp().to_string()}),
        RowValues::Blob(b) => json!({"B": STANDARD.encode(b)}),
        RowValues::JSON(v) => json_to_attr(v),
        RowValues::List(items) => json!({"L": items.iter().map(to_attr).collect::<Vec<_>>()}),
    }
}

fn parse_number(n: &str) -> Result<RowValues, PolyDbError> {
    if let Ok(i) = n.parse::<i64>() {
        Ok(RowValues::Int(i))
    } else {
        n.parse::<f64>()
            .map(RowValues::Float)
            .map_err(|_| bad(format!("invalid number: {n}")))
    }
}

fn decode_blob(b64: &JsonValue) -> Result<Vec<u8>, PolyDbError> {
    let text = b64.as_str().ok_or_else(|| bad("B value must be a base64 string"))?;
    STANDARD
        .decode(text)
        .map_err(|e| bad(format!("invalid base64: {e}")))
}

fn set_items<'a>(value: &'a JsonValue, kind: &str) -> Result<&'a Vec<JsonValue>, PolyDbError> {
    value
        .as_array()
        .ok_or_else(|| bad(format!("{kind} value must be an array")))
}

/// Parse an attribute value.
///
/// # Errors
/// `ParameterError` for malformed attribute JSON.
pub fn from_attr(attr: &JsonValue) -> Result<RowValues, PolyDbError> {
    let obj = attr
        .as_object()
        .ok_or_else(|| bad("attribute value must be an object"))?;
    let Some((kind, value)) = obj.iter().next() else {
        return Err(bad("empty attribute value"));
    };
    match kind.as_str() {
        "S" => value
            .as_str()
            .map(|s| RowValues::Text(s.to_string()))
            .ok_or_else(|| bad("S value must be a string")),
        "N" => parse_number(value.as_str().ok_or_else(|| bad("N value must be a string"))?),
        "BOOL" => value
            .as_bool()
            .map(RowValues::Bool)
            .ok_or_else(|| bad("BOOL value must be a boolean")),
        "NULL" => Ok(RowValues::Null),
        "B" => decode_blob(value).map(RowValues::Blob),
        "L" => set_items(value, "L")?
            .iter()
            .map(from_attr)
            .collect::<Result<Vec<_>, _>>()
            .map(RowValues::List),
        "M" => Ok(RowValues::JSON(attr_to_json(attr)?)),
        "SS" => set_items(value, "SS")?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| RowValues::Text(s.to_string()))
                    .ok_or_else(|| bad("SS items must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(RowValues::List),
        "NS" => set_items(value, "NS")?
            .iter()
            .map(|v| parse_number(v.as_str().ok_or_else(|| bad("NS items must be strings"))?))
            .collect::<Result<Vec<_>, _>>()
            .map(RowValues::List),
        "BS" => set_items(value, "BS")?
            .iter()
            .map(|v| decode_blob(v).map(RowValues::Blob))
            .collect::<Result<Vec<_>, _>>()
            .map(RowValues::List),
        other => Err(bad(format!("unknown attribute type: {other}"))),
    }
}

/// Parse an attribute value into plain JSON, as nested maps are returned.
///
/// # Errors
/// `ParameterError` for malformed attribute JSON.
pub fn attr_to_json(attr: &JsonValue) -> Result<JsonValue, PolyDbError> {
    match attr.as_object().and_then(|o| o.get("M")) {
        Some(JsonValue::Object(map)) => Ok(JsonValue::Object(
            map.iter()
                .map(|(k, v)| attr_to_json(v).map(|v| (k.clone(), v)))
                .collect::<Result<Map<_, _>, _>>()?,
        )),
        Some(_) => Err(bad("M value must be an object")),
        None => match attr.as_object().and_then(|o| o.get("L")) {
            Some(JsonValue::Array(items)) => Ok(JsonValue::Array(
                items.iter().map(attr_to_json).collect::<Result<Vec<_>, _>>()?,
            )),
            _ => Ok(from_attr(attr)?.to_json()),
        },
    }
}

/// A record as an item; NULL values are left out.
#[must_use]
pub fn record_to_item(record: &Record) -> JsonValue {
    JsonValue::Object(
        record
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), to_attr(v)))
            .collect(),
    )
}

/// # Errors
/// `ParameterError` when the item is not an object or holds malformed attributes.
pub fn item_to_record(item: &JsonValue) -> Result<Record, PolyDbError> {
    item.as_object()
        .ok_or_else(|| bad("item must be an object"))?
        .iter()
        .map(|(k, v)| from_attr(v).map(|v| (k.clone(), v)))
        .collect()
}

/// Order two attribute values of the same kind: numbers numerically, strings and binary
/// bytewise. Mismatched kinds do not compare.
#[must_use]
pub fn compare_attrs(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (from_attr(left).ok()?, from_attr(right).ok()?) {
        (RowValues::Text(a), RowValues::Text(b)) => Some(a.cmp(&b)),
        (RowValues::Blob(a), RowValues::Blob(b)) => Some(a.cmp(&b)),
        (RowValues::Bool(a), RowValues::Bool(b)) => Some(a.cmp(&b)),
        (RowValues::Null, RowValues::Null) => Some(Ordering::Equal),
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(a), Some(b)) => Some(a.total_cmp(&b)),
            _ => (a == b).then_some(Ordering::Equal),
        },
    }
}
