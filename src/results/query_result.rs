use serde_json::{Map, Value as JsonValue};

use crate::error::PolyDbError;
use crate::types::{Record, RowValues};

/// Opaque continuation for paginated reads. Pass it back as `start` to get the next page.
///
/// SQL backends page by offset; key-value backends resume after the last evaluated key.
#[derive(Debug, Clone, PartialEq)]
pub enum NextToken {
    Offset(usize),
    Key(Record),
}

impl NextToken {
    /// Serialise for transport, e.g. to hand to an HTTP client.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            NextToken::Offset(n) => JsonValue::from(*n),
            NextToken::Key(rec) => JsonValue::Object(
                rec.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }

    /// # Errors
    /// Returns `InvalidRequest` when the value is neither a number nor an object.
    pub fn from_json(value: &JsonValue) -> Result<Self, PolyDbError> {
        match value {
            JsonValue::Number(n) => n
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .map(NextToken::Offset)
                .ok_or_else(|| PolyDbError::InvalidRequest(format!("bad offset token: {n}"))),
            JsonValue::Object(map) => Ok(NextToken::Key(
                map.iter()
                    .map(|(k, v)| (k.clone(), RowValues::from_json(v)))
                    .collect(),
            )),
            other => Err(PolyDbError::InvalidRequest(format!(
                "unsupported token: {other}"
            ))),
        }
    }

    #[must_use]
    pub fn as_offset(&self) -> Option<usize> {
        match self {
            NextToken::Offset(n) => Some(*n),
            NextToken::Key(_) => None,
        }
    }

    #[must_use]
    pub fn as_key(&self) -> Option<&Record> {
        match self {
            NextToken::Key(rec) => Some(rec),
            NextToken::Offset(_) => None,
        }
    }
}

/// Metadata reported alongside the rows of every operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryInfo {
    pub affected_rows: u64,
    pub inserted_oid: Option<i64>,
    pub next_token: Option<NextToken>,
}

/// Rows and info returned by every engine operation. Rows are always a list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Record>,
    pub info: QueryInfo,
}

impl QueryResult {
    #[must_use]
    pub fn new(rows: Vec<Record>, info: QueryInfo) -> Self {
        Self { rows, info }
    }

    /// The first row, if any; convenient after `get`.
    #[must_use]
    pub fn first(&self) -> Option<&Record> {
        self.rows.first()
    }

    #[must_use]
    pub fn into_first(self) -> Option<Record> {
        self.rows.into_iter().next()
    }

    #[must_use]
    pub fn next_token(&self) -> Option<&NextToken> {
        self.info.next_token.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
