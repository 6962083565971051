//! Per-call options, the backend-agnostic request shape and the generic prepare step.

mod options;
mod prepare;

use serde_json::Value as JsonValue;

use crate::results::NextToken;
use crate::schema::TableDef;
use crate::types::{Op, Record, RowValues};

pub use options::{AsyncRowFilter, CheckData, FilterColumn, RequestOptions, RowFilter};
pub use prepare::{coerce_value, now_value, prepare_record, search_options, split_list};

/// What an operation works on.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Record(&'a Record),
    /// Key records for `list`.
    List(&'a [Record]),
    /// Declared table for `create`/`upgrade`.
    Table(&'a TableDef),
}

impl<'a> Payload<'a> {
    #[must_use]
    pub fn record(&self) -> Option<&'a Record> {
        match self {
            Payload::Record(rec) => Some(rec),
            _ => None,
        }
    }
}

/// A native API call for backends without a text query language.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeCall {
    pub action: String,
    pub body: JsonValue,
}

/// A fully prepared request. Drivers execute it without consulting the schema cache.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub op: Op,
    pub table: String,
    /// SQL/CQL text with dialect placeholders; empty for native calls.
    pub text: String,
    /// Individual DDL statements when `text` holds several.
    pub statements: Vec<String>,
    pub values: Vec<RowValues>,
    pub native: Option<NativeCall>,
    pub returning: Option<String>,
    /// Key columns, used to build key-based continuation tokens.
    pub keys: Vec<String>,
    pub count: Option<usize>,
    pub offset: usize,
    pub start: Option<NextToken>,
}

impl BackendRequest {
    #[must_use]
    pub fn new(op: Op, table: impl Into<String>) -> Self {
        Self {
            op,
            table: table.into(),
            text: String::new(),
            statements: Vec::new(),
            values: Vec::new(),
            native: None,
            returning: None,
            keys: Vec::new(),
            count: None,
            offset: 0,
            start: None,
        }
    }

    #[must_use]
    pub fn sql(op: Op, table: impl Into<String>, text: impl Into<String>, values: Vec<RowValues>) -> Self {
        Self {
            text: text.into(),
            values,
            ..Self::new(op, table)
        }
    }

    #[must_use]
    pub fn native(op: Op, table: impl Into<String>, action: impl Into<String>, body: JsonValue) -> Self {
        Self {
            native: Some(NativeCall {
                action: action.into(),
                body,
            }),
            ..Self::new(op, table)
        }
    }

    /// Several DDL statements executed in order.
    #[must_use]
    pub fn batch(op: Op, table: impl Into<String>, statements: Vec<String>) -> Self {
        Self {
            text: statements.join(";\n"),
            statements,
            ..Self::new(op, table)
        }
    }

    #[must_use]
    pub fn with_paging(mut self, count: Option<usize>, offset: usize, start: Option<NextToken>) -> Self {
        self.count = count;
        self.offset = offset;
        self.start = start;
        self
    }

    #[must_use]
    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }

    #[must_use]
    pub fn with_returning(mut self, returning: Option<String>) -> Self {
        self.returning = returning;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.native.is_none()
    }
}
