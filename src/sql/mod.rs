//! SQL-family request compiler shared by the SQLite, PostgreSQL and CQL drivers.
//!
//! WHERE conditions are inlined as quoted literals; INSERT/UPDATE values are bound as
//! `$N` parameters and rewritten to the dialect's placeholder style at the end.

mod clause;
mod ddl;
mod dialect;
mod dml;
mod expr;
mod filter;
mod value;

pub use clause::{is_identifier, sql_limit, sql_where, sql_where_list};
pub use ddl::{sql_create, sql_drop, sql_upgrade};
pub use dialect::{Dialect, TIMESTAMP_TEXT};
pub use dml::{sql_delete, sql_insert, sql_select, sql_select_list, sql_update};
pub use expr::{ExprOptions, normalize_op, sql_expr};
pub use filter::sql_filter;
pub use value::{sql_quote, sql_value, sql_value_in};

pub(crate) use clause::column_type;

use crate::error::PolyDbError;
use crate::request::{BackendRequest, Payload, RequestOptions, coerce_value};
use crate::schema::{ColumnDef, SchemaSnapshot};
use crate::translation::translate_placeholders;
use crate::types::{Op, RowValues};

/// Driver hook converting a value before it is bound as a statement parameter.
pub type BindFn = fn(RowValues, Option<&ColumnDef>) -> RowValues;

/// Default binding: coerce to the column's declared type.
#[must_use]
pub fn bind_by_type(value: RowValues, column: Option<&ColumnDef>) -> RowValues {
    match column {
        Some(col) => coerce_value(value, &col.ty),
        None => value,
    }
}

/// Everything a statement builder reads besides the call itself.
#[derive(Clone, Copy)]
pub struct SqlContext<'a> {
    pub dialect: Dialect,
    pub schema: &'a SchemaSnapshot,
    pub bind: BindFn,
}

impl<'a> SqlContext<'a> {
    #[must_use]
    pub fn new(dialect: Dialect, schema: &'a SchemaSnapshot) -> Self {
        Self {
            dialect,
            schema,
            bind: bind_by_type,
        }
    }

    #[must_use]
    pub fn with_bind(mut self, bind: BindFn) -> Self {
        self.bind = bind;
        self
    }

    /// Rewrite `$N` placeholders into the dialect's style.
    pub(crate) fn finish(&self, mut req: BackendRequest) -> BackendRequest {
        if !req.values.is_empty() {
            req.text = translate_placeholders(&req.text, self.dialect.placeholder_style()).into_owned();
        }
        req
    }
}

fn empty(op: Op, table: &str) -> PolyDbError {
    PolyDbError::EmptyStatement(format!("{op} {table}"))
}

/// Compile an operation for a SQL-family backend.
///
/// `Ok(None)` means the operation has no single-statement form here and the engine emulates
/// it (`put` without a usable conflict target) or has nothing to do (`upgrade` with no
/// missing columns).
///
/// # Errors
/// `EmptyStatement` when nothing can be derived from the payload, `InvalidRequest` for
/// malformed key lists.
pub fn prepare_sql(
    ctx: &SqlContext<'_>,
    op: Op,
    table: &str,
    payload: Payload<'_>,
    opts: &RequestOptions,
) -> Result<Option<BackendRequest>, PolyDbError> {
    if !is_identifier(table) {
        return Err(PolyDbError::InvalidRequest(format!("invalid table name {table}")));
    }
    let req = match (op, payload) {
        (Op::Create, Payload::Table(def)) => Some(sql_create(ctx, table, def, opts)?),
        (Op::Upgrade, Payload::Table(def)) => sql_upgrade(ctx, table, def, opts),
        (Op::Drop, _) => Some(sql_drop(table)),
        (Op::List, Payload::List(list)) => Some(sql_select_list(ctx, table, list, opts)?),
        (Op::Get, Payload::Record(obj)) => {
            let keys = opts
                .keys
                .clone()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| ctx.schema.keys(table).to_vec());
            let get = RequestOptions {
                keys: Some(keys),
                count: Some(1),
                start: None,
                page: None,
                ..opts.clone()
            };
            Some(sql_select(ctx, table, obj, &get)?)
        }
        (Op::Select | Op::Search, Payload::Record(obj)) => Some(sql_select(ctx, table, obj, opts)?),
        (Op::Add | Op::Put, Payload::Record(obj)) => sql_insert(ctx, op, table, obj, opts)?,
        (Op::Update | Op::Incr, Payload::Record(obj)) => Some(sql_update(ctx, op, table, obj, opts)?),
        (Op::Del, Payload::Record(obj)) => Some(sql_delete(ctx, table, obj, opts)?),
        _ => return Err(empty(op, table)),
    };
    Ok(req.map(|mut req| {
        req.op = op;
        req
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::schema::{TableDef, Tables};
    use crate::types::ColumnType;

    fn schema() -> SchemaSnapshot {
        let mut snap = SchemaSnapshot::default();
        snap.insert_column("t", ColumnDef::new("id"));
        snap.insert_column("t", ColumnDef::new("name"));
        snap.insert_column("t", ColumnDef::new("n").with_type(ColumnType::Int));
        let mut tables = Tables::new();
        tables.insert(
            "t".into(),
            TableDef::new()
                .column(ColumnDef::new("id").primary())
                .column(ColumnDef::new("name"))
                .column(ColumnDef::new("n").with_type(ColumnType::Int)),
        );
        snap.merge_columns(&tables);
        snap.merge_keys(&tables);
        snap
    }

    #[test]
    fn get_uses_primary_keys_and_limit_one() {
        let snap = schema();
        let ctx = SqlContext::new(Dialect::Sqlite, &snap);
        let obj = record! { "id" => "1", "name" => "x" };
        let req = prepare_sql(&ctx, Op::Get, "t", Payload::Record(&obj), &RequestOptions::new())
            .unwrap()
            .unwrap();
        assert_eq!(req.op, Op::Get);
        assert_eq!(req.text, "SELECT * FROM t WHERE id = '1' ORDER BY id LIMIT 1");
    }

    #[test]
    fn placeholders_follow_dialect() {
        let snap = schema();
        let obj = record! { "id" => "1", "name" => "x" };
        let sqlite = SqlContext::new(Dialect::Sqlite, &snap);
        let req = prepare_sql(&sqlite, Op::Add, "t", Payload::Record(&obj), &RequestOptions::new())
            .unwrap()
            .unwrap();
        assert_eq!(req.text, "INSERT INTO t (id,name) VALUES (?1,?2)");
        let cql = SqlContext::new(Dialect::Cql, &snap);
        let req = prepare_sql(&cql, Op::Add, "t", Payload::Record(&obj), &RequestOptions::new())
            .unwrap()
            .unwrap();
        assert_eq!(req.text, "INSERT INTO t (id,name) VALUES (?,?) IF NOT EXISTS");
    }

    #[test]
    fn bad_table_names_are_rejected() {
        let snap = schema();
        let ctx = SqlContext::new(Dialect::Postgres, &snap);
        let obj = record! { "id" => "1" };
        let err = prepare_sql(&ctx, Op::Get, "t;drop", Payload::Record(&obj), &RequestOptions::new());
        assert!(matches!(err, Err(PolyDbError::InvalidRequest(_))));
    }
}
