use tracing::debug;

use super::SqlContext;
use super::clause::{is_identifier, limit_clause, sql_where, sql_where_list};
use super::dialect::Dialect;
use super::filter::try_sql_filter;
use crate::error::PolyDbError;
use crate::request::{BackendRequest, RequestOptions};
use crate::schema::ColumnDef;
use crate::types::{ColumnType, Op, Record, RowValues};

fn nothing_to_do(op: Op, table: &str) -> PolyDbError {
    debug!("{op} {table}: nothing to do");
    PolyDbError::EmptyStatement(format!("{op} {table}"))
}

/// `RETURNING` list when the dialect has one and every item is a column or `*`.
fn returning(opts: &RequestOptions, dialect: Dialect) -> Option<String> {
    let list = opts.returning.as_deref()?.trim();
    let valid = !list.is_empty()
        && list
            .split(',')
            .map(str::trim)
            .all(|item| item == "*" || is_identifier(item));
    (valid && dialect.supports_returning()).then(|| list.to_string())
}

fn push_returning(text: &mut String, returning: Option<&String>) {
    if let Some(list) = returning {
        text.push_str(" RETURNING ");
        text.push_str(list);
    }
}

/// Columns the statement may write: known and live, or anything when the table is unknown
/// or `all_columns` is set.
fn writable<'s>(
    ctx: &SqlContext<'s>,
    table: &str,
    name: &str,
    opts: &RequestOptions,
) -> Option<Option<&'s ColumnDef>> {
    if name.starts_with('_') || !is_identifier(name) || opts.skip_columns.iter().any(|c| c == name) {
        return None;
    }
    match ctx.schema.table(table) {
        None => Some(None),
        Some(columns) => match columns.get(name) {
            Some(col) if col.fake => None,
            Some(col) => Some(Some(col)),
            None if opts.is_all_columns() => Some(None),
            None => None,
        },
    }
}

fn select_columns(ctx: &SqlContext<'_>, table: &str, opts: &RequestOptions) -> String {
    if opts.total == Some(true) {
        return "COUNT(*) AS count".to_string();
    }
    let known = ctx.schema.table(table);
    let columns: Vec<&str> = opts
        .select
        .iter()
        .flatten()
        .flat_map(|item| item.split(','))
        .map(str::trim)
        .filter(|name| is_identifier(name))
        .filter(|name| known.is_none_or(|cols| cols.get(*name).is_some_and(|c| !c.fake)))
        .collect();
    if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(",")
    }
}

/// Condition columns for a select: explicit `keys`, otherwise every record property that is
/// a known column (or every property when the table is unknown).
fn select_keys(ctx: &SqlContext<'_>, table: &str, obj: &Record, opts: &RequestOptions) -> Vec<String> {
    if let Some(keys) = opts.keys.as_ref().filter(|k| !k.is_empty()) {
        return keys.clone();
    }
    let known = ctx.schema.table(table);
    obj.keys()
        .filter(|name| known.is_none_or(|cols| cols.contains_key(*name)))
        .cloned()
        .collect()
}

/// `SELECT` with conditions from `obj`, declarative `filters`, sort and paging.
///
/// # Errors
/// `EmptyStatement` when a `required` filter column has no value.
pub fn sql_select(
    ctx: &SqlContext<'_>,
    table: &str,
    obj: &Record,
    opts: &RequestOptions,
) -> Result<BackendRequest, PolyDbError> {
    let dialect = ctx.dialect;
    let columns = ctx.schema.table(table);
    let keys = select_keys(ctx, table, obj, opts);
    let mut values = Vec::new();

    let mut conditions = Vec::new();
    let where_keys = sql_where(obj, &keys, opts, columns, dialect);
    if !where_keys.is_empty() {
        conditions.push(where_keys);
    }
    if !opts.filters.is_empty() {
        match try_sql_filter(&opts.filters, obj, &mut values, dialect) {
            None => return Err(nothing_to_do(Op::Select, table)),
            Some(filter) if !filter.is_empty() => conditions.push(filter),
            Some(_) => {}
        }
    }

    let mut text = format!("SELECT {} FROM {table}", select_columns(ctx, table, opts));
    if !conditions.is_empty() {
        text.push_str(" WHERE ");
        text.push_str(&conditions.join(" AND "));
    }

    let primary = ctx.schema.keys(table);
    let mut sort = opts.sort_keys();
    let paging = opts.count.is_some() || opts.offset() > 0;
    if sort.is_empty() && paging && opts.total != Some(true) && dialect != Dialect::Cql {
        sort = primary.iter().map(|k| (k.as_str(), false)).collect();
    }
    let count = if opts.total == Some(true) { None } else { opts.count };
    text.push_str(&limit_clause(&sort, count, opts.offset(), dialect));
    if dialect == Dialect::Cql && !conditions.is_empty() {
        text.push_str(" ALLOW FILTERING");
    }

    let req = BackendRequest::sql(Op::Select, table, text, values)
        .with_paging(count, opts.offset(), opts.start.clone())
        .with_keys(primary.to_vec());
    Ok(ctx.finish(req))
}

/// `SELECT` of the records matching a list of key records.
///
/// # Errors
/// `InvalidRequest` when the table has no usable keys or a record lacks one.
pub fn sql_select_list(
    ctx: &SqlContext<'_>,
    table: &str,
    list: &[Record],
    opts: &RequestOptions,
) -> Result<BackendRequest, PolyDbError> {
    if list.is_empty() {
        return Err(nothing_to_do(Op::List, table));
    }
    let keys = opts
        .keys
        .clone()
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| ctx.schema.keys(table).to_vec());
    let condition = sql_where_list(list, &keys, opts, ctx.schema.table(table), ctx.dialect)?;
    let text = format!(
        "SELECT {} FROM {table} WHERE {condition}",
        select_columns(ctx, table, opts)
    );
    Ok(BackendRequest::sql(Op::List, table, text, Vec::new()).with_keys(keys))
}

/// `INSERT` for `add`, and for `put` the dialect's replace form.
///
/// NULL values are left out so column defaults apply. Returns `Ok(None)` for a PostgreSQL
/// `put` whose record does not carry every primary key column.
///
/// # Errors
/// `EmptyStatement` when no writable column remains.
pub fn sql_insert(
    ctx: &SqlContext<'_>,
    op: Op,
    table: &str,
    obj: &Record,
    opts: &RequestOptions,
) -> Result<Option<BackendRequest>, PolyDbError> {
    let dialect = ctx.dialect;
    let mut names: Vec<&str> = Vec::new();
    let mut values: Vec<RowValues> = Vec::new();
    for (name, value) in obj {
        let Some(col) = writable(ctx, table, name, opts) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        names.push(name);
        values.push((ctx.bind)(value.clone(), col));
    }
    if names.is_empty() {
        return Err(nothing_to_do(op, table));
    }

    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${i}")).collect();
    let verb = match (op, dialect) {
        (Op::Put, Dialect::Sqlite | Dialect::Mysql) => "REPLACE",
        _ => "INSERT",
    };
    let mut text = format!(
        "{verb} INTO {table} ({}) VALUES ({})",
        names.join(","),
        placeholders.join(",")
    );

    match (op, dialect) {
        (Op::Add, Dialect::Cql) => text.push_str(" IF NOT EXISTS"),
        (Op::Put, Dialect::Postgres) => {
            let keys = ctx.schema.keys(table);
            if keys.is_empty() || !keys.iter().all(|k| names.contains(&k.as_str())) {
                return Ok(None);
            }
            let updates: Vec<String> = ctx
                .schema
                .live_columns(table)
                .filter(|c| !keys.contains(&c.name) && !c.primary)
                .map(|c| format!("{0} = EXCLUDED.{0}", c.name))
                .collect();
            text.push_str(&format!(" ON CONFLICT ({}) DO ", keys.join(",")));
            if updates.is_empty() {
                text.push_str("NOTHING");
            } else {
                text.push_str("UPDATE SET ");
                text.push_str(&updates.join(","));
            }
        }
        _ => {}
    }

    let returning = returning(opts, dialect);
    push_returning(&mut text, returning.as_ref());
    let req = BackendRequest::sql(op, table, text, values)
        .with_returning(returning)
        .with_keys(ctx.schema.keys(table).to_vec());
    Ok(Some(ctx.finish(req)))
}

fn increments(op: Op, dialect: Dialect, name: &str, ty: &ColumnType, opts: &RequestOptions) -> bool {
    if opts.op_for(name).as_deref() == Some("incr") {
        return true;
    }
    match ty {
        ColumnType::Counter => op == Op::Incr || dialect == Dialect::Cql,
        ColumnType::Int | ColumnType::Real => op == Op::Incr,
        _ => false,
    }
}

/// `UPDATE ... SET ... WHERE keys`. For `incr`, numeric and counter columns are added to
/// their current value instead of replaced.
///
/// # Errors
/// `EmptyStatement` when there is nothing to set or no key condition.
pub fn sql_update(
    ctx: &SqlContext<'_>,
    op: Op,
    table: &str,
    obj: &Record,
    opts: &RequestOptions,
) -> Result<BackendRequest, PolyDbError> {
    let dialect = ctx.dialect;
    let keys = opts
        .keys
        .clone()
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| ctx.schema.keys(table).to_vec());

    let mut sets = Vec::new();
    let mut values = Vec::new();
    for (name, value) in obj {
        if keys.contains(name) {
            continue;
        }
        let Some(col) = writable(ctx, table, name, opts) else {
            continue;
        };
        if col.is_some_and(|c| c.primary) {
            continue;
        }
        let ty = super::column_type(name, opts, ctx.schema.table(table));
        values.push((ctx.bind)(value.clone(), col));
        let n = values.len();
        if increments(op, dialect, name, &ty, opts) {
            if dialect == Dialect::Cql {
                sets.push(format!("{name} = {name} + ${n}"));
            } else {
                sets.push(format!("{name} = COALESCE({name},0) + ${n}"));
            }
        } else {
            sets.push(format!("{name} = ${n}"));
        }
    }

    let condition = sql_where(obj, &keys, opts, ctx.schema.table(table), dialect);
    if sets.is_empty() || condition.is_empty() {
        return Err(nothing_to_do(op, table));
    }

    let mut text = format!("UPDATE {table} SET {} WHERE {condition}", sets.join(","));
    let returning = returning(opts, dialect);
    push_returning(&mut text, returning.as_ref());
    let req = BackendRequest::sql(op, table, text, values)
        .with_returning(returning)
        .with_keys(keys);
    Ok(ctx.finish(req))
}

/// `DELETE FROM ... WHERE keys`.
///
/// # Errors
/// `EmptyStatement` when the record yields no key condition.
pub fn sql_delete(
    ctx: &SqlContext<'_>,
    table: &str,
    obj: &Record,
    opts: &RequestOptions,
) -> Result<BackendRequest, PolyDbError> {
    let keys = opts
        .keys
        .clone()
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| ctx.schema.keys(table).to_vec());
    let condition = sql_where(obj, &keys, opts, ctx.schema.table(table), ctx.dialect);
    if condition.is_empty() {
        return Err(nothing_to_do(Op::Del, table));
    }
    let mut text = format!("DELETE FROM {table} WHERE {condition}");
    let returning = returning(opts, ctx.dialect);
    push_returning(&mut text, returning.as_ref());
    Ok(BackendRequest::sql(Op::Del, table, text, Vec::new())
        .with_returning(returning)
        .with_keys(keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::request::FilterColumn;
    use crate::results::NextToken;
    use crate::schema::{SchemaSnapshot, TableDef, Tables};

    fn schema() -> SchemaSnapshot {
        let mut snap = SchemaSnapshot::default();
        for col in ["id", "name", "hits", "score"] {
            snap.insert_column("t", ColumnDef::new(col));
        }
        let mut tables = Tables::new();
        tables.insert(
            "t".into(),
            TableDef::new()
                .column(ColumnDef::new("id").primary())
                .column(ColumnDef::new("name"))
                .column(ColumnDef::new("hits").with_type(ColumnType::Counter))
                .column(ColumnDef::new("score").with_type(ColumnType::Int))
                .column(ColumnDef::new("later")),
        );
        snap.merge_columns(&tables);
        snap.merge_keys(&tables);
        snap
    }

    #[test]
    fn select_pages_in_key_order() {
        let snap = schema();
        let ctx = SqlContext::new(Dialect::Postgres, &snap);
        let opts = RequestOptions::new().count(2_usize).start(NextToken::Offset(2));
        let req = sql_select(&ctx, "t", &Record::new(), &opts).unwrap();
        assert_eq!(req.text, "SELECT * FROM t ORDER BY id LIMIT 2 OFFSET 2");
        assert_eq!(req.count, Some(2));
        assert_eq!(req.offset, 2);
    }

    #[test]
    fn select_skips_unknown_and_fake_columns() {
        let snap = schema();
        let ctx = SqlContext::new(Dialect::Sqlite, &snap);
        let obj = record! { "name" => "a", "bogus" => "x" };
        let opts = RequestOptions::new().select(["id,name", "later", "x;y"]);
        let req = sql_select(&ctx, "t", &obj, &opts).unwrap();
        assert_eq!(req.text, "SELECT id,name FROM t WHERE name = 'a'");
    }

    #[test]
    fn select_total_and_filters() {
        let snap = schema();
        let ctx = SqlContext::new(Dialect::Sqlite, &snap);
        let opts = RequestOptions::new()
            .total(true)
            .keys(Vec::<String>::new())
            .filter_column(FilterColumn::new("q").col("name").op("like%"));
        let obj = record! { "q" => "jo" };
        let req = sql_select(&ctx, "t", &obj, &opts).unwrap();
        assert_eq!(req.text, "SELECT COUNT(*) AS count FROM t WHERE name LIKE 'jo%'");

        let opts = opts.filter_column(FilterColumn::new("owner").required());
        assert!(sql_select(&ctx, "t", &obj, &opts).unwrap_err().is_empty_statement());
    }

    #[test]
    fn insert_and_put_forms() {
        let snap = schema();
        let obj = record! { "id" => "1", "name" => "a", "later" => "x" };
        let sqlite = SqlContext::new(Dialect::Sqlite, &snap);
        let req = sql_insert(&sqlite, Op::Put, "t", &obj, &RequestOptions::new())
            .unwrap()
            .unwrap();
        assert_eq!(req.text, "REPLACE INTO t (id,name) VALUES (?1,?2)");
        assert_eq!(req.values.len(), 2);

        let pg = SqlContext::new(Dialect::Postgres, &snap);
        let opts = RequestOptions::new().returning("id");
        let req = sql_insert(&pg, Op::Put, "t", &obj, &opts).unwrap().unwrap();
        assert_eq!(
            req.text,
            "INSERT INTO t (id,name) VALUES ($1,$2) ON CONFLICT (id) DO UPDATE SET \
             hits = EXCLUDED.hits,name = EXCLUDED.name,score = EXCLUDED.score RETURNING id"
        );

        let keyless = record! { "name" => "a" };
        assert!(sql_insert(&pg, Op::Put, "t", &keyless, &RequestOptions::new()).unwrap().is_none());
    }

    #[test]
    fn insert_with_nothing_is_empty() {
        let snap = schema();
        let ctx = SqlContext::new(Dialect::Sqlite, &snap);
        let obj = record! { "later" => "x", "_private" => "y" };
        let err = sql_insert(&ctx, Op::Add, "t", &obj, &RequestOptions::new()).unwrap_err();
        assert!(err.is_empty_statement());
    }

    #[test]
    fn update_and_incr() {
        let snap = schema();
        let ctx = SqlContext::new(Dialect::Postgres, &snap);
        let obj = record! { "id" => "1", "name" => "b", "hits" => 2_i64 };
        let req = sql_update(&ctx, Op::Update, "t", &obj, &RequestOptions::new()).unwrap();
        assert_eq!(req.text, "UPDATE t SET hits = $1,name = $2 WHERE id = '1'");

        let obj = record! { "id" => "1", "hits" => 1_i64, "score" => 5_i64 };
        let req = sql_update(&ctx, Op::Incr, "t", &obj, &RequestOptions::new()).unwrap();
        assert_eq!(
            req.text,
            "UPDATE t SET hits = COALESCE(hits,0) + $1,score = COALESCE(score,0) + $2 WHERE id = '1'"
        );

        let keys_only = record! { "id" => "1" };
        assert!(sql_update(&ctx, Op::Update, "t", &keys_only, &RequestOptions::new()).is_err());
    }

    #[test]
    fn delete_requires_a_condition() {
        let snap = schema();
        let ctx = SqlContext::new(Dialect::Sqlite, &snap);
        let req = sql_delete(&ctx, "t", &record! { "id" => "1" }, &RequestOptions::new()).unwrap();
        assert_eq!(req.text, "DELETE FROM t WHERE id = '1'");
        assert!(sql_delete(&ctx, "t", &Record::new(), &RequestOptions::new()).is_err());
    }
}
