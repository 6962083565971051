use super::SqlContext;
use super::clause::is_identifier;
use super::dialect::Dialect;
use super::value::sql_value;
use crate::error::PolyDbError;
use crate::request::{BackendRequest, RequestOptions};
use crate::schema::{ColumnDef, IndexKind, IndexSpec, TableDef};
use crate::types::Op;

fn column_sql(col: &ColumnDef, dialect: Dialect, opts: &RequestOptions) -> String {
    let mut sql = format!("{} {}", col.name, dialect.native_type(&col.ty, &opts.types_map));
    if dialect != Dialect::Cql {
        if let Some(value) = &col.value {
            sql.push_str(" DEFAULT ");
            sql.push_str(&sql_value(value, &col.ty, dialect));
        }
    }
    sql
}

fn index_sql(table: &str, spec: &IndexSpec, dialect: Dialect) -> Option<String> {
    if !is_identifier(&spec.name)
        || spec.columns.is_empty()
        || spec.columns.iter().any(|c| !is_identifier(c))
    {
        return None;
    }
    let columns = spec.columns.join(",");
    match dialect {
        // secondary indexes only, one column each
        Dialect::Cql => (spec.kind == IndexKind::Index && spec.columns.len() == 1).then(|| {
            format!("CREATE INDEX IF NOT EXISTS {} ON {table} ({columns})", spec.name)
        }),
        _ => {
            let unique = if spec.kind == IndexKind::Index { "" } else { "UNIQUE " };
            let guard = if dialect == Dialect::Mysql { "" } else { "IF NOT EXISTS " };
            Some(format!(
                "CREATE {unique}INDEX {guard}{} ON {table} ({columns})",
                spec.name
            ))
        }
    }
}

fn primary_key_sql(keys: &[String], dialect: Dialect) -> String {
    match (dialect, keys) {
        (Dialect::Cql, [partition, clustering @ ..]) if !clustering.is_empty() => {
            format!("PRIMARY KEY (({partition}),{})", clustering.join(","))
        }
        _ => format!("PRIMARY KEY ({})", keys.join(",")),
    }
}

/// `CREATE TABLE IF NOT EXISTS` followed by one statement per index spec.
///
/// # Errors
/// `InvalidRequest` for a table without columns, an invalid column name, or a CQL table
/// without a primary key.
pub fn sql_create(
    ctx: &SqlContext<'_>,
    table: &str,
    def: &TableDef,
    opts: &RequestOptions,
) -> Result<BackendRequest, PolyDbError> {
    let dialect = ctx.dialect;
    if def.columns.is_empty() {
        return Err(PolyDbError::InvalidRequest(format!("{table}: no columns")));
    }
    if let Some(bad) = def.columns.iter().find(|c| !is_identifier(&c.name)) {
        return Err(PolyDbError::InvalidRequest(format!("{table}: invalid column {}", bad.name)));
    }

    let mut body: Vec<String> = def
        .columns
        .iter()
        .map(|col| column_sql(col, dialect, opts))
        .collect();
    let keys = def.primary_keys();
    if keys.is_empty() && dialect == Dialect::Cql {
        return Err(PolyDbError::InvalidRequest(format!("{table}: primary key required")));
    }
    if !keys.is_empty() {
        body.push(primary_key_sql(&keys, dialect));
    }

    let mut statements = vec![format!("CREATE TABLE IF NOT EXISTS {table} ({})", body.join(","))];
    statements.extend(
        def.index_specs(table)
            .iter()
            .filter_map(|spec| index_sql(table, spec, dialect)),
    );
    Ok(BackendRequest::batch(Op::Create, table, statements).with_keys(keys))
}

/// `ALTER TABLE ADD COLUMN` for declared columns missing (or `fake`) in the live schema and
/// index statements for declared indexes not seen live. `None` when there is nothing to do.
#[must_use]
pub fn sql_upgrade(
    ctx: &SqlContext<'_>,
    table: &str,
    def: &TableDef,
    opts: &RequestOptions,
) -> Option<BackendRequest> {
    let dialect = ctx.dialect;
    let add = if dialect == Dialect::Cql { "ADD" } else { "ADD COLUMN" };
    let mut statements: Vec<String> = def
        .columns
        .iter()
        .filter(|col| is_identifier(&col.name))
        .filter(|col| ctx.schema.column(table, &col.name).is_none_or(|live| live.fake))
        .map(|col| format!("ALTER TABLE {table} {add} {}", column_sql(col, dialect, opts)))
        .collect();

    let live = ctx.schema.indexes(table);
    statements.extend(
        def.index_specs(table)
            .iter()
            .filter(|spec| {
                live.iter()
                    .find(|ix| ix.name == spec.name)
                    .is_none_or(|ix| ix.fake)
            })
            .filter_map(|spec| index_sql(table, spec, dialect)),
    );

    (!statements.is_empty()).then(|| BackendRequest::batch(Op::Upgrade, table, statements))
}

/// `DROP TABLE IF EXISTS`.
#[must_use]
pub fn sql_drop(table: &str) -> BackendRequest {
    BackendRequest::batch(Op::Drop, table, vec![format!("DROP TABLE IF EXISTS {table}")])
}
