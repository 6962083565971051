use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use super::dialect::Dialect;
use super::expr::{ExprOptions, sql_expr};
use super::value::{sql_value, sql_value_in};
use crate::error::PolyDbError;
use crate::request::RequestOptions;
use crate::schema::ColumnDef;
use crate::types::{ColumnType, Record, RowValues};

lazy_static! {
    static ref IDENT: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .unwrap_or_else(|_| unreachable!("identifier pattern is valid"));
}

/// Plain (optionally table-qualified) identifier; anything else never reaches SQL text.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    IDENT.is_match(name)
}

pub(crate) fn column_type(
    name: &str,
    opts: &RequestOptions,
    columns: Option<&BTreeMap<String, ColumnDef>>,
) -> ColumnType {
    opts.types
        .get(name)
        .cloned()
        .or_else(|| columns.and_then(|c| c.get(name)).map(|c| c.ty.clone()))
        .unwrap_or_default()
}

/// ` ORDER BY ... LIMIT ... OFFSET ...` from the sort, count, start and page options.
#[must_use]
pub fn sql_limit(opts: &RequestOptions, dialect: Dialect) -> String {
    limit_clause(&opts.sort_keys(), opts.count, opts.offset(), dialect)
}

pub(crate) fn limit_clause(
    sort: &[(&str, bool)],
    count: Option<usize>,
    offset: usize,
    dialect: Dialect,
) -> String {
    let mut out = String::new();
    let order: Vec<String> = sort
        .iter()
        .filter(|(name, _)| is_identifier(name))
        .map(|(name, desc)| if *desc { format!("{name} DESC") } else { (*name).to_string() })
        .collect();
    if !order.is_empty() {
        out.push_str(" ORDER BY ");
        out.push_str(&order.join(","));
    }
    let offset = if dialect.supports_offset() { offset } else { 0 };
    match (count, offset) {
        (Some(count), _) => out.push_str(&format!(" LIMIT {count}")),
        (None, 0) => {}
        (None, _) => match dialect {
            Dialect::Sqlite => out.push_str(" LIMIT -1"),
            Dialect::Mysql => out.push_str(" LIMIT 18446744073709551615"),
            Dialect::Postgres | Dialect::Cql => {}
        },
    }
    if offset > 0 {
        out.push_str(&format!(" OFFSET {offset}"));
    }
    out
}

/// Conditions for `keys` taken from `obj`, AND'ed. A NULL value compiles to `IS NULL`
/// and a list to `IN` unless an explicit operator is set. Keys absent from `obj` are skipped.
#[must_use]
pub fn sql_where(
    obj: &Record,
    keys: &[String],
    opts: &RequestOptions,
    columns: Option<&BTreeMap<String, ColumnDef>>,
    dialect: Dialect,
) -> String {
    keys.iter()
        .filter(|k| is_identifier(k))
        .filter_map(|k| {
            let value = obj.get(k)?;
            let ty = column_type(k, opts, columns);
            let op = opts.op_for(k).unwrap_or_else(|| match value {
                RowValues::Null => "null".to_string(),
                RowValues::List(_) => "in".to_string(),
                _ => "=".to_string(),
            });
            let sql = sql_expr(k, value, &ExprOptions::new(dialect).op(&op).ty(&ty));
            (!sql.is_empty()).then_some(sql)
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Condition matching any of the given key records: `k IN (...)` for a single key,
/// otherwise an OR of per-record key equalities.
///
/// # Errors
/// Returns `InvalidRequest` when there are no keys or a record lacks a key value.
pub fn sql_where_list(
    list: &[Record],
    keys: &[String],
    opts: &RequestOptions,
    columns: Option<&BTreeMap<String, ColumnDef>>,
    dialect: Dialect,
) -> Result<String, PolyDbError> {
    if keys.is_empty() || keys.iter().any(|k| !is_identifier(k)) {
        return Err(PolyDbError::InvalidRequest("list requires primary keys".into()));
    }
    let value_of = |rec: &Record, key: &String| -> Result<RowValues, PolyDbError> {
        rec.get(key)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| PolyDbError::InvalidRequest(format!("list record without {key}")))
    };

    if let [key] = keys {
        let ty = column_type(key, opts, columns);
        let values = list
            .iter()
            .map(|rec| value_of(rec, key))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(format!("{key} IN ({})", sql_value_in(&values, &ty, dialect)));
    }

    let mut ors = Vec::with_capacity(list.len());
    for rec in list {
        let mut ands = Vec::with_capacity(keys.len());
        for key in keys {
            let ty = column_type(key, opts, columns);
            ands.push(format!("{key} = {}", sql_value(&value_of(rec, key)?, &ty, dialect)));
        }
        ors.push(format!("({})", ands.join(" AND ")));
    }
    Ok(ors.join(" OR "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::results::NextToken;

    #[test]
    fn limit_with_sort_and_offset() {
        let opts = RequestOptions::new()
            .sort("name")
            .sort1("id")
            .desc1(true)
            .count(2_usize)
            .start(NextToken::Offset(4));
        assert_eq!(
            sql_limit(&opts, Dialect::Postgres),
            " ORDER BY name,id DESC LIMIT 2 OFFSET 4"
        );
    }

    #[test]
    fn offset_without_limit() {
        let opts = RequestOptions::new().start(NextToken::Offset(3));
        assert_eq!(sql_limit(&opts, Dialect::Sqlite), " LIMIT -1 OFFSET 3");
        assert_eq!(sql_limit(&opts, Dialect::Postgres), " OFFSET 3");
        assert_eq!(sql_limit(&opts, Dialect::Cql), "");
    }

    #[test]
    fn unsafe_sort_is_dropped() {
        let opts = RequestOptions::new().sort("name; DROP TABLE t");
        assert_eq!(sql_limit(&opts, Dialect::Sqlite), "");
    }

    #[test]
    fn where_nulls_and_lists() {
        let obj = record! { "a" => "x", "c" => vec!["1", "2"] };
        let mut obj = obj;
        obj.insert("b".into(), RowValues::Null);
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let sql = sql_where(&obj, &keys, &RequestOptions::new(), None, Dialect::Sqlite);
        assert_eq!(sql, "a = 'x' AND b IS NULL AND c IN ('1','2')");
    }

    #[test]
    fn list_keys() {
        let list = vec![record! { "id" => "1" }, record! { "id" => "2" }];
        let keys = vec!["id".to_string()];
        let sql = sql_where_list(&list, &keys, &RequestOptions::new(), None, Dialect::Sqlite).unwrap();
        assert_eq!(sql, "id IN ('1','2')");

        let list = vec![record! { "a" => "1", "b" => "2" }];
        let keys = vec!["a".to_string(), "b".to_string()];
        let sql = sql_where_list(&list, &keys, &RequestOptions::new(), None, Dialect::Sqlite).unwrap();
        assert_eq!(sql, "(a = '1' AND b = '2')");

        let bad = vec![record! { "a" => "1" }];
        assert!(sql_where_list(&bad, &keys, &RequestOptions::new(), None, Dialect::Sqlite).is_err());
    }
}
