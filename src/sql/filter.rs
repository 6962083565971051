use regex::Regex;

use super::dialect::Dialect;
use super::expr::{ExprOptions, sql_expr};
use super::value::sql_value;
use crate::request::FilterColumn;
use crate::types::{Record, RowValues};

/// Compile declarative filter columns against a values record into a WHERE fragment.
///
/// Conditions without a group are AND'ed; conditions sharing a group are OR'ed inside
/// parentheses. A `required` column without a value voids the whole filter and the result
/// is the empty string. `bind` columns push their value into `params` and replace `$#` in
/// their template with the next `$N` placeholder.
#[must_use]
pub fn sql_filter(
    columns: &[FilterColumn],
    values: &Record,
    params: &mut Vec<RowValues>,
    dialect: Dialect,
) -> String {
    try_sql_filter(columns, values, params, dialect).unwrap_or_default()
}

/// Like [`sql_filter`] but distinguishes "no conditions" (`Some("")`) from a missing
/// required value (`None`).
pub(crate) fn try_sql_filter(
    columns: &[FilterColumn],
    values: &Record,
    params: &mut Vec<RowValues>,
    dialect: Dialect,
) -> Option<String> {
    let mut all: Vec<String> = Vec::new();
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();

    for column in columns {
        let mut value = column.value.clone();
        if !column.always {
            if let Some(v) = values.get(&column.name).filter(|v| !v.is_empty()) {
                value = Some(v.clone());
            }
            for alt in &column.search {
                if let Some(v) = values.get(alt).filter(|v| !v.is_empty()) {
                    value = Some(v.clone());
                }
            }
        }

        let missing = value.as_ref().is_none_or(|v| matches!(v, RowValues::Text(s) if s.is_empty()));
        if missing {
            if column.required {
                return None;
            }
            if !column.empty && !column.always {
                continue;
            }
        }
        let value = value.unwrap_or_else(|| RowValues::Text(String::new()));

        if let Some(pattern) = &column.skip {
            if Regex::new(pattern).is_ok_and(|re| re.is_match(&value.to_text())) {
                continue;
            }
        }

        let mut name = column.col.clone().unwrap_or_else(|| column.name.clone());
        if let Some(alias) = &column.alias {
            name = format!("{alias}.{name}");
        }
        if let Some(coalesce) = &column.coalesce {
            name = format!("COALESCE({name},{})", sql_value(coalesce, &column.ty, dialect));
        }

        let op = column.op.as_deref().unwrap_or("=");
        let sql = match op {
            "skip" => continue,
            "bind" => match &column.expr {
                Some(template) => {
                    params.push(value);
                    template.replace("$#", &format!("${}", params.len()))
                }
                None => continue,
            },
            _ if column.isnull && matches!(value.as_text(), Some("null" | "notnull")) => {
                let not = if value.as_text() == Some("notnull") { " NOT" } else { "" };
                format!("{name} IS{not} NULL")
            }
            _ => {
                let mut opts = ExprOptions::new(dialect).op(op).ty(&column.ty);
                if let Some(expr) = &column.expr {
                    opts = opts.expr(expr);
                }
                sql_expr(&name, &value, &opts)
            }
        };
        if sql.is_empty() {
            continue;
        }
        match &column.group {
            Some(group) => match groups.iter_mut().find(|(g, _)| g == group) {
                Some((_, items)) => items.push(sql),
                None => groups.push((group.clone(), vec![sql])),
            },
            None => all.push(sql),
        }
    }

    for (_, items) in groups {
        all.push(format!("({})", items.join(" OR ")));
    }
    Some(all.join(" AND "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::types::ColumnType;

    #[test]
    fn groups_are_ored() {
        let columns = vec![
            FilterColumn::new("status"),
            FilterColumn::new("name").op("like%").group("q"),
            FilterColumn::new("email").op("like%").group("q").search(["name"]),
        ];
        let values = record! { "status" => "ok", "name" => "jo" };
        let sql = sql_filter(&columns, &values, &mut Vec::new(), Dialect::Sqlite);
        assert_eq!(sql, "status = 'ok' AND (name LIKE 'jo%' OR email LIKE 'jo%')");
    }

    #[test]
    fn required_missing_voids_everything() {
        let columns = vec![
            FilterColumn::new("status"),
            FilterColumn::new("owner").required(),
        ];
        let values = record! { "status" => "ok" };
        assert_eq!(sql_filter(&columns, &values, &mut Vec::new(), Dialect::Postgres), "");
        assert!(try_sql_filter(&columns, &values, &mut Vec::new(), Dialect::Postgres).is_none());
    }

    #[test]
    fn defaults_alias_and_coalesce() {
        let columns = vec![
            FilterColumn::new("kind").default_value("a").alias("t").col("type"),
            FilterColumn::new("n")
                .with_type(ColumnType::Int)
                .op("gt")
                .coalesce(0_i64),
        ];
        let values = record! { "n" => "3" };
        let sql = sql_filter(&columns, &values, &mut Vec::new(), Dialect::Sqlite);
        assert_eq!(sql, "t.type = 'a' AND COALESCE(n,0) > 3");
    }

    #[test]
    fn bind_pushes_params() {
        let columns = vec![FilterColumn::new("q").op("bind").expr("tsv @@ plainto_tsquery($#)")];
        let mut params = vec![RowValues::Int(1)];
        let values = record! { "q" => "cats" };
        let sql = sql_filter(&columns, &values, &mut params, Dialect::Postgres);
        assert_eq!(sql, "tsv @@ plainto_tsquery($2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn isnull_and_skip() {
        let columns = vec![
            FilterColumn::new("deleted").isnull(),
            FilterColumn::new("tag").skip("^all$"),
            FilterColumn::new("x").op("skip"),
        ];
        let values = record! { "deleted" => "notnull", "tag" => "all", "x" => "1" };
        let sql = sql_filter(&columns, &values, &mut Vec::new(), Dialect::Sqlite);
        assert_eq!(sql, "deleted IS NOT NULL");
    }
}
