use super::dialect::Dialect;
use super::value::{sql_quote, sql_value, sql_value_in};
use crate::request::split_list;
use crate::types::{ColumnType, RowValues};

static TEXT: ColumnType = ColumnType::Text;

/// How to compile one condition.
#[derive(Debug, Clone, Copy)]
pub struct ExprOptions<'a> {
    pub op: Option<&'a str>,
    pub ty: &'a ColumnType,
    pub dialect: Dialect,
    /// Template for the `expr` operator: `%s` is the value, `%1`/`%2` the list items.
    pub expr: Option<&'a str>,
    /// Text search configuration for `@@`.
    pub language: &'a str,
}

impl<'a> ExprOptions<'a> {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            op: None,
            ty: &TEXT,
            dialect,
            expr: None,
            language: "english",
        }
    }

    #[must_use]
    pub fn op(mut self, op: &'a str) -> Self {
        self.op = Some(op);
        self
    }

    #[must_use]
    pub fn ty(mut self, ty: &'a ColumnType) -> Self {
        self.ty = ty;
        self
    }

    #[must_use]
    pub fn expr(mut self, expr: &'a str) -> Self {
        self.expr = Some(expr);
        self
    }
}

/// Canonical operator name: lowercase, aliases resolved.
#[must_use]
pub fn normalize_op(op: &str) -> String {
    let op = op.trim().to_ascii_lowercase();
    match op.as_str() {
        "" | "eq" | "==" => "=".to_string(),
        "ne" | "!=" => "<>".to_string(),
        "lt" => "<".to_string(),
        "le" => "<=".to_string(),
        "gt" => ">".to_string(),
        "ge" => ">=".to_string(),
        "isnull" => "null".to_string(),
        "notnull" | "is not null" => "not null".to_string(),
        "is null" => "null".to_string(),
        _ => op,
    }
}

fn to_list(value: &RowValues, ty: &ColumnType) -> Vec<RowValues> {
    match value {
        RowValues::List(items) => items.clone(),
        RowValues::JSON(serde_json::Value::Array(items)) => {
            items.iter().map(RowValues::from_json).collect()
        }
        RowValues::Text(_) => match split_list(value, ty) {
            RowValues::List(items) => items,
            other => vec![other],
        },
        other => vec![other.clone()],
    }
}

fn scalar(value: &RowValues) -> &RowValues {
    match value {
        RowValues::List(items) => items.first().unwrap_or(&RowValues::Null),
        other => other,
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let mut next = u32::from(last) + 1;
        // skip the surrogate gap
        if (0xD800..=0xDFFF).contains(&next) {
            next = 0xE000;
        }
        if let Some(c) = char::from_u32(next) {
            chars.push(c);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

fn begins_with(name: &str, prefix: &str, dialect: Dialect) -> String {
    if prefix.is_empty() {
        return String::new();
    }
    if dialect.has_like() && !prefix.contains(['%', '_']) {
        return format!("{name} LIKE {}", sql_quote(&format!("{prefix}%"), dialect));
    }
    let lower = format!("{name} >= {}", sql_quote(prefix, dialect));
    match prefix_upper_bound(prefix) {
        Some(upper) => format!("{lower} AND {name} < {}", sql_quote(&upper, dialect)),
        None => lower,
    }
}

fn full_text(name: &str, value: &RowValues, opts: &ExprOptions) -> String {
    let terms: Vec<String> = to_list(value, &TEXT)
        .iter()
        .map(RowValues::to_text)
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return String::new();
    }
    let dialect = opts.dialect;
    if dialect == Dialect::Postgres {
        let lang = sql_quote(opts.language, dialect);
        let queries: Vec<String> = terms
            .iter()
            .map(|t| format!("plainto_tsquery({lang},{})", sql_quote(t, dialect)))
            .collect();
        if queries.len() == 1 {
            format!("{name} @@ {}", queries[0])
        } else {
            format!("{name} @@ ({})", queries.join(" || "))
        }
    } else {
        let likes: Vec<String> = terms
            .iter()
            .map(|t| format!("{name} LIKE {}", sql_quote(&format!("%{t}%"), dialect)))
            .collect();
        if likes.len() == 1 {
            likes.into_iter().collect()
        } else {
            format!("({})", likes.join(" OR "))
        }
    }
}

/// Compile a single `name <op> value` condition with the value inlined as a literal.
///
/// Returns an empty string when there is nothing to compare (empty name, empty prefix,
/// missing `expr` template). An `in` over an empty list matches nothing.
#[must_use]
pub fn sql_expr(name: &str, value: &RowValues, opts: &ExprOptions) -> String {
    if name.is_empty() {
        return String::new();
    }
    let dialect = opts.dialect;
    let ty = opts.ty;
    let mut op = normalize_op(opts.op.unwrap_or("="));
    if op == "=" && matches!(value, RowValues::List(_)) {
        op = "in".to_string();
    }
    let literal = |v: &RowValues| sql_value(v, ty, dialect);

    match op.as_str() {
        "in" | "not in" => {
            let list = to_list(value, ty);
            if list.is_empty() {
                return if op == "in" { "1=0".to_string() } else { String::new() };
            }
            format!("{name} {} ({})", op.to_uppercase(), sql_value_in(&list, ty, dialect))
        }
        "between" | "not between" => {
            let list = to_list(value, ty);
            if list.len() < 2 {
                return format!("{name} = {}", literal(scalar(value)));
            }
            if dialect == Dialect::Cql {
                return if op == "between" {
                    format!("{name} >= {} AND {name} <= {}", literal(&list[0]), literal(&list[1]))
                } else {
                    format!("({name} < {} OR {name} > {})", literal(&list[0]), literal(&list[1]))
                };
            }
            format!(
                "{name} {} {} AND {}",
                op.to_uppercase(),
                literal(&list[0]),
                literal(&list[1])
            )
        }
        "null" => format!("{name} IS NULL"),
        "not null" => format!("{name} IS NOT NULL"),
        "@@" => full_text(name, value, opts),
        "~* any" | "!~* any" => {
            let pattern = sql_quote(&scalar(value).to_text(), dialect);
            let op = if op.starts_with('!') { "!~*" } else { "~*" };
            format!("{pattern} {op} ANY({name})")
        }
        "begins_with" => begins_with(name, &scalar(value).to_text(), dialect),
        "like%" if !dialect.has_like() => begins_with(name, &scalar(value).to_text(), dialect),
        "like%" | "ilike%" | "not like%" | "not ilike%" => {
            let base = op.trim_end_matches('%');
            let pattern = RowValues::Text(format!("{}%", scalar(value).to_text()));
            format!("{name} {} {}", like_op(base, dialect), sql_value(&pattern, &TEXT, dialect))
        }
        "like" | "ilike" | "not like" | "not ilike" => {
            format!("{name} {} {}", like_op(&op, dialect), literal(scalar(value)))
        }
        "regexp" | "not regexp" => {
            let negate = op.starts_with("not");
            let op = match (dialect, negate) {
                (Dialect::Postgres, false) => "~",
                (Dialect::Postgres, true) => "!~",
                (_, false) => "REGEXP",
                (_, true) => "NOT REGEXP",
            };
            format!("{name} {op} {}", literal(scalar(value)))
        }
        "iregexp" | "not iregexp" => {
            let negate = op.starts_with("not");
            if dialect == Dialect::Postgres {
                let op = if negate { "!~*" } else { "~*" };
                format!("{name} {op} {}", literal(scalar(value)))
            } else {
                let op = if negate { "NOT REGEXP" } else { "REGEXP" };
                format!("LOWER({name}) {op} LOWER({})", literal(scalar(value)))
            }
        }
        "expr" => match opts.expr {
            Some(template) => {
                let list = to_list(value, ty);
                let item = |i: usize| list.get(i).map_or_else(|| "NULL".to_string(), &literal);
                template
                    .replace("%s", &literal(scalar(value)))
                    .replace("%1", &item(0))
                    .replace("%2", &item(1))
            }
            None => String::new(),
        },
        ">" | ">=" | "<" | "<=" | "<>" | "=" | "similar to" | "not similar to" | "~" | "~*"
        | "!~" | "!~*" => format!("{name} {} {}", op.to_uppercase(), literal(scalar(value))),
        _ => format!("{name} = {}", literal(scalar(value))),
    }
}

fn like_op(op: &str, dialect: Dialect) -> &'static str {
    match (op, dialect) {
        ("ilike", Dialect::Postgres) => "ILIKE",
        ("not ilike", Dialect::Postgres) => "NOT ILIKE",
        ("like" | "ilike", _) => "LIKE",
        _ => "NOT LIKE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(name: &str, value: RowValues, op: &str, dialect: Dialect) -> String {
        sql_expr(name, &value, &ExprOptions::new(dialect).op(op))
    }

    #[test]
    fn comparison_aliases() {
        assert_eq!(expr("a", 1_i64.into(), "ge", Dialect::Sqlite), "a >= '1'");
        let int = ColumnType::Int;
        let opts = ExprOptions::new(Dialect::Sqlite).op("lt").ty(&int);
        assert_eq!(sql_expr("a", &"5".into(), &opts), "a < 5");
        assert_eq!(expr("a", "x".into(), "ne", Dialect::Postgres), "a <> 'x'");
    }

    #[test]
    fn in_lists_split_by_type() {
        let int = ColumnType::Int;
        let opts = ExprOptions::new(Dialect::Postgres).op("in").ty(&int);
        assert_eq!(sql_expr("id", &"1,2,3".into(), &opts), "id IN (1,2,3)");
        assert_eq!(expr("s", "a|b".into(), "not in", Dialect::Sqlite), "s NOT IN ('a','b')");
        assert_eq!(expr("s", RowValues::List(vec![]), "in", Dialect::Sqlite), "1=0");
    }

    #[test]
    fn between_falls_back_to_equality() {
        assert_eq!(expr("d", "a|b".into(), "between", Dialect::Sqlite), "d BETWEEN 'a' AND 'b'");
        assert_eq!(expr("d", "a".into(), "between", Dialect::Sqlite), "d = 'a'");
        assert_eq!(
            expr("d", "a|b".into(), "between", Dialect::Cql),
            "d >= 'a' AND d <= 'b'"
        );
    }

    #[test]
    fn begins_with_native_or_range() {
        assert_eq!(expr("g", "9q8".into(), "begins_with", Dialect::Sqlite), "g LIKE '9q8%'");
        assert_eq!(
            expr("g", "9q8".into(), "begins_with", Dialect::Cql),
            "g >= '9q8' AND g < '9q9'"
        );
        assert_eq!(
            expr("g", "a_b".into(), "begins_with", Dialect::Postgres),
            "g >= 'a_b' AND g < 'a_c'"
        );
        assert_eq!(expr("g", "".into(), "begins_with", Dialect::Sqlite), "");
    }

    #[test]
    fn like_family() {
        assert_eq!(expr("n", "jo".into(), "like%", Dialect::Sqlite), "n LIKE 'jo%'");
        assert_eq!(expr("n", "jo".into(), "ilike%", Dialect::Postgres), "n ILIKE 'jo%'");
        assert_eq!(expr("n", "jo".into(), "not ilike%", Dialect::Mysql), "n NOT LIKE 'jo%'");
    }

    #[test]
    fn regexp_by_dialect() {
        assert_eq!(expr("n", "^a".into(), "regexp", Dialect::Postgres), "n ~ '^a'");
        assert_eq!(expr("n", "^a".into(), "regexp", Dialect::Sqlite), "n REGEXP '^a'");
        assert_eq!(
            expr("n", "^A".into(), "iregexp", Dialect::Mysql),
            "LOWER(n) REGEXP LOWER('^A')"
        );
    }

    #[test]
    fn full_text_and_any() {
        assert_eq!(
            expr("doc", "cats|dogs".into(), "@@", Dialect::Postgres),
            "doc @@ (plainto_tsquery('english','cats') || plainto_tsquery('english','dogs'))"
        );
        assert_eq!(expr("doc", "cat".into(), "@@", Dialect::Sqlite), "doc LIKE '%cat%'");
        assert_eq!(expr("tags", "^a".into(), "~* any", Dialect::Postgres), "'^a' ~* ANY(tags)");
    }

    #[test]
    fn expr_template() {
        let int = ColumnType::Int;
        let opts = ExprOptions::new(Dialect::Postgres)
            .op("expr")
            .ty(&int)
            .expr("(a > %1 AND b < %2)");
        assert_eq!(sql_expr("x", &"1,9".into(), &opts), "(a > 1 AND b < 9)");
    }

    #[test]
    fn hostile_strings_stay_quoted() {
        for op in ["=", "like%", "begins_with", "regexp", "<>", "in", "@@", "between"] {
            for dialect in [Dialect::Sqlite, Dialect::Postgres, Dialect::Mysql, Dialect::Cql] {
                let sql = expr("c", "x' OR '1'='1".into(), op, dialect);
                assert!(!sql.contains("x' OR"), "{op} {dialect:?}: {sql}");
            }
        }
    }

    #[test]
    fn null_ops() {
        assert_eq!(expr("c", RowValues::Null, "null", Dialect::Sqlite), "c IS NULL");
        assert_eq!(expr("c", RowValues::Null, "notnull", Dialect::Sqlite), "c IS NOT NULL");
    }
}
