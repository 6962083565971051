//! Placeholder rewriting for generated SQL.
//!
//! The statement builders always number parameters Postgres-style (`$1`, `$2`, ...) in the
//! order they are pushed. Each pool rewrites them to its own dialect right before the
//! request leaves `prepare`, skipping quoted literals, comments and dollar-quoted blocks.

use std::borrow::Cow;

mod scanner;

use scanner::{State, closes_dollar_quote, dollar_quote_at, scan_digits, starts_with_at};

/// Target placeholder style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1` (PostgreSQL); input is returned unchanged.
    Postgres,
    /// `?1` (SQLite numbered parameters).
    Sqlite,
    /// Bare `?` (MySQL, CQL). Parameters must be numbered in binding order.
    Positional,
}

/// Rewrite `$N` placeholders for the target style.
///
/// Returns a borrowed `Cow` when no changes are needed:
/// ```rust
/// use polydb::translation::{PlaceholderStyle, translate_placeholders};
///
/// let sql = translate_placeholders("SELECT * FROM t WHERE a = $1", PlaceholderStyle::Sqlite);
/// assert_eq!(sql, "SELECT * FROM t WHERE a = ?1");
/// ```
#[must_use]
pub fn translate_placeholders(sql: &str, target: PlaceholderStyle) -> Cow<'_, str> {
    if target == PlaceholderStyle::Postgres || !sql.contains('$') {
        return Cow::Borrowed(sql);
    }

    let bytes = sql.as_bytes();
    let mut out: Option<String> = None;
    let mut state = State::Normal;
    // Start of the slice not yet copied into `out`.
    let mut copied = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'-' if starts_with_at(bytes, idx, b"--") => state = State::LineComment,
                b'/' if starts_with_at(bytes, idx, b"/*") => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'$' => {
                    if let Some((digits_end, digits)) = scan_digits(bytes, idx + 1) {
                        let buf = out.get_or_insert_with(|| String::with_capacity(sql.len()));
                        buf.push_str(&sql[copied..idx]);
                        buf.push('?');
                        if target == PlaceholderStyle::Sqlite {
                            buf.push_str(digits);
                        }
                        copied = digits_end;
                        idx = digits_end;
                        continue;
                    } else if let Some((tag, close)) = dollar_quote_at(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = close;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if starts_with_at(bytes, idx, b"/*") {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if starts_with_at(bytes, idx, b"*/") {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if let Some(end) = closes_dollar_quote(bytes, idx, tag) {
                    state = State::Normal;
                    idx = end;
                }
            }
        }
        idx += 1;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_for_sqlite() {
        let res = translate_placeholders("insert into t values($1, $2)", PlaceholderStyle::Sqlite);
        assert_eq!(res, "insert into t values(?1, ?2)");
    }

    #[test]
    fn bare_for_positional_dialects() {
        let res = translate_placeholders(
            "UPDATE t SET a = $1 WHERE id = $2",
            PlaceholderStyle::Positional,
        );
        assert_eq!(res, "UPDATE t SET a = ? WHERE id = ?");
    }

    #[test]
    fn literals_and_comments_untouched() {
        let sql = "select '$1', $1 -- $2\n/* $3 */ from t where a = $2";
        let res = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(res, "select '$1', ?1 -- $2\n/* $3 */ from t where a = ?2");
    }

    #[test]
    fn dollar_quoted_blocks_untouched() {
        let sql = "$foo$ select $1 from t $foo$ where a = $1";
        let res = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(res, "$foo$ select $1 from t $foo$ where a = ?1");
    }

    #[test]
    fn postgres_and_plain_sql_borrowed() {
        let sql = "select * from t where a = $1";
        assert!(matches!(
            translate_placeholders(sql, PlaceholderStyle::Postgres),
            Cow::Borrowed(_)
        ));
        assert!(matches!(
            translate_placeholders("select 1", PlaceholderStyle::Sqlite),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn multibyte_text_survives() {
        let sql = "select 'héllo' as x, $1";
        assert_eq!(
            translate_placeholders(sql, PlaceholderStyle::Positional),
            "select 'héllo' as x, ?"
        );
    }
}
