use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::error::PolyDbError;
use crate::results::NextToken;
use crate::types::{ColumnType, Record, RowValues};

/// Synchronous result filter: keep the row when it returns `true`.
#[derive(Clone)]
pub struct RowFilter(Arc<dyn Fn(&Record) -> bool + Send + Sync>);

impl RowFilter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    #[must_use]
    pub fn keep(&self, row: &Record) -> bool {
        (self.0)(row)
    }
}

impl fmt::Debug for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RowFilter(..)")
    }
}

type AsyncFilterFn =
    dyn Fn(Record) -> BoxFuture<'static, Result<Option<Record>, PolyDbError>> + Send + Sync;

/// Asynchronous result filter: resolves to the (possibly rewritten) row, or `None` to drop it.
#[derive(Clone)]
pub struct AsyncRowFilter(Arc<AsyncFilterFn>);

impl AsyncRowFilter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Record) -> BoxFuture<'static, Result<Option<Record>, PolyDbError>>
            + Send
            + Sync
            + 'static,
    {
        Self(Arc::new(f))
    }

    /// # Errors
    /// Propagates the filter's own error.
    pub async fn apply(&self, row: Record) -> Result<Option<Record>, PolyDbError> {
        (self.0)(row).await
    }
}

impl fmt::Debug for AsyncRowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncRowFilter(..)")
    }
}

/// Which columns `replace` compares before deciding to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckData {
    /// Every non-key column supplied in the record.
    All,
    Columns(Vec<String>),
}

/// One entry of a declarative filter compiled by `sql_filter`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterColumn {
    /// Key in the values record.
    pub name: String,
    /// Column name in SQL when it differs from `name`.
    pub col: Option<String>,
    /// Table alias prefixed to the column.
    pub alias: Option<String>,
    pub op: Option<String>,
    pub ty: ColumnType,
    /// Default value used when the values record has none.
    pub value: Option<RowValues>,
    /// Alternative keys in the values record checked in order.
    pub search: Vec<String>,
    /// Conditions sharing a group are OR'ed; groups are AND'ed.
    pub group: Option<String>,
    /// Missing value voids the whole filter.
    pub required: bool,
    /// Condition emitted even without a value (e.g. `expr` with no placeholders).
    pub always: bool,
    /// Empty string counts as a value.
    pub empty: bool,
    /// Wrap the column in `COALESCE(col, value)`.
    pub coalesce: Option<RowValues>,
    /// Accept literal `null`/`notnull` values as IS NULL / IS NOT NULL.
    pub isnull: bool,
    /// Template for the `expr` and `bind` operators; `$#` is replaced by a placeholder.
    pub expr: Option<String>,
    /// Skip values matching this regular expression.
    pub skip: Option<String>,
}

impl FilterColumn {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, ty: ColumnType) -> Self {
        self.ty = ty;
        self
    }

    #[must_use]
    pub fn col(mut self, col: impl Into<String>) -> Self {
        self.col = Some(col.into());
        self
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn always(mut self) -> Self {
        self.always = true;
        self
    }

    #[must_use]
    pub fn empty(mut self) -> Self {
        self.empty = true;
        self
    }

    #[must_use]
    pub fn isnull(mut self) -> Self {
        self.isnull = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<RowValues>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn coalesce(mut self, value: impl Into<RowValues>) -> Self {
        self.coalesce = Some(value.into());
        self
    }

    #[must_use]
    pub fn search<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn expr(mut self, expr: impl Into<String>) -> Self {
        self.expr = Some(expr.into());
        self
    }

    #[must_use]
    pub fn skip(mut self, pattern: impl Into<String>) -> Self {
        self.skip = Some(pattern.into());
        self
    }
}

/// Per-call options. Values are immutable once built; pool defaults are combined with call
/// overrides through [`RequestOptions::merge`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub pool: Option<String>,
    /// Columns used for the WHERE clause instead of the primary key.
    pub keys: Option<Vec<String>>,
    /// Columns to return.
    pub select: Option<Vec<String>>,
    /// Per-column operator.
    pub ops: BTreeMap<String, String>,
    /// Operator aliases, e.g. `contains` → `like%`.
    pub ops_map: BTreeMap<String, String>,
    /// Logical to native type names used by `create`/`upgrade`.
    pub types_map: BTreeMap<String, String>,
    /// Per-column value types overriding the cached schema.
    pub types: BTreeMap<String, ColumnType>,
    pub sort: Option<String>,
    pub sort1: Option<String>,
    pub sort2: Option<String>,
    pub desc: Option<bool>,
    pub desc1: Option<bool>,
    pub desc2: Option<bool>,
    pub start: Option<NextToken>,
    pub count: Option<usize>,
    pub page: Option<usize>,
    pub skip_columns: Vec<String>,
    pub all_columns: Option<bool>,
    pub mtime: Option<String>,
    pub check_mtime: Option<String>,
    pub check_data: Option<CheckData>,
    pub concurrency: Option<usize>,
    pub cached: Option<bool>,
    pub returning: Option<String>,
    pub filters: Vec<FilterColumn>,
    pub strict_types: Option<bool>,
    pub add_only: Option<bool>,
    pub put_only: Option<bool>,
    pub prefix: Option<String>,
    pub consistent: Option<bool>,
    pub total: Option<bool>,
    pub ttl: Option<Duration>,
    pub filter: Option<RowFilter>,
    pub async_filter: Option<AsyncRowFilter>,
}

macro_rules! setters {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            #[must_use]
            pub fn $name(mut self, value: impl Into<$ty>) -> Self {
                self.$name = Some(value.into());
                self
            }
        )*
    };
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    setters! {
        pool: String,
        sort: String,
        sort1: String,
        sort2: String,
        desc: bool,
        desc1: bool,
        desc2: bool,
        start: NextToken,
        count: usize,
        page: usize,
        all_columns: bool,
        mtime: String,
        check_mtime: String,
        check_data: CheckData,
        concurrency: usize,
        cached: bool,
        returning: String,
        strict_types: bool,
        add_only: bool,
        put_only: bool,
        prefix: String,
        consistent: bool,
        total: bool,
        ttl: Duration,
    }

    #[must_use]
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn op(mut self, column: impl Into<String>, op: impl Into<String>) -> Self {
        self.ops.insert(column.into(), op.into());
        self
    }

    #[must_use]
    pub fn op_alias(mut self, alias: impl Into<String>, op: impl Into<String>) -> Self {
        self.ops_map.insert(alias.into(), op.into());
        self
    }

    #[must_use]
    pub fn type_map(mut self, logical: impl Into<String>, native: impl Into<String>) -> Self {
        self.types_map.insert(logical.into(), native.into());
        self
    }

    #[must_use]
    pub fn column_type(mut self, column: impl Into<String>, ty: ColumnType) -> Self {
        self.types.insert(column.into(), ty);
        self
    }

    #[must_use]
    pub fn skip_column(mut self, column: impl Into<String>) -> Self {
        self.skip_columns.push(column.into());
        self
    }

    #[must_use]
    pub fn filter_column(mut self, filter: FilterColumn) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(RowFilter::new(f));
        self
    }

    #[must_use]
    pub fn async_filter(mut self, f: AsyncRowFilter) -> Self {
        self.async_filter = Some(f);
        self
    }

    /// `self` supplies defaults; any field set in `overrides` wins. Maps are unioned with
    /// override entries replacing defaults; lists are replaced when the override is non-empty.
    #[must_use]
    pub fn merge(&self, overrides: &RequestOptions) -> RequestOptions {
        fn pick<T: Clone>(base: &Option<T>, over: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }
        fn union<V: Clone>(
            base: &BTreeMap<String, V>,
            over: &BTreeMap<String, V>,
        ) -> BTreeMap<String, V> {
            let mut out = base.clone();
            out.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
            out
        }
        fn list<T: Clone>(base: &[T], over: &[T]) -> Vec<T> {
            if over.is_empty() {
                base.to_vec()
            } else {
                over.to_vec()
            }
        }

        RequestOptions {
            pool: pick(&self.pool, &overrides.pool),
            keys: pick(&self.keys, &overrides.keys),
            select: pick(&self.select, &overrides.select),
            ops: union(&self.ops, &overrides.ops),
            ops_map: union(&self.ops_map, &overrides.ops_map),
            types_map: union(&self.types_map, &overrides.types_map),
            types: union(&self.types, &overrides.types),
            sort: pick(&self.sort, &overrides.sort),
            sort1: pick(&self.sort1, &overrides.sort1),
            sort2: pick(&self.sort2, &overrides.sort2),
            desc: pick(&self.desc, &overrides.desc),
            desc1: pick(&self.desc1, &overrides.desc1),
            desc2: pick(&self.desc2, &overrides.desc2),
            start: pick(&self.start, &overrides.start),
            count: pick(&self.count, &overrides.count),
            page: pick(&self.page, &overrides.page),
            skip_columns: list(&self.skip_columns, &overrides.skip_columns),
            all_columns: pick(&self.all_columns, &overrides.all_columns),
            mtime: pick(&self.mtime, &overrides.mtime),
            check_mtime: pick(&self.check_mtime, &overrides.check_mtime),
            check_data: pick(&self.check_data, &overrides.check_data),
            concurrency: pick(&self.concurrency, &overrides.concurrency),
            cached: pick(&self.cached, &overrides.cached),
            returning: pick(&self.returning, &overrides.returning),
            filters: list(&self.filters, &overrides.filters),
            strict_types: pick(&self.strict_types, &overrides.strict_types),
            add_only: pick(&self.add_only, &overrides.add_only),
            put_only: pick(&self.put_only, &overrides.put_only),
            prefix: pick(&self.prefix, &overrides.prefix),
            consistent: pick(&self.consistent, &overrides.consistent),
            total: pick(&self.total, &overrides.total),
            ttl: pick(&self.ttl, &overrides.ttl),
            filter: pick(&self.filter, &overrides.filter),
            async_filter: pick(&self.async_filter, &overrides.async_filter),
        }
    }

    /// Sort keys with their direction, in priority order.
    #[must_use]
    pub fn sort_keys(&self) -> Vec<(&str, bool)> {
        [
            (&self.sort, self.desc),
            (&self.sort1, self.desc1),
            (&self.sort2, self.desc2),
        ]
        .into_iter()
        .filter_map(|(name, desc)| {
            name.as_deref()
                .filter(|n| !n.is_empty())
                .map(|n| (n, desc.unwrap_or(false)))
        })
        .collect()
    }

    /// Operator for a column after alias resolution.
    #[must_use]
    pub fn op_for(&self, column: &str) -> Option<String> {
        self.ops.get(column).map(|op| {
            self.ops_map
                .get(op)
                .cloned()
                .unwrap_or_else(|| op.clone())
        })
    }

    /// Row offset implied by `start` or `page`.
    #[must_use]
    pub fn offset(&self) -> usize {
        match (&self.start, self.page, self.count) {
            (Some(NextToken::Offset(n)), _, _) => *n,
            (_, Some(page), Some(count)) if page > 1 => (page - 1) * count,
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_all_columns(&self) -> bool {
        self.all_columns.unwrap_or(false)
    }

    #[must_use]
    pub fn is_strict_types(&self) -> bool {
        self.strict_types.unwrap_or(false)
    }

    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency.unwrap_or(1).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_and_maps_union() {
        let defaults = RequestOptions::new()
            .count(50_usize)
            .op("name", "like%")
            .op("id", "in");
        let call = RequestOptions::new().count(2_usize).op("id", "=");
        let merged = defaults.merge(&call);
        assert_eq!(merged.count, Some(2));
        assert_eq!(merged.ops.get("name").map(String::as_str), Some("like%"));
        assert_eq!(merged.ops.get("id").map(String::as_str), Some("="));
        // the inputs are left untouched
        assert_eq!(defaults.count, Some(50));
    }

    #[test]
    fn page_and_start_offsets() {
        let opts = RequestOptions::new().count(10_usize).page(3_usize);
        assert_eq!(opts.offset(), 20);
        let opts = opts.start(NextToken::Offset(4));
        assert_eq!(opts.offset(), 4);
    }

    #[test]
    fn aliases_resolve() {
        let opts = RequestOptions::new()
            .op("name", "contains")
            .op_alias("contains", "like%");
        assert_eq!(opts.op_for("name").as_deref(), Some("like%"));
    }
}
