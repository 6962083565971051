use std::cmp::Ordering;

use tracing::debug;

use super::Engine;
use crate::cache::{cache_key, decode_record, encode_record};
use crate::error::PolyDbError;
use crate::pool::Stat;
use crate::request::{CheckData, RequestOptions};
use crate::results::QueryResult;
use crate::types::{Record, RowValues};

/// Milliseconds since the epoch for a modification-time value.
#[allow(clippy::cast_precision_loss)]
fn mtime_of(value: &RowValues) -> Option<f64> {
    match value {
        RowValues::Int(ms) => Some(*ms as f64),
        RowValues::Float(ms) => Some(*ms),
        RowValues::Text(s) if s.trim().parse::<f64>().is_ok() => s.trim().parse::<f64>().ok(),
        _ => value
            .as_timestamp()
            .map(|ts| ts.and_utc().timestamp_millis() as f64),
    }
}

fn same_value(left: Option<&RowValues>, right: Option<&RowValues>) -> bool {
    let text = |v: Option<&RowValues>| v.filter(|v| !v.is_null()).map(RowValues::to_text);
    text(left) == text(right)
}

impl Engine {
    /// Update the record when it exists, add it otherwise.
    ///
    /// `check_mtime` names a column: an existing record at least as new is left alone.
    /// `check_data` compares the listed columns (or every supplied non-key column) and skips
    /// the write when nothing differs. `add_only` never updates, `put_only` never adds.
    /// Skipped writes are empty successes.
    ///
    /// # Errors
    /// Pool, compile or backend errors of the lookup or the write.
    pub async fn replace(&self, table: &str, obj: &Record, opts: &RequestOptions) -> Result<QueryResult, PolyDbError> {
        let schema = self.schema(table, opts)?;
        let keys = opts
            .keys
            .clone()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| schema.keys(table).to_vec());

        let mtime = opts
            .check_mtime
            .as_ref()
            .filter(|col| obj.get(*col).is_some_and(|v| !v.is_empty()));
        let compare: Vec<String> = match (&mtime, &opts.check_data) {
            (Some(col), _) => vec![(*col).clone()],
            (None, Some(check)) => {
                let candidates: Vec<&String> = match check {
                    CheckData::All => obj.keys().collect(),
                    CheckData::Columns(list) => list.iter().collect(),
                };
                candidates
                    .into_iter()
                    .filter(|name| !name.starts_with('_') && *name != "mtime" && !keys.contains(name))
                    .filter(|name| schema.column(table, name).is_some_and(|c| !c.fake))
                    .cloned()
                    .collect()
            }
            (None, None) => Vec::new(),
        };

        let mut select = keys.clone();
        select.extend(compare.iter().cloned());
        let lookup = RequestOptions {
            keys: Some(keys.clone()),
            select: Some(select),
            filter: None,
            async_filter: None,
            ..opts.clone()
        };
        let existing = self.get(table, obj, &lookup).await?;

        let Some(row) = existing.first() else {
            if opts.put_only == Some(true) {
                debug!("replace: {table}: missing, put_only");
                return Ok(QueryResult::default());
            }
            return self.add(table, obj, opts).await;
        };
        if opts.add_only == Some(true) {
            return Ok(QueryResult::default());
        }
        if let Some(col) = mtime {
            let stored = row.get(col).and_then(mtime_of);
            let given = obj.get(col).and_then(mtime_of);
            if let (Some(stored), Some(given)) = (stored, given) {
                if stored.partial_cmp(&given) != Some(Ordering::Less) {
                    debug!("replace: {table}: not modified");
                    return Ok(QueryResult::default());
                }
            }
        } else if opts.check_data.is_some()
            && compare.iter().all(|name| same_value(row.get(name), obj.get(name)))
        {
            debug!("replace: {table}: unchanged");
            return Ok(QueryResult::default());
        }
        let update = RequestOptions {
            keys: Some(keys),
            ..opts.clone()
        };
        self.update(table, obj, &update).await
    }

    /// Read one record through the cache: a hit returns the cached copy, a miss reads the
    /// database and stores the row. Without a cache this is `get`.
    ///
    /// The key is `"<prefix or table>|<key values>"`; `ttl` comes from the options or the
    /// engine configuration.
    ///
    /// # Errors
    /// Cache, pool or backend errors.
    pub async fn get_cached(&self, table: &str, obj: &Record, opts: &RequestOptions) -> Result<Option<Record>, PolyDbError> {
        let pool = self.pool(opts.pool.as_deref(), table);
        pool.incr(Stat::Get);
        let schema = pool.schema()?;
        let keys = opts
            .keys
            .clone()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| schema.keys(table).to_vec());
        let key = cache_key(opts.prefix.as_deref().unwrap_or(table), &keys, obj);
        let (Some(cache), Some(key)) = (self.cache.as_ref(), key) else {
            return Ok(self.get(table, obj, opts).await?.into_first());
        };

        if let Some(text) = cache.get(&key).await? {
            pool.incr(Stat::Hit);
            return decode_record(&text).map(Some);
        }
        pool.incr(Stat::Miss);
        let Some(row) = self.get(table, obj, opts).await?.into_first() else {
            return Ok(None);
        };
        pool.incr(Stat::Put);
        cache.put(&key, encode_record(&row)?, opts.ttl.or(self.ttl)).await?;
        Ok(Some(row))
    }
}
