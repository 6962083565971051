use std::future::Future;

use futures_util::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info};

use super::{Engine, process};
use crate::error::PolyDbError;
use crate::request::{Payload, RequestOptions};
use crate::results::QueryResult;
use crate::schema::TableDef;
use crate::types::{Op, Record};

/// Rows fetched per page by `scan` when the options set no `count`.
const SCAN_PAGE: usize = 100;

fn keep_declared(row: Record, def: &TableDef) -> Record {
    row.into_iter()
        .filter(|(name, _)| def.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)))
        .collect()
}

/// One write or read of a [`Engine::batch`].
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub op: Op,
    pub table: String,
    pub obj: Record,
    /// Merged over the batch options.
    pub opts: Option<RequestOptions>,
}

impl BatchItem {
    #[must_use]
    pub fn new(op: Op, table: impl Into<String>, obj: Record) -> Self {
        Self {
            op,
            table: table.into(),
            obj,
            opts: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, opts: RequestOptions) -> Self {
        self.opts = Some(opts);
        self
    }
}

impl Engine {
    /// Run record operations with at most `concurrency` in flight. Results keep the order of
    /// `items`; the first error stops scheduling and is returned.
    ///
    /// # Errors
    /// `InvalidRequest` for operations that take no record (`list`, `create`, `upgrade`),
    /// otherwise the first failing item's error.
    pub async fn batch(&self, items: &[BatchItem], opts: &RequestOptions) -> Result<Vec<QueryResult>, PolyDbError> {
        if let Some(item) = items
            .iter()
            .find(|item| matches!(item.op, Op::List | Op::Create | Op::Upgrade))
        {
            return Err(PolyDbError::InvalidRequest(format!(
                "{} cannot be batched",
                item.op
            )));
        }
        stream::iter(items)
            .map(|item| async move {
                let merged = item.opts.as_ref().map_or_else(|| opts.clone(), |own| opts.merge(own));
                self.run(item.op, &item.table, Payload::Record(&item.obj), &merged).await
            })
            .buffered(opts.concurrency_limit())
            .try_collect()
            .await
    }

    /// Page through every record matching `query` and call `f` on each, with at most
    /// `concurrency` calls in flight. Returns the number of rows visited.
    ///
    /// # Errors
    /// The first select error or error returned by `f`.
    pub async fn scan<F, Fut>(&self, table: &str, query: &Record, opts: &RequestOptions, f: F) -> Result<usize, PolyDbError>
    where
        F: Fn(Record) -> Fut,
        Fut: Future<Output = Result<(), PolyDbError>>,
    {
        let mut page = RequestOptions {
            count: Some(opts.count.filter(|c| *c > 0).unwrap_or(SCAN_PAGE)),
            ..opts.clone()
        };
        let mut total = 0;
        loop {
            let result = self.select(table, query, &page).await?;
            total += result.rows.len();
            let next = result.info.next_token;
            stream::iter(result.rows.into_iter().map(Ok))
                .try_for_each_concurrent(opts.concurrency_limit(), |row| f(row))
                .await?;
            match next {
                Some(token) => page.start = Some(token),
                None => break,
            }
        }
        debug!("scan: {table}: {total} rows");
        Ok(total)
    }

    /// Primary keys of every record matching `query`, read before any of them is changed.
    async fn matching_keys(&self, table: &str, query: &Record, opts: &RequestOptions) -> Result<Vec<Record>, PolyDbError> {
        let keys = self.schema(table, opts)?.keys(table).to_vec();
        if keys.is_empty() {
            return Err(PolyDbError::InvalidRequest(format!("{table} has no primary key")));
        }
        let select = RequestOptions {
            select: Some(keys.clone()),
            concurrency: Some(1),
            ..opts.clone()
        };
        let found = std::sync::Mutex::new(Vec::new());
        self.scan(table, query, &select, |row| {
            let key: Record = keys
                .iter()
                .filter_map(|k| row.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
            if let Ok(mut found) = found.lock() {
                found.push(key);
            }
            async { Ok::<(), PolyDbError>(()) }
        })
        .await?;
        Ok(found.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    /// Apply `updates` to every record matching `query`. Returns the affected row count.
    ///
    /// # Errors
    /// `InvalidRequest` for tables without a primary key, or the first failing update.
    pub async fn update_all(
        &self,
        table: &str,
        query: &Record,
        updates: &Record,
        opts: &RequestOptions,
    ) -> Result<u64, PolyDbError> {
        let keys = self.matching_keys(table, query, opts).await?;
        let write = RequestOptions {
            keys: None,
            start: None,
            ..opts.clone()
        };
        let results: Vec<QueryResult> = stream::iter(keys)
            .map(|mut obj| {
                let write = &write;
                obj.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
                async move { self.update(table, &obj, write).await }
            })
            .buffered(opts.concurrency_limit())
            .try_collect()
            .await?;
        Ok(results.iter().map(|r| r.info.affected_rows).sum())
    }

    /// Delete every record matching `query`. Returns the affected row count.
    ///
    /// # Errors
    /// `InvalidRequest` for tables without a primary key, or the first failing delete.
    pub async fn del_all(&self, table: &str, query: &Record, opts: &RequestOptions) -> Result<u64, PolyDbError> {
        let keys = self.matching_keys(table, query, opts).await?;
        let write = RequestOptions {
            keys: None,
            start: None,
            ..opts.clone()
        };
        let results: Vec<QueryResult> = stream::iter(keys)
            .map(|obj| {
                let write = &write;
                async move { self.del(table, &obj, write).await }
            })
            .buffered(opts.concurrency_limit())
            .try_collect()
            .await?;
        Ok(results.iter().map(|r| r.info.affected_rows).sum())
    }

    /// Page through `from` and add every row to `to`, keeping only the columns `def` declares.
    /// Rows are read raw: row hooks and result filters never see them, so none can be lost.
    async fn copy_rows(&self, from: &str, to: &str, def: &TableDef, opts: &RequestOptions) -> Result<usize, PolyDbError> {
        let pool = self.pool(opts.pool.as_deref(), from);
        let mut page = RequestOptions {
            count: Some(opts.count.filter(|c| *c > 0).unwrap_or(SCAN_PAGE)),
            start: None,
            all_columns: Some(true),
            filter: None,
            async_filter: None,
            ..opts.clone()
        };
        let mut total = 0;
        loop {
            let Some(req) = self.prepare(Op::Select, from, Payload::Record(&Record::new()), &page)? else {
                break;
            };
            let result = pool.query(&req).await?;
            let schema = pool.schema()?;
            let rows = process::process_rows(result.rows, from, &page, &schema, &[]).await?;
            total += rows.len();
            stream::iter(rows.into_iter().map(|row| Ok(keep_declared(row, def))))
                .try_for_each_concurrent(opts.concurrency_limit(), |row| async move {
                    self.add(to, &row, opts).await.map(|_| ())
                })
                .await?;
            match result.info.next_token {
                Some(token) => page.start = Some(token),
                None => break,
            }
        }
        Ok(total)
    }

    /// Rebuild a table with a new definition: copy its rows into `<table>_tmp`, drop and
    /// re-create the table, copy the rows back and drop the temporary table. The new
    /// definition becomes the declared one. Returns the number of rows migrated.
    ///
    /// # Errors
    /// The first failing step; the temporary table is left in place when copying back fails.
    pub async fn migrate(&self, table: &str, def: &TableDef, opts: &RequestOptions) -> Result<usize, PolyDbError> {
        let pool = self.pool(opts.pool.as_deref(), table).name().to_string();
        let tmp = format!("{table}_tmp");
        let on_pool = RequestOptions {
            pool: Some(pool.clone()),
            all_columns: Some(true),
            start: None,
            ..opts.clone()
        };

        self.create(&tmp, def, &on_pool).await?;
        self.cache_columns(&pool).await?;
        let copied = self.copy_rows(table, &tmp, def, &on_pool).await?;

        self.drop(table, &on_pool).await?;
        self.declare_table(table, def.clone());
        self.create(table, def, &on_pool).await?;
        self.cache_columns(&pool).await?;
        let restored = self.copy_rows(&tmp, table, def, &on_pool).await?;

        self.drop(&tmp, &on_pool).await?;
        self.cache_columns(&pool).await?;
        info!("migrate: {pool}: {table}: {copied} rows copied, {restored} restored");
        Ok(restored)
    }
}
