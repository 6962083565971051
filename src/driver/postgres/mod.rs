//! `PostgreSQL` driver on `tokio-postgres`.

mod config;
mod introspect;
mod params;
mod query;

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

pub use config::{PostgresOptions, PostgresOptionsBuilder};
pub use params::Params;
pub use query::{build_result_set_from_rows, postgres_extract_value};

use super::{Driver, DriverOutput};
use crate::error::PolyDbError;
use crate::request::{BackendRequest, Payload, RequestOptions};
use crate::schema::{ColumnDef, SchemaSnapshot};
use crate::sql::{Dialect, SqlContext, bind_by_type, prepare_sql};
use crate::types::{BackendKind, ColumnType, Op, RowValues};

/// Driver for one `PostgreSQL` database.
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    options: PostgresOptions,
}

impl PostgresDriver {
    #[must_use]
    pub fn new(options: PostgresOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &PostgresOptions {
        &self.options
    }
}

fn is_array_column(column: Option<&ColumnDef>) -> bool {
    column.is_some_and(|c| {
        matches!(&c.ty, ColumnType::Other(name) if name.ends_with("[]"))
            || c.data_type.as_deref().is_some_and(|t| t.starts_with('_'))
    })
}

#[async_trait]
impl Driver for PostgresDriver {
    type Client = Client;

    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn connect(&self) -> Result<Self::Client, PolyDbError> {
        let (client, connection) = self.options.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres: connection closed: {e}");
            }
        });
        for sql in &self.options.init {
            client.batch_execute(sql).await?;
        }
        debug!("postgres: connected {:?}", self.options.config.get_dbname());
        Ok(client)
    }

    async fn ping(&self, client: &mut Self::Client) -> Result<(), PolyDbError> {
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn query(
        &self,
        client: &mut Self::Client,
        req: &BackendRequest,
    ) -> Result<DriverOutput, PolyDbError> {
        query::execute(client, req).await
    }

    async fn cache_columns(&self, client: &mut Self::Client) -> Result<SchemaSnapshot, PolyDbError> {
        introspect::introspect(client, &self.options.schema).await
    }

    fn prepare(
        &self,
        op: Op,
        table: &str,
        payload: Payload<'_>,
        opts: &RequestOptions,
        schema: &SchemaSnapshot,
    ) -> Result<Option<BackendRequest>, PolyDbError> {
        let ctx = SqlContext::new(Dialect::Postgres, schema).with_bind(Self::bind_value);
        prepare_sql(&ctx, op, table, payload, opts)
    }

    /// Lists bind as arrays only into array columns; elsewhere they become JSON (json
    /// columns) or `,`-joined text. JSON objects bound into text columns are serialised.
    fn bind_value(value: RowValues, column: Option<&ColumnDef>) -> RowValues {
        let ty = column.map(|c| &c.ty);
        match bind_by_type(value, column) {
            RowValues::List(items) if !is_array_column(column) => match ty {
                Some(ColumnType::Json) => RowValues::JSON(RowValues::List(items).to_json()),
                _ => RowValues::Text(RowValues::List(items).to_text()),
            },
            RowValues::JSON(json) if matches!(ty, Some(ColumnType::Text)) => {
                RowValues::Text(json.to_string())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_bind_by_column_kind() {
        let tags = RowValues::List(vec!["a".into(), "b".into()]);
        let text = ColumnDef::new("tags");
        assert_eq!(
            PostgresDriver::bind_value(tags.clone(), Some(&text)),
            RowValues::Text("a,b".into())
        );
        let json = ColumnDef::new("tags").with_type(ColumnType::Json);
        assert_eq!(
            PostgresDriver::bind_value(tags.clone(), Some(&json)),
            RowValues::JSON(serde_json::json!(["a", "b"]))
        );
        let array = ColumnDef::new("tags").with_type(ColumnType::Other("text[]".into()));
        assert_eq!(PostgresDriver::bind_value(tags.clone(), Some(&array)), tags);
    }
}
