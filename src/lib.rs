//! One record-oriented data-access API over SQLite, PostgreSQL, DynamoDB and Cassandra.
//!
//! Callers describe tables once, open named pools, and run `add`/`put`/`update`/`del`/
//! `get`/`select`/`search` against any of them through [`Engine`]. Each pool compiles the
//! same request into its own dialect or native API call.
//!
//! ```rust,no_run
//! use polydb::prelude::*;
//!
//! # async fn demo() -> Result<(), PolyDbError> {
//! let config = EngineConfig::new()
//!     .pool(PoolConfig::new("main", BackendKind::Sqlite).url(":memory:"))
//!     .table(
//!         "users",
//!         TableDef::new()
//!             .column(ColumnDef::new("id").primary())
//!             .column(ColumnDef::new("name")),
//!     );
//! let engine = Engine::builder(config).init_tables(true).build().await?;
//! engine.add("users", &record! { "id" => "1", "name" => "ann" }, &RequestOptions::new()).await?;
//! let row = engine.get("users", &record! { "id" => "1" }, &RequestOptions::new()).await?;
//! assert_eq!(row.rows.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod geo;
pub mod pool;
pub mod prelude;
pub mod request;
pub mod results;
pub mod schema;
pub mod sql;
pub mod translation;
pub mod types;

pub use cache::{Cache, MemoryCache};
pub use config::{DbArgs, EngineConfig, PoolConfig, PoolDefaults};
pub use engine::{BatchItem, Engine, EngineBuilder, GeoCursor, GeoQuery, LocationsPage, RowHook};
pub use error::PolyDbError;
pub use pool::{AnyPool, PoolRegistry, PoolSettings, Stat, StatsSnapshot};
pub use request::{CheckData, FilterColumn, Payload, RequestOptions};
pub use results::{NextToken, QueryInfo, QueryResult};
pub use schema::{ColumnDef, TableDef};
pub use types::{BackendKind, ColumnType, Op, Record, RowValues};
