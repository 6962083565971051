//! Convenient imports for common functionality.
//!
//! ```rust
//! use polydb::prelude::*;
//! ```

pub use crate::cache::{Cache, MemoryCache};
pub use crate::config::{DbArgs, EngineConfig, PoolConfig, PoolDefaults};
pub use crate::engine::{BatchItem, Engine, EngineBuilder, GeoCursor, GeoQuery, LocationsPage};
pub use crate::error::PolyDbError;
pub use crate::pool::{PoolSettings, Stat};
pub use crate::record;
pub use crate::request::{CheckData, FilterColumn, RequestOptions};
pub use crate::results::{NextToken, QueryResult};
pub use crate::schema::{ColumnDef, TableDef};
pub use crate::types::{BackendKind, ColumnType, Op, Record, RowValues};

#[cfg(feature = "cassandra")]
pub use crate::driver::cassandra::{CqlConnector, CqlSession, ScyllaConnector};
#[cfg(feature = "dynamodb")]
pub use crate::driver::dynamodb::{DynamoApi, HttpDynamo, MemoryDynamo};
