//! Table definitions and the per-pool schema cache.

mod column;
mod snapshot;
mod table;

pub use column::ColumnDef;
pub use snapshot::{SchemaCache, SchemaSnapshot, Tables};
pub use table::{IndexKind, IndexSpec, TableDef};
