//! promhouse storage layer.
//!
//! This crate provides:
//! - The fixed sample table schema and insert column order
//! - The storage collaborator traits used by writers and the query path
//! - A typed aggregation-query builder with central literal escaping
//! - A ClickHouse backend speaking the HTTP interface
//! - An in-memory backend that evaluates aggregation queries directly

pub mod clickhouse;
pub mod error;
pub mod memory;
pub mod query;
pub mod schema;
pub mod store;
pub mod value;

pub use clickhouse::ClickHouseStore;
pub use error::StorageError;
pub use memory::{MemoryStore, StoredRow};
pub use query::{AggregationQuery, Predicate, PredicateOp};
pub use schema::{Column, ColumnKind, InsertStatement, INSERT_COLUMNS};
pub use store::{Connection, Store, Transaction};
pub use value::{Row, Value};

/// Result column carrying the number of raw rows in a bucket.
pub const COUNT_COLUMN: &str = "CNT";

/// Result column carrying the bucket start in milliseconds.
pub const BUCKET_COLUMN: &str = "t";

/// Result column carrying the aggregated value.
pub const VALUE_COLUMN: &str = "value";
