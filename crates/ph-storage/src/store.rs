//! Storage collaborator traits.
//!
//! Writers hold one [`Connection`] each for their whole lifetime and run one
//! [`Transaction`] per flush cycle: prepare the insert, execute it once per
//! sample, commit. The read path shares the [`Store`] itself.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::query::AggregationQuery;
use crate::schema::InsertStatement;
use crate::value::{Row, Value};

/// A time-series store.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Open a dedicated connection for a long-lived writer.
    async fn connect(&self) -> Result<Box<dyn Connection>, StorageError>;

    /// Run an aggregation query and return its rows in result order.
    async fn select(&self, query: &AggregationQuery) -> Result<Vec<Row>, StorageError>;
}

/// A writer-owned connection.
#[async_trait]
pub trait Connection: Send + 'static {
    async fn begin(&mut self) -> Result<Box<dyn Transaction>, StorageError>;
}

/// One insert transaction. Dropping it without committing discards every
/// executed row.
#[async_trait]
pub trait Transaction: Send {
    /// Prepare the parameterized insert used by subsequent [`exec`] calls.
    ///
    /// [`exec`]: Transaction::exec
    async fn prepare(&mut self, insert: &InsertStatement) -> Result<(), StorageError>;

    /// Execute the prepared insert with one row of parameters, in
    /// [`INSERT_COLUMNS`](crate::INSERT_COLUMNS) order. A failure affects
    /// only this row; the transaction stays usable.
    async fn exec(&mut self, params: Vec<Value>) -> Result<(), StorageError>;

    /// Make every successfully executed row durable.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}
