//! Sample table schema.
//!
//! Every job table has the same layout:
//!
//! ```sql
//! CREATE TABLE metrics.samples (
//!     ip String, app String, name String, job String, namespace String,
//!     shard String, keyspace String, component String, containername String,
//!     val Float64, ts DateTime, date Date, tags Array(String)
//! ) ENGINE = MergeTree PARTITION BY toYYYYMM(date) ORDER BY (name, ts);
//! ```
//!
//! Insert column order is part of the contract.

use std::fmt;

use crate::error::StorageError;
use crate::value::Value;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    String,
    Float64,
    DateTime,
    /// Calendar date; bound from a timestamp and truncated to its UTC date.
    Date,
    StringArray,
}

/// A column of the sample table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    Ip,
    App,
    Name,
    Job,
    Namespace,
    Shard,
    Keyspace,
    Component,
    ContainerName,
    Val,
    Ts,
    Date,
    Tags,
}

/// Insert column order.
pub const INSERT_COLUMNS: [Column; 13] = [
    Column::Ip,
    Column::App,
    Column::Name,
    Column::Job,
    Column::Namespace,
    Column::Shard,
    Column::Keyspace,
    Column::Component,
    Column::ContainerName,
    Column::Val,
    Column::Ts,
    Column::Date,
    Column::Tags,
];

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Column::Ip => "ip",
            Column::App => "app",
            Column::Name => "name",
            Column::Job => "job",
            Column::Namespace => "namespace",
            Column::Shard => "shard",
            Column::Keyspace => "keyspace",
            Column::Component => "component",
            Column::ContainerName => "containername",
            Column::Val => "val",
            Column::Ts => "ts",
            Column::Date => "date",
            Column::Tags => "tags",
        }
    }

    pub fn kind(self) -> ColumnKind {
        match self {
            Column::Val => ColumnKind::Float64,
            Column::Ts => ColumnKind::DateTime,
            Column::Date => ColumnKind::Date,
            Column::Tags => ColumnKind::StringArray,
            _ => ColumnKind::String,
        }
    }

    /// Position in [`INSERT_COLUMNS`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_name(name: &str) -> Option<Column> {
        INSERT_COLUMNS.iter().copied().find(|c| c.name() == name)
    }

    /// Check that a bound parameter fits this column.
    pub fn check(self, value: &Value) -> Result<(), StorageError> {
        let ok = matches!(
            (self.kind(), value),
            (ColumnKind::String, Value::String(_))
                | (ColumnKind::Float64, Value::Float64(_))
                | (ColumnKind::DateTime, Value::DateTime(_))
                | (ColumnKind::Date, Value::DateTime(_))
                | (ColumnKind::StringArray, Value::StringArray(_))
        );
        if ok {
            Ok(())
        } else {
            Err(StorageError::Exec(format!(
                "column {} cannot bind {}",
                self.name(),
                value.type_name()
            )))
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parameterized multi-column insert into one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub database: String,
    pub table: String,
}

impl InsertStatement {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    pub fn columns(&self) -> &'static [Column] {
        &INSERT_COLUMNS
    }

    /// `INSERT INTO db.table (ip, ..., tags) VALUES (?, ..., ?)`
    pub fn to_sql(&self) -> String {
        let cols = INSERT_COLUMNS
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ");
        let params = vec!["?"; INSERT_COLUMNS.len()].join(", ");
        format!(
            "INSERT INTO {}.{} ({cols}) VALUES ({params})",
            self.database, self.table
        )
    }

    /// Validate a full parameter row against the column list.
    pub fn check_params(&self, params: &[Value]) -> Result<(), StorageError> {
        if params.len() != INSERT_COLUMNS.len() {
            return Err(StorageError::Exec(format!(
                "expected {} parameters, got {}",
                INSERT_COLUMNS.len(),
                params.len()
            )));
        }
        INSERT_COLUMNS
            .iter()
            .zip(params)
            .try_for_each(|(col, value)| col.check(value))
    }
}
