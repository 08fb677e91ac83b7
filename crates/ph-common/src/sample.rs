//! The immutable sample record routed from ingestion to a batching writer.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

/// One observation, with its promoted labels split out into fields.
///
/// A `Sample` is built once during ingest, enqueued, and consumed by exactly
/// one writer. Promoted labels that were absent on the series are empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub source_ip: String,
    pub app: String,
    pub metric_name: String,
    pub job: String,
    pub namespace: String,
    pub shard: String,
    pub keyspace: String,
    pub component: String,
    pub container_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// Every label of the series as a literal `name=value` string, in the
    /// order received. Shared by all samples decoded from the same series.
    pub tags: Arc<[String]>,
}

impl Sample {
    /// A sample with every promoted field empty.
    pub fn new(value: f64, timestamp: DateTime<Utc>, tags: Arc<[String]>) -> Self {
        Self {
            source_ip: String::new(),
            app: String::new(),
            metric_name: String::new(),
            job: String::new(),
            namespace: String::new(),
            shard: String::new(),
            keyspace: String::new(),
            component: String::new(),
            container_name: String::new(),
            value,
            timestamp,
            tags,
        }
    }

    /// Whether the sample can be routed at all.
    pub fn has_job(&self) -> bool {
        !self.job.is_empty()
    }
}

/// Convert a protocol timestamp (milliseconds since the epoch) into UTC.
///
/// Out-of-range values clamp to the epoch rather than failing ingest.
pub fn timestamp_from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
