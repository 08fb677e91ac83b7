//! Batching writer: one task per (job, table).
//!
//! The writer drains its job's queue into batches of at most `batch_size`
//! samples and persists each batch in one transaction. A batch is flushed
//! when it is full, when its oldest sample has waited longer than the flush
//! interval (if one is set), and once more when the queue closes.
//!
//! Failure policy: a row that fails to execute is counted and skipped; the
//! rest of the batch still commits. A failed begin, prepare or commit loses
//! the whole batch, as does an exec failure that is not row-level. Nothing
//! is retried or re-queued.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use ph_common::Sample;
use ph_storage::{Connection, InsertStatement, Store, StorageError, Value};

use crate::metrics::{stage, AdapterMetrics};

/// Summary returned by a writer when it stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub job: String,
    pub table: String,
    pub batches_committed: u64,
    pub samples_written: u64,
    /// Rows lost to exec failures inside otherwise committed batches.
    pub rows_failed: u64,
    /// Batches lost entirely (connect, begin, prepare or commit failure).
    pub batches_failed: u64,
    /// Samples lost with those batches.
    pub samples_lost: u64,
}

/// Insert parameters for one sample, in insert column order. `date` is bound
/// from the same timestamp as `ts`.
pub fn sample_params(sample: &Sample) -> Vec<Value> {
    vec![
        Value::String(sample.source_ip.clone()),
        Value::String(sample.app.clone()),
        Value::String(sample.metric_name.clone()),
        Value::String(sample.job.clone()),
        Value::String(sample.namespace.clone()),
        Value::String(sample.shard.clone()),
        Value::String(sample.keyspace.clone()),
        Value::String(sample.component.clone()),
        Value::String(sample.container_name.clone()),
        Value::Float64(sample.value),
        Value::DateTime(sample.timestamp),
        Value::DateTime(sample.timestamp),
        Value::StringArray(sample.tags.to_vec()),
    ]
}

/// Writer for one job's queue.
#[derive(Debug)]
pub struct BatchWriter {
    job: String,
    insert: InsertStatement,
    batch_size: usize,
    flush_interval: Option<Duration>,
    metrics: Arc<AdapterMetrics>,
}

impl BatchWriter {
    pub fn new(
        job: impl Into<String>,
        insert: InsertStatement,
        batch_size: usize,
        flush_interval: Option<Duration>,
        metrics: Arc<AdapterMetrics>,
    ) -> Self {
        Self {
            job: job.into(),
            insert,
            batch_size: batch_size.max(1),
            flush_interval,
            metrics,
        }
    }

    /// Drain `queue` until it is closed and empty, then return the stats.
    pub async fn run(
        self,
        store: Arc<dyn Store>,
        mut queue: mpsc::Receiver<Sample>,
    ) -> WriterStats {
        let mut stats = WriterStats {
            job: self.job.clone(),
            table: self.insert.table.clone(),
            ..WriterStats::default()
        };
        info!(
            job = %self.job,
            table = %self.insert.table,
            batch_size = self.batch_size,
            backend = store.name(),
            "writer started"
        );

        let mut conn = match store.connect().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(job = %self.job, error = %e, "initial connect failed, will retry on flush");
                None
            }
        };

        let mut batch: Vec<Sample> = Vec::with_capacity(self.batch_size);
        let mut deadline: Option<Instant> = None;
        loop {
            let room = self.batch_size - batch.len();
            let received = match deadline {
                Some(at) => {
                    tokio::select! {
                        n = queue.recv_many(&mut batch, room) => n,
                        _ = tokio::time::sleep_until(at) => {
                            debug!(job = %self.job, rows = batch.len(), "flush interval elapsed");
                            self.flush(store.as_ref(), &mut conn, &mut batch, &mut stats).await;
                            deadline = None;
                            continue;
                        }
                    }
                }
                None => queue.recv_many(&mut batch, room).await,
            };
            if received == 0 {
                break;
            }
            if deadline.is_none() {
                deadline = self.flush_interval.map(|d| Instant::now() + d);
            }
            if batch.len() >= self.batch_size {
                self.flush(store.as_ref(), &mut conn, &mut batch, &mut stats).await;
                deadline = None;
            }
        }

        if !batch.is_empty() {
            debug!(job = %self.job, rows = batch.len(), "queue closed, flushing final batch");
            self.flush(store.as_ref(), &mut conn, &mut batch, &mut stats).await;
        }
        info!(
            job = %self.job,
            batches = stats.batches_committed,
            written = stats.samples_written,
            failed_batches = stats.batches_failed,
            "writer stopped"
        );
        stats
    }

    /// Persist and clear `batch`.
    async fn flush(
        &self,
        store: &dyn Store,
        conn: &mut Option<Box<dyn Connection>>,
        batch: &mut Vec<Sample>,
        stats: &mut WriterStats,
    ) {
        let started = std::time::Instant::now();
        let rows = std::mem::take(batch);
        batch.reserve(self.batch_size);

        if conn.is_none() {
            match store.connect().await {
                Ok(c) => *conn = Some(c),
                Err(e) => {
                    self.discard(stage::CONNECT, rows.len(), &e, stats);
                    return;
                }
            }
        }
        let Some(connection) = conn.as_mut() else {
            return;
        };

        let mut tx = match connection.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                // Force a fresh connection for the next cycle.
                *conn = None;
                self.discard(stage::BEGIN, rows.len(), &e, stats);
                return;
            }
        };
        if let Err(e) = tx.prepare(&self.insert).await {
            self.discard(stage::PREPARE, rows.len(), &e, stats);
            return;
        }

        let mut inserted: u64 = 0;
        let mut skipped: usize = 0;
        for sample in &rows {
            match tx.exec(sample_params(sample)).await {
                Ok(()) => inserted += 1,
                Err(e) if !e.is_row_level() => {
                    // The transaction is unusable; everything not already
                    // counted as skipped is lost.
                    *conn = None;
                    self.discard(stage::EXEC, rows.len() - skipped, &e, stats);
                    return;
                }
                Err(e) => {
                    warn!(
                        job = %self.job,
                        metric = %sample.metric_name,
                        error = %e,
                        "row insert failed, skipping"
                    );
                    self.metrics
                        .failed_samples
                        .with_label_values(&[stage::EXEC])
                        .inc();
                    stats.rows_failed += 1;
                    skipped += 1;
                }
            }
        }

        match tx.commit().await {
            Ok(()) => {
                self.metrics.written_samples.inc_by(inserted);
                self.metrics
                    .flush_duration
                    .observe(started.elapsed().as_secs_f64());
                stats.batches_committed += 1;
                stats.samples_written += inserted;
                debug!(job = %self.job, table = %self.insert.table, rows = inserted, "batch committed");
            }
            Err(e) => {
                self.discard(stage::COMMIT, inserted as usize, &e, stats);
            }
        }
    }

    fn discard(&self, stage: &str, rows: usize, err: &StorageError, stats: &mut WriterStats) {
        error!(
            job = %self.job,
            table = %self.insert.table,
            stage,
            rows,
            error = %err,
            "batch discarded"
        );
        self.metrics
            .failed_samples
            .with_label_values(&[stage])
            .inc_by(rows as u64);
        self.metrics.failed_batches.inc();
        stats.batches_failed += 1;
        stats.samples_lost += rows as u64;
    }
}
