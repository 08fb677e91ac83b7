//! Adapter supervision.
//!
//! [`Adapter`] owns the running system: the job directory, the router and
//! its delivery queues, one writer task per job, the query translator and
//! the metrics. It is the surface the HTTP layer calls into.
//!
//! Shutdown closes every queue, then waits for the writers to drain with a
//! bounded timeout. Writers still running at the deadline are aborted and
//! their in-flight samples are lost.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ph_common::{ReadRequest, TimeSeries, WriteRequest};
use ph_config::{AdapterConfig, ConfigError, JobEntry};
use ph_storage::{InsertStatement, StorageError, Store};

use crate::directory::JobDirectory;
use crate::ingest::samples_from_request;
use crate::metrics::AdapterMetrics;
use crate::query::{QueryError, QuerySettings, QueryTranslator};
use crate::router::{DispatchOutcome, RouteError, Router};
use crate::watcher::ConfigWatcher;
use crate::writer::{BatchWriter, WriterStats};

/// Errors from the adapter surface.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<AdapterError> for ph_common::Error {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Config(e @ ConfigError::InvalidIdentifier { .. }) => {
                ph_common::Error::InvalidIdentifier(e.to_string())
            }
            AdapterError::Config(e) => ph_common::Error::Config(e.to_string()),
            AdapterError::Metrics(e) => ph_common::Error::Config(e.to_string()),
            AdapterError::Route(e) => e.into(),
            AdapterError::Query(e) => e.into(),
            AdapterError::Storage(StorageError::Timeout { seconds }) => {
                ph_common::Error::StorageTimeout { seconds }
            }
            AdapterError::Storage(e) => ph_common::Error::Storage(e.to_string()),
        }
    }
}

/// Outcome of one write request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub received: u64,
    pub enqueued: u64,
    /// Samples without a job label or for a job without a queue.
    pub dropped: u64,
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// Writers that drained and stopped, sorted by job.
    pub drained: Vec<WriterStats>,
    /// Jobs whose writer was still running at the deadline and was aborted.
    pub aborted: Vec<String>,
    /// Jobs whose writer task panicked.
    pub panicked: Vec<String>,
    pub elapsed_ms: u64,
}

impl ShutdownReport {
    /// Whether every writer drained in time.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty() && self.panicked.is_empty()
    }
}

struct WriterHandle {
    job: String,
    handle: JoinHandle<WriterStats>,
}

#[derive(Default)]
struct Tasks {
    writers: Vec<WriterHandle>,
    watcher: Option<JoinHandle<()>>,
}

/// The running adapter.
pub struct Adapter {
    store: Arc<dyn Store>,
    directory: Arc<JobDirectory>,
    router: Router,
    translator: QueryTranslator,
    metrics: Arc<AdapterMetrics>,
    drain_timeout: Duration,
    reload_interval: Option<Duration>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Tasks>,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("backend", &self.store.name())
            .field("router", &self.router)
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}

impl Adapter {
    /// Build the directory and queues and spawn one writer per job.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &AdapterConfig, store: Arc<dyn Store>) -> Result<Self, AdapterError> {
        Self::start_with_metrics(config, store, Arc::new(AdapterMetrics::new()?))
    }

    /// Like [`start`](Self::start), recording into caller-provided metrics.
    pub fn start_with_metrics(
        config: &AdapterConfig,
        store: Arc<dyn Store>,
        metrics: Arc<AdapterMetrics>,
    ) -> Result<Self, AdapterError> {
        config.validate()?;
        let directory = Arc::new(JobDirectory::from_entries(&config.jobs));
        let router = Router::new(config.writer.enqueue_timeout(), Arc::clone(&metrics));

        // Queues and writers exist only for jobs known now.
        let jobs = directory.snapshot();
        let receivers =
            router.create_queues(jobs.keys().map(String::as_str), config.writer.batch_size);
        let mut writers = Vec::with_capacity(receivers.len());
        for (job, queue) in receivers {
            let Some(table) = jobs.get(&job) else {
                continue;
            };
            let writer = BatchWriter::new(
                job.as_str(),
                InsertStatement::new(config.clickhouse.database.as_str(), table.as_str()),
                config.writer.batch_size,
                config.writer.flush_interval(),
                Arc::clone(&metrics),
            );
            let handle = tokio::spawn(writer.run(Arc::clone(&store), queue));
            writers.push(WriterHandle { job, handle });
        }
        info!(
            writers = writers.len(),
            backend = store.name(),
            batch_size = config.writer.batch_size,
            "adapter started"
        );

        let translator = QueryTranslator::new(
            QuerySettings::from_config(config),
            Arc::clone(&directory),
            Arc::clone(&metrics),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            store,
            directory,
            router,
            translator,
            metrics,
            drain_timeout: config.shutdown.drain_timeout(),
            reload_interval: config.reload.poll_interval(),
            shutdown_tx,
            tasks: Mutex::new(Tasks {
                writers,
                watcher: None,
            }),
        })
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metrics(&self) -> &AdapterMetrics {
        &self.metrics
    }

    pub fn directory(&self) -> &JobDirectory {
        &self.directory
    }

    pub fn translator(&self) -> &QueryTranslator {
        &self.translator
    }

    /// Jobs that have a delivery queue.
    pub fn queued_jobs(&self) -> Vec<String> {
        self.router.jobs()
    }

    /// Convert and dispatch a decoded write request.
    ///
    /// Awaits room in full queues. Stops at the first routing error; samples
    /// dispatched before it stay enqueued.
    pub async fn write(&self, request: &WriteRequest) -> Result<WriteSummary, AdapterError> {
        let samples = samples_from_request(request);
        let mut summary = WriteSummary {
            received: samples.len() as u64,
            ..WriteSummary::default()
        };
        self.metrics.received_samples.inc_by(summary.received);

        for sample in samples {
            match self.router.dispatch(sample).await? {
                DispatchOutcome::Enqueued => summary.enqueued += 1,
                DispatchOutcome::MissingJob | DispatchOutcome::UnknownJob => summary.dropped += 1,
            }
        }
        Ok(summary)
    }

    /// Answer a decoded read request.
    pub async fn read(&self, request: &ReadRequest) -> Result<Vec<TimeSeries>, AdapterError> {
        Ok(self.translator.read(self.store.as_ref(), request).await?)
    }

    /// Replace the job directory. Jobs added here have no delivery queue
    /// until restart; their samples are dropped as unknown.
    pub fn reload_jobs(&self, entries: &[JobEntry]) {
        self.directory.load(entries);
        let queued = self.router.jobs();
        for entry in entries {
            if queued.binary_search(&entry.name).is_err() {
                warn!(job = %entry.name, table = %entry.table, "job has no delivery queue until restart");
            }
        }
        info!(jobs = self.directory.len(), "job directory reloaded");
    }

    /// Start polling `path` for job-list changes. Replaces a previous
    /// watcher. Does nothing when reloading is disabled.
    pub fn watch_config(self: &Arc<Self>, path: impl Into<PathBuf>) {
        let Some(interval) = self.reload_interval else {
            info!("config reload disabled");
            return;
        };
        let watcher = ConfigWatcher::new(path.into(), interval);
        let adapter = Arc::clone(self);
        let shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(watcher.run(shutdown, move |jobs| adapter.reload_jobs(&jobs)));
        if let Some(previous) = self.tasks().watcher.replace(handle) {
            previous.abort();
        }
    }

    /// Close the queues and wait for the writers to drain.
    ///
    /// Writers still running after the drain timeout are aborted. Calling
    /// this twice returns an empty report the second time.
    pub async fn shutdown(&self) -> ShutdownReport {
        let started = tokio::time::Instant::now();
        let deadline = started + self.drain_timeout;
        self.shutdown_tx.send_replace(true);
        self.router.close();

        let tasks = std::mem::take(&mut *self.tasks());
        if let Some(watcher) = tasks.watcher {
            if let Err(e) = watcher.await {
                warn!(error = %e, "config watcher ended abnormally");
            }
        }

        let mut report = ShutdownReport::default();
        for WriterHandle { job, mut handle } in tasks.writers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(stats)) => report.drained.push(stats),
                Ok(Err(e)) => {
                    error!(job = %job, error = %e, "writer task failed");
                    report.panicked.push(job);
                }
                Err(_) => {
                    handle.abort();
                    warn!(job = %job, "writer did not drain in time, aborted");
                    report.aborted.push(job);
                }
            }
        }
        report.drained.sort_by(|a, b| a.job.cmp(&b.job));
        report.aborted.sort();
        report.panicked.sort();
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            drained = report.drained.len(),
            aborted = report.aborted.len(),
            elapsed_ms = report.elapsed_ms,
            "adapter shut down"
        );
        report
    }

    pub fn is_shut_down(&self) -> bool {
        self.router.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ph_common::{Label, SamplePoint};
    use ph_storage::MemoryStore;

    fn config() -> AdapterConfig {
        let mut config = AdapterConfig::default();
        config.jobs = vec![JobEntry::new("node", "node_samples")];
        config.writer.batch_size = 4;
        config.writer.flush_interval_secs = 0;
        config
    }

    fn request(job: &str, n: usize) -> WriteRequest {
        WriteRequest {
            timeseries: vec![TimeSeries {
                labels: vec![Label::new("job", job), Label::new("__name__", "up")],
                samples: (0..n)
                    .map(|i| SamplePoint {
                        value: i as f64,
                        timestamp_ms: 1_000 * i as i64,
                    })
                    .collect(),
            }],
        }
    }

    #[tokio::test]
    async fn invalid_table_name_maps_to_identifier_error() {
        let mut cfg = config();
        cfg.jobs = vec![JobEntry::new("node", "node samples; DROP")];
        let Err(err) = Adapter::start(&cfg, Arc::new(MemoryStore::new())) else {
            panic!("invalid table name accepted");
        };
        let err: ph_common::Error = err.into();
        assert!(matches!(err, ph_common::Error::InvalidIdentifier(_)));
        assert_eq!(err.code(), 11);
    }

    #[tokio::test]
    async fn write_then_shutdown_persists_everything() {
        let store = MemoryStore::new();
        let adapter = Adapter::start(&config(), Arc::new(store.clone())).unwrap();
        let summary = adapter.write(&request("node", 3)).await.unwrap();
        assert_eq!(summary.enqueued, 3);

        let report = adapter.shutdown().await;
        assert!(report.is_clean());
        assert_eq!(report.drained[0].samples_written, 3);
        assert_eq!(store.row_count("metrics", "node_samples"), 3);
        assert!(adapter.is_shut_down());
    }

    #[tokio::test]
    async fn unknown_job_counts_as_dropped() {
        let adapter = Adapter::start(&config(), Arc::new(MemoryStore::new())).unwrap();
        let summary = adapter.write(&request("other", 2)).await.unwrap();
        assert_eq!(summary.dropped, 2);
        assert_eq!(adapter.metrics().received_samples.get(), 2);
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn write_after_shutdown_fails() {
        let adapter = Adapter::start(&config(), Arc::new(MemoryStore::new())).unwrap();
        adapter.shutdown().await;
        let err = adapter.write(&request("node", 1)).await.unwrap_err();
        assert!(matches!(err, AdapterError::Route(RouteError::QueuesClosed)));
        let second = adapter.shutdown().await;
        assert!(second.drained.is_empty());
    }

    #[tokio::test]
    async fn reload_does_not_create_queues() {
        let adapter = Adapter::start(&config(), Arc::new(MemoryStore::new())).unwrap();
        adapter.reload_jobs(&[
            JobEntry::new("node", "node_samples"),
            JobEntry::new("pods", "pod_samples"),
        ]);
        assert_eq!(adapter.directory().table("pods").as_deref(), Some("pod_samples"));
        assert_eq!(adapter.queued_jobs(), ["node"]);
        let summary = adapter.write(&request("pods", 1)).await.unwrap();
        assert_eq!(summary.dropped, 1);
        adapter.shutdown().await;
    }

    #[test]
    fn error_codes_map_through() {
        let err: ph_common::Error = AdapterError::Route(RouteError::QueuesClosed).into();
        assert_eq!(err.code(), 32);
        let err: ph_common::Error = AdapterError::Query(QueryError::InvalidSampleBudget(0)).into();
        assert_eq!(err.code(), 21);
        let err: ph_common::Error =
            AdapterError::Storage(StorageError::Commit("x".into())).into();
        assert_eq!(err.code(), 40);
    }
}
