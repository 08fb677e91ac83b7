//! Adapter metrics.
//!
//! Counters and histograms live in a [`Registry`] owned by the adapter.
//! Exposing the registry (an HTTP `/metrics` endpoint, a push gateway) is
//! left to the embedder; [`AdapterMetrics::encode_text`] renders it in the
//! Prometheus text format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Encoder, Histogram, HistogramOpts, IntCounter,
    IntCounterVec, Opts, Registry, TextEncoder,
};

/// `dropped_samples_total` reasons.
pub mod drop_reason {
    /// The sample carried no `job` label.
    pub const NO_JOB: &str = "no_job";
    /// No delivery queue exists for the sample's job.
    pub const UNKNOWN_JOB: &str = "unknown_job";
    /// The queue stayed full for longer than the enqueue timeout.
    pub const ENQUEUE_TIMEOUT: &str = "enqueue_timeout";
    /// Shutdown had already closed the queues.
    pub const QUEUES_CLOSED: &str = "queues_closed";
    /// The job's writer is gone.
    pub const WRITER_STOPPED: &str = "writer_stopped";
}

/// `failed_samples_total` stages.
pub mod stage {
    pub const CONNECT: &str = "connect";
    pub const BEGIN: &str = "begin";
    pub const PREPARE: &str = "prepare";
    pub const EXEC: &str = "exec";
    pub const COMMIT: &str = "commit";
}

const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Every metric the adapter records.
#[derive(Clone)]
pub struct AdapterMetrics {
    registry: Registry,
    pub received_samples: IntCounter,
    pub dropped_samples: IntCounterVec,
    pub written_samples: IntCounter,
    pub failed_samples: IntCounterVec,
    pub failed_batches: IntCounter,
    pub flush_duration: Histogram,
    pub read_requests: IntCounter,
    pub read_failures: IntCounter,
    pub read_duration: Histogram,
    pub ignored_matchers: IntCounter,
}

impl std::fmt::Debug for AdapterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterMetrics")
            .field("received_samples", &self.received_samples.get())
            .field("written_samples", &self.written_samples.get())
            .field("failed_batches", &self.failed_batches.get())
            .finish_non_exhaustive()
    }
}

impl AdapterMetrics {
    /// Create the metrics in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Register the metrics in an existing registry.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let received_samples = register_int_counter_with_registry!(
            Opts::new("received_samples_total", "Sample points received for ingestion"),
            registry
        )?;
        let dropped_samples = register_int_counter_vec_with_registry!(
            Opts::new("dropped_samples_total", "Sample points dropped before enqueue"),
            &["reason"],
            registry
        )?;
        let written_samples = register_int_counter_with_registry!(
            Opts::new("written_samples_total", "Rows committed to the store"),
            registry
        )?;
        let failed_samples = register_int_counter_vec_with_registry!(
            Opts::new("failed_samples_total", "Rows lost to store failures"),
            &["stage"],
            registry
        )?;
        let failed_batches = register_int_counter_with_registry!(
            Opts::new("failed_batches_total", "Batches discarded without commit"),
            registry
        )?;
        let flush_duration = register_histogram_with_registry!(
            HistogramOpts::new("flush_duration_seconds", "Time to persist one batch")
                .buckets(DURATION_BUCKETS.to_vec()),
            registry
        )?;
        let read_requests = register_int_counter_with_registry!(
            Opts::new("read_requests_total", "Read requests served"),
            registry
        )?;
        let read_failures = register_int_counter_with_registry!(
            Opts::new("read_failures_total", "Read requests that failed"),
            registry
        )?;
        let read_duration = register_histogram_with_registry!(
            HistogramOpts::new("read_duration_seconds", "Time to answer one read request")
                .buckets(DURATION_BUCKETS.to_vec()),
            registry
        )?;
        let ignored_matchers = register_int_counter_with_registry!(
            Opts::new(
                "ignored_matchers_total",
                "Label matchers dropped because their label has no column"
            ),
            registry
        )?;

        Ok(Self {
            registry,
            received_samples,
            dropped_samples,
            written_samples,
            failed_samples,
            failed_batches,
            flush_duration,
            read_requests,
            read_failures,
            read_duration,
            ignored_matchers,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dropped(&self, reason: &str) -> u64 {
        self.dropped_samples.with_label_values(&[reason]).get()
    }

    pub fn failed(&self, stage: &str) -> u64 {
        self.failed_samples.with_label_values(&[stage]).get()
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
