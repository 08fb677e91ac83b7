//! promhouse core.
//!
//! Bridges Prometheus remote write/read with a columnar store:
//! - [`directory`]: the job → table mapping, swapped atomically on reload
//! - [`router`]: per-job bounded delivery queues with backpressure
//! - [`ingest`]: conversion of decoded series into samples
//! - [`writer`]: batching writers, one per job, one transaction per batch
//! - [`query`]: matcher/time-range translation and series reconstruction
//! - [`adapter`]: startup, request entry points, reload and graceful shutdown
//!
//! Wire decoding and the HTTP surface live outside this crate.

pub mod adapter;
pub mod directory;
pub mod exit_codes;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod query;
pub mod router;
pub mod watcher;
pub mod writer;

pub use adapter::{Adapter, AdapterError, ShutdownReport, WriteSummary};
pub use directory::JobDirectory;
pub use exit_codes::ExitCode;
pub use ingest::{samples_from_request, samples_from_series};
pub use logging::{init_logging, LogFormat};
pub use metrics::AdapterMetrics;
pub use query::{
    bucket_width, column_for_label, series_key, QueryError, QuerySettings, QueryTranslator,
};
pub use router::{DispatchOutcome, RouteError, Router};
pub use watcher::ConfigWatcher;
pub use writer::{BatchWriter, WriterStats};
