//! Job-keyed routing with backpressure.
//!
//! Each job known at startup gets one bounded delivery queue. Dispatch looks
//! the sample's job up in the current queue map and awaits room in the
//! queue, so a slow writer stalls ingestion for its job instead of growing
//! memory. An optional enqueue timeout bounds that stall.
//!
//! The queue map sits behind an [`ArcSwapOption`]; `None` means shutdown has
//! closed the queues. Dropping the map drops every sender, which is what
//! lets the writers drain and stop.

use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use ph_common::Sample;

use crate::metrics::{drop_reason, AdapterMetrics};

/// Routing failures surfaced to the ingesting caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("enqueue for job '{job}' timed out after {millis}ms")]
    EnqueueTimeout { job: String, millis: u64 },

    #[error("delivery queues are closed")]
    QueuesClosed,

    #[error("writer for job '{job}' has stopped")]
    WriterStopped { job: String },
}

impl From<RouteError> for ph_common::Error {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::EnqueueTimeout { job, millis } => {
                ph_common::Error::EnqueueTimeout { job, millis }
            }
            RouteError::QueuesClosed | RouteError::WriterStopped { .. } => {
                ph_common::Error::QueuesClosed
            }
        }
    }
}

/// What happened to a dispatched sample that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The sample is in its job's queue.
    Enqueued,
    /// The sample had no job label; it was counted and dropped.
    MissingJob,
    /// No queue exists for the sample's job; it was counted and dropped.
    UnknownJob,
}

type QueueMap = HashMap<String, mpsc::Sender<Sample>>;

/// Routes samples to per-job delivery queues.
pub struct Router {
    queues: ArcSwapOption<QueueMap>,
    enqueue_timeout: Option<Duration>,
    metrics: Arc<AdapterMetrics>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("jobs", &self.jobs())
            .field("enqueue_timeout", &self.enqueue_timeout)
            .finish()
    }
}

impl Router {
    /// A router with no queues. Every dispatch drops as unknown until
    /// [`create_queues`](Self::create_queues) runs.
    pub fn new(enqueue_timeout: Option<Duration>, metrics: Arc<AdapterMetrics>) -> Self {
        Self {
            queues: ArcSwapOption::from_pointee(QueueMap::new()),
            enqueue_timeout,
            metrics,
        }
    }

    /// Create one bounded queue per job and return the receiving ends.
    ///
    /// Replaces any previous queue map; receivers of replaced queues see
    /// their queue close once in-flight dispatches finish.
    pub fn create_queues<'a>(
        &self,
        jobs: impl IntoIterator<Item = &'a str>,
        capacity: usize,
    ) -> HashMap<String, mpsc::Receiver<Sample>> {
        let capacity = capacity.max(1);
        let mut senders = QueueMap::new();
        let mut receivers = HashMap::new();
        for job in jobs {
            if senders.contains_key(job) {
                continue;
            }
            let (tx, rx) = mpsc::channel(capacity);
            senders.insert(job.to_string(), tx);
            receivers.insert(job.to_string(), rx);
        }
        debug!(queues = senders.len(), capacity, "delivery queues created");
        self.queues.store(Some(Arc::new(senders)));
        receivers
    }

    /// Route one sample to its job's queue.
    ///
    /// Awaits room when the queue is full, up to the enqueue timeout when one
    /// is configured. Dropping the returned future cancels the enqueue
    /// without side effects.
    pub async fn dispatch(&self, sample: Sample) -> Result<DispatchOutcome, RouteError> {
        let sender = {
            let guard = self.queues.load();
            let Some(queues) = guard.as_deref() else {
                self.count_drop(drop_reason::QUEUES_CLOSED);
                return Err(RouteError::QueuesClosed);
            };
            if !sample.has_job() {
                trace!(metric = %sample.metric_name, "sample without job label dropped");
                self.count_drop(drop_reason::NO_JOB);
                return Ok(DispatchOutcome::MissingJob);
            }
            match queues.get(&sample.job) {
                Some(sender) => sender.clone(),
                None => {
                    trace!(job = %sample.job, "no queue for job, sample dropped");
                    self.count_drop(drop_reason::UNKNOWN_JOB);
                    return Ok(DispatchOutcome::UnknownJob);
                }
            }
        };

        let job = sample.job.clone();
        let sent = match self.enqueue_timeout {
            Some(limit) => match tokio::time::timeout(limit, sender.send(sample)).await {
                Ok(sent) => sent,
                Err(_) => {
                    let millis = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    warn!(job = %job, millis, "enqueue timed out, sample dropped");
                    self.count_drop(drop_reason::ENQUEUE_TIMEOUT);
                    return Err(RouteError::EnqueueTimeout { job, millis });
                }
            },
            None => sender.send(sample).await,
        };

        match sent {
            Ok(()) => Ok(DispatchOutcome::Enqueued),
            Err(_) => {
                warn!(job = %job, "writer stopped, sample dropped");
                self.count_drop(drop_reason::WRITER_STOPPED);
                Err(RouteError::WriterStopped { job })
            }
        }
    }

    /// Close every queue. Returns `false` if they were already closed.
    pub fn close(&self) -> bool {
        let previous = self.queues.swap(None);
        if previous.is_some() {
            debug!("delivery queues closed");
        }
        previous.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.queues.load().is_none()
    }

    /// Jobs that have a queue, sorted.
    pub fn jobs(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self
            .queues
            .load()
            .as_deref()
            .map(|q| q.keys().cloned().collect())
            .unwrap_or_default();
        jobs.sort();
        jobs
    }

    fn count_drop(&self, reason: &str) {
        self.metrics
            .dropped_samples
            .with_label_values(&[reason])
            .inc();
    }
}
