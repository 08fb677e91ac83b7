//! Job-list reload by polling the config file's modification time.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ph_config::{load_jobs, ConfigError, JobEntry};

/// Polls one config file and reports job-list changes.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    interval: Duration,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// The file's current modification time is the baseline; only later
    /// changes are reported.
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        let last_modified = modified(&path);
        Self {
            path,
            interval,
            last_modified,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the file once. Returns `None` when it has not changed since
    /// the last poll, otherwise the result of re-reading the job list.
    ///
    /// A failed read still advances the baseline, so a broken file is
    /// reported once rather than on every poll.
    pub fn poll(&mut self) -> Option<Result<Vec<JobEntry>, ConfigError>> {
        let current = modified(&self.path);
        if current.is_none() || current == self.last_modified {
            return None;
        }
        self.last_modified = current;
        Some(load_jobs(&self.path))
    }

    /// Poll until `shutdown` turns true, handing each successfully parsed
    /// job list to `apply`. Parse failures keep the previous list.
    pub async fn run<F>(mut self, mut shutdown: watch::Receiver<bool>, mut apply: F)
    where
        F: FnMut(Vec<JobEntry>) + Send,
    {
        info!(path = %self.path.display(), interval_secs = self.interval.as_secs(), "watching config");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => match self.poll() {
                    None => {}
                    Some(Ok(jobs)) => {
                        debug!(path = %self.path.display(), jobs = jobs.len(), "config changed");
                        apply(jobs);
                    }
                    Some(Err(e)) => {
                        warn!(path = %self.path.display(), error = %e, "config reload failed, keeping previous jobs");
                    }
                },
            }
        }
        debug!(path = %self.path.display(), "config watcher stopped");
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
