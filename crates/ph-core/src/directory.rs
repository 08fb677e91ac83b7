//! Job directory: the current job → table mapping.
//!
//! The mapping is an immutable snapshot behind an [`ArcSwap`]. A reload
//! builds a complete new map and swaps it in, so lookups never block and
//! never observe a half-built map.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use ph_config::JobEntry;

/// Shared job → table mapping, refreshed wholesale.
#[derive(Debug)]
pub struct JobDirectory {
    snapshot: ArcSwap<HashMap<String, String>>,
}

impl Default for JobDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl JobDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn from_entries(entries: &[JobEntry]) -> Self {
        let directory = Self::new();
        directory.load(entries);
        directory
    }

    /// Replace the whole mapping. When a job name repeats, the later entry
    /// wins.
    pub fn load(&self, entries: &[JobEntry]) {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if let Some(previous) = map.insert(entry.name.clone(), entry.table.clone()) {
                warn!(
                    job = %entry.name,
                    previous = %previous,
                    table = %entry.table,
                    "duplicate job entry, keeping the later table"
                );
            }
        }
        debug!(jobs = map.len(), "job directory loaded");
        self.snapshot.store(Arc::new(map));
    }

    /// Table for a job, if the job is known.
    pub fn table(&self, job: &str) -> Option<String> {
        self.snapshot.load().get(job).cloned()
    }

    /// The current snapshot. Later reloads do not affect it.
    pub fn snapshot(&self) -> Arc<HashMap<String, String>> {
        self.snapshot.load_full()
    }

    /// Current entries sorted by job name.
    pub fn entries(&self) -> Vec<JobEntry> {
        let snapshot = self.snapshot.load();
        let mut entries: Vec<JobEntry> = snapshot
            .iter()
            .map(|(name, table)| JobEntry::new(name.clone(), table.clone()))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_duplicate_wins() {
        let dir = JobDirectory::from_entries(&[
            JobEntry::new("node", "first"),
            JobEntry::new("pods", "pod_samples"),
            JobEntry::new("node", "second"),
        ]);
        assert_eq!(dir.table("node").as_deref(), Some("second"));
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn load_replaces_wholesale() {
        let dir = JobDirectory::from_entries(&[JobEntry::new("a", "ta")]);
        dir.load(&[JobEntry::new("b", "tb")]);
        assert_eq!(dir.table("a"), None);
        assert_eq!(dir.table("b").as_deref(), Some("tb"));
    }

    #[test]
    fn snapshot_is_stable_across_reload() {
        let dir = JobDirectory::from_entries(&[JobEntry::new("a", "ta")]);
        let before = dir.snapshot();
        dir.load(&[]);
        assert_eq!(before.get("a").map(String::as_str), Some("ta"));
        assert!(dir.is_empty());
    }

    #[test]
    fn entries_are_sorted() {
        let dir = JobDirectory::from_entries(&[
            JobEntry::new("zeta", "z"),
            JobEntry::new("alpha", "a"),
        ]);
        let names: Vec<_> = dir.entries().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        let dir = Arc::new(JobDirectory::new());
        let even: Vec<JobEntry> = (0..50)
            .map(|i| JobEntry::new(format!("job{i}"), "even"))
            .collect();
        let odd: Vec<JobEntry> = (0..50)
            .map(|i| JobEntry::new(format!("job{i}"), "odd"))
            .collect();
        dir.load(&even);

        let reader = {
            let dir = Arc::clone(&dir);
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    let snap = dir.snapshot();
                    let first = snap.get("job0").cloned();
                    assert!(snap.values().all(|t| Some(t) == first.as_ref()));
                }
            })
        };
        for i in 0..200 {
            dir.load(if i % 2 == 0 { &odd } else { &even });
        }
        reader.join().unwrap();
    }
}
