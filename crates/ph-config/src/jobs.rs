//! Job → table routing entries.
//!
//! Jobs live in the main config file as an array of tables:
//!
//! ```toml
//! [[jobs]]
//! name = "kubernetes-pods"
//! table = "k8s_samples"
//! ```
//!
//! The list is read once at startup and re-read by the config watcher when
//! the file changes; only this section is reloaded live.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// A routing entry: samples labelled `job = name` go to `table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEntry {
    pub name: String,
    pub table: String,
}

impl JobEntry {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
        }
    }
}

/// The subset of the config file the watcher cares about.
#[derive(Debug, Default, Deserialize)]
struct JobsSection {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

/// Read only the `[[jobs]]` section of a config file and validate it.
pub fn load_jobs(path: &Path) -> Result<Vec<JobEntry>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let section: JobsSection = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate_jobs(&section.jobs)?;
    Ok(section.jobs)
}

/// Validate job entries. Duplicate names are allowed (the later entry wins
/// when the list is loaded into a directory) but logged.
pub fn validate_jobs(jobs: &[JobEntry]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for job in jobs {
        if job.name.is_empty() {
            return Err(ConfigError::invalid("jobs.name", "job name must not be empty"));
        }
        validate_identifier("jobs.table", &job.table)?;
        if !seen.insert(job.name.as_str()) {
            tracing::warn!(job = %job.name, table = %job.table, "duplicate job entry, later entry wins");
        }
    }
    Ok(())
}

/// Check that a database or table name is a plain SQL identifier
/// (`[A-Za-z_][A-Za-z0-9_]*`). Names are interpolated into queries, so
/// anything else is rejected at load time.
pub fn validate_identifier(field: &str, name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            field: field.to_string(),
            name: name.to_string(),
        })
    }
}
