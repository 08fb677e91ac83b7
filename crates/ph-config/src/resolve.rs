//! Config file resolution.
//!
//! Lookup order: explicit CLI path → `PROMHOUSE_CONFIG` → XDG config dir
//! (`$XDG_CONFIG_HOME/promhouse/config.toml`) → `/etc/promhouse/config.toml`.
//! The first two are taken as-is even when the file is missing so a typo
//! surfaces as an error instead of silently picking another file.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::{CONFIG_ENV, CONFIG_FILE_NAME};

/// Where the resolved config path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env,
    Xdg,
    System,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Cli => write!(f, "cli"),
            ConfigSource::Env => write!(f, "env"),
            ConfigSource::Xdg => write!(f, "xdg"),
            ConfigSource::System => write!(f, "system"),
        }
    }
}

/// Candidate locations, captured up front so resolution is testable.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub cli: Option<PathBuf>,
    pub env: Option<PathBuf>,
    pub xdg: Option<PathBuf>,
    pub system: Option<PathBuf>,
}

impl ConfigPaths {
    /// Gather candidates from the process environment.
    pub fn from_env(cli: Option<&Path>) -> Self {
        Self {
            cli: cli.map(Path::to_path_buf),
            env: std::env::var_os(CONFIG_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            xdg: dirs::config_dir().map(|d| d.join("promhouse").join(CONFIG_FILE_NAME)),
            system: Some(PathBuf::from("/etc/promhouse").join(CONFIG_FILE_NAME)),
        }
    }

    /// Pick the first applicable candidate.
    pub fn resolve(&self) -> Result<(PathBuf, ConfigSource), ConfigError> {
        if let Some(p) = &self.cli {
            return Ok((p.clone(), ConfigSource::Cli));
        }
        if let Some(p) = &self.env {
            return Ok((p.clone(), ConfigSource::Env));
        }
        if let Some(p) = self.xdg.as_ref().filter(|p| p.is_file()) {
            return Ok((p.clone(), ConfigSource::Xdg));
        }
        if let Some(p) = self.system.as_ref().filter(|p| p.is_file()) {
            return Ok((p.clone(), ConfigSource::System));
        }

        let searched = [&self.xdg, &self.system]
            .into_iter()
            .flatten()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::NotFound { searched })
    }
}

/// Resolve the config path for this process.
pub fn resolve_config(cli: Option<&Path>) -> Result<(PathBuf, ConfigSource), ConfigError> {
    let (path, source) = ConfigPaths::from_env(cli).resolve()?;
    tracing::debug!(path = %path.display(), %source, "resolved config path");
    Ok((path, source))
}
