//! promhouse configuration loading and validation.
//!
//! This crate provides:
//! - Typed structs for the adapter's TOML configuration file
//! - The job list (`[[jobs]]`) that maps routing jobs to storage tables
//! - Config resolution (CLI → env → XDG → /etc)
//! - Semantic validation with typed errors

pub mod config;
pub mod error;
pub mod jobs;
pub mod resolve;

pub use config::{
    AdapterConfig, ClickHouseConfig, ReaderConfig, ReloadConfig, ShutdownConfig, WriterConfig,
};
pub use error::ConfigError;
pub use jobs::{load_jobs, validate_identifier, validate_jobs, JobEntry};
pub use resolve::{resolve_config, ConfigPaths, ConfigSource};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "PROMHOUSE_CONFIG";

/// File name looked up in the XDG and system config directories.
pub const CONFIG_FILE_NAME: &str = "config.toml";
