//! promhouse command-line tool.
//!
//! Operational helpers around the adapter library: validate a config file,
//! show the SQL a read query compiles to, and check that the configured
//! store answers.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

use ph_common::{Error, LabelMatcher, QuerySpec};
use ph_config::{resolve_config, AdapterConfig, ConfigError, ConfigSource};
use ph_core::{
    init_logging, AdapterError, AdapterMetrics, ExitCode, JobDirectory, LogFormat, QuerySettings,
    QueryTranslator,
};
use ph_storage::{ClickHouseStore, Store, Value, COUNT_COLUMN};

#[derive(Parser, Debug)]
#[command(name = "promhouse", version, about = "Prometheus remote storage on ClickHouse")]
struct Cli {
    /// Config file (default: $PROMHOUSE_CONFIG, then the XDG and system config dirs)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve, load and validate the config, then print the job table
    CheckConfig(CheckConfigArgs),
    /// Print the SQL a read query compiles to
    Explain(ExplainArgs),
    /// Run a trivial query against the configured store
    Ping,
}

#[derive(Args, Debug)]
struct CheckConfigArgs {
    /// Also print the effective configuration with defaults filled in
    #[arg(long)]
    show: bool,

    /// Print the job table as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ExplainArgs {
    /// Window start, milliseconds since the epoch
    #[arg(long)]
    start: i64,

    /// Window end, milliseconds since the epoch
    #[arg(long)]
    end: i64,

    /// Label matcher: name=value, name!=value, name=~regex or name!~regex
    #[arg(long = "match", value_name = "MATCHER")]
    matchers: Vec<LabelMatcher>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_format, cli.verbose) {
        eprintln!("warning: logging not initialised: {e}");
    }

    let code = match run(cli).await {
        Ok(()) => ExitCode::Clean,
        Err(err) => {
            error!(code = err.code(), error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::from(&err)
        }
    };
    std::process::exit(code.as_i32());
}

async fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Command::CheckConfig(args) => check_config(cli.config.as_deref(), &args),
        Command::Explain(args) => explain(cli.config.as_deref(), args),
        Command::Ping => ping(cli.config.as_deref()).await,
    }
}

fn load_config(cli_path: Option<&Path>) -> Result<(AdapterConfig, PathBuf, ConfigSource), Error> {
    let (path, source) = resolve_config(cli_path).map_err(AdapterError::from)?;
    let config = AdapterConfig::load(&path).map_err(AdapterError::from)?;
    debug!(path = %path.display(), source = %source, "configuration loaded");
    Ok((config, path, source))
}

fn check_config(cli_path: Option<&Path>, args: &CheckConfigArgs) -> Result<(), Error> {
    let (config, path, source) = load_config(cli_path)?;
    let directory = JobDirectory::from_entries(&config.jobs);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&directory.entries())?);
    } else {
        println!("config: {} ({source})", path.display());
        println!(
            "store:  {} database={}",
            config.clickhouse.url, config.clickhouse.database
        );
        println!("jobs:   {}", directory.len());
        for entry in directory.entries() {
            println!("  {:<32} -> {}", entry.name, entry.table);
        }
    }

    if args.show {
        let rendered = toml::to_string_pretty(&config)
            .map_err(|e| Error::Config(format!("cannot render config: {e}")))?;
        println!("\n{rendered}");
    }
    Ok(())
}

fn explain(cli_path: Option<&Path>, args: ExplainArgs) -> Result<(), Error> {
    // Explaining works without a config file; defaults stand in.
    let config = match resolve_config(cli_path) {
        Ok((path, _)) => AdapterConfig::load(&path).map_err(AdapterError::from)?,
        Err(ConfigError::NotFound { searched }) => {
            debug!(searched = %searched, "no config file found, using defaults");
            AdapterConfig::default()
        }
        Err(e) => return Err(AdapterError::from(e).into()),
    };

    let metrics = Arc::new(AdapterMetrics::new().map_err(AdapterError::from)?);
    let translator = QueryTranslator::new(
        QuerySettings::from_config(&config),
        Arc::new(JobDirectory::from_entries(&config.jobs)),
        metrics,
    );
    let spec = QuerySpec {
        start_timestamp_ms: args.start,
        end_timestamp_ms: args.end,
        matchers: args.matchers,
    };
    let query = translator.compile(&spec)?;
    println!("{}", query.to_sql());
    Ok(())
}

async fn ping(cli_path: Option<&Path>) -> Result<(), Error> {
    let (config, _, _) = load_config(cli_path)?;
    let store = ClickHouseStore::new(&config.clickhouse).map_err(AdapterError::from)?;

    let end = chrono::Utc::now().timestamp();
    let start = end - 60;
    let query = ph_storage::AggregationQuery::new(
        config.clickhouse.database.as_str(),
        config.reader.table.as_str(),
        start,
        end,
        60,
        config.reader.quantile,
    );
    let timeout = config.clickhouse.timeout();
    let rows = tokio::time::timeout(timeout, store.select(&query))
        .await
        .map_err(|_| Error::StorageTimeout {
            seconds: timeout.as_secs(),
        })?
        .map_err(AdapterError::from)?;

    let points: u64 = rows
        .iter()
        .filter_map(|r| r.get(COUNT_COLUMN).and_then(Value::as_i64))
        .map(|n| n.max(0) as u64)
        .sum();
    println!(
        "ok: {} answered, {}.{} has {} rows ({} raw points) in the last minute",
        config.clickhouse.url,
        config.clickhouse.database,
        config.reader.table,
        rows.len(),
        points
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn explain_parses_matchers() {
        let cli = Cli::try_parse_from([
            "promhouse",
            "explain",
            "--start",
            "0",
            "--end",
            "3600000",
            "--match",
            "__name__=up",
            "--match",
            "namespace=~\"prod-.*\"",
        ])
        .unwrap();
        let Command::Explain(args) = cli.command else {
            panic!("expected explain");
        };
        assert_eq!(args.matchers.len(), 2);
        assert_eq!(args.matchers[1].value, "prod-.*");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["promhouse", "ping", "--log-format", "json", "-vv"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn missing_explicit_config_is_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/promhouse.toml"))).unwrap_err();
        assert_eq!(ExitCode::from(&err), ExitCode::ConfigError);
    }

    #[test]
    fn check_config_accepts_valid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[jobs]]\nname = \"node\"\ntable = \"node_samples\"\n").unwrap();
        let args = CheckConfigArgs {
            show: true,
            json: false,
        };
        check_config(Some(&path), &args).unwrap();
    }

    #[test]
    fn explain_rejects_inverted_range() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        let args = ExplainArgs {
            start: 10,
            end: 0,
            matchers: Vec::new(),
        };
        let err = explain(Some(&path), args).unwrap_err();
        assert_eq!(err.code(), 20);
    }
}
