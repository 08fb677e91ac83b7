//! Read-path query translation.
//!
//! A remote-read query spec (time window plus label matchers) compiles into
//! one [`AggregationQuery`]: a time-bucketed quantile over the job's table,
//! filtered by the matchers whose labels have a dedicated column. Result
//! rows are folded back into series keyed by their sorted label pairs.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use ph_common::labels;
use ph_common::{Label, LabelMatcher, MatchType, QuerySpec, ReadRequest, SamplePoint, TimeSeries};
use ph_config::AdapterConfig;
use ph_storage::{
    AggregationQuery, Column, Predicate, PredicateOp, Row, Store, StorageError, Value,
    BUCKET_COLUMN, COUNT_COLUMN, VALUE_COLUMN,
};

use crate::directory::JobDirectory;
use crate::metrics::AdapterMetrics;

/// Separator between label names and values in a series key. The byte
/// never occurs in UTF-8 text, so keys of distinct label sets differ.
pub const SERIES_KEY_SEPARATOR: u8 = 0xff;

/// Read-path failures. Any of them aborts the whole read.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("start time {start_ms} is after end time {end_ms}")]
    InvalidRange { start_ms: i64, end_ms: i64 },

    #[error("invalid sample budget: {0} (must be at least 1)")]
    InvalidSampleBudget(i64),

    #[error("invalid regex for label '{label}': {source}")]
    InvalidRegex {
        label: String,
        #[source]
        source: regex::Error,
    },

    #[error("query timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<QueryError> for ph_common::Error {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidRange { start_ms, end_ms } => {
                ph_common::Error::InvalidRange { start_ms, end_ms }
            }
            QueryError::InvalidSampleBudget(n) => ph_common::Error::InvalidSampleBudget(n),
            QueryError::InvalidRegex { .. } => ph_common::Error::InvalidMatcher(err.to_string()),
            QueryError::Timeout { seconds } => ph_common::Error::StorageTimeout { seconds },
            QueryError::Storage(StorageError::Timeout { seconds }) => {
                ph_common::Error::StorageTimeout { seconds }
            }
            QueryError::Storage(e) => ph_common::Error::Storage(e.to_string()),
        }
    }
}

/// Translator settings, normally taken from the `[reader]` and
/// `[clickhouse]` config sections.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySettings {
    pub database: String,
    /// Table used when a query names no known job.
    pub default_table: String,
    pub max_samples: i64,
    pub min_period_secs: i64,
    pub quantile: f64,
    /// Upper bound on each store select.
    pub timeout: Duration,
}

impl QuerySettings {
    pub fn from_config(config: &AdapterConfig) -> Self {
        Self {
            database: config.clickhouse.database.clone(),
            default_table: config.reader.table.clone(),
            max_samples: config.reader.max_samples,
            min_period_secs: config.reader.min_period_secs,
            quantile: config.reader.quantile,
            timeout: config.clickhouse.timeout(),
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self::from_config(&AdapterConfig::default())
    }
}

/// Bucket width in seconds for a window: the period split into at most
/// `max_samples` buckets, never narrower than `min_period_secs` nor 1s.
pub fn bucket_width(
    start_secs: i64,
    end_secs: i64,
    max_samples: i64,
    min_period_secs: i64,
) -> Result<i64, QueryError> {
    if max_samples < 1 {
        return Err(QueryError::InvalidSampleBudget(max_samples));
    }
    let period = end_secs.saturating_sub(start_secs);
    Ok((period / max_samples).max(min_period_secs).max(1))
}

/// Column backing a label, if the label is promoted.
pub fn column_for_label(name: &str) -> Option<Column> {
    match name {
        labels::METRIC_NAME => Some(Column::Name),
        labels::JOB => Some(Column::Job),
        labels::NAMESPACE => Some(Column::Namespace),
        labels::IP => Some(Column::Ip),
        labels::SHARD => Some(Column::Shard),
        labels::APP => Some(Column::App),
        labels::COMPONENT => Some(Column::Component),
        labels::KEYSPACE => Some(Column::Keyspace),
        labels::CONTAINER => Some(Column::ContainerName),
        _ => None,
    }
}

/// Label name for a promoted column.
fn label_for_column(column: Column) -> Option<&'static str> {
    match column {
        Column::Name => Some(labels::METRIC_NAME),
        Column::Job => Some(labels::JOB),
        Column::Namespace => Some(labels::NAMESPACE),
        Column::Ip => Some(labels::IP),
        Column::Shard => Some(labels::SHARD),
        Column::App => Some(labels::APP),
        Column::Component => Some(labels::COMPONENT),
        Column::Keyspace => Some(labels::KEYSPACE),
        Column::ContainerName => Some(labels::CONTAINER),
        Column::Val | Column::Ts | Column::Date | Column::Tags => None,
    }
}

fn predicate_op(match_type: MatchType) -> PredicateOp {
    match match_type {
        MatchType::Equal => PredicateOp::Eq,
        MatchType::NotEqual => PredicateOp::NotEq,
        MatchType::RegexMatch => PredicateOp::Match,
        MatchType::RegexNoMatch => PredicateOp::NotMatch,
    }
}

/// Deterministic key for a label set: pairs sorted by name then value,
/// names and values joined with [`SERIES_KEY_SEPARATOR`].
pub fn series_key(labels: &[Label]) -> Vec<u8> {
    let mut sorted: Vec<&Label> = labels.iter().collect();
    sorted.sort();
    let mut key = Vec::new();
    for label in sorted {
        key.extend_from_slice(label.name.as_bytes());
        key.push(SERIES_KEY_SEPARATOR);
        key.extend_from_slice(label.value.as_bytes());
        key.push(SERIES_KEY_SEPARATOR);
    }
    key
}

/// Labels of one result row: non-empty promoted columns plus the entries of
/// the tag array, sorted and deduplicated.
pub fn labels_from_row(row: &Row) -> Vec<Label> {
    let mut out = Vec::new();
    for (name, value) in row.iter() {
        if name == COUNT_COLUMN || name == BUCKET_COLUMN || name == VALUE_COLUMN {
            continue;
        }
        match value {
            Value::String(v) if !v.is_empty() => {
                let label = Column::from_name(name)
                    .and_then(label_for_column)
                    .unwrap_or(name);
                out.push(Label::new(label, v.as_str()));
            }
            Value::StringArray(tags) => {
                out.extend(
                    tags.iter()
                        .filter_map(|t| labels::split_tag(t))
                        .map(|(n, v)| Label::new(n, v)),
                );
            }
            _ => {}
        }
    }
    out.sort();
    out.dedup();
    out
}

/// Compiles query specs and folds result rows into series.
#[derive(Debug, Clone)]
pub struct QueryTranslator {
    settings: QuerySettings,
    directory: Arc<JobDirectory>,
    metrics: Arc<AdapterMetrics>,
}

impl QueryTranslator {
    pub fn new(
        settings: QuerySettings,
        directory: Arc<JobDirectory>,
        metrics: Arc<AdapterMetrics>,
    ) -> Self {
        Self {
            settings,
            directory,
            metrics,
        }
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    /// Table for a spec: the table of its `job` equality matcher when that
    /// job is known, else the default table.
    fn table_for(&self, spec: &QuerySpec) -> String {
        spec.matchers
            .iter()
            .filter(|m| m.name == labels::JOB && m.match_type == MatchType::Equal)
            .find_map(|m| self.directory.table(&m.value))
            .unwrap_or_else(|| self.settings.default_table.clone())
    }

    /// Predicate for one matcher, or `None` when its label has no column.
    ///
    /// Regex matchers are validated here with the `regex` crate, but the
    /// store evaluates them with RE2 `match()`. The two dialects share the
    /// common syntax; a pattern using a construct only one of them accepts
    /// can pass this check and still fail (or match differently) in
    /// ClickHouse.
    fn predicate(&self, matcher: &LabelMatcher) -> Result<Option<Predicate>, QueryError> {
        let Some(column) = column_for_label(&matcher.name) else {
            debug!(label = %matcher.name, matcher = %matcher, "no column for label, matcher ignored");
            self.metrics.ignored_matchers.inc();
            return Ok(None);
        };
        let predicate = Predicate::new(column, predicate_op(matcher.match_type), &matcher.value);
        if matcher.match_type.is_regex() {
            Regex::new(&predicate.anchored_pattern()).map_err(|source| {
                QueryError::InvalidRegex {
                    label: matcher.name.clone(),
                    source,
                }
            })?;
        }
        Ok(Some(predicate))
    }

    /// Compile one spec into an aggregation query.
    pub fn compile(&self, spec: &QuerySpec) -> Result<AggregationQuery, QueryError> {
        if spec.start_timestamp_ms > spec.end_timestamp_ms {
            return Err(QueryError::InvalidRange {
                start_ms: spec.start_timestamp_ms,
                end_ms: spec.end_timestamp_ms,
            });
        }
        let start = spec.start_timestamp_ms.div_euclid(1000);
        let end = spec.end_timestamp_ms.div_euclid(1000);
        let bucket = bucket_width(
            start,
            end,
            self.settings.max_samples,
            self.settings.min_period_secs,
        )?;

        let mut query = AggregationQuery::new(
            self.settings.database.as_str(),
            self.table_for(spec),
            start,
            end,
            bucket,
            self.settings.quantile,
        );
        for matcher in &spec.matchers {
            if let Some(predicate) = self.predicate(matcher)? {
                query.filter(predicate);
            }
        }
        Ok(query)
    }

    /// Run every spec of a read request and merge the resulting series.
    ///
    /// Series are returned sorted by series key. Any failure aborts the
    /// whole read.
    pub async fn read(
        &self,
        store: &dyn Store,
        request: &ReadRequest,
    ) -> Result<Vec<TimeSeries>, QueryError> {
        let started = std::time::Instant::now();
        self.metrics.read_requests.inc();
        let result = self.read_inner(store, request).await;
        self.metrics
            .read_duration
            .observe(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            self.metrics.read_failures.inc();
            warn!(error = %e, queries = request.queries.len(), "read failed");
        }
        result
    }

    async fn read_inner(
        &self,
        store: &dyn Store,
        request: &ReadRequest,
    ) -> Result<Vec<TimeSeries>, QueryError> {
        let mut series: BTreeMap<Vec<u8>, TimeSeries> = BTreeMap::new();
        for spec in &request.queries {
            let query = self.compile(spec)?;
            let rows = tokio::time::timeout(self.settings.timeout, store.select(&query))
                .await
                .map_err(|_| QueryError::Timeout {
                    seconds: self.settings.timeout.as_secs(),
                })??;
            debug!(
                table = %query.table,
                bucket_secs = query.bucket_secs,
                rows = rows.len(),
                "query executed"
            );
            fold_rows(&mut series, &rows)?;
        }
        Ok(series.into_values().collect())
    }
}

/// Append each row's point to the series of its label set.
fn fold_rows(series: &mut BTreeMap<Vec<u8>, TimeSeries>, rows: &[Row]) -> Result<(), QueryError> {
    for row in rows {
        let timestamp_ms = row
            .get(BUCKET_COLUMN)
            .and_then(Value::as_i64)
            .ok_or_else(|| missing(BUCKET_COLUMN))?;
        let value = row
            .get(VALUE_COLUMN)
            .and_then(Value::as_f64)
            .ok_or_else(|| missing(VALUE_COLUMN))?;
        let labels = labels_from_row(row);
        series
            .entry(series_key(&labels))
            .or_insert_with(|| TimeSeries {
                labels,
                samples: Vec::new(),
            })
            .samples
            .push(SamplePoint {
                value,
                timestamp_ms,
            });
    }
    Ok(())
}

fn missing(column: &str) -> QueryError {
    QueryError::Storage(StorageError::MalformedResponse(format!(
        "result row has no usable '{column}' column"
    )))
}
