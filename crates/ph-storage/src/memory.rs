//! In-memory store.
//!
//! Keeps committed rows per `(database, table)` and evaluates
//! [`AggregationQuery`] directly, with the same semantics the SQL rendering
//! has on ClickHouse: second-resolution timestamps, anchored regexes,
//! grouping by bucket, filtered columns and tags, ordered by bucket.
//!
//! Failures can be injected per stage to exercise the writer's failure
//! policy.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::StorageError;
use crate::query::{AggregationQuery, PredicateOp};
use crate::schema::{Column, InsertStatement, INSERT_COLUMNS};
use crate::store::{Connection, Store, Transaction};
use crate::value::{Row, Value};
use crate::{BUCKET_COLUMN, COUNT_COLUMN, VALUE_COLUMN};

/// A committed row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    strings: [String; 9],
    pub val: f64,
    /// Truncated to whole seconds, like a `DateTime` column.
    pub ts: DateTime<Utc>,
    pub date: NaiveDate,
    pub tags: Vec<String>,
}

impl StoredRow {
    fn from_params(params: Vec<Value>) -> Result<Self, StorageError> {
        let mut strings: [String; 9] = Default::default();
        let mut val = 0.0;
        let mut ts = DateTime::<Utc>::UNIX_EPOCH;
        let mut date = ts.date_naive();
        let mut tags = Vec::new();

        for (col, value) in INSERT_COLUMNS.iter().zip(params) {
            match (col, value) {
                (Column::Val, Value::Float64(v)) => val = v,
                (Column::Ts, Value::DateTime(t)) => {
                    ts = DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(ts);
                }
                (Column::Date, Value::DateTime(t)) => date = t.date_naive(),
                (Column::Tags, Value::StringArray(t)) => tags = t,
                (col, Value::String(s)) if col.index() < strings.len() => {
                    strings[col.index()] = s;
                }
                (col, other) => {
                    return Err(StorageError::Exec(format!(
                        "column {} cannot bind {}",
                        col.name(),
                        other.type_name()
                    )))
                }
            }
        }
        Ok(Self {
            strings,
            val,
            ts,
            date,
            tags,
        })
    }

    /// Value of a string column; empty for non-string columns.
    pub fn string(&self, column: Column) -> &str {
        self.strings
            .get(column.index())
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Injected failures. Counters are consumed one per matching operation.
#[derive(Debug, Default)]
struct Faults {
    fail_begins: usize,
    fail_prepares: usize,
    fail_commits: usize,
    /// Execs that fail as if the connection dropped mid-transaction.
    fail_execs: usize,
    /// Rows whose metric name equals this fail at exec.
    reject_metric: Option<String>,
    commit_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<(String, String), Vec<StoredRow>>,
    faults: Faults,
    commits: usize,
    connections: usize,
}

/// Thread-safe in-memory store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed rows of one table, in commit order.
    pub fn rows(&self, database: &str, table: &str) -> Vec<StoredRow> {
        self.lock()
            .tables
            .get(&(database.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn row_count(&self, database: &str, table: &str) -> usize {
        self.lock()
            .tables
            .get(&(database.to_string(), table.to_string()))
            .map_or(0, Vec::len)
    }

    /// Number of successful commits across all tables.
    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }

    /// Number of connections opened so far.
    pub fn connection_count(&self) -> usize {
        self.lock().connections
    }

    pub fn fail_next_begins(&self, n: usize) {
        self.lock().faults.fail_begins = n;
    }

    pub fn fail_next_prepares(&self, n: usize) {
        self.lock().faults.fail_prepares = n;
    }

    pub fn fail_next_commits(&self, n: usize) {
        self.lock().faults.fail_commits = n;
    }

    pub fn fail_next_execs(&self, n: usize) {
        self.lock().faults.fail_execs = n;
    }

    /// Make exec fail for every row whose metric name is `name`.
    pub fn reject_metric(&self, name: impl Into<String>) {
        self.lock().faults.reject_metric = Some(name.into());
    }

    /// Delay every commit, to simulate a slow store.
    pub fn set_commit_delay(&self, delay: Duration) {
        self.lock().faults.commit_delay = Some(delay);
    }

    fn evaluate(&self, query: &AggregationQuery) -> Result<Vec<Row>, StorageError> {
        let mut matchers = Vec::with_capacity(query.predicates.len());
        for p in &query.predicates {
            let regex = match p.op {
                PredicateOp::Match | PredicateOp::NotMatch => Some(
                    Regex::new(&p.anchored_pattern())
                        .map_err(|e| StorageError::Query(format!("invalid regex: {e}")))?,
                ),
                PredicateOp::Eq | PredicateOp::NotEq => None,
            };
            matchers.push((p, regex));
        }

        let start_date = DateTime::from_timestamp(query.start_secs, 0)
            .map(|t| t.date_naive())
            .unwrap_or(NaiveDate::MIN);

        type GroupKey = (i64, Vec<String>, Vec<String>);
        let mut groups: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();

        let state = self.lock();
        let key = (query.database.clone(), query.table.clone());
        let rows = state.tables.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        for row in rows {
            let ts = row.ts.timestamp();
            if row.date < start_date || ts < query.start_secs || ts > query.end_secs {
                continue;
            }
            let keep = matchers.iter().all(|(p, regex)| {
                let v = row.string(p.column);
                match (p.op, regex) {
                    (PredicateOp::Eq, _) => v == p.value,
                    (PredicateOp::NotEq, _) => v != p.value,
                    (PredicateOp::Match, Some(re)) => re.is_match(v),
                    (PredicateOp::NotMatch, Some(re)) => !re.is_match(v),
                    _ => false,
                }
            });
            if !keep {
                continue;
            }
            let group_values = query
                .group_columns
                .iter()
                .map(|c| row.string(*c).to_string())
                .collect();
            groups
                .entry((query.bucket_of(ts), group_values, row.tags.clone()))
                .or_default()
                .push(row.val);
        }
        drop(state);

        Ok(groups
            .into_iter()
            .map(|((bucket, group_values, tags), mut values)| {
                let mut out = Row::with_capacity(query.group_columns.len() + 4);
                out.push(COUNT_COLUMN, Value::UInt64(values.len() as u64));
                out.push(BUCKET_COLUMN, Value::UInt64((bucket * 1000) as u64));
                for (col, v) in query.group_columns.iter().zip(group_values) {
                    out.push(col.name(), Value::String(v));
                }
                out.push(Column::Tags.name(), Value::StringArray(tags));
                out.push(VALUE_COLUMN, Value::Float64(quantile(&mut values, query.quantile)));
                out
            })
            .collect())
    }
}

/// Linear-interpolated quantile.
fn quantile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    values[lo] + (values[hi] - values[lo]) * frac
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, StorageError> {
        self.lock().connections += 1;
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
        }))
    }

    async fn select(&self, query: &AggregationQuery) -> Result<Vec<Row>, StorageError> {
        self.evaluate(query)
    }
}

struct MemoryConnection {
    store: MemoryStore,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn begin(&mut self) -> Result<Box<dyn Transaction>, StorageError> {
        let mut state = self.store.lock();
        if state.faults.fail_begins > 0 {
            state.faults.fail_begins -= 1;
            return Err(StorageError::Begin("injected failure".to_string()));
        }
        Ok(Box::new(MemoryTransaction {
            store: self.store.clone(),
            target: None,
            pending: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    target: Option<(String, String)>,
    pending: Vec<StoredRow>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn prepare(&mut self, insert: &InsertStatement) -> Result<(), StorageError> {
        let mut state = self.store.lock();
        if state.faults.fail_prepares > 0 {
            state.faults.fail_prepares -= 1;
            return Err(StorageError::Prepare("injected failure".to_string()));
        }
        self.target = Some((insert.database.clone(), insert.table.clone()));
        Ok(())
    }

    async fn exec(&mut self, params: Vec<Value>) -> Result<(), StorageError> {
        if self.target.is_none() {
            return Err(StorageError::Exec("statement not prepared".to_string()));
        }
        InsertStatement::new("", "").check_params(&params)?;
        let row = StoredRow::from_params(params)?;
        {
            let mut state = self.store.lock();
            if state.faults.fail_execs > 0 {
                state.faults.fail_execs -= 1;
                return Err(StorageError::Connect("connection lost".to_string()));
            }
            if let Some(reject) = &state.faults.reject_metric {
                if row.string(Column::Name) == reject {
                    return Err(StorageError::Exec(format!("injected failure for {reject}")));
                }
            }
        }
        self.pending.push(row);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let Some(target) = self.target else {
            return Err(StorageError::Commit("statement not prepared".to_string()));
        };
        let delay = self.store.lock().faults.commit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.store.lock();
        if state.faults.fail_commits > 0 {
            state.faults.fail_commits -= 1;
            return Err(StorageError::Commit("injected failure".to_string()));
        }
        state.tables.entry(target).or_default().extend(self.pending);
        state.commits += 1;
        Ok(())
    }
}
