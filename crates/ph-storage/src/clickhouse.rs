//! ClickHouse backend over the HTTP interface.
//!
//! Inserts are buffered per transaction as `TabSeparated` rows and sent as a
//! single `INSERT ... FORMAT TabSeparated` request on commit, so the commit
//! is the only point where the store sees the batch. Selects are sent with
//! `FORMAT JSON` and decoded using the column types from the response meta.

use async_trait::async_trait;
use ph_config::ClickHouseConfig;
use reqwest::Client;
use serde_json::Value as Json;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::StorageError;
use crate::query::AggregationQuery;
use crate::schema::{ColumnKind, InsertStatement, INSERT_COLUMNS};
use crate::store::{Connection, Store, Transaction};
use crate::value::{Row, Value};

/// Connection settings shared by the store and its connections.
#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    database: String,
    user: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl Endpoint {
    fn client(&self) -> Result<Client, StorageError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| StorageError::Connect(e.to_string()))
    }

    /// POST a statement (and optional data) and return the response body.
    async fn post(
        &self,
        client: &Client,
        query: Option<&str>,
        body: String,
    ) -> Result<String, StorageError> {
        let mut req = client.post(&self.url).query(&[
            ("database", self.database.as_str()),
            ("date_time_input_format", "best_effort"),
            ("output_format_json_quote_64bit_integers", "0"),
            ("output_format_json_quote_denormals", "0"),
        ]);
        if let Some(q) = query {
            req = req.query(&[("query", q)]);
        }
        if let Some(user) = &self.user {
            req = req.basic_auth(user, self.password.as_deref());
        }

        let resp = req.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                StorageError::Timeout {
                    seconds: self.timeout.as_secs(),
                }
            } else {
                StorageError::Http(e)
            }
        })?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(StorageError::Query(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }
        Ok(text)
    }
}

/// Store backed by a ClickHouse server.
#[derive(Debug, Clone)]
pub struct ClickHouseStore {
    endpoint: Endpoint,
    client: Client,
}

impl ClickHouseStore {
    pub fn new(config: &ClickHouseConfig) -> Result<Self, StorageError> {
        let endpoint = Endpoint {
            url: config.url.clone(),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            timeout: config.timeout(),
        };
        let client = endpoint.client()?;
        Ok(Self { endpoint, client })
    }

    /// Run a textual query and decode its rows.
    pub async fn query_text(&self, sql: &str) -> Result<Vec<Row>, StorageError> {
        debug!(sql, "running query");
        let body = self
            .endpoint
            .post(&self.client, None, format!("{sql} FORMAT JSON"))
            .await?;
        decode_json_rows(&body)
    }
}

#[async_trait]
impl Store for ClickHouseStore {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, StorageError> {
        // A fresh client gives the connection its own pool.
        let client = self.endpoint.client()?;
        Ok(Box::new(ClickHouseConnection {
            endpoint: self.endpoint.clone(),
            client,
        }))
    }

    async fn select(&self, query: &AggregationQuery) -> Result<Vec<Row>, StorageError> {
        self.query_text(&query.to_sql()).await
    }
}

struct ClickHouseConnection {
    endpoint: Endpoint,
    client: Client,
}

#[async_trait]
impl Connection for ClickHouseConnection {
    async fn begin(&mut self) -> Result<Box<dyn Transaction>, StorageError> {
        Ok(Box::new(ClickHouseTransaction {
            endpoint: self.endpoint.clone(),
            client: self.client.clone(),
            statement: None,
            data: String::new(),
            rows: 0,
        }))
    }
}

struct ClickHouseTransaction {
    endpoint: Endpoint,
    client: Client,
    /// `INSERT INTO db.table (...) FORMAT TabSeparated`, set by prepare.
    statement: Option<String>,
    data: String,
    rows: usize,
}

#[async_trait]
impl Transaction for ClickHouseTransaction {
    async fn prepare(&mut self, insert: &InsertStatement) -> Result<(), StorageError> {
        if insert.table.is_empty() || insert.database.is_empty() {
            return Err(StorageError::Prepare(
                "database and table must be set".to_string(),
            ));
        }
        let cols = insert
            .columns()
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(",");
        self.statement = Some(format!(
            "INSERT INTO {}.{} ({cols}) FORMAT TabSeparated",
            insert.database, insert.table
        ));
        Ok(())
    }

    async fn exec(&mut self, params: Vec<Value>) -> Result<(), StorageError> {
        if self.statement.is_none() {
            return Err(StorageError::Exec("statement not prepared".to_string()));
        }
        let line = encode_tsv_row(&params)?;
        self.data.push_str(&line);
        self.data.push('\n');
        self.rows += 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let Some(statement) = self.statement else {
            return Err(StorageError::Commit("statement not prepared".to_string()));
        };
        if self.rows == 0 {
            return Ok(());
        }
        trace!(rows = self.rows, bytes = self.data.len(), "sending insert");
        self.endpoint
            .post(&self.client, Some(&statement), self.data)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Commit(e.to_string()))
    }
}

/// Encode one parameter row in insert column order.
fn encode_tsv_row(params: &[Value]) -> Result<String, StorageError> {
    if params.len() != INSERT_COLUMNS.len() {
        return Err(StorageError::Exec(format!(
            "expected {} parameters, got {}",
            INSERT_COLUMNS.len(),
            params.len()
        )));
    }
    let mut line = String::with_capacity(128);
    for (i, (col, value)) in INSERT_COLUMNS.iter().zip(params).enumerate() {
        col.check(value)?;
        if i > 0 {
            line.push('\t');
        }
        match (col.kind(), value) {
            (ColumnKind::String, Value::String(s)) => escape_tsv(s, &mut line),
            (ColumnKind::Float64, Value::Float64(v)) => line.push_str(&format_float(*v)),
            (ColumnKind::DateTime, Value::DateTime(ts)) => {
                let _ = write!(line, "{}", ts.timestamp());
            }
            (ColumnKind::Date, Value::DateTime(ts)) => {
                // UTC calendar day, matching the read-side date bound.
                let _ = write!(line, "{}", ts.date_naive());
            }
            (ColumnKind::StringArray, Value::StringArray(items)) => {
                line.push('[');
                for (j, item) in items.iter().enumerate() {
                    if j > 0 {
                        line.push(',');
                    }
                    quote_array_item(item, &mut line);
                }
                line.push(']');
            }
            // Unreachable after `check`, kept as a row error rather than a panic.
            (_, other) => {
                return Err(StorageError::Exec(format!(
                    "column {} cannot bind {}",
                    col.name(),
                    other.type_name()
                )))
            }
        }
    }
    Ok(line)
}

fn escape_tsv(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
}

fn quote_array_item(s: &str, out: &mut String) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        v.to_string()
    }
}

/// Decode a `FORMAT JSON` response into rows, typed by its meta section.
fn decode_json_rows(body: &str) -> Result<Vec<Row>, StorageError> {
    let doc: Json = serde_json::from_str(body)
        .map_err(|e| StorageError::MalformedResponse(format!("invalid JSON: {e}")))?;

    let meta = doc
        .get("meta")
        .and_then(Json::as_array)
        .ok_or_else(|| StorageError::MalformedResponse("missing meta".to_string()))?;
    let columns = meta
        .iter()
        .map(|m| {
            let name = m.get("name").and_then(Json::as_str);
            let ty = m.get("type").and_then(Json::as_str);
            match (name, ty) {
                (Some(n), Some(t)) => Ok((n.to_string(), t.to_string())),
                _ => Err(StorageError::MalformedResponse(
                    "meta entry without name/type".to_string(),
                )),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let data = doc
        .get("data")
        .and_then(Json::as_array)
        .ok_or_else(|| StorageError::MalformedResponse("missing data".to_string()))?;

    data.iter()
        .map(|record| {
            let mut row = Row::with_capacity(columns.len());
            for (name, ty) in &columns {
                let raw = record.get(name).unwrap_or(&Json::Null);
                row.push(name.clone(), decode_json_value(ty, raw)?);
            }
            Ok(row)
        })
        .collect()
}

fn decode_json_value(ty: &str, raw: &Json) -> Result<Value, StorageError> {
    let ty = strip_wrappers(ty);
    let bad = || StorageError::MalformedResponse(format!("cannot decode {raw} as {ty}"));

    if raw.is_null() {
        return Ok(Value::Null);
    }
    if ty.starts_with("Array(") {
        let items = raw.as_array().ok_or_else(bad)?;
        return items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(bad))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::StringArray);
    }
    if ty.starts_with("UInt") {
        return match raw {
            Json::Number(n) => n.as_u64().map(Value::UInt64).ok_or_else(bad),
            Json::String(s) => s.parse().map(Value::UInt64).map_err(|_| bad()),
            _ => Err(bad()),
        };
    }
    if ty.starts_with("Int") {
        return match raw {
            Json::Number(n) => n.as_i64().map(Value::Int64).ok_or_else(bad),
            Json::String(s) => s.parse().map(Value::Int64).map_err(|_| bad()),
            _ => Err(bad()),
        };
    }
    if ty.starts_with("Float") {
        return match raw {
            Json::Number(n) => n.as_f64().map(Value::Float64).ok_or_else(bad),
            Json::String(s) => match s.as_str() {
                "nan" => Ok(Value::Float64(f64::NAN)),
                "inf" | "+inf" => Ok(Value::Float64(f64::INFINITY)),
                "-inf" => Ok(Value::Float64(f64::NEG_INFINITY)),
                other => other.parse().map(Value::Float64).map_err(|_| bad()),
            },
            _ => Err(bad()),
        };
    }
    match raw {
        Json::String(s) => Ok(Value::String(s.clone())),
        other => Ok(Value::String(other.to_string())),
    }
}

/// `Nullable(T)` / `LowCardinality(T)` decode as `T`.
fn strip_wrappers(ty: &str) -> &str {
    let mut ty = ty;
    for wrapper in ["Nullable(", "LowCardinality("] {
        if let Some(inner) = ty.strip_prefix(wrapper).and_then(|t| t.strip_suffix(')')) {
            ty = inner;
        }
    }
    ty
}
