//! Typed aggregation query.
//!
//! The read path supports exactly one query shape: a time-bucketed quantile
//! over a table, filtered by a time window and by equality/regex predicates
//! on string columns, grouped by bucket, the filtered columns, and the tag
//! array. Backends either render it to SQL ([`AggregationQuery::to_sql`]) or
//! evaluate it directly.
//!
//! All string literals go through [`quote_literal`]; nothing else in the
//! crate builds SQL text from user input.

use std::fmt::Write as _;

use crate::schema::Column;
use crate::{BUCKET_COLUMN, COUNT_COLUMN, VALUE_COLUMN};

/// Predicate operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateOp {
    Eq,
    NotEq,
    /// Full-string regex match.
    Match,
    /// Full-string regex non-match.
    NotMatch,
}

/// A filter on one string column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub column: Column,
    pub op: PredicateOp,
    pub value: String,
}

impl Predicate {
    pub fn new(column: Column, op: PredicateOp, value: impl Into<String>) -> Self {
        Self {
            column,
            op,
            value: value.into(),
        }
    }

    /// Regex patterns are anchored at both ends, matching label-matcher
    /// semantics rather than the store's substring search.
    pub fn anchored_pattern(&self) -> String {
        anchor_regex(&self.value)
    }

    fn render(&self, out: &mut String) {
        let col = self.column.name();
        // Writing to a String cannot fail.
        let _ = match self.op {
            PredicateOp::Eq => write!(out, "{col} = {}", quote_literal(&self.value)),
            PredicateOp::NotEq => write!(out, "{col} != {}", quote_literal(&self.value)),
            PredicateOp::Match => write!(
                out,
                "match({col}, {}) = 1",
                quote_literal(&self.anchored_pattern())
            ),
            PredicateOp::NotMatch => write!(
                out,
                "match({col}, {}) = 0",
                quote_literal(&self.anchored_pattern())
            ),
        };
    }
}

/// Anchor a regex so it must match the whole value.
pub fn anchor_regex(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

/// Quote a string as a single-quoted SQL literal. Backslashes and quotes are
/// escaped so the value can never terminate the literal.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// A compiled read query.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationQuery {
    pub database: String,
    pub table: String,
    /// Inclusive window start, seconds since the epoch.
    pub start_secs: i64,
    /// Inclusive window end, seconds since the epoch.
    pub end_secs: i64,
    /// Bucket width in seconds; always at least 1.
    pub bucket_secs: i64,
    pub quantile: f64,
    /// Filtered columns, selected and grouped on, in first-seen order.
    pub group_columns: Vec<Column>,
    pub predicates: Vec<Predicate>,
}

impl AggregationQuery {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        start_secs: i64,
        end_secs: i64,
        bucket_secs: i64,
        quantile: f64,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            start_secs,
            end_secs,
            bucket_secs: bucket_secs.max(1),
            quantile,
            group_columns: Vec::new(),
            predicates: Vec::new(),
        }
    }

    /// Add a predicate; its column joins the select/group list once.
    pub fn filter(&mut self, predicate: Predicate) {
        if !self.group_columns.contains(&predicate.column) {
            self.group_columns.push(predicate.column);
        }
        self.predicates.push(predicate);
    }

    /// Bucket start (seconds) for a raw timestamp.
    pub fn bucket_of(&self, ts_secs: i64) -> i64 {
        ts_secs.div_euclid(self.bucket_secs) * self.bucket_secs
    }

    /// Render as ClickHouse SQL.
    ///
    /// The `date` bound is computed in UTC, the same calendar the insert
    /// path uses to fill the `date` column.
    pub fn to_sql(&self) -> String {
        let b = self.bucket_secs;
        let mut group = String::new();
        for col in &self.group_columns {
            group.push_str(col.name());
            group.push_str(", ");
        }
        group.push_str(Column::Tags.name());

        let mut sql = format!(
            "SELECT count() AS {COUNT_COLUMN}, \
             (intDiv(toUInt32(ts), {b}) * {b}) * 1000 AS {BUCKET_COLUMN}, \
             {group}, quantile({q})(val) AS {VALUE_COLUMN} \
             FROM {db}.{table} \
             WHERE date >= toDate(toDateTime({start}, 'UTC')) AND ts >= toDateTime({start}) AND ts <= toDateTime({end})",
            q = self.quantile,
            db = self.database,
            table = self.table,
            start = self.start_secs,
            end = self.end_secs,
        );
        for p in &self.predicates {
            sql.push_str(" AND ");
            p.render(&mut sql);
        }
        let _ = write!(sql, " GROUP BY {BUCKET_COLUMN}, {group} ORDER BY {BUCKET_COLUMN} ASC");
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AggregationQuery {
        AggregationQuery::new("metrics", "samples", 0, 3600, 60, 0.75)
    }

    #[test]
    fn renders_without_predicates() {
        let sql = base().to_sql();
        assert_eq!(
            sql,
            "SELECT count() AS CNT, (intDiv(toUInt32(ts), 60) * 60) * 1000 AS t, tags, \
             quantile(0.75)(val) AS value FROM metrics.samples \
             WHERE date >= toDate(toDateTime(0, 'UTC')) AND ts >= toDateTime(0) AND ts <= toDateTime(3600) \
             GROUP BY t, tags ORDER BY t ASC"
        );
    }

    #[test]
    fn renders_each_operator() {
        let mut q = base();
        q.filter(Predicate::new(Column::Namespace, PredicateOp::Eq, "foo"));
        q.filter(Predicate::new(Column::Job, PredicateOp::NotEq, "bar"));
        q.filter(Predicate::new(Column::Name, PredicateOp::Match, "http_.*"));
        q.filter(Predicate::new(Column::App, PredicateOp::NotMatch, "a|b"));
        let sql = q.to_sql();
        assert!(sql.contains(" AND namespace = 'foo'"));
        assert!(sql.contains(" AND job != 'bar'"));
        assert!(sql.contains(" AND match(name, '^(?:http_.*)$') = 1"));
        assert!(sql.contains(" AND match(app, '^(?:a|b)$') = 0"));
        assert!(sql.contains("GROUP BY t, namespace, job, name, app, tags ORDER BY t ASC"));
        assert!(sql.contains("AS t, namespace, job, name, app, tags, quantile"));
    }

    #[test]
    fn repeated_column_grouped_once() {
        let mut q = base();
        q.filter(Predicate::new(Column::Job, PredicateOp::NotEq, "a"));
        q.filter(Predicate::new(Column::Job, PredicateOp::NotEq, "b"));
        assert_eq!(q.group_columns, vec![Column::Job]);
        assert_eq!(q.predicates.len(), 2);
    }

    #[test]
    fn quotes_cannot_escape_literal() {
        assert_eq!(quote_literal("it's"), r"'it\'s'");
        assert_eq!(quote_literal(r"a\'b"), r"'a\\\'b'");
        assert_eq!(quote_literal("x' OR 1=1 --"), r"'x\' OR 1=1 --'");
        assert_eq!(quote_literal("line\nbreak"), r"'line\nbreak'");
    }

    #[test]
    fn regex_backslashes_survive_quoting() {
        let p = Predicate::new(Column::Ip, PredicateOp::Match, r"10\.0\..*");
        let mut out = String::new();
        p.render(&mut out);
        assert_eq!(out, r"match(ip, '^(?:10\\.0\\..*)$') = 1");
    }

    #[test]
    fn bucket_floor_and_min_width() {
        let q = AggregationQuery::new("m", "t", 0, 10, 0, 0.5);
        assert_eq!(q.bucket_secs, 1);
        let q = base();
        assert_eq!(q.bucket_of(119), 60);
        assert_eq!(q.bucket_of(120), 120);
    }
}
