//! Parameter and result values.

use chrono::{DateTime, Utc};

/// A value bound to an insert parameter or read from a result column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Float64(f64),
    UInt64(u64),
    Int64(i64),
    DateTime(DateTime<Utc>),
    StringArray(Vec<String>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value. Integers widen; `Null` reads as NaN, which
    /// is how the store reports an empty aggregate.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            Value::UInt64(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Null => Some(f64::NAN),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::Float64(v) if v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            Value::StringArray(v) => Some(v),
            _ => None,
        }
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::String(_) => "String",
            Value::Float64(_) => "Float64",
            Value::UInt64(_) => "UInt64",
            Value::Int64(_) => "Int64",
            Value::DateTime(_) => "DateTime",
            Value::StringArray(_) => "Array(String)",
        }
    }
}

/// One result row: named columns in result order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            columns: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.columns.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_views() {
        assert_eq!(Value::UInt64(60_000).as_i64(), Some(60_000));
        assert_eq!(Value::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(Value::Int64(-3).as_f64(), Some(-3.0));
        assert!(Value::Null.as_f64().unwrap().is_nan());
        assert_eq!(Value::String("1".into()).as_f64(), None);
    }

    #[test]
    fn row_lookup_by_name() {
        let mut row = Row::new();
        row.push("t", Value::UInt64(1000));
        row.push("job", Value::String("node".into()));
        assert_eq!(row.get("job").and_then(Value::as_str), Some("node"));
        assert!(row.get("missing").is_none());
        assert_eq!(row.len(), 2);
    }
}
