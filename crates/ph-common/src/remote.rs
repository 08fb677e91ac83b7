//! Decoded remote-write / remote-read protocol model.
//!
//! Decompression and protobuf framing happen outside the adapter; these are
//! the already-decoded shapes handed to it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A single label pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One (value, timestamp) observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub value: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

/// A labelled sequence of sample points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: Vec<Label>,
    pub samples: Vec<SamplePoint>,
}

/// Decoded remote-write payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub timeseries: Vec<TimeSeries>,
}

impl WriteRequest {
    /// Total number of sample points across all series.
    pub fn sample_count(&self) -> usize {
        self.timeseries.iter().map(|ts| ts.samples.len()).sum()
    }
}

/// Matcher operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Equal,
    NotEqual,
    RegexMatch,
    RegexNoMatch,
}

impl MatchType {
    /// PromQL operator spelling.
    pub fn operator(self) -> &'static str {
        match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::RegexMatch => "=~",
            MatchType::RegexNoMatch => "!~",
        }
    }

    pub fn is_regex(self) -> bool {
        matches!(self, MatchType::RegexMatch | MatchType::RegexNoMatch)
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operator())
    }
}

/// A label filter within a read query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelMatcher {
    pub name: String,
    #[serde(rename = "type")]
    pub match_type: MatchType,
    pub value: String,
}

impl LabelMatcher {
    pub fn new(name: impl Into<String>, match_type: MatchType, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            match_type,
            value: value.into(),
        }
    }

    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, MatchType::Equal, value)
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type, self.value)
    }
}

impl FromStr for LabelMatcher {
    type Err = Error;

    /// Parse `name=value`, `name!=value`, `name=~regex` or `name!~regex`.
    /// Surrounding double quotes on the value are stripped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pos = s
            .find(['=', '!'])
            .ok_or_else(|| Error::InvalidMatcher(format!("missing operator in '{s}'")))?;
        let (name, rest) = s.split_at(pos);
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidMatcher(format!("missing label name in '{s}'")));
        }

        let (match_type, value) = if let Some(v) = rest.strip_prefix("=~") {
            (MatchType::RegexMatch, v)
        } else if let Some(v) = rest.strip_prefix("!~") {
            (MatchType::RegexNoMatch, v)
        } else if let Some(v) = rest.strip_prefix("!=") {
            (MatchType::NotEqual, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (MatchType::Equal, v)
        } else {
            return Err(Error::InvalidMatcher(format!("unknown operator in '{s}'")));
        };

        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);

        Ok(Self::new(name, match_type, value))
    }
}

/// One range query: a time window plus label filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub start_timestamp_ms: i64,
    pub end_timestamp_ms: i64,
    #[serde(default)]
    pub matchers: Vec<LabelMatcher>,
}

impl QuerySpec {
    pub fn new(start_timestamp_ms: i64, end_timestamp_ms: i64) -> Self {
        Self {
            start_timestamp_ms,
            end_timestamp_ms,
            matchers: Vec::new(),
        }
    }

    pub fn with_matcher(mut self, matcher: LabelMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }
}

/// Decoded remote-read payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub queries: Vec<QuerySpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_operators() {
        let m: LabelMatcher = "job=node".parse().unwrap();
        assert_eq!(m, LabelMatcher::equal("job", "node"));

        let m: LabelMatcher = "namespace!=kube-system".parse().unwrap();
        assert_eq!(m.match_type, MatchType::NotEqual);
        assert_eq!(m.value, "kube-system");

        let m: LabelMatcher = "__name__=~\"http_.*\"".parse().unwrap();
        assert_eq!(m.match_type, MatchType::RegexMatch);
        assert_eq!(m.value, "http_.*");

        let m: LabelMatcher = "app!~web|api".parse().unwrap();
        assert_eq!(m.match_type, MatchType::RegexNoMatch);
        assert_eq!(m.value, "web|api");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("job".parse::<LabelMatcher>().is_err());
        assert!("=node".parse::<LabelMatcher>().is_err());
        assert!("job!node".parse::<LabelMatcher>().is_err());
    }

    #[test]
    fn display_matches_promql() {
        let m = LabelMatcher::new("job", MatchType::RegexMatch, "no\"de");
        assert_eq!(m.to_string(), "job=~\"no\\\"de\"");
    }

    #[test]
    fn match_type_serde_uses_protocol_names() {
        let json = serde_json::to_string(&MatchType::RegexNoMatch).unwrap();
        assert_eq!(json, "\"REGEX_NO_MATCH\"");
    }

    #[test]
    fn write_request_counts_points() {
        let req = WriteRequest {
            timeseries: vec![
                TimeSeries {
                    labels: vec![Label::new("job", "a")],
                    samples: vec![
                        SamplePoint {
                            value: 1.0,
                            timestamp_ms: 1,
                        },
                        SamplePoint {
                            value: 2.0,
                            timestamp_ms: 2,
                        },
                    ],
                },
                TimeSeries::default(),
            ],
        };
        assert_eq!(req.sample_count(), 2);
    }
}
