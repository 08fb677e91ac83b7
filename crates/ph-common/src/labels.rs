//! Well-known label names.
//!
//! A fixed set of labels is promoted to dedicated table columns on write and
//! may be used for filtering on read. Every other label survives only as a
//! literal `name=value` entry in the `tags` array.

/// Reserved label carrying the metric name.
pub const METRIC_NAME: &str = "__name__";

/// Routing label: selects the delivery queue and the destination table.
pub const JOB: &str = "job";

pub const NAMESPACE: &str = "namespace";
pub const IP: &str = "ip";
pub const SHARD: &str = "shard";
pub const APP: &str = "app";
pub const COMPONENT: &str = "component";
pub const KEYSPACE: &str = "keyspace";
pub const CONTAINER: &str = "container";

/// Format a label as the literal tag string stored in the `tags` array.
pub fn tag(name: &str, value: &str) -> String {
    format!("{name}={value}")
}

/// Split a `name=value` tag at the first `=`.
///
/// Returns `None` for entries without a separator or with an empty name.
pub fn split_tag(tag: &str) -> Option<(&str, &str)> {
    match tag.split_once('=') {
        Some((name, value)) if !name.is_empty() => Some((name, value)),
        _ => None,
    }
}
