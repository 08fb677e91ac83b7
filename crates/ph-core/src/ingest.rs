//! Conversion of decoded remote-write series into [`Sample`]s.
//!
//! Promoted labels are copied into their dedicated fields through a lookup
//! table from label name to field setter, built once. Every label, promoted
//! or not, is also kept as a literal `name=value` tag.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use ph_common::labels;
use ph_common::sample::timestamp_from_millis;
use ph_common::{Sample, TimeSeries, WriteRequest};

type FieldSetter = fn(&mut Sample, &str);

static FIELD_SETTERS: LazyLock<HashMap<&'static str, FieldSetter>> = LazyLock::new(|| {
    let setters: [(&'static str, FieldSetter); 9] = [
        (labels::METRIC_NAME, |s, v| s.metric_name = v.to_string()),
        (labels::JOB, |s, v| s.job = v.to_string()),
        (labels::NAMESPACE, |s, v| s.namespace = v.to_string()),
        (labels::IP, |s, v| s.source_ip = v.to_string()),
        (labels::APP, |s, v| s.app = v.to_string()),
        (labels::SHARD, |s, v| s.shard = v.to_string()),
        (labels::KEYSPACE, |s, v| s.keyspace = v.to_string()),
        (labels::COMPONENT, |s, v| s.component = v.to_string()),
        (labels::CONTAINER, |s, v| s.container_name = v.to_string()),
    ];
    setters.into_iter().collect()
});

/// One sample per point of the series. All samples share one tag list.
pub fn samples_from_series(series: &TimeSeries) -> Vec<Sample> {
    let tags: Arc<[String]> = series
        .labels
        .iter()
        .map(|l| labels::tag(&l.name, &l.value))
        .collect();

    let mut template = Sample::new(0.0, timestamp_from_millis(0), tags);
    for label in &series.labels {
        if let Some(set) = FIELD_SETTERS.get(label.name.as_str()) {
            set(&mut template, &label.value);
        }
    }

    series
        .samples
        .iter()
        .map(|point| Sample {
            value: point.value,
            timestamp: timestamp_from_millis(point.timestamp_ms),
            ..template.clone()
        })
        .collect()
}

/// Flatten a write request into samples, series by series.
pub fn samples_from_request(request: &WriteRequest) -> Vec<Sample> {
    let mut out = Vec::with_capacity(request.sample_count());
    for series in &request.timeseries {
        out.extend(samples_from_series(series));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ph_common::{Label, SamplePoint};

    fn series(labels: &[(&str, &str)], points: &[(f64, i64)]) -> TimeSeries {
        TimeSeries {
            labels: labels.iter().map(|(n, v)| Label::new(*n, *v)).collect(),
            samples: points
                .iter()
                .map(|(value, ts)| SamplePoint {
                    value: *value,
                    timestamp_ms: *ts,
                })
                .collect(),
        }
    }

    #[test]
    fn promoted_labels_fill_fields() {
        let ts = series(
            &[
                ("__name__", "up"),
                ("job", "node"),
                ("namespace", "prod"),
                ("ip", "10.0.0.1"),
                ("app", "api"),
                ("shard", "s1"),
                ("keyspace", "ks"),
                ("component", "db"),
                ("container", "main"),
            ],
            &[(1.0, 1_000)],
        );
        let s = &samples_from_series(&ts)[0];
        assert_eq!(s.metric_name, "up");
        assert_eq!(s.job, "node");
        assert_eq!(s.namespace, "prod");
        assert_eq!(s.source_ip, "10.0.0.1");
        assert_eq!(s.app, "api");
        assert_eq!(s.shard, "s1");
        assert_eq!(s.keyspace, "ks");
        assert_eq!(s.component, "db");
        assert_eq!(s.container_name, "main");
        assert_eq!(s.tags.len(), 9);
    }

    #[test]
    fn every_label_becomes_a_tag() {
        let ts = series(&[("job", "node"), ("zone", "eu-1")], &[(1.0, 0)]);
        let s = &samples_from_series(&ts)[0];
        assert_eq!(&*s.tags, ["job=node".to_string(), "zone=eu-1".to_string()]);
        assert!(s.namespace.is_empty());
    }

    #[test]
    fn one_sample_per_point_sharing_tags() {
        let ts = series(&[("job", "node")], &[(1.0, 1_000), (2.0, 2_500)]);
        let samples = samples_from_series(&ts);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].value, 2.0);
        assert_eq!(samples[1].timestamp.timestamp_millis(), 2_500);
        assert!(Arc::ptr_eq(&samples[0].tags, &samples[1].tags));
    }

    #[test]
    fn request_flattens_in_order() {
        let req = WriteRequest {
            timeseries: vec![
                series(&[("job", "a")], &[(1.0, 0)]),
                series(&[("job", "b")], &[(2.0, 0), (3.0, 0)]),
                series(&[("job", "c")], &[]),
            ],
        };
        let jobs: Vec<_> = samples_from_request(&req)
            .into_iter()
            .map(|s| s.job)
            .collect();
        assert_eq!(jobs, ["a", "b", "b"]);
    }
}
