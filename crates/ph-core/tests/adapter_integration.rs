//! End-to-end tests: write through the adapter into the in-memory store and
//! read the series back.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use ph_common::sample::timestamp_from_millis;
use ph_common::{
    Label, LabelMatcher, MatchType, QuerySpec, ReadRequest, Sample, SamplePoint, TimeSeries,
    WriteRequest,
};
use ph_config::{AdapterConfig, JobEntry};
use ph_core::metrics::drop_reason;
use ph_core::{
    Adapter, AdapterMetrics, BatchWriter, JobDirectory, QuerySettings, QueryTranslator,
};
use ph_storage::{
    AggregationQuery, Connection, InsertStatement, MemoryStore, Row, StorageError, Store,
};
use tokio::sync::mpsc;

fn config(jobs: &[(&str, &str)]) -> AdapterConfig {
    let mut config = AdapterConfig::default();
    config.jobs = jobs.iter().map(|(n, t)| JobEntry::new(*n, *t)).collect();
    config.writer.batch_size = 16;
    config.writer.flush_interval_secs = 0;
    config.reader.table = "node_samples".into();
    config.reload.poll_interval_secs = 0;
    config
}

fn series(labels: &[(&str, &str)], points: &[(f64, i64)]) -> TimeSeries {
    TimeSeries {
        labels: labels.iter().map(|(n, v)| Label::new(*n, *v)).collect(),
        samples: points
            .iter()
            .map(|(value, timestamp_ms)| SamplePoint {
                value: *value,
                timestamp_ms: *timestamp_ms,
            })
            .collect(),
    }
}

fn start_node(store: &MemoryStore) -> Adapter {
    Adapter::start(&config(&[("node", "node_samples")]), Arc::new(store.clone())).unwrap()
}

fn hour_query() -> QuerySpec {
    QuerySpec::new(0, 3_600_000)
}

#[tokio::test]
async fn tags_round_trip_to_label_set() {
    let store = MemoryStore::new();
    let metrics = Arc::new(AdapterMetrics::new().unwrap());

    let mut sample = Sample::new(
        42.5,
        timestamp_from_millis(120_000),
        Arc::from(vec!["a=1".to_string(), "b=2".to_string()]),
    );
    sample.job = "node".into();

    let (tx, rx) = mpsc::channel(4);
    tx.send(sample).await.unwrap();
    drop(tx);
    let writer = BatchWriter::new(
        "node",
        InsertStatement::new("metrics", "node_samples"),
        4,
        None,
        Arc::clone(&metrics),
    );
    writer.run(Arc::new(store.clone()), rx).await;

    let mut settings = QuerySettings::default();
    settings.default_table = "node_samples".into();
    let translator = QueryTranslator::new(settings, Arc::new(JobDirectory::new()), metrics);
    let result = translator
        .read(
            &store,
            &ReadRequest {
                queries: vec![hour_query()],
            },
        )
        .await
        .unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result[0].labels, vec![Label::new("a", "1"), Label::new("b", "2")]);
    assert_eq!(
        result[0].samples,
        vec![SamplePoint {
            value: 42.5,
            timestamp_ms: 120_000
        }]
    );
}

#[tokio::test]
async fn write_and_read_through_adapter() {
    let store = MemoryStore::new();
    let adapter = start_node(&store);

    let request = WriteRequest {
        timeseries: vec![
            series(
                &[("__name__", "up"), ("job", "node"), ("instance", "a:9100")],
                &[(1.0, 10_000), (0.0, 70_000)],
            ),
            series(
                &[("__name__", "up"), ("job", "node"), ("instance", "b:9100")],
                &[(1.0, 10_000)],
            ),
            series(&[("__name__", "load1"), ("job", "node")], &[(0.5, 10_000)]),
        ],
    };
    let summary = adapter.write(&request).await.unwrap();
    assert_eq!(summary.enqueued, 4);
    let report = adapter.shutdown().await;
    assert!(report.is_clean());
    assert_eq!(store.row_count("metrics", "node_samples"), 4);

    let spec = hour_query()
        .with_matcher(LabelMatcher::equal("job", "node"))
        .with_matcher(LabelMatcher::equal("__name__", "up"));
    let result = adapter
        .read(&ReadRequest {
            queries: vec![spec],
        })
        .await
        .unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(
        result[0].labels,
        vec![
            Label::new("__name__", "up"),
            Label::new("instance", "a:9100"),
            Label::new("job", "node"),
        ]
    );
    let timestamps: Vec<i64> = result[0].samples.iter().map(|p| p.timestamp_ms).collect();
    assert_eq!(timestamps, [10_000, 70_000]);
    assert_eq!(result[1].labels[1], Label::new("instance", "b:9100"));
}

#[tokio::test]
async fn regex_matchers_are_full_match() {
    let store = MemoryStore::new();
    let adapter = start_node(&store);
    let request = WriteRequest {
        timeseries: vec![
            series(&[("__name__", "http_requests"), ("job", "node")], &[(1.0, 0)]),
            series(&[("__name__", "my_http_requests"), ("job", "node")], &[(1.0, 0)]),
        ],
    };
    adapter.write(&request).await.unwrap();
    adapter.shutdown().await;

    let spec = hour_query().with_matcher(LabelMatcher::new(
        "__name__",
        MatchType::RegexMatch,
        "http_.*",
    ));
    let result = adapter
        .read(&ReadRequest {
            queries: vec![spec],
        })
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
    assert!(result[0]
        .labels
        .contains(&Label::new("__name__", "http_requests")));
}

#[tokio::test]
async fn repeated_reads_are_identical() {
    let store = MemoryStore::new();
    let adapter = start_node(&store);
    let request = WriteRequest {
        timeseries: (0..20)
            .map(|i| {
                let host = format!("h{i}");
                let zone = if i % 2 == 0 { "eu" } else { "us" };
                series(
                    &[("job", "node"), ("zone", zone), ("host", host.as_str())],
                    &[(i as f64, 1_000 * i as i64)],
                )
            })
            .collect(),
    };
    adapter.write(&request).await.unwrap();
    adapter.shutdown().await;

    let read = ReadRequest {
        queries: vec![
            hour_query(),
            hour_query().with_matcher(LabelMatcher::equal("zone", "eu")),
        ],
    };
    let first = adapter.read(&read).await.unwrap();
    let second = adapter.read(&read).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 20);
    assert_eq!(adapter.metrics().read_requests.get(), 2);
    assert_eq!(adapter.metrics().ignored_matchers.get(), 2);
}

#[tokio::test]
async fn label_values_with_y_diaeresis_keep_series_apart() {
    let store = MemoryStore::new();
    let adapter = start_node(&store);
    let request = WriteRequest {
        timeseries: vec![
            series(&[("job", "node"), ("a", "1\u{ff}b\u{ff}2")], &[(1.0, 60_000)]),
            series(&[("job", "node"), ("a", "1"), ("b", "2")], &[(2.0, 120_000)]),
        ],
    };
    adapter.write(&request).await.unwrap();
    adapter.shutdown().await;

    let result = adapter
        .read(&ReadRequest {
            queries: vec![hour_query()],
        })
        .await
        .unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.iter().all(|s| s.samples.len() == 1));
}

#[tokio::test]
async fn duplicate_jobs_route_to_later_table() {
    let store = MemoryStore::new();
    let adapter = Adapter::start(
        &config(&[("node", "old_samples"), ("node", "node_samples")]),
        Arc::new(store.clone()),
    )
    .unwrap();
    assert_eq!(adapter.queued_jobs(), ["node"]);

    let request = WriteRequest {
        timeseries: vec![series(&[("job", "node")], &[(1.0, 0)])],
    };
    adapter.write(&request).await.unwrap();
    adapter.shutdown().await;
    assert_eq!(store.row_count("metrics", "node_samples"), 1);
    assert_eq!(store.row_count("metrics", "old_samples"), 0);
}

#[tokio::test]
async fn unknown_job_never_blocks_or_errors() {
    let store = MemoryStore::new();
    let mut cfg = config(&[("node", "node_samples")]);
    cfg.writer.batch_size = 1;
    let adapter = Adapter::start(&cfg, Arc::new(store.clone())).unwrap();

    let request = WriteRequest {
        timeseries: vec![series(
            &[("job", "nobody")],
            &(0..100).map(|i| (i as f64, i)).collect::<Vec<_>>(),
        )],
    };
    let summary = tokio::time::timeout(Duration::from_secs(5), adapter.write(&request))
        .await
        .expect("dispatch to unknown job must not block")
        .unwrap();
    assert_eq!(summary.dropped, 100);
    assert_eq!(adapter.metrics().dropped(drop_reason::UNKNOWN_JOB), 100);
    adapter.shutdown().await;
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn failing_spec_aborts_the_whole_read() {
    let adapter = Adapter::start(&config(&[]), Arc::new(MemoryStore::new())).unwrap();
    let read = ReadRequest {
        queries: vec![
            hour_query(),
            hour_query().with_matcher(LabelMatcher::new("__name__", MatchType::RegexMatch, "(")),
        ],
    };
    assert!(adapter.read(&read).await.is_err());
    assert_eq!(adapter.metrics().read_failures.get(), 1);
    adapter.shutdown().await;
}

/// A store whose selects always fail.
struct UnreachableStore;

#[async_trait]
impl Store for UnreachableStore {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, StorageError> {
        Err(StorageError::Connect("connection refused".into()))
    }

    async fn select(&self, _query: &AggregationQuery) -> Result<Vec<Row>, StorageError> {
        Err(StorageError::Query("connection refused".into()))
    }
}

#[tokio::test]
async fn store_error_surfaces_to_reader() {
    let adapter = Adapter::start(&config(&[("node", "node_samples")]), Arc::new(UnreachableStore))
        .unwrap();
    let err = adapter
        .read(&ReadRequest {
            queries: vec![hour_query()],
        })
        .await
        .unwrap_err();
    let err: ph_common::Error = err.into();
    assert_eq!(err.code(), 40);

    // Writes are accepted; the batch is lost at connect time on flush.
    adapter
        .write(&WriteRequest {
            timeseries: vec![series(&[("job", "node")], &[(1.0, 0)])],
        })
        .await
        .unwrap();
    let report = adapter.shutdown().await;
    assert_eq!(report.drained[0].batches_failed, 1);
    assert_eq!(adapter.metrics().failed(ph_core::metrics::stage::CONNECT), 1);
}
