mod common;

use common::{entry, field_n, fixed_retry, json_payload, registry, settings};
use rask_stream_engine::engine::{Engine, EngineSettings};
use rask_stream_engine::registry::ProcessRegistry;
use rask_stream_engine::reliability::{ComponentHealth, DELIVERY_SINK};
use rask_stream_engine::sink::{ErrorEnvelope, MemoryStore};
use rask_stream_engine::{FailureReason, TransformFailure, Transformer};
use std::sync::Arc;
use std::time::Duration;

fn envelopes(store: &MemoryStore, prefix: &str) -> Vec<ErrorEnvelope> {
    store
        .records_under(prefix)
        .iter()
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_malformed_record_is_routed_and_rest_delivered() {
    let output = MemoryStore::new();
    let errors = MemoryStore::new();
    let engine = Engine::builder(registry(vec![entry("p", 10_000, 60, true)]))
        .settings(settings())
        .store(Arc::new(output.clone()))
        .error_store(Arc::new(errors.clone()))
        .start()
        .unwrap();

    for n in 0..5 {
        if n == 2 {
            engine.enqueue("p", &b"{not json"[..]).unwrap();
        } else {
            engine.enqueue("p", json_payload(n, 30)).unwrap();
        }
    }

    let report = engine.shutdown().await.unwrap();
    assert_eq!(report.metrics.records_delivered, 4);
    assert_eq!(report.metrics.records_error_validation, 1);

    let delivered: Vec<u64> = output.records_under("out/p/").iter().map(|r| field_n(r)).collect();
    assert_eq!(delivered, vec![0, 1, 3, 4]);

    let routed = envelopes(&errors, "err/p/validation/");
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].process_id, "p");
    assert_eq!(routed[0].reason, FailureReason::Validation);
    assert_eq!(routed[0].sequence, 2);
    assert_eq!(routed[0].decode_raw().unwrap(), b"{not json");
}

#[tokio::test(start_paused = true)]
async fn test_schema_rules_apply_before_delivery() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("orders.schema.json"),
        r#"{
            "insert_value_if_column_missing": {"currency": "EUR"},
            "required_columns": ["id"],
            "rename_columns": {"amt": "amount"},
            "delete_columns": ["debug"],
            "cast_values": {"amount": "float"}
        }"#,
    )
    .unwrap();
    let registry = ProcessRegistry::from_toml_str(
        r#"
        [[processes]]
        processId = "orders"
        sourcePathPrefix = "incoming/orders"
        outputPathTemplate = "processed/{processId}/{partition}.jsonl"
        errorPathTemplate = "failed/{processId}/{reason}/{partition}.jsonl"
        validateAndTransform = true
        bufferSizeBytes = 1048576
        bufferIntervalSeconds = 60
        schemaPath = "orders.schema.json"
        "#,
        Some(dir.path()),
    )
    .unwrap();

    let output = MemoryStore::new();
    let engine = Engine::builder(registry)
        .settings(settings())
        .store(Arc::new(output.clone()))
        .start()
        .unwrap();

    engine.enqueue("orders", &br#"{"id":1,"amt":"12.5","debug":true}"#[..]).unwrap();
    engine.enqueue("orders", &br#"{"amt":"3"}"#[..]).unwrap();
    let report = engine.shutdown().await.unwrap();

    assert_eq!(report.metrics.records_delivered, 1);
    assert_eq!(report.metrics.records_error_validation, 1);

    let paths = output.paths();
    let delivered_path = paths.iter().find(|p| p.starts_with("processed/")).unwrap();
    assert!(delivered_path.ends_with(".jsonl"));
    let line: serde_json::Value =
        serde_json::from_slice(&output.object(delivered_path).unwrap()[0]).unwrap();
    assert_eq!(
        line,
        serde_json::json!({"id": 1, "amount": 12.5, "currency": "EUR"})
    );

    let routed = envelopes(&output, "failed/orders/validation/");
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].sequence, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_delivery_routes_whole_batch() {
    let output = MemoryStore::new();
    let errors = MemoryStore::new();
    output.set_unavailable(true);

    let engine = Engine::builder(registry(vec![entry("p", 10_000, 60, false)]))
        .settings(settings())
        .store(Arc::new(output.clone()))
        .error_store(Arc::new(errors.clone()))
        .start()
        .unwrap();
    let health = Arc::clone(engine.health());

    for n in 0..4 {
        engine.enqueue("p", json_payload(n, 30)).unwrap();
    }
    let report = engine.shutdown().await.unwrap();

    assert_eq!(output.write_attempts(), 3);
    assert!(output.is_empty());
    assert_eq!(report.metrics.delivery_failures, 1);
    assert_eq!(report.metrics.records_delivered, 0);
    assert_eq!(report.metrics.records_error_delivery, 4);

    let routed = envelopes(&errors, "err/p/delivery/");
    let sequences: Vec<u64> = routed.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
    for (n, envelope) in routed.iter().enumerate() {
        assert_eq!(envelope.decode_raw().unwrap(), json_payload(n, 30));
        assert_eq!(envelope.reason, FailureReason::Delivery);
    }

    let sink = health.get_component_health(DELIVERY_SINK).await.unwrap();
    assert!(!matches!(sink, ComponentHealth::Healthy));
}

#[tokio::test(start_paused = true)]
async fn test_transient_store_failure_recovers_within_retries() {
    let output = MemoryStore::new();
    output.fail_next_writes(2);

    let engine = Engine::builder(registry(vec![entry("p", 10_000, 60, false)]))
        .settings(settings())
        .store(Arc::new(output.clone()))
        .start()
        .unwrap();

    engine.enqueue("p", json_payload(0, 30)).unwrap();
    let report = engine.shutdown().await.unwrap();

    assert_eq!(output.write_attempts(), 3);
    assert_eq!(output.records_under("out/p/").len(), 1);
    assert_eq!(report.metrics.delivery_retries, 2);
    assert_eq!(report.metrics.records_error_routed(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_error_sink_counts_lost_records() {
    let output = MemoryStore::new();
    let errors = MemoryStore::new();
    errors.set_unavailable(true);

    let engine = Engine::builder(registry(vec![entry("p", 10_000, 60, true)]))
        .settings(EngineSettings {
            error_retry: fixed_retry(2, Duration::from_millis(5)),
            ..settings()
        })
        .store(Arc::new(output.clone()))
        .error_store(Arc::new(errors.clone()))
        .start()
        .unwrap();

    engine.enqueue("p", json_payload(0, 30)).unwrap();
    engine.enqueue("p", &b"[1,2,3]"[..]).unwrap();
    let report = engine.shutdown().await.unwrap();

    assert_eq!(report.metrics.records_delivered, 1);
    assert_eq!(errors.write_attempts(), 2);
    assert_eq!(report.metrics.error_sink_failures, 1);
    assert_eq!(report.metrics.error_records_lost, 1);
}

struct RejectOdd;

impl Transformer for RejectOdd {
    fn transform(&self, payload: &[u8]) -> Result<Vec<u8>, TransformFailure> {
        let n = field_n(payload);
        if n % 2 == 1 {
            return Err(TransformFailure::Transform(format!("odd value {n}")));
        }
        Ok(format!("{{\"even\":{n}}}").into_bytes())
    }

    fn name(&self) -> &'static str {
        "reject-odd"
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_transformer_failures_use_transform_reason() {
    let store = MemoryStore::new();
    let engine = Engine::builder(registry(vec![entry("p", 10_000, 60, true)]))
        .settings(settings())
        .store(Arc::new(store.clone()))
        .transformer("p", Arc::new(RejectOdd))
        .start()
        .unwrap();

    for n in 0..4 {
        engine.enqueue("p", json_payload(n, 30)).unwrap();
    }
    let report = engine.shutdown().await.unwrap();

    assert_eq!(report.metrics.records_error_transform, 2);
    let delivered = store.records_under("out/p/");
    assert_eq!(delivered, vec![&b"{\"even\":0}"[..], &b"{\"even\":2}"[..]]);

    let routed = envelopes(&store, "err/p/transform/");
    assert_eq!(routed.len(), 2);
    assert_eq!(routed[0].detail, "odd value 1");
}

struct PanicsOnOne;

impl Transformer for PanicsOnOne {
    fn transform(&self, payload: &[u8]) -> Result<Vec<u8>, TransformFailure> {
        if field_n(payload) == 1 {
            panic!("transformer bug");
        }
        Ok(payload.to_vec())
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_transformer_routes_record_and_keeps_worker() {
    let store = MemoryStore::new();
    let engine = Engine::builder(registry(vec![entry("p", 100, 60, true)]))
        .settings(settings())
        .store(Arc::new(store.clone()))
        .transformer("p", Arc::new(PanicsOnOne))
        .start()
        .unwrap();

    // 40-byte records against a 100-byte buffer seal every third append.
    for n in 0..9 {
        engine.enqueue("p", json_payload(n, 40)).unwrap();
    }
    tokio::time::timeout(Duration::from_secs(30), engine.wait_idle())
        .await
        .expect("flush worker stopped handling batches");

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.records_accepted, 9);
    assert_eq!(snapshot.records_error_transform, 1);
    assert_eq!(snapshot.records_delivered, 8);
    assert_eq!(
        snapshot.records_accepted,
        snapshot.records_delivered + snapshot.records_error_routed()
    );

    let routed = envelopes(&store, "err/p/transform/");
    assert_eq!(routed.len(), 1);
    assert!(routed[0].detail.contains("panicked"));

    // Later batches still flow through the same worker.
    engine.enqueue("p", json_payload(9, 40)).unwrap();
    let report = engine.shutdown().await.unwrap();
    assert_eq!(report.metrics.records_delivered, 9);
}
