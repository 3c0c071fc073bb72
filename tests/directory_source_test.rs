use rask_stream_engine::engine::{Engine, EngineSettings};
use rask_stream_engine::registry::{ProcessEntry, ProcessRegistry};
use rask_stream_engine::sink::MemoryStore;
use rask_stream_engine::source::{DirectorySource, ScanReport};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn registry() -> Arc<ProcessRegistry> {
    let entry = ProcessEntry {
        process_id: Some("orders".to_string()),
        source_path_prefix: Some("incoming/orders".to_string()),
        output_path_template: Some("out/{processId}".to_string()),
        error_path_template: Some("err/{processId}/{reason}".to_string()),
        validate_and_transform: Some(false),
        buffer_size_bytes: Some(1_000_000),
        buffer_interval_seconds: Some(60),
        schema_path: None,
    };
    Arc::new(ProcessRegistry::from_entries(vec![entry], None).unwrap())
}

fn deposit(dir: &Path, name: &str, content: &[u8]) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(name), content).unwrap();
}

#[tokio::test]
async fn test_scan_enqueues_and_removes_files_in_name_order() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry();
    let store = MemoryStore::new();
    let engine = Engine::builder(Arc::clone(&registry))
        .settings(EngineSettings {
            max_record_bytes: 64,
            ..EngineSettings::default()
        })
        .store(Arc::new(store.clone()))
        .start()
        .unwrap();

    let incoming = root.path().join("incoming/orders");
    deposit(&incoming, "002.json", br#"{"n":2}"#);
    deposit(&incoming, "001.json", br#"{"n":1}"#);
    deposit(&incoming, "003.json", &[b'x'; 65]);
    deposit(&incoming, "notes.txt", b"ignored");

    let source = DirectorySource::new(
        root.path(),
        Arc::clone(&registry),
        engine.gateway(),
        Duration::from_millis(10),
    );
    let report = source.scan_once().await;
    assert_eq!(
        report,
        ScanReport {
            accepted: 2,
            deferred: 0,
            rejected: 1,
        }
    );

    assert!(!incoming.join("001.json").exists());
    assert!(!incoming.join("002.json").exists());
    assert!(incoming.join("003.json.rejected").exists());
    assert!(incoming.join("notes.txt").exists());

    let report = engine.shutdown().await.unwrap();
    assert_eq!(report.drained_records, 2);
    assert_eq!(
        store.records_under("out/orders/"),
        vec![&br#"{"n":1}"#[..], &br#"{"n":2}"#[..]]
    );
}

#[tokio::test]
async fn test_missing_directory_is_not_an_error() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry();
    let engine = Engine::builder(Arc::clone(&registry))
        .store(Arc::new(MemoryStore::new()))
        .start()
        .unwrap();

    let source = DirectorySource::new(root.path(), registry, engine.gateway(), Duration::from_millis(10));
    assert_eq!(source.scan_once().await, ScanReport::default());
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let root = tempfile::tempdir().unwrap();
    let registry = registry();
    let engine = Engine::builder(Arc::clone(&registry))
        .store(Arc::new(MemoryStore::new()))
        .start()
        .unwrap();

    let incoming = root.path().join("incoming/orders");
    deposit(&incoming, "001.json", br#"{"n":1}"#);

    let cancel = CancellationToken::new();
    let source = DirectorySource::new(root.path(), registry, engine.gateway(), Duration::from_millis(10));
    let task = tokio::spawn(source.run(cancel.clone()));

    for _ in 0..100 {
        if !incoming.join("001.json").exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!incoming.join("001.json").exists());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(engine.buffer("orders").unwrap().pending_records(), 1);
}
