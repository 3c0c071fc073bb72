#![allow(dead_code)]

use rask_stream_engine::engine::EngineSettings;
use rask_stream_engine::registry::{ProcessEntry, ProcessRegistry};
use rask_stream_engine::reliability::{RetryConfig, RetryStrategy};
use std::sync::Arc;
use std::time::Duration;

pub fn entry(process_id: &str, buffer_size_bytes: i64, interval_secs: i64, validate: bool) -> ProcessEntry {
    ProcessEntry {
        process_id: Some(process_id.to_string()),
        source_path_prefix: Some(format!("incoming/{process_id}")),
        output_path_template: Some("out/{processId}".to_string()),
        error_path_template: Some("err/{processId}/{reason}".to_string()),
        validate_and_transform: Some(validate),
        buffer_size_bytes: Some(buffer_size_bytes),
        buffer_interval_seconds: Some(interval_secs),
        schema_path: None,
    }
}

pub fn registry(entries: Vec<ProcessEntry>) -> Arc<ProcessRegistry> {
    Arc::new(ProcessRegistry::from_entries(entries, None).unwrap())
}

pub fn fixed_retry(attempts: u32, delay: Duration) -> RetryConfig {
    RetryConfig {
        max_attempts: attempts,
        base_delay: delay,
        max_delay: delay,
        max_total_backoff: delay * attempts,
        strategy: RetryStrategy::FixedDelay,
        jitter: false,
    }
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        delivery_retry: fixed_retry(3, Duration::from_millis(10)),
        error_retry: fixed_retry(2, Duration::from_millis(10)),
        shutdown_timeout: Duration::from_secs(30),
        ..EngineSettings::default()
    }
}

/// A JSON object payload of exactly `len` bytes.
pub fn json_payload(n: usize, len: usize) -> Vec<u8> {
    let head = format!("{{\"n\":{n},\"pad\":\"");
    let filler = len.saturating_sub(head.len() + 2);
    let mut payload = head.into_bytes();
    payload.extend(std::iter::repeat_n(b'x', filler));
    payload.extend_from_slice(b"\"}");
    payload
}

pub fn field_n(line: &[u8]) -> u64 {
    let value: serde_json::Value = serde_json::from_slice(line).unwrap();
    value["n"].as_u64().unwrap()
}
