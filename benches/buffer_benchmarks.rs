//! Buffer append and seal throughput.

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rask_stream_engine::buffer::BufferManager;
use rask_stream_engine::domain::Record;
use rask_stream_engine::registry::{ProcessEntry, ProcessRegistry};
use std::sync::Arc;

fn registry(buffer_size_bytes: i64) -> ProcessRegistry {
    ProcessRegistry::from_entries(
        vec![ProcessEntry {
            process_id: Some("bench".to_string()),
            source_path_prefix: Some("incoming/bench".to_string()),
            output_path_template: Some("out/{processId}".to_string()),
            error_path_template: Some("err/{processId}/{reason}".to_string()),
            validate_and_transform: Some(false),
            buffer_size_bytes: Some(buffer_size_bytes),
            buffer_interval_seconds: Some(3600),
            schema_path: None,
        }],
        None,
    )
    .unwrap()
}

fn bench_append(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let payload = Bytes::from(vec![b'x'; 256]);
    let mut group = c.benchmark_group("buffer_append");

    for records_per_batch in [16usize, 256, 4096] {
        let registry = registry((records_per_batch * payload.len()) as i64);
        let config = Arc::clone(registry.lookup("bench").unwrap());
        group.throughput(Throughput::Elements(records_per_batch as u64));

        group.bench_with_input(
            BenchmarkId::new("until_sealed", records_per_batch),
            &records_per_batch,
            |b, &n| {
                let _guard = runtime.enter();
                let (buffer, mut queue) = BufferManager::new(Arc::clone(&config));
                let id = config.shared_id();
                b.iter(|| {
                    for _ in 0..n {
                        black_box(buffer.append(Record::new(Arc::clone(&id), payload.clone())).unwrap());
                    }
                    let batch = queue.try_recv().unwrap();
                    buffer.complete_flush();
                    black_box(batch.len())
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_append);
criterion_main!(benches);
