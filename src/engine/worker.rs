use crate::buffer::{BufferManager, FlushQueue};
use crate::domain::{DeliveryBatch, ErrorRecord, FailureReason};
use crate::registry::ProcessConfig;
use crate::reliability::EngineMetrics;
use crate::sink::{DeliveryWriter, ErrorRouter, PartitionClock};
use crate::transform::TransformationInvoker;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Consumes one process's flush queue: transform, deliver, route errors.
///
/// Batches of one process are handled strictly one after another in seal
/// order. The shared semaphore bounds how many processes flush at once.
pub(crate) struct FlushWorker {
    config: Arc<ProcessConfig>,
    buffer: Arc<BufferManager>,
    queue: FlushQueue,
    invoker: TransformationInvoker,
    delivery: Arc<DeliveryWriter>,
    errors: Arc<ErrorRouter>,
    partitions: PartitionClock,
    permits: Arc<Semaphore>,
    metrics: EngineMetrics,
}

impl FlushWorker {
    pub(crate) fn new(
        buffer: Arc<BufferManager>,
        queue: FlushQueue,
        invoker: TransformationInvoker,
        delivery: Arc<DeliveryWriter>,
        errors: Arc<ErrorRouter>,
        permits: Arc<Semaphore>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            config: Arc::clone(buffer.config()),
            buffer,
            queue,
            invoker,
            delivery,
            errors,
            partitions: PartitionClock::new(),
            permits,
            metrics,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(process_id = self.config.process_id(), "Flush worker started");

        while let Some(batch) = self.queue.recv().await {
            // The semaphore is never closed.
            let permit = Arc::clone(&self.permits).acquire_owned().await.ok();
            self.flush(batch).await;
            drop(permit);
            self.buffer.complete_flush();
        }

        tracing::debug!(process_id = self.config.process_id(), "Flush worker drained");
    }

    async fn flush(&self, batch: DeliveryBatch) {
        let started = Instant::now();
        let process_id = self.config.process_id();
        let reason = batch.reason();
        let generation = batch.generation();
        let total = batch.len();
        self.metrics.record_flush(process_id, reason);

        let partition = self.partitions.next_key(batch.sealed_at());
        let (transformed, failed) = self.invoker.invoke_all(batch.into_records());

        let mut errors: Vec<ErrorRecord> = failed
            .into_iter()
            .map(|(record, failure)| ErrorRecord::new(record, failure.reason(), failure.detail()))
            .collect();

        let mut delivered = 0;
        if !transformed.is_empty() {
            let payloads: Vec<Bytes> = transformed.iter().map(|t| t.payload.clone()).collect();
            match self.delivery.deliver(&self.config, &partition, &payloads).await {
                Ok(_) => {
                    delivered = payloads.len();
                    self.metrics.record_delivered(process_id, delivered);
                }
                Err(failure) => {
                    self.metrics.record_delivery_failure();
                    let detail = failure.to_string();
                    errors.extend(transformed.into_iter().map(|t| {
                        ErrorRecord::new(t.original, FailureReason::Delivery, detail.clone())
                    }));
                }
            }
        }

        let error_count = errors.len();
        if !errors.is_empty() {
            self.errors.record_all(&self.config, &partition, errors).await;
        }

        let elapsed = started.elapsed();
        self.metrics.record_flush_duration(process_id, elapsed);
        tracing::info!(
            process_id,
            generation,
            reason = %reason,
            records = total,
            delivered,
            error_routed = error_count,
            partition = %partition,
            elapsed_ms = elapsed.as_millis() as u64,
            "Flush completed"
        );
    }
}
