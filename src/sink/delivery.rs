use super::{ObjectStore, StorageError};
use crate::registry::{ProcessConfig, TemplateVars};
use crate::reliability::{DELIVERY_SINK, EngineMetrics, HealthMonitor, RetryPolicy};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliveryFailure {
    #[error("delivery to '{path}' failed after {attempts} attempts: {source}")]
    Exhausted {
        path: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

impl DeliveryFailure {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryFailure::Exhausted { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAck {
    pub path: String,
    pub attempts: u32,
}

/// Writes transformed batches to a process's output location.
pub struct DeliveryWriter {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    metrics: EngineMetrics,
    health: Arc<HealthMonitor>,
}

impl DeliveryWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        retry: RetryPolicy,
        metrics: EngineMetrics,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            store,
            retry,
            metrics,
            health,
        }
    }

    pub fn output_path(config: &ProcessConfig, partition: &str) -> String {
        config.output_path().render(&TemplateVars {
            process_id: config.process_id(),
            partition,
            reason: None,
        })
    }

    /// Writes `records` as one object. Every retry targets the same path.
    pub async fn deliver(
        &self,
        config: &ProcessConfig,
        partition: &str,
        records: &[Bytes],
    ) -> Result<DeliveryAck, DeliveryFailure> {
        let path = Self::output_path(config, partition);
        let mut attempts = 0;

        let result = self
            .retry
            .execute(|attempt| {
                attempts = attempt;
                if attempt > 1 {
                    self.metrics.record_delivery_retry();
                }
                self.store.write_batch(&path, records)
            })
            .await;

        match result {
            Ok(()) => {
                self.health.record_outcome(DELIVERY_SINK, true).await;
                tracing::debug!(
                    process_id = config.process_id(),
                    path = %path,
                    records = records.len(),
                    attempts,
                    "Batch delivered"
                );
                Ok(DeliveryAck { path, attempts })
            }
            Err(exhausted) => {
                self.health.record_outcome(DELIVERY_SINK, false).await;
                tracing::warn!(
                    process_id = config.process_id(),
                    path = %path,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Delivery failed after retries"
                );
                Err(DeliveryFailure::Exhausted {
                    path,
                    attempts: exhausted.attempts,
                    source: exhausted.last_error,
                })
            }
        }
    }
}
