use super::ObjectStore;
use crate::domain::{ErrorRecord, FailureReason};
use crate::registry::{Placeholder, ProcessConfig, TemplateVars};
use crate::reliability::{ComponentHealth, ERROR_SINK, EngineMetrics, HealthMonitor, RetryPolicy};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One line of an error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub process_id: String,
    pub reason: FailureReason,
    pub detail: String,
    pub sequence: u64,
    pub arrived_at: String,
    /// Base64 of the original payload bytes.
    pub raw_data: String,
}

impl ErrorEnvelope {
    pub fn from_record(record: &ErrorRecord) -> Self {
        Self {
            process_id: record.process_id().to_string(),
            reason: record.reason(),
            detail: record.detail().to_string(),
            sequence: record.record().sequence(),
            arrived_at: record.record().arrived_at().to_rfc3339(),
            raw_data: STANDARD.encode(record.record().payload()),
        }
    }

    pub fn decode_raw(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.raw_data)
    }

    fn to_line(&self) -> Bytes {
        // Serializing plain strings and integers cannot fail.
        let mut line = serde_json::to_vec(self).unwrap_or_default();
        line.push(b'\n');
        Bytes::from(line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Ack { written: usize },
    /// The error sink stayed unreachable; the listed sequence numbers were
    /// reported and counted but could not be persisted.
    Fatal { written: usize, lost: Vec<u64> },
}

impl RouteOutcome {
    pub fn is_ack(&self) -> bool {
        matches!(self, RouteOutcome::Ack { .. })
    }
}

/// Writes failed records to a process's error location.
pub struct ErrorRouter {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    metrics: EngineMetrics,
    health: Arc<HealthMonitor>,
}

impl ErrorRouter {
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

    /// Error object path for one reason of one flush. Without a `{reason}`
    /// placeholder the reason is folded into the partition segment so two
    /// reasons of the same flush never share a path.
    pub fn error_path(config: &ProcessConfig, partition: &str, reason: FailureReason) -> String {
        let template = config.error_path();
        let folded;
        let partition = if template.contains(Placeholder::Reason) {
            partition
        } else {
            folded = format!("{partition}-{reason}");
            &folded
        };
        template.render(&TemplateVars {
            process_id: config.process_id(),
            partition,
            reason: Some(reason.as_str()),
        })
    }

    pub async fn record(
        &self,
        config: &ProcessConfig,
        partition: &str,
        error: ErrorRecord,
    ) -> RouteOutcome {
        self.record_all(config, partition, vec![error]).await
    }

    /// Writes one error object per failure reason.
    pub async fn record_all(
        &self,
        config: &ProcessConfig,
        partition: &str,
        errors: Vec<ErrorRecord>,
    ) -> RouteOutcome {
        let mut by_reason: BTreeMap<FailureReason, Vec<ErrorRecord>> = BTreeMap::new();
        for error in errors {
            by_reason.entry(error.reason()).or_default().push(error);
        }

        let mut written = 0;
        let mut lost = Vec::new();

        for (reason, group) in by_reason {
            let path = Self::error_path(config, partition, reason);
            let lines: Vec<Bytes> = group
                .iter()
                .map(|error| ErrorEnvelope::from_record(error).to_line())
                .collect();

            let result = self
                .retry
                .execute(|_| self.store.write_batch(&path, &lines))
                .await;

            match result {
                Ok(()) => {
                    written += group.len();
                    self.metrics
                        .record_error_routed(config.process_id(), reason, group.len());
                    self.health.record_outcome(ERROR_SINK, true).await;
                    tracing::info!(
                        process_id = config.process_id(),
                        reason = %reason,
                        records = group.len(),
                        path = %path,
                        "Records routed to error location"
                    );
                }
                Err(exhausted) => {
                    let sequences: Vec<u64> =
                        group.iter().map(|error| error.record().sequence()).collect();
                    tracing::error!(
                        process_id = config.process_id(),
                        reason = %reason,
                        path = %path,
                        attempts = exhausted.attempts,
                        error = %exhausted.last_error,
                        lost_sequences = ?sequences,
                        "Error sink unreachable, records could not be persisted"
                    );
                    self.metrics.record_error_sink_failure(group.len());
                    self.health
                        .update_component_health(
                            ERROR_SINK,
                            ComponentHealth::Unhealthy(format!(
                                "error sink write failed: {}",
                                exhausted.last_error
                            )),
                        )
                        .await;
                    lost.extend(sequences);
                }
            }
        }

        if lost.is_empty() {
            RouteOutcome::Ack { written }
        } else {
            RouteOutcome::Fatal { written, lost }
        }
    }
}
