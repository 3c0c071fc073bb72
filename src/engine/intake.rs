use crate::buffer::{BufferClosed, BufferManager};
use crate::domain::Record;
use crate::reliability::EngineMetrics;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeRejection {
    #[error("Unknown process '{0}'")]
    UnknownProcess(String),
    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("Payload is empty")]
    EmptyPayload,
    #[error("Process '{process_id}' has {pending} batches awaiting delivery")]
    Backpressure { process_id: String, pending: usize },
    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl IntakeRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            IntakeRejection::UnknownProcess(_) => "unknown_process",
            IntakeRejection::PayloadTooLarge { .. } => "payload_too_large",
            IntakeRejection::EmptyPayload => "empty_payload",
            IntakeRejection::Backpressure { .. } => "backpressure",
            IntakeRejection::ShuttingDown => "shutting_down",
        }
    }

    /// Whether the same payload may be accepted later.
    pub fn is_transient(&self) -> bool {
        matches!(self, IntakeRejection::Backpressure { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub sequence: u64,
    pub generation: u64,
}

struct GatewayInner {
    buffers: HashMap<String, Arc<BufferManager>>,
    max_record_bytes: usize,
    max_pending_batches: usize,
    closed: AtomicBool,
    metrics: EngineMetrics,
}

/// Entry point for producers. Cheap to clone; never waits on a flush.
#[derive(Clone)]
pub struct IntakeGateway {
    inner: Arc<GatewayInner>,
}

impl IntakeGateway {
    pub(crate) fn new(
        buffers: HashMap<String, Arc<BufferManager>>,
        max_record_bytes: usize,
        max_pending_batches: usize,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                buffers,
                max_record_bytes,
                max_pending_batches,
                closed: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    pub fn enqueue(
        &self,
        process_id: &str,
        payload: impl Into<Bytes>,
    ) -> Result<Accepted, IntakeRejection> {
        let result = self.admit(process_id, payload.into());
        match &result {
            Ok(_) => self.inner.metrics.record_accepted(process_id),
            Err(rejection) => {
                self.inner.metrics.record_rejected(rejection.reason());
                tracing::debug!(process_id, reason = rejection.reason(), "Record rejected");
            }
        }
        result
    }

    fn admit(&self, process_id: &str, payload: Bytes) -> Result<Accepted, IntakeRejection> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(IntakeRejection::ShuttingDown);
        }

        let buffer = self
            .inner
            .buffers
            .get(process_id)
            .ok_or_else(|| IntakeRejection::UnknownProcess(process_id.to_string()))?;

        if payload.is_empty() {
            return Err(IntakeRejection::EmptyPayload);
        }
        if payload.len() > self.inner.max_record_bytes {
            return Err(IntakeRejection::PayloadTooLarge {
                size: payload.len(),
                max: self.inner.max_record_bytes,
            });
        }

        let pending = buffer.in_flight();
        if pending >= self.inner.max_pending_batches {
            return Err(IntakeRejection::Backpressure {
                process_id: process_id.to_string(),
                pending,
            });
        }

        let record = Record::new(buffer.config().shared_id(), payload);
        let appended = buffer
            .append(record)
            .map_err(|BufferClosed| IntakeRejection::ShuttingDown)?;

        Ok(Accepted {
            sequence: appended.sequence,
            generation: appended.generation,
        })
    }

    /// Rejects all further intake. Buffers are drained separately.
    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn max_record_bytes(&self) -> usize {
        self.inner.max_record_bytes
    }
}

impl std::fmt::Debug for IntakeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeGateway")
            .field("processes", &self.inner.buffers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
