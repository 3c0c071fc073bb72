use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Process identifiers are shared by every record, batch and path of a process.
pub type ProcessId = Arc<str>;

/// A single accepted payload.
///
/// The sequence number is assigned by the buffer manager under the process
/// lock, so it reflects append order within one process.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    process_id: ProcessId,
    payload: Bytes,
    arrived_at: DateTime<Utc>,
    sequence: u64,
}

impl Record {
    pub fn new(process_id: ProcessId, payload: Bytes) -> Self {
        Self {
            process_id,
            payload,
            arrived_at: Utc::now(),
            sequence: 0,
        }
    }

    pub(crate) fn assign_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn arrived_at(&self) -> DateTime<Utc> {
        self.arrived_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushReason {
    /// Accumulated size reached `bufferSizeBytes`.
    Size,
    /// `bufferIntervalSeconds` elapsed since the generation opened.
    Timeout,
    /// Forced flush while the engine shuts down.
    Drain,
}

impl FlushReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Timeout => "timeout",
            FlushReason::Drain => "drain",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one buffer generation, taken at flush time.
#[derive(Debug, Clone)]
pub struct DeliveryBatch {
    process_id: ProcessId,
    generation: u64,
    reason: FlushReason,
    records: Vec<Record>,
    size_bytes: usize,
    sealed_at: DateTime<Utc>,
}

impl DeliveryBatch {
    pub(crate) fn seal(
        process_id: ProcessId,
        generation: u64,
        reason: FlushReason,
        records: Vec<Record>,
        size_bytes: usize,
    ) -> Self {
        Self {
            process_id,
            generation,
            reason,
            records,
            size_bytes,
            sealed_at: Utc::now(),
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reason(&self) -> FlushReason {
        self.reason
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn sealed_at(&self) -> DateTime<Utc> {
        self.sealed_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    Validation,
    Transform,
    Delivery,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Validation => "validation",
            FailureReason::Transform => "transform",
            FailureReason::Delivery => "delivery",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record on its way to the error location. Written once, never mutated.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    record: Record,
    reason: FailureReason,
    detail: String,
}

impl ErrorRecord {
    pub fn new(record: Record, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            record,
            reason,
            detail: detail.into(),
        }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn process_id(&self) -> &str {
        self.record.process_id()
    }

    pub fn reason(&self) -> FailureReason {
        self.reason
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}
