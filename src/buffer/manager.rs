use crate::domain::{DeliveryBatch, FlushReason, Record};
use crate::registry::ProcessConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Receiving side of a process's flush queue, consumed by its flush worker.
pub type FlushQueue = mpsc::UnboundedReceiver<DeliveryBatch>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Buffer is closed")]
pub struct BufferClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPhase {
    /// No buffered records and nothing in flight.
    Empty,
    /// The active generation holds at least one record.
    Accumulating,
    /// The active generation is empty but sealed batches are still being delivered.
    Flushing,
}

/// Deadline for the timeout flush of one buffer generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerArm {
    pub generation: u64,
    pub deadline: Instant,
}

/// Summary of a generation that was sealed and handed to the flush queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedBatch {
    pub generation: u64,
    pub reason: FlushReason,
    pub records: usize,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub sequence: u64,
    pub generation: u64,
    /// Set when this append crossed `bufferSizeBytes` and sealed the generation.
    pub sealed: Option<SealedBatch>,
}

struct BufferState {
    records: Vec<Record>,
    size_bytes: usize,
    opened_at: Option<Instant>,
    generation: u64,
    next_sequence: u64,
    flush_tx: Option<mpsc::UnboundedSender<DeliveryBatch>>,
}

/// Owns the buffer of one process.
///
/// All mutation happens under one short synchronous lock, which is also the
/// process's flush lock: sealing a generation, bumping the generation counter
/// and handing the batch to the flush queue are a single critical section.
/// Queue order therefore equals seal order equals append order.
pub struct BufferManager {
    config: Arc<ProcessConfig>,
    state: Mutex<BufferState>,
    in_flight: watch::Sender<usize>,
    timer: watch::Sender<Option<TimerArm>>,
}

impl BufferManager {
    pub fn new(config: Arc<ProcessConfig>) -> (Arc<Self>, FlushQueue) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let (in_flight, _) = watch::channel(0);
        let (timer, _) = watch::channel(None);

        let manager = Arc::new(Self {
            config,
            state: Mutex::new(BufferState {
                records: Vec::new(),
                size_bytes: 0,
                opened_at: None,
                generation: 0,
                next_sequence: 0,
                flush_tx: Some(flush_tx),
            }),
            in_flight,
            timer,
        });
        (manager, flush_rx)
    }

    pub fn config(&self) -> &Arc<ProcessConfig> {
        &self.config
    }

    /// Appends a record to the active generation.
    ///
    /// When the accumulated size reaches `bufferSizeBytes` the generation is
    /// sealed before this returns; the next append opens a fresh one. The first
    /// record of a generation arms the flush timer.
    pub fn append(&self, mut record: Record) -> Result<Appended, BufferClosed> {
        let mut state = self.state.lock();
        if state.flush_tx.is_none() {
            return Err(BufferClosed);
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        record.assign_sequence(sequence);

        let opening = state.records.is_empty();
        let generation = state.generation;
        state.size_bytes += record.size_bytes();
        state.records.push(record);

        if state.size_bytes >= self.config.buffer_size_bytes() {
            let sealed = self.seal_locked(&mut state, FlushReason::Size);
            if state.flush_tx.is_none() {
                // The queue closed under this append; hand the record back.
                if let Some(record) = state.records.pop() {
                    state.size_bytes -= record.size_bytes();
                }
                state.next_sequence -= 1;
                return Err(BufferClosed);
            }
            return Ok(Appended {
                sequence,
                generation,
                sealed,
            });
        }

        if opening {
            let now = Instant::now();
            state.opened_at = Some(now);
            self.timer.send_replace(Some(TimerArm {
                generation,
                deadline: now + self.config.buffer_interval(),
            }));
        }

        Ok(Appended {
            sequence,
            generation,
            sealed: None,
        })
    }

    /// Seals the active generation if it is non-empty and, when given, still the
    /// expected generation. A trigger that lost the race is a no-op.
    pub fn seal(&self, expected_generation: Option<u64>, reason: FlushReason) -> Option<SealedBatch> {
        let mut state = self.state.lock();
        if expected_generation.is_some_and(|expected| expected != state.generation) {
            return None;
        }
        self.seal_locked(&mut state, reason)
    }

    /// Stops intake for this process: seals the remainder as a drain flush and
    /// closes the flush queue so the worker exits once it has drained.
    pub fn close(&self) -> Option<SealedBatch> {
        let mut state = self.state.lock();
        let sealed = self.seal_locked(&mut state, FlushReason::Drain);
        if !state.records.is_empty() {
            tracing::error!(
                process_id = self.config.process_id(),
                records = state.records.len(),
                "Buffer closed with records that could not be handed to the flush queue"
            );
        }
        state.flush_tx = None;
        self.timer.send_replace(None);
        sealed
    }

    fn seal_locked(&self, state: &mut BufferState, reason: FlushReason) -> Option<SealedBatch> {
        if state.records.is_empty() {
            return None;
        }
        let tx = state.flush_tx.as_ref()?;

        let records = std::mem::take(&mut state.records);
        let size_bytes = std::mem::take(&mut state.size_bytes);
        let generation = state.generation;
        let batch = DeliveryBatch::seal(self.config.shared_id(), generation, reason, records, size_bytes);
        let count = batch.len();

        self.in_flight.send_modify(|n| *n += 1);
        if let Err(mpsc::error::SendError(batch)) = tx.send(batch) {
            // Worker is gone; keep the records and stop intake for this process.
            self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
            state.records = batch.into_records();
            state.size_bytes = size_bytes;
            state.flush_tx = None;
            self.timer.send_replace(None);
            tracing::error!(
                process_id = self.config.process_id(),
                generation,
                records = count,
                "Flush queue closed, buffer closed with batch kept"
            );
            return None;
        }

        state.generation += 1;
        state.opened_at = None;

        tracing::debug!(
            process_id = self.config.process_id(),
            generation,
            reason = %reason,
            records = count,
            size_bytes,
            "Buffer generation sealed"
        );

        Some(SealedBatch {
            generation,
            reason,
            records: count,
            size_bytes,
        })
    }

    /// Called by the flush worker once a sealed batch is fully handled.
    pub fn complete_flush(&self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Resolves once no sealed batch of this process is awaiting delivery.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn subscribe_timer(&self) -> watch::Receiver<Option<TimerArm>> {
        self.timer.subscribe()
    }

    pub fn phase(&self) -> BufferPhase {
        let buffered = !self.state.lock().records.is_empty();
        if buffered {
            BufferPhase::Accumulating
        } else if self.in_flight() > 0 {
            BufferPhase::Flushing
        } else {
            BufferPhase::Empty
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn pending_records(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.state.lock().size_bytes
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.state.lock().opened_at
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().flush_tx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ProcessEntry, ProcessRegistry};
    use bytes::Bytes;
    use std::time::Duration;

    fn config(size: i64) -> Arc<ProcessConfig> {
        let registry = ProcessRegistry::from_entries(
            vec![ProcessEntry {
                process_id: Some("p".to_string()),
                source_path_prefix: Some("incoming/p".to_string()),
                output_path_template: Some("out/{processId}".to_string()),
                error_path_template: Some("err/{processId}/{reason}".to_string()),
                validate_and_transform: Some(false),
                buffer_size_bytes: Some(size),
                buffer_interval_seconds: Some(60),
                schema_path: None,
            }],
            None,
        )
        .unwrap();
        Arc::clone(registry.lookup("p").unwrap())
    }

    fn record(len: usize) -> Record {
        Record::new(Arc::from("p"), Bytes::from(vec![b'x'; len]))
    }

    #[tokio::test]
    async fn test_size_crossing_seals_exactly_once() {
        let (buffer, mut queue) = BufferManager::new(config(100));

        assert!(buffer.append(record(40)).unwrap().sealed.is_none());
        assert!(buffer.append(record(40)).unwrap().sealed.is_none());
        let third = buffer.append(record(40)).unwrap();
        let sealed = third.sealed.unwrap();
        assert_eq!(sealed.records, 3);
        assert_eq!(sealed.size_bytes, 120);
        assert_eq!(sealed.reason, FlushReason::Size);

        let fourth = buffer.append(record(40)).unwrap();
        assert_eq!(fourth.generation, 1);
        assert_eq!(buffer.pending_records(), 1);

        let batch = queue.recv().await.unwrap();
        let sequences: Vec<_> = batch.records().iter().map(Record::sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_trigger_is_noop() {
        let (buffer, _queue) = BufferManager::new(config(100));
        buffer.append(record(10)).unwrap();

        assert!(buffer.seal(Some(0), FlushReason::Timeout).is_some());
        assert!(buffer.seal(Some(0), FlushReason::Size).is_none());
        assert!(buffer.seal(None, FlushReason::Timeout).is_none());
        assert_eq!(buffer.in_flight(), 1);
        assert_eq!(buffer.phase(), BufferPhase::Flushing);

        buffer.complete_flush();
        assert_eq!(buffer.phase(), BufferPhase::Empty);
    }

    #[tokio::test]
    async fn test_first_record_arms_timer() {
        let (buffer, _queue) = BufferManager::new(config(1000));
        let timer = buffer.subscribe_timer();
        assert!(timer.borrow().is_none());

        buffer.append(record(10)).unwrap();
        let arm = timer.borrow().unwrap();
        assert_eq!(arm.generation, 0);
        assert_eq!(Some(arm.deadline), buffer.opened_at().map(|t| t + Duration::from_secs(60)));

        // Subsequent appends to the same generation keep the original deadline.
        buffer.append(record(10)).unwrap();
        assert_eq!(timer.borrow().unwrap(), arm);
    }

    #[tokio::test]
    async fn test_close_drains_and_rejects() {
        let (buffer, mut queue) = BufferManager::new(config(1000));
        buffer.append(record(10)).unwrap();

        let sealed = buffer.close().unwrap();
        assert_eq!(sealed.reason, FlushReason::Drain);
        assert_eq!(buffer.append(record(1)), Err(BufferClosed));
        assert!(buffer.is_closed());

        assert_eq!(queue.recv().await.unwrap().len(), 1);
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_lost_flush_queue_closes_buffer() {
        let (buffer, queue) = BufferManager::new(config(100));
        drop(queue);

        buffer.append(record(40)).unwrap();
        buffer.append(record(40)).unwrap();
        assert_eq!(buffer.append(record(40)), Err(BufferClosed));

        assert!(buffer.is_closed());
        assert_eq!(buffer.in_flight(), 0);
        assert_eq!(buffer.pending_records(), 2);
        assert_eq!(buffer.pending_bytes(), 80);
        assert_eq!(buffer.append(record(1)), Err(BufferClosed));
    }
}
