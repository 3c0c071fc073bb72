use super::manager::{BufferManager, TimerArm};
use crate::domain::FlushReason;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;

/// Fires timeout flushes for one process.
///
/// The buffer publishes the deadline of its open generation; the scheduler
/// sleeps until it and then seals that generation only if it is still the
/// active one, so a size flush that won the race turns the timer into a no-op.
pub struct FlushScheduler {
    buffer: Arc<BufferManager>,
    timer: watch::Receiver<Option<TimerArm>>,
    cancel: CancellationToken,
    last_fired: Option<u64>,
}

impl FlushScheduler {
    pub fn new(buffer: Arc<BufferManager>, cancel: CancellationToken) -> Self {
        let timer = buffer.subscribe_timer();
        Self {
            buffer,
            timer,
            cancel,
            last_fired: None,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let process_id = self.buffer.config().shared_id();
        tracing::debug!(process_id = %process_id, "Flush scheduler started");

        loop {
            let pending = self.pending_arm();

            match pending {
                Some(arm) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        changed = self.timer.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = sleep_until(arm.deadline) => self.fire(arm),
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        changed = self.timer.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        tracing::debug!(process_id = %process_id, "Flush scheduler stopped");
    }

    fn pending_arm(&mut self) -> Option<TimerArm> {
        let arm = *self.timer.borrow_and_update();
        arm.filter(|arm| self.last_fired.is_none_or(|fired| arm.generation > fired))
    }

    fn fire(&mut self, arm: TimerArm) {
        self.last_fired = Some(arm.generation);
        match self.buffer.seal(Some(arm.generation), FlushReason::Timeout) {
            Some(sealed) => tracing::debug!(
                process_id = self.buffer.config().process_id(),
                generation = sealed.generation,
                records = sealed.records,
                "Timeout flush triggered"
            ),
            None => tracing::trace!(
                process_id = self.buffer.config().process_id(),
                generation = arm.generation,
                "Timer expired for a generation that was already sealed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Record;
    use crate::registry::{ProcessEntry, ProcessRegistry};
    use bytes::Bytes;
    use std::time::Duration;

    fn buffer(size: i64, interval: i64) -> (Arc<BufferManager>, crate::buffer::FlushQueue) {
        let registry = ProcessRegistry::from_entries(
            vec![ProcessEntry {
                process_id: Some("p".to_string()),
                source_path_prefix: Some("incoming/p".to_string()),
                output_path_template: Some("out/{processId}".to_string()),
                error_path_template: Some("err/{processId}/{reason}".to_string()),
                validate_and_transform: Some(false),
                buffer_size_bytes: Some(size),
                buffer_interval_seconds: Some(interval),
                schema_path: None,
            }],
            None,
        )
        .unwrap();
        BufferManager::new(Arc::clone(registry.lookup("p").unwrap()))
    }

    fn record(len: usize) -> Record {
        Record::new(Arc::from("p"), Bytes::from(vec![b'a'; len]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_flush_after_interval() {
        let (buffer, mut queue) = buffer(1_000, 5);
        let cancel = CancellationToken::new();
        let handle = FlushScheduler::new(Arc::clone(&buffer), cancel.clone()).spawn();

        buffer.append(record(10)).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(queue.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let batch = queue.recv().await.unwrap();
        assert_eq!(batch.reason(), FlushReason::Timeout);
        assert_eq!(batch.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_flush_disarms_pending_timer() {
        let (buffer, mut queue) = buffer(100, 5);
        let cancel = CancellationToken::new();
        let handle = FlushScheduler::new(Arc::clone(&buffer), cancel.clone()).spawn();

        buffer.append(record(60)).unwrap();
        buffer.append(record(60)).unwrap();
        let first = queue.recv().await.unwrap();
        assert_eq!(first.reason(), FlushReason::Size);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_generation_gets_its_own_deadline() {
        let (buffer, mut queue) = buffer(1_000, 5);
        let cancel = CancellationToken::new();
        let handle = FlushScheduler::new(Arc::clone(&buffer), cancel.clone()).spawn();

        buffer.append(record(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.recv().await.unwrap().generation(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        buffer.append(record(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(queue.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.recv().await.unwrap().generation(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
