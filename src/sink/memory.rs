use super::{ObjectStore, StorageError};
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct FaultPlan {
    fail_next: usize,
    unavailable: bool,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Vec<Bytes>>,
    faults: FaultPlan,
    attempts: usize,
}

/// In-memory object store for embedding and tests.
///
/// Objects are immutable once written: a second write to the same path is
/// rejected. Faults can be injected to exercise retry paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` writes fail with `StorageError::Unavailable`.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.lock().faults.fail_next = count;
    }

    /// While set, every write fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().faults.unavailable = unavailable;
    }

    /// Number of write attempts, successful or not.
    pub fn write_attempts(&self) -> usize {
        self.inner.lock().attempts
    }

    pub fn objects(&self) -> BTreeMap<String, Vec<Bytes>> {
        self.inner.lock().objects.clone()
    }

    pub fn object(&self, path: &str) -> Option<Vec<Bytes>> {
        self.inner.lock().objects.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.inner.lock().objects.keys().cloned().collect()
    }

    /// Every record stored under `prefix`, in path order.
    pub fn records_under(&self, prefix: &str) -> Vec<Bytes> {
        self.inner
            .lock()
            .objects
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .flat_map(|(_, records)| records.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().objects.is_empty()
    }

    fn write(&self, path: &str, records: &[Bytes]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        inner.attempts += 1;

        if inner.faults.unavailable {
            return Err(StorageError::Unavailable("store marked unavailable".to_string()));
        }
        if inner.faults.fail_next > 0 {
            inner.faults.fail_next -= 1;
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }
        if inner.objects.contains_key(path) {
            return Err(StorageError::Rejected {
                path: path.to_string(),
                reason: "object already exists".to_string(),
            });
        }

        inner.objects.insert(path.to_string(), records.to_vec());
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn write_batch<'a>(
        &'a self,
        path: &'a str,
        records: &'a [Bytes],
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        let result = self.write(path, records);
        Box::pin(async move { result })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
