//! Storage side of the engine: the object store collaborator, the delivery
//! writer for output batches and the error router.

pub mod delivery;
pub mod error_router;
pub mod file;
pub mod memory;
pub mod partition;

pub use delivery::{DeliveryAck, DeliveryFailure, DeliveryWriter};
pub use error_router::{ErrorEnvelope, ErrorRouter, RouteOutcome};
pub use file::{Compression, FileStore};
pub use memory::MemoryStore;
pub use partition::PartitionClock;

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid object path '{0}'")]
    InvalidPath(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Write rejected for '{path}': {reason}")]
    Rejected { path: String, reason: String },
}

/// The storage collaborator.
///
/// `write_batch` stores all records as one object at `path`. A write either
/// lands completely or fails; callers retry the same path on failure.
pub trait ObjectStore: Send + Sync {
    fn write_batch<'a>(
        &'a self,
        path: &'a str,
        records: &'a [Bytes],
    ) -> BoxFuture<'a, Result<(), StorageError>>;

    fn name(&self) -> &'static str {
        "object_store"
    }
}
