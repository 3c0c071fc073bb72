//! Domain layer for rask-stream-engine.
//!
//! Contains the canonical types shared across all modules:
//! - `Record`: one accepted payload, owned by exactly one buffer generation
//! - `DeliveryBatch`: the sealed contents of a buffer generation
//! - `ErrorRecord`: a record that will be written to the error location
//! - `EngineError`: top-level error type

pub mod error;
pub mod record;

pub use error::EngineError;
pub use record::{DeliveryBatch, ErrorRecord, FailureReason, FlushReason, ProcessId, Record};
