#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Durations and sizes stay within realistic bounds
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,      // Acceptable for metrics/display
    clippy::cast_sign_loss,           // Registry values are checked positive before casting
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,  // e.g. StorageError in sink module
    clippy::must_use_candidate,
    clippy::doc_markdown
)]

pub mod app;
pub mod buffer;
pub mod domain;
pub mod engine;
pub mod registry;
pub mod reliability;
pub mod sink;
pub mod source;
pub mod transform;

pub use domain::{DeliveryBatch, EngineError, ErrorRecord, FailureReason, FlushReason, Record};
pub use engine::{Accepted, Engine, EngineBuilder, EngineSettings, IntakeGateway, IntakeRejection, ShutdownReport};
pub use registry::{ProcessConfig, ProcessRegistry};
pub use sink::{FileStore, MemoryStore, ObjectStore};
pub use transform::{TransformFailure, Transformer};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
