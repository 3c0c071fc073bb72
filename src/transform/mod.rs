pub mod schema;

pub use schema::{CastType, Schema, SchemaError, SchemaTransformer};

use crate::domain::{FailureReason, Record};
use crate::registry::ProcessConfig;
use bytes::Bytes;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Terminal per-record failure reported by a [`Transformer`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformFailure {
    /// The payload could not be parsed or does not satisfy the schema.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The payload parsed but the transform logic could not be applied.
    #[error("transform failed: {0}")]
    Transform(String),
}

impl TransformFailure {
    pub fn reason(&self) -> FailureReason {
        match self {
            TransformFailure::Validation(_) => FailureReason::Validation,
            TransformFailure::Transform(_) => FailureReason::Transform,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            TransformFailure::Validation(detail) | TransformFailure::Transform(detail) => detail,
        }
    }
}

/// Pluggable per-record validate/transform capability.
///
/// Implementations must be pure: the same input always yields the same output,
/// and calls may happen concurrently from different processes' flush tasks.
pub trait Transformer: Send + Sync {
    fn transform(&self, payload: &[u8]) -> Result<Vec<u8>, TransformFailure>;

    fn name(&self) -> &'static str {
        "custom"
    }
}

/// A record that made it through the invoker, paired with its original so a
/// failed delivery can still route the original bytes.
#[derive(Debug, Clone)]
pub struct TransformedRecord {
    pub original: Record,
    pub payload: Bytes,
}

/// Applies a process's transformer, or the identity when the process has
/// `validateAndTransform` disabled.
#[derive(Clone)]
pub struct TransformationInvoker {
    transformer: Option<Arc<dyn Transformer>>,
}

impl TransformationInvoker {
    pub fn passthrough() -> Self {
        Self { transformer: None }
    }

    pub fn with_transformer(transformer: Arc<dyn Transformer>) -> Self {
        Self {
            transformer: Some(transformer),
        }
    }

    /// Builds the invoker for a process. An explicit transformer wins over the
    /// process schema; without either an empty schema still checks the payload
    /// is a JSON object.
    pub fn for_process(
        config: &ProcessConfig,
        custom: Option<Arc<dyn Transformer>>,
    ) -> Result<Self, SchemaError> {
        if !config.validate_and_transform() {
            return Ok(Self::passthrough());
        }
        let transformer: Arc<dyn Transformer> = match custom {
            Some(custom) => custom,
            None => {
                let schema = config.schema().cloned().unwrap_or_default();
                Arc::new(SchemaTransformer::new(schema)?)
            }
        };
        Ok(Self::with_transformer(transformer))
    }

    pub fn is_passthrough(&self) -> bool {
        self.transformer.is_none()
    }

    /// A transformer that panics fails only the record it was given.
    pub fn invoke(&self, record: &Record) -> Result<Bytes, TransformFailure> {
        let Some(transformer) = &self.transformer else {
            return Ok(record.payload().clone());
        };
        match panic::catch_unwind(AssertUnwindSafe(|| transformer.transform(record.payload()))) {
            Ok(result) => result.map(Bytes::from),
            Err(panic) => Err(TransformFailure::Transform(format!(
                "{} transformer panicked: {}",
                transformer.name(),
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Runs every record of a batch, keeping input order within each side.
    pub fn invoke_all(
        &self,
        records: Vec<Record>,
    ) -> (Vec<TransformedRecord>, Vec<(Record, TransformFailure)>) {
        let mut transformed = Vec::with_capacity(records.len());
        let mut failed = Vec::new();

        for record in records {
            match self.invoke(&record) {
                Ok(payload) => transformed.push(TransformedRecord {
                    original: record,
                    payload,
                }),
                Err(failure) => {
                    tracing::debug!(
                        process_id = record.process_id(),
                        sequence = record.sequence(),
                        reason = %failure.reason(),
                        "Record failed transformation: {}",
                        failure.detail()
                    );
                    failed.push((record, failure));
                }
            }
        }

        (transformed, failed)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

impl std::fmt::Debug for TransformationInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformationInvoker")
            .field(
                "transformer",
                &self.transformer.as_ref().map(|t| t.name()).unwrap_or("identity"),
            )
            .finish()
    }
}
