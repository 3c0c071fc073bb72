use thiserror::Error;

/// Top-level error type for engine construction and the application shell.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::registry::ConfigError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] crate::reliability::MetricsError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::sink::StorageError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] crate::sink::DeliveryFailure),

    #[error("Intake rejected: {0}")]
    Intake(#[from] crate::engine::IntakeRejection),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::app::LoggingError),

    #[error("Retry policy error: {0}")]
    Retry(#[from] crate::reliability::RetryError),

    #[error("Schema error: {0}")]
    Schema(#[from] crate::transform::SchemaError),

    #[error("Invalid engine setup: {0}")]
    Setup(String),

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(std::time::Duration),
}
