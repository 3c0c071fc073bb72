pub mod health;
pub mod metrics;
pub mod retry;

pub use health::{
    ComponentHealth, DELIVERY_SINK, ERROR_SINK, HealthConfig, HealthMonitor, HealthReport,
    HealthStatus,
};
pub use metrics::{
    EngineMetrics, MetricsConfig, MetricsError, MetricsSnapshot, PrometheusExporter,
};
pub use retry::{Exhausted, RetryConfig, RetryError, RetryPolicy, RetryStrategy};
