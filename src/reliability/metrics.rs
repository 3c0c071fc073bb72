use crate::domain::{FailureReason, FlushReason};
use crate::reliability::health::HealthMonitor;
#[cfg(feature = "metrics")]
use crate::reliability::health::HealthStatus;
#[cfg(feature = "metrics")]
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};
#[cfg(feature = "metrics")]
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "metrics")]
use warp::{Filter, Reply};

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("HTTP server error: {0}")]
    HttpError(String),
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub export_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_port: 9090,
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub flushes_size: u64,
    pub flushes_timeout: u64,
    pub flushes_drain: u64,
    pub batches_delivered: u64,
    pub records_delivered: u64,
    pub records_error_validation: u64,
    pub records_error_transform: u64,
    pub records_error_delivery: u64,
    pub delivery_retries: u64,
    pub delivery_failures: u64,
    pub error_sink_failures: u64,
    pub error_records_lost: u64,
}

impl MetricsSnapshot {
    pub fn flushes(&self) -> u64 {
        self.flushes_size + self.flushes_timeout + self.flushes_drain
    }

    pub fn records_error_routed(&self) -> u64 {
        self.records_error_validation + self.records_error_transform + self.records_error_delivery
    }
}

#[derive(Default)]
struct Counters {
    records_accepted: AtomicU64,
    records_rejected: AtomicU64,
    flushes_size: AtomicU64,
    flushes_timeout: AtomicU64,
    flushes_drain: AtomicU64,
    batches_delivered: AtomicU64,
    records_delivered: AtomicU64,
    records_error_validation: AtomicU64,
    records_error_transform: AtomicU64,
    records_error_delivery: AtomicU64,
    delivery_retries: AtomicU64,
    delivery_failures: AtomicU64,
    error_sink_failures: AtomicU64,
    error_records_lost: AtomicU64,
}

#[cfg(feature = "metrics")]
#[derive(Clone)]
struct PrometheusMetrics {
    registry: Arc<Registry>,
    records_accepted: CounterVec,
    records_rejected: CounterVec,
    flushes: CounterVec,
    flush_duration: HistogramVec,
    records_delivered: CounterVec,
    records_error_routed: CounterVec,
    delivery_retries: IntCounter,
    delivery_failures: IntCounter,
    error_sink_failures: IntCounter,
}

#[cfg(feature = "metrics")]
impl PrometheusMetrics {
    fn new() -> Result<Self, MetricsError> {
        let registry = Arc::new(Registry::new());

        let records_accepted = CounterVec::new(
            Opts::new("rask_stream_records_accepted_total", "Records accepted at intake"),
            &["process_id"],
        )?;
        registry.register(Box::new(records_accepted.clone()))?;

        let records_rejected = CounterVec::new(
            Opts::new("rask_stream_records_rejected_total", "Records rejected at intake"),
            &["reason"],
        )?;
        registry.register(Box::new(records_rejected.clone()))?;

        let flushes = CounterVec::new(
            Opts::new("rask_stream_flushes_total", "Buffer flushes by trigger"),
            &["process_id", "reason"],
        )?;
        registry.register(Box::new(flushes.clone()))?;

        let flush_duration = HistogramVec::new(
            HistogramOpts::new(
                "rask_stream_flush_duration_seconds",
                "Time from seal to completed delivery of a batch",
            ),
            &["process_id"],
        )?;
        registry.register(Box::new(flush_duration.clone()))?;

        let records_delivered = CounterVec::new(
            Opts::new("rask_stream_records_delivered_total", "Records written to output"),
            &["process_id"],
        )?;
        registry.register(Box::new(records_delivered.clone()))?;

        let records_error_routed = CounterVec::new(
            Opts::new("rask_stream_records_error_routed_total", "Records written to the error location"),
            &["process_id", "reason"],
        )?;
        registry.register(Box::new(records_error_routed.clone()))?;

        let delivery_retries = IntCounter::new(
            "rask_stream_delivery_retries_total",
            "Output write attempts after the first",
        )?;
        registry.register(Box::new(delivery_retries.clone()))?;

        let delivery_failures = IntCounter::new(
            "rask_stream_delivery_failures_total",
            "Batches that exhausted delivery retries",
        )?;
        registry.register(Box::new(delivery_failures.clone()))?;

        let error_sink_failures = IntCounter::new(
            "rask_stream_error_sink_failures_total",
            "Error objects that could not be written",
        )?;
        registry.register(Box::new(error_sink_failures.clone()))?;

        Ok(Self {
            registry,
            records_accepted,
            records_rejected,
            flushes,
            flush_duration,
            records_delivered,
            records_error_routed,
            delivery_retries,
            delivery_failures,
            error_sink_failures,
        })
    }
}

/// Engine-wide counters. Atomic counters back [`MetricsSnapshot`]; with the
/// `metrics` feature the same events also feed a prometheus registry.
#[derive(Clone)]
pub struct EngineMetrics {
    counters: Arc<Counters>,
    #[cfg(feature = "metrics")]
    prometheus: PrometheusMetrics,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            counters: Arc::new(Counters::default()),
            #[cfg(feature = "metrics")]
            prometheus: PrometheusMetrics::new()?,
        })
    }

    pub fn record_accepted(&self, process_id: &str) {
        self.counters.records_accepted.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus
            .records_accepted
            .with_label_values(&[process_id])
            .inc();
        #[cfg(not(feature = "metrics"))]
        let _ = process_id;
    }

    pub fn record_rejected(&self, reason: &str) {
        self.counters.records_rejected.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus
            .records_rejected
            .with_label_values(&[reason])
            .inc();
        #[cfg(not(feature = "metrics"))]
        let _ = reason;
    }

    pub fn record_flush(&self, process_id: &str, reason: FlushReason) {
        let counter = match reason {
            FlushReason::Size => &self.counters.flushes_size,
            FlushReason::Timeout => &self.counters.flushes_timeout,
            FlushReason::Drain => &self.counters.flushes_drain,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus
            .flushes
            .with_label_values(&[process_id, reason.as_str()])
            .inc();
        #[cfg(not(feature = "metrics"))]
        let _ = process_id;
    }

    pub fn record_flush_duration(&self, process_id: &str, duration: Duration) {
        #[cfg(feature = "metrics")]
        self.prometheus
            .flush_duration
            .with_label_values(&[process_id])
            .observe(duration.as_secs_f64());
        #[cfg(not(feature = "metrics"))]
        let _ = (process_id, duration);
    }

    pub fn record_delivered(&self, process_id: &str, records: usize) {
        self.counters.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.counters
            .records_delivered
            .fetch_add(records as u64, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus
            .records_delivered
            .with_label_values(&[process_id])
            .inc_by(records as f64);
        #[cfg(not(feature = "metrics"))]
        let _ = process_id;
    }

    pub fn record_error_routed(&self, process_id: &str, reason: FailureReason, records: usize) {
        let counter = match reason {
            FailureReason::Validation => &self.counters.records_error_validation,
            FailureReason::Transform => &self.counters.records_error_transform,
            FailureReason::Delivery => &self.counters.records_error_delivery,
        };
        counter.fetch_add(records as u64, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus
            .records_error_routed
            .with_label_values(&[process_id, reason.as_str()])
            .inc_by(records as f64);
        #[cfg(not(feature = "metrics"))]
        let _ = process_id;
    }

    pub fn record_delivery_retry(&self) {
        self.counters.delivery_retries.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus.delivery_retries.inc();
    }

    pub fn record_delivery_failure(&self) {
        self.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus.delivery_failures.inc();
    }

    pub fn record_error_sink_failure(&self, lost_records: usize) {
        self.counters.error_sink_failures.fetch_add(1, Ordering::Relaxed);
        self.counters
            .error_records_lost
            .fetch_add(lost_records as u64, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        self.prometheus.error_sink_failures.inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            records_accepted: c.records_accepted.load(Ordering::Relaxed),
            records_rejected: c.records_rejected.load(Ordering::Relaxed),
            flushes_size: c.flushes_size.load(Ordering::Relaxed),
            flushes_timeout: c.flushes_timeout.load(Ordering::Relaxed),
            flushes_drain: c.flushes_drain.load(Ordering::Relaxed),
            batches_delivered: c.batches_delivered.load(Ordering::Relaxed),
            records_delivered: c.records_delivered.load(Ordering::Relaxed),
            records_error_validation: c.records_error_validation.load(Ordering::Relaxed),
            records_error_transform: c.records_error_transform.load(Ordering::Relaxed),
            records_error_delivery: c.records_error_delivery.load(Ordering::Relaxed),
            delivery_retries: c.delivery_retries.load(Ordering::Relaxed),
            delivery_failures: c.delivery_failures.load(Ordering::Relaxed),
            error_sink_failures: c.error_sink_failures.load(Ordering::Relaxed),
            error_records_lost: c.error_records_lost.load(Ordering::Relaxed),
        }
    }

    #[cfg(feature = "metrics")]
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    #[cfg(not(feature = "metrics"))]
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        Ok("# Metrics disabled\n".to_string())
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Serves `/metrics` and `/health` until the cancellation token fires.
pub struct PrometheusExporter {
    config: MetricsConfig,
    metrics: EngineMetrics,
    health: Arc<HealthMonitor>,
}

impl PrometheusExporter {
    pub fn new(config: MetricsConfig, metrics: EngineMetrics, health: Arc<HealthMonitor>) -> Self {
        Self {
            config,
            metrics,
            health,
        }
    }

    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        self.metrics.export_metrics()
    }

    #[cfg(feature = "metrics")]
    pub async fn start_server(self, cancel: CancellationToken) -> Result<(), MetricsError> {
        if !self.config.enabled {
            return Ok(());
        }

        let collector = self.metrics.clone();
        let metrics = warp::path!("metrics")
            .and(warp::get())
            .map(move || match collector.export_metrics() {
                Ok(metrics_text) => warp::reply::with_header(
                    metrics_text,
                    "content-type",
                    "text/plain; version=0.0.4",
                )
                .into_response(),
                Err(_) => warp::reply::with_status(
                    "Internal Server Error",
                    warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                )
                .into_response(),
            });

        let monitor = Arc::clone(&self.health);
        let health = warp::path!("health").and(warp::get()).and_then(move || {
            let monitor = Arc::clone(&monitor);
            async move {
                let report = monitor.report().await;
                let status = match report.overall_status {
                    HealthStatus::Unhealthy => warp::http::StatusCode::SERVICE_UNAVAILABLE,
                    HealthStatus::Healthy | HealthStatus::Degraded => warp::http::StatusCode::OK,
                };
                Ok::<_, warp::Rejection>(warp::reply::with_status(
                    warp::reply::json(&report),
                    status,
                ))
            }
        });

        let routes = metrics.or(health);
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.export_port));

        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move { cancel.cancelled().await })
            .map_err(|e| MetricsError::HttpError(e.to_string()))?;

        tracing::info!("Starting Prometheus metrics server on {}", bound);
        server.await;
        tracing::debug!("Metrics server stopped");
        Ok(())
    }

    #[cfg(not(feature = "metrics"))]
    pub async fn start_server(self, cancel: CancellationToken) -> Result<(), MetricsError> {
        let _ = (&self.config, &self.health, cancel);
        tracing::warn!("Metrics feature is disabled");
        Ok(())
    }
}
