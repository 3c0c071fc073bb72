//! Engine assembly: one buffer, timer and flush worker per process, wired to
//! shared delivery and error sinks.

pub mod intake;
mod worker;

pub use intake::{Accepted, IntakeGateway, IntakeRejection};

use crate::buffer::{BufferManager, BufferPhase, FlushScheduler};
use crate::domain::EngineError;
use crate::registry::ProcessRegistry;
use crate::reliability::{
    DELIVERY_SINK, ERROR_SINK, EngineMetrics, HealthConfig, HealthMonitor, MetricsSnapshot,
    RetryConfig, RetryPolicy, RetryStrategy,
};
use crate::sink::{DeliveryWriter, ErrorRouter, ObjectStore};
use crate::transform::{TransformationInvoker, Transformer};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use worker::FlushWorker;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_record_bytes: usize,
    /// Sealed batches a process may have awaiting delivery before intake
    /// for it answers with backpressure.
    pub max_pending_batches: usize,
    /// Flushes executing at once across all processes.
    pub flush_concurrency: usize,
    pub delivery_retry: RetryConfig,
    pub error_retry: RetryConfig,
    pub shutdown_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_record_bytes: 1_024_000,
            max_pending_batches: 8,
            flush_concurrency: 4,
            delivery_retry: RetryConfig::default(),
            error_retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_millis(200),
                max_total_backoff: Duration::from_secs(5),
                strategy: RetryStrategy::FixedDelay,
                jitter: false,
            },
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_record_bytes == 0 {
            return Err(EngineError::Setup("max_record_bytes must be greater than 0".into()));
        }
        if self.max_pending_batches == 0 {
            return Err(EngineError::Setup("max_pending_batches must be greater than 0".into()));
        }
        if self.flush_concurrency == 0 {
            return Err(EngineError::Setup("flush_concurrency must be greater than 0".into()));
        }
        self.delivery_retry.validate()?;
        self.error_retry.validate()?;
        Ok(())
    }
}

/// What a graceful shutdown flushed and the final counters.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub drained_batches: usize,
    pub drained_records: usize,
    pub metrics: MetricsSnapshot,
}

pub struct EngineBuilder {
    registry: Arc<ProcessRegistry>,
    settings: EngineSettings,
    store: Option<Arc<dyn ObjectStore>>,
    error_store: Option<Arc<dyn ObjectStore>>,
    transformers: HashMap<String, Arc<dyn Transformer>>,
    metrics: Option<EngineMetrics>,
    health: Option<Arc<HealthMonitor>>,
}

impl EngineBuilder {
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Output store. Also used for error objects unless `error_store` is set.
    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn error_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.error_store = Some(store);
        self
    }

    /// Replaces the schema transformer of one process.
    pub fn transformer(mut self, process_id: impl Into<String>, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.insert(process_id.into(), transformer);
        self
    }

    pub fn metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    /// Spawns every per-process task. Must be called within a tokio runtime.
    pub fn start(mut self) -> Result<Engine, EngineError> {
        self.settings.validate()?;

        let store = self
            .store
            .take()
            .ok_or_else(|| EngineError::Setup("no object store configured".into()))?;
        let error_store = self.error_store.take().unwrap_or_else(|| Arc::clone(&store));

        if let Some(unknown) = self
            .transformers
            .keys()
            .find(|id| self.registry.lookup(id).is_none())
        {
            return Err(EngineError::Setup(format!(
                "transformer registered for unknown process '{unknown}'"
            )));
        }

        let metrics = match self.metrics.take() {
            Some(metrics) => metrics,
            None => EngineMetrics::new()?,
        };
        let health = self.health.take().unwrap_or_else(|| {
            Arc::new(HealthMonitor::with_components(
                HealthConfig::default(),
                &[DELIVERY_SINK, ERROR_SINK],
            ))
        });

        let delivery = Arc::new(DeliveryWriter::new(
            store,
            RetryPolicy::new(self.settings.delivery_retry.clone())?,
            metrics.clone(),
            Arc::clone(&health),
        ));
        let errors = Arc::new(ErrorRouter::new(
            error_store,
            RetryPolicy::new(self.settings.error_retry.clone())?,
            metrics.clone(),
            Arc::clone(&health),
        ));

        let permits = Arc::new(Semaphore::new(self.settings.flush_concurrency));
        let cancel = CancellationToken::new();

        let mut buffers = Vec::with_capacity(self.registry.len());
        let mut by_id = HashMap::with_capacity(self.registry.len());
        let mut workers = Vec::with_capacity(self.registry.len());
        let mut timers = Vec::with_capacity(self.registry.len());

        for config in self.registry.iter() {
            let invoker = TransformationInvoker::for_process(
                config,
                self.transformers.remove(config.process_id()),
            )?;
            let (buffer, queue) = BufferManager::new(Arc::clone(config));

            timers.push(FlushScheduler::new(Arc::clone(&buffer), cancel.child_token()).spawn());

            let worker = FlushWorker::new(
                Arc::clone(&buffer),
                queue,
                invoker,
                Arc::clone(&delivery),
                Arc::clone(&errors),
                Arc::clone(&permits),
                metrics.clone(),
            );
            workers.push(tokio::spawn(worker.run()));

            tracing::info!(
                process_id = config.process_id(),
                buffer_size_bytes = config.buffer_size_bytes(),
                buffer_interval_secs = config.buffer_interval().as_secs(),
                validate_and_transform = config.validate_and_transform(),
                "Process started"
            );

            by_id.insert(config.process_id().to_string(), Arc::clone(&buffer));
            buffers.push(buffer);
        }

        let gateway = IntakeGateway::new(
            by_id,
            self.settings.max_record_bytes,
            self.settings.max_pending_batches,
            metrics.clone(),
        );

        Ok(Engine {
            registry: self.registry,
            gateway,
            buffers,
            workers,
            timers,
            cancel,
            metrics,
            health,
            settings: self.settings,
        })
    }
}

/// A running engine.
///
/// Dropping it without [`Engine::shutdown`] stops the timers; buffered
/// records that were never flushed are then lost.
pub struct Engine {
    registry: Arc<ProcessRegistry>,
    gateway: IntakeGateway,
    buffers: Vec<Arc<BufferManager>>,
    workers: Vec<JoinHandle<()>>,
    timers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    metrics: EngineMetrics,
    health: Arc<HealthMonitor>,
    settings: EngineSettings,
}

impl Engine {
    pub fn builder(registry: impl Into<Arc<ProcessRegistry>>) -> EngineBuilder {
        EngineBuilder {
            registry: registry.into(),
            settings: EngineSettings::default(),
            store: None,
            error_store: None,
            transformers: HashMap::new(),
            metrics: None,
            health: None,
        }
    }

    pub fn enqueue(
        &self,
        process_id: &str,
        payload: impl Into<Bytes>,
    ) -> Result<Accepted, IntakeRejection> {
        self.gateway.enqueue(process_id, payload)
    }

    pub fn gateway(&self) -> IntakeGateway {
        self.gateway.clone()
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn buffer(&self, process_id: &str) -> Option<&Arc<BufferManager>> {
        self.buffers
            .iter()
            .find(|buffer| buffer.config().process_id() == process_id)
    }

    pub fn phase(&self, process_id: &str) -> Option<BufferPhase> {
        self.buffer(process_id).map(|buffer| buffer.phase())
    }

    /// Waits until every sealed batch has been delivered or error-routed.
    /// Intake stays open and records still accumulating are not flushed.
    pub async fn wait_idle(&self) {
        for buffer in &self.buffers {
            buffer.wait_idle().await;
        }
    }

    /// Closes intake, drains every buffer and waits for all flush workers.
    pub async fn shutdown(mut self) -> Result<ShutdownReport, EngineError> {
        tracing::info!("Engine shutdown requested, draining buffers");
        self.gateway.close();

        let mut drained_batches = 0;
        let mut drained_records = 0;
        for buffer in &self.buffers {
            if let Some(sealed) = buffer.close() {
                drained_batches += 1;
                drained_records += sealed.records;
            }
        }

        let workers = std::mem::take(&mut self.workers);
        let abort_handles: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();
        let joined = tokio::time::timeout(
            self.settings.shutdown_timeout,
            futures::future::join_all(workers),
        )
        .await;

        self.cancel.cancel();
        for timer in std::mem::take(&mut self.timers) {
            if let Err(e) = timer.await {
                tracing::warn!("Flush scheduler task failed: {}", e);
            }
        }

        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::error!("Flush worker task failed: {}", e);
                    }
                }
            }
            Err(_) => {
                for handle in abort_handles {
                    handle.abort();
                }
                tracing::error!(
                    timeout = ?self.settings.shutdown_timeout,
                    "Shutdown timed out with flushes still running"
                );
                return Err(EngineError::ShutdownTimeout(self.settings.shutdown_timeout));
            }
        }

        let metrics = self.metrics.snapshot();
        tracing::info!(
            drained_batches,
            drained_records,
            delivered = metrics.records_delivered,
            error_routed = metrics.records_error_routed(),
            "Engine stopped"
        );

        Ok(ShutdownReport {
            drained_batches,
            drained_records,
            metrics,
        })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("processes", &self.buffers.len())
            .field("gateway", &self.gateway)
            .finish()
    }
}
