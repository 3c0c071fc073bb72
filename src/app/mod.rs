pub mod config;
pub mod logging_system;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingError, LoggingSystem, setup_logging_safe};

use crate::engine::{Engine, ShutdownReport};
use crate::registry::ProcessRegistry;
use crate::reliability::PrometheusExporter;
use crate::sink::FileStore;
use crate::source::DirectorySource;
use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The `rask-stream-engine` binary: file-backed stores, optional directory
/// intake and metrics endpoint, signal-driven graceful shutdown.
pub struct App {
    config: Config,
    registry: Arc<ProcessRegistry>,
}

impl App {
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let registry = ProcessRegistry::from_path(&config.processes_file)?;
        Ok(Self {
            config,
            registry: Arc::new(registry),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Runs until `cancel` fires, then drains the engine.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<ShutdownReport> {
        let output = FileStore::create(&self.config.output_root, self.config.compression)
            .await
            .with_context(|| format!("cannot create output root {}", self.config.output_root.display()))?;
        let errors = FileStore::create(self.config.error_root(), self.config.compression)
            .await
            .with_context(|| format!("cannot create error root {}", self.config.error_root().display()))?;

        let engine = Engine::builder(Arc::clone(&self.registry))
            .settings(self.config.engine_settings())
            .store(Arc::new(output))
            .error_store(Arc::new(errors))
            .start()
            .context("failed to start engine")?;

        let metrics_task = self.config.enable_metrics.then(|| {
            let exporter = PrometheusExporter::new(
                self.config.metrics_config.clone(),
                engine.metrics().clone(),
                Arc::clone(engine.health()),
            );
            let token = cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = exporter.start_server(token).await {
                    error!("Metrics server error: {}", e);
                }
            })
        });

        let source_task = self.config.source_root.as_ref().map(|root| {
            let source = DirectorySource::new(
                root.clone(),
                Arc::clone(&self.registry),
                engine.gateway(),
                self.config.poll_interval,
            );
            tokio::spawn(source.run(cancel.child_token()))
        });

        info!(
            processes = self.registry.len(),
            output_root = %self.config.output_root.display(),
            "rask-stream-engine is running. Press Ctrl+C to stop."
        );
        cancel.cancelled().await;

        if let Some(task) = source_task
            && let Err(e) = task.await
        {
            error!("Directory source task failed: {}", e);
        }

        let report = engine.shutdown().await.context("engine shutdown failed")?;

        if let Some(task) = metrics_task
            && let Err(e) = task.await
        {
            error!("Metrics task failed: {}", e);
        }

        Ok(report)
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub async fn main() -> anyhow::Result<()> {
    let config = Config::load(std::env::args_os()).context("failed to load configuration")?;
    setup_logging_safe(config.log_level, config.log_format)?;

    info!("Starting rask-stream-engine v{}", get_version());
    info!(
        processes_file = %config.processes_file.display(),
        max_record_bytes = config.max_record_bytes,
        flush_concurrency = config.flush_concurrency,
        compression = %config.compression,
        "Configuration loaded"
    );

    let app = App::from_config(config).context("failed to load process registry")?;

    let cancel = CancellationToken::new();
    let signals = shutdown::spawn_signal_listener(cancel.clone());
    let result = app.run(cancel.clone()).await;
    cancel.cancel();
    let _ = signals.await;

    let report = result?;
    info!(
        drained_batches = report.drained_batches,
        drained_records = report.drained_records,
        delivered = report.metrics.records_delivered,
        error_routed = report.metrics.records_error_routed(),
        "rask-stream-engine stopped"
    );
    Ok(())
}
