use crate::engine::{IntakeGateway, IntakeRejection};
use crate::registry::{ProcessConfig, ProcessRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SourceError + '_ {
    move |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub accepted: usize,
    /// Left in place because the process answered with backpressure.
    pub deferred: usize,
    pub rejected: usize,
}

impl ScanReport {
    fn merge(&mut self, other: ScanReport) {
        self.accepted += other.accepted;
        self.deferred += other.deferred;
        self.rejected += other.rejected;
    }
}

enum ProcessScan {
    Continue(ScanReport),
    Stop(ScanReport),
}

/// Polls `<root>/<sourcePathPrefix>` of every process for deposited `*.json`
/// files and enqueues each file as one record.
///
/// Accepted files are deleted, files refused with backpressure stay for the
/// next poll, and permanently rejected files are renamed to `*.rejected`.
pub struct DirectorySource {
    root: PathBuf,
    registry: Arc<ProcessRegistry>,
    gateway: IntakeGateway,
    poll_interval: Duration,
}

impl DirectorySource {
    pub fn new(
        root: impl Into<PathBuf>,
        registry: Arc<ProcessRegistry>,
        gateway: IntakeGateway,
        poll_interval: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            registry,
            gateway,
            poll_interval,
        }
    }

    pub fn process_dir(&self, config: &ProcessConfig) -> PathBuf {
        self.root.join(config.source_path_prefix())
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            root = %self.root.display(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Directory source started"
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.scan_once().await;
                    if report != ScanReport::default() {
                        tracing::debug!(
                            accepted = report.accepted,
                            deferred = report.deferred,
                            rejected = report.rejected,
                            "Directory scan finished"
                        );
                    }
                    if self.gateway.is_closed() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Directory source stopped");
    }

    pub async fn scan_once(&self) -> ScanReport {
        let mut total = ScanReport::default();
        for config in self.registry.iter() {
            match self.scan_process(config).await {
                Ok(ProcessScan::Continue(report)) => total.merge(report),
                Ok(ProcessScan::Stop(report)) => {
                    total.merge(report);
                    break;
                }
                Err(e) => {
                    tracing::warn!(process_id = config.process_id(), "Directory scan failed: {}", e);
                }
            }
        }
        total
    }

    async fn scan_process(&self, config: &ProcessConfig) -> Result<ProcessScan, SourceError> {
        let dir = self.process_dir(config);
        let mut report = ScanReport::default();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ProcessScan::Continue(report));
            }
            Err(e) => return Err(io_error(&dir)(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
            let path = entry.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let is_file = entry
                .file_type()
                .await
                .map_err(io_error(&path))?
                .is_file();
            if is_json && is_file {
                files.push(path);
            }
        }
        files.sort();

        for path in files {
            let payload = fs::read(&path).await.map_err(io_error(&path))?;
            match self.gateway.enqueue(config.process_id(), payload) {
                Ok(accepted) => {
                    report.accepted += 1;
                    if let Err(e) = fs::remove_file(&path).await {
                        tracing::error!(
                            path = %path.display(),
                            sequence = accepted.sequence,
                            "Accepted file could not be removed and will be read again: {}",
                            e
                        );
                    }
                }
                Err(rejection) if rejection.is_transient() => {
                    report.deferred += 1;
                    return Ok(ProcessScan::Continue(report));
                }
                Err(IntakeRejection::ShuttingDown) => return Ok(ProcessScan::Stop(report)),
                Err(rejection) => {
                    report.rejected += 1;
                    let mut target = path.clone().into_os_string();
                    target.push(".rejected");
                    tracing::warn!(
                        path = %path.display(),
                        reason = rejection.reason(),
                        "Source file rejected: {}",
                        rejection
                    );
                    fs::rename(&path, &target).await.map_err(io_error(&path))?;
                }
            }
        }

        Ok(ProcessScan::Continue(report))
    }
}
