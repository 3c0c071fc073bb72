use super::{ConfigError, LogFormat, LogLevel};
use crate::engine::EngineSettings;
use crate::reliability::{MetricsConfig, RetryConfig, RetryStrategy};
use crate::sink::Compression;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Process registry file (.toml or .json)
    #[arg(long, env = "PROCESSES_FILE", default_value = "processes.toml")]
    pub processes_file: PathBuf,

    /// Root directory for output objects
    #[arg(long, env = "OUTPUT_ROOT", default_value = "./data/output")]
    pub output_root: PathBuf,

    /// Root directory for error objects (defaults to the output root)
    #[arg(long, env = "ERROR_ROOT")]
    pub error_root: Option<PathBuf>,

    /// Root directory polled for deposited records; intake from disk is off when unset
    #[arg(long, env = "SOURCE_ROOT")]
    pub source_root: Option<PathBuf>,

    /// Source directory poll interval in milliseconds
    #[arg(long, env = "SOURCE_POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Largest accepted record in bytes
    #[arg(long, env = "MAX_RECORD_BYTES", default_value = "1024000")]
    pub max_record_bytes: usize,

    /// Sealed batches per process awaiting delivery before intake pushes back
    #[arg(long, env = "MAX_PENDING_BATCHES", default_value = "8")]
    pub max_pending_batches: usize,

    /// Flushes executing concurrently across all processes
    #[arg(long, env = "FLUSH_CONCURRENCY", default_value = "4")]
    pub flush_concurrency: usize,

    /// Output write attempts per batch, including the first
    #[arg(long, env = "DELIVERY_MAX_ATTEMPTS", default_value = "3")]
    pub delivery_max_attempts: u32,

    /// Initial delivery backoff in milliseconds
    #[arg(long, env = "DELIVERY_BASE_DELAY_MS", default_value = "500")]
    pub delivery_base_delay_ms: u64,

    /// Largest single delivery backoff in milliseconds
    #[arg(long, env = "DELIVERY_MAX_DELAY_MS", default_value = "30000")]
    pub delivery_max_delay_ms: u64,

    /// Total delivery backoff budget per batch in milliseconds
    #[arg(long, env = "DELIVERY_MAX_BACKOFF_MS", default_value = "120000")]
    pub delivery_max_backoff_ms: u64,

    /// Backoff strategy (exponential, linear or fixed)
    #[arg(long, env = "RETRY_STRATEGY", default_value = "exponential")]
    pub retry_strategy: RetryStrategy,

    /// Disable random jitter on backoff delays
    #[arg(long, env = "NO_JITTER")]
    pub no_jitter: bool,

    /// Error object write attempts before the records are reported lost
    #[arg(long, env = "ERROR_SINK_ATTEMPTS", default_value = "3")]
    pub error_sink_attempts: u32,

    /// Output object compression
    #[arg(long, env = "COMPRESSION", default_value = "none")]
    pub compression: Compression,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Enable the /metrics and /health endpoint
    #[arg(long, env = "ENABLE_METRICS")]
    pub enable_metrics: bool,

    /// Metrics export port
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    pub metrics_port: u16,

    /// Seconds to wait for in-flight flushes at shutdown
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value = "60")]
    pub shutdown_timeout_secs: u64,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub poll_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub shutdown_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub delivery_retry: RetryConfig,

    #[serde(skip)]
    #[arg(skip)]
    pub error_retry: RetryConfig,

    #[serde(skip)]
    #[arg(skip)]
    pub metrics_config: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processes_file: PathBuf::from("processes.toml"),
            output_root: PathBuf::from("./data/output"),
            error_root: None,
            source_root: None,
            poll_interval_ms: 1000,
            max_record_bytes: 1_024_000,
            max_pending_batches: 8,
            flush_concurrency: 4,
            delivery_max_attempts: 3,
            delivery_base_delay_ms: 500,
            delivery_max_delay_ms: 30_000,
            delivery_max_backoff_ms: 120_000,
            retry_strategy: RetryStrategy::ExponentialBackoff,
            no_jitter: false,
            error_sink_attempts: 3,
            compression: Compression::None,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            enable_metrics: false,
            metrics_port: 9090,
            shutdown_timeout_secs: 60,
            config_file: None,
            poll_interval: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(60),
            delivery_retry: RetryConfig::default(),
            error_retry: EngineSettings::default().error_retry,
            metrics_config: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Parses CLI arguments (with env fallbacks). When `--config-file` is
    /// given, the file replaces the argument values.
    pub fn load<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let parsed = Config::try_parse_from(args)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        match &parsed.config_file {
            Some(path) => {
                let mut config = Self::from_file(path)?;
                config.config_file = Some(path.clone());
                Ok(config)
            }
            None => parsed.finish(),
        }
    }

    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Config::try_parse_from(args)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?
            .finish()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.finish()
    }

    fn finish(mut self) -> Result<Self, ConfigError> {
        self.post_process();
        self.validate()?;
        Ok(self)
    }

    pub fn post_process(&mut self) {
        self.poll_interval = Duration::from_millis(self.poll_interval_ms);
        self.shutdown_timeout = Duration::from_secs(self.shutdown_timeout_secs);

        self.delivery_retry = RetryConfig {
            max_attempts: self.delivery_max_attempts,
            base_delay: Duration::from_millis(self.delivery_base_delay_ms),
            max_delay: Duration::from_millis(self.delivery_max_delay_ms),
            max_total_backoff: Duration::from_millis(self.delivery_max_backoff_ms),
            strategy: self.retry_strategy,
            jitter: !self.no_jitter,
        };

        self.error_retry = RetryConfig {
            max_attempts: self.error_sink_attempts,
            ..EngineSettings::default().error_retry
        };

        self.metrics_config.enabled = self.enable_metrics;
        self.metrics_config.export_port = self.metrics_port;
    }

    pub fn error_root(&self) -> &Path {
        self.error_root.as_deref().unwrap_or(&self.output_root)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_record_bytes: self.max_record_bytes,
            max_pending_batches: self.max_pending_batches,
            flush_concurrency: self.flush_concurrency,
            delivery_retry: self.delivery_retry.clone(),
            error_retry: self.error_retry.clone(),
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}
