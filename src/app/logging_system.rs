use super::config::{LogFormat, LogLevel};
use parking_lot::RwLock;
use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    #[error("Invalid log directive '{0}'")]
    InvalidDirective(String),
    #[error("Failed to build log filter '{filter}': {reason}")]
    FilterError { filter: String, reason: String },
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberError(String),
}

/// Builds the process-wide tracing subscriber from a default level plus
/// per-target directives.
pub struct LoggingSystem {
    directives: RwLock<Vec<(String, LogLevel)>>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: RwLock::new(Vec::new()),
        }
    }

    /// Adds a `target=level` directive.
    pub fn add_directive(&self, directive: &str) -> Result<(), LoggingError> {
        let (target, level) = directive
            .split_once('=')
            .ok_or_else(|| LoggingError::InvalidDirective(directive.to_string()))?;
        let level = <LogLevel as clap::ValueEnum>::from_str(level.trim(), true)
            .map_err(|_| LoggingError::InvalidDirective(directive.to_string()))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(LoggingError::InvalidDirective(directive.to_string()));
        }

        self.directives.write().push((target.to_string(), level));
        Ok(())
    }

    pub fn add_default_directives(&self) {
        let defaults = [("hyper", LogLevel::Warn), ("warp", LogLevel::Warn)];
        let mut directives = self.directives.write();
        for (target, level) in defaults {
            directives.push((target.to_string(), level));
        }
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        let mut parts = Vec::with_capacity(directives.len() + 1);
        parts.push(default_level.as_str().to_string());
        for (target, level) in directives.iter() {
            parts.push(format!("{target}={}", level.as_str()));
        }
        parts.join(",")
    }

    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), LoggingError> {
        let filter = self.build_filter_string(default_level);
        let env_filter = EnvFilter::try_new(&filter).map_err(|e| LoggingError::FilterError {
            filter: filter.clone(),
            reason: e.to_string(),
        })?;

        let result = match format {
            LogFormat::Compact => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true).with_level(true).compact())
                .try_init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_current_span(false))
                .try_init(),
        };
        result.map_err(|e| LoggingError::SubscriberError(e.to_string()))
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global subscriber once; later calls return the first outcome.
pub fn setup_logging_safe(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    static INIT: OnceLock<Result<(), LoggingError>> = OnceLock::new();

    INIT.get_or_init(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        logging_system.initialize_tracing(level, format)
    })
    .clone()
}
