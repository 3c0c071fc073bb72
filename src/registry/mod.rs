//! Process registry: validated, immutable per-process configuration.

mod loader;
pub mod template;

pub use loader::ProcessEntry;
pub use template::{PathTemplate, Placeholder, TemplateError, TemplateVars};

use crate::domain::ProcessId;
use crate::transform::Schema;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Unsupported registry format: {0}")]
    UnsupportedFormat(String),
    #[error("Process entry #{index}: missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },
    #[error("Process '{process_id}': {field} must be greater than 0 (got {value})")]
    NonPositive {
        process_id: String,
        field: &'static str,
        value: i64,
    },
    #[error("Duplicate process id '{0}'")]
    DuplicateProcess(String),
    #[error("Process '{process_id}': invalid {field}: {source}")]
    InvalidTemplate {
        process_id: String,
        field: &'static str,
        #[source]
        source: TemplateError,
    },
    #[error("Process '{process_id}': schema {path}: {reason}")]
    InvalidSchema {
        process_id: String,
        path: PathBuf,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Environment error: {0}")]
    EnvError(String),
}

/// Immutable configuration of one process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    process_id: ProcessId,
    source_path_prefix: String,
    output_path: PathTemplate,
    error_path: PathTemplate,
    validate_and_transform: bool,
    buffer_size_bytes: usize,
    buffer_interval: Duration,
    schema: Option<Schema>,
}

impl ProcessConfig {
    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn shared_id(&self) -> ProcessId {
        Arc::clone(&self.process_id)
    }

    pub fn source_path_prefix(&self) -> &str {
        &self.source_path_prefix
    }

    pub fn output_path(&self) -> &PathTemplate {
        &self.output_path
    }

    pub fn error_path(&self) -> &PathTemplate {
        &self.error_path
    }

    pub fn validate_and_transform(&self) -> bool {
        self.validate_and_transform
    }

    pub fn buffer_size_bytes(&self) -> usize {
        self.buffer_size_bytes
    }

    pub fn buffer_interval(&self) -> Duration {
        self.buffer_interval
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }
}

/// Read-only lookup table of every configured process.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    processes: HashMap<String, Arc<ProcessConfig>>,
    order: Vec<ProcessId>,
}

impl ProcessRegistry {
    /// Loads a registry file. The format follows the extension (`.toml` or `.json`);
    /// relative schema paths resolve against the file's directory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let base_dir = path.parent().map(Path::to_path_buf);

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content, base_dir.as_deref()),
            Some("json") => Self::from_json_str(&content, base_dir.as_deref()),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    pub fn from_toml_str(content: &str, base_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let file: loader::RegistryFile = toml::from_str(content)?;
        Self::from_entries(file.processes, base_dir)
    }

    pub fn from_json_str(content: &str, base_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let file: loader::RegistryFile = serde_json::from_str(content)?;
        Self::from_entries(file.processes, base_dir)
    }

    pub fn from_entries(
        entries: Vec<ProcessEntry>,
        base_dir: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one process must be configured".to_string(),
            ));
        }

        let mut registry = Self::default();
        for (index, entry) in entries.into_iter().enumerate() {
            let config = entry.into_config(index, base_dir)?;
            let key = config.process_id().to_string();
            if registry.processes.contains_key(&key) {
                return Err(ConfigError::DuplicateProcess(key));
            }
            registry.order.push(config.shared_id());
            registry.processes.insert(key, Arc::new(config));
        }

        tracing::debug!(processes = registry.len(), "Process registry loaded");
        Ok(registry)
    }

    pub fn lookup(&self, process_id: &str) -> Option<&Arc<ProcessConfig>> {
        self.processes.get(process_id)
    }

    /// Processes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProcessConfig>> {
        self.order.iter().filter_map(|id| self.processes.get(&**id))
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
