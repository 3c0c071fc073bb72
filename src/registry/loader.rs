use super::{ConfigError, PathTemplate, ProcessConfig};
use crate::transform::Schema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub(super) struct RegistryFile {
    #[serde(default)]
    pub(super) processes: Vec<ProcessEntry>,
}

/// One process as written in the registry file.
///
/// Every field is optional here so that a missing field is reported with the
/// entry's position and name instead of a generic parse error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProcessEntry {
    pub process_id: Option<String>,
    pub source_path_prefix: Option<String>,
    pub output_path_template: Option<String>,
    pub error_path_template: Option<String>,
    pub validate_and_transform: Option<bool>,
    pub buffer_size_bytes: Option<i64>,
    pub buffer_interval_seconds: Option<i64>,
    pub schema_path: Option<PathBuf>,
}

fn required<T>(value: Option<T>, index: usize, field: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::MissingField { index, field })
}

fn positive(value: i64, process_id: &str, field: &'static str) -> Result<u64, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::NonPositive {
            process_id: process_id.to_string(),
            field,
            value,
        });
    }
    Ok(value as u64)
}

impl ProcessEntry {
    pub(super) fn into_config(
        self,
        index: usize,
        base_dir: Option<&Path>,
    ) -> Result<ProcessConfig, ConfigError> {
        let process_id = required(self.process_id, index, "processId")?;
        if process_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "process entry #{index}: processId must not be empty"
            )));
        }
        // Ids are substituted into object paths; these would let two processes
        // resolve to the same object.
        if process_id.contains(['/', '\\', '{', '}']) || process_id.contains("..") {
            return Err(ConfigError::InvalidConfig(format!(
                "process entry #{index}: processId '{process_id}' must not contain '/', '\\', '{{', '}}' or '..'"
            )));
        }
        let source_path_prefix = required(self.source_path_prefix, index, "sourcePathPrefix")?;
        let output_raw = required(self.output_path_template, index, "outputPathTemplate")?;
        let error_raw = required(self.error_path_template, index, "errorPathTemplate")?;
        let validate_and_transform =
            required(self.validate_and_transform, index, "validateAndTransform")?;
        let size = required(self.buffer_size_bytes, index, "bufferSizeBytes")?;
        let interval = required(self.buffer_interval_seconds, index, "bufferIntervalSeconds")?;

        let buffer_size_bytes = positive(size, &process_id, "bufferSizeBytes")?;
        let interval_secs = positive(interval, &process_id, "bufferIntervalSeconds")?;

        let output_path =
            PathTemplate::output(&output_raw).map_err(|source| ConfigError::InvalidTemplate {
                process_id: process_id.clone(),
                field: "outputPathTemplate",
                source,
            })?;
        let error_path =
            PathTemplate::error(&error_raw).map_err(|source| ConfigError::InvalidTemplate {
                process_id: process_id.clone(),
                field: "errorPathTemplate",
                source,
            })?;

        // Schemas are only read for processes that actually transform.
        let schema = match (&self.schema_path, validate_and_transform) {
            (Some(path), true) => {
                let resolved = match base_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path.clone(),
                };
                let schema = Schema::from_path(&resolved).map_err(|e| {
                    ConfigError::InvalidSchema {
                        process_id: process_id.clone(),
                        path: resolved.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Some(schema)
            }
            _ => None,
        };

        Ok(ProcessConfig {
            process_id: Arc::from(process_id.as_str()),
            source_path_prefix,
            output_path,
            error_path,
            validate_and_transform,
            buffer_size_bytes: buffer_size_bytes as usize,
            buffer_interval: Duration::from_secs(interval_secs),
            schema,
        })
    }
}
