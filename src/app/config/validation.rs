use super::{Config, ConfigError};

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processes_file.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Processes file must be set".to_string(),
            ));
        }

        if self.max_record_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max record bytes must be greater than 0".to_string(),
            ));
        }

        if self.max_pending_batches == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max pending batches must be greater than 0".to_string(),
            ));
        }

        if self.flush_concurrency == 0 {
            return Err(ConfigError::InvalidConfig(
                "Flush concurrency must be greater than 0".to_string(),
            ));
        }

        if self.delivery_max_attempts == 0 || self.error_sink_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "Retry attempts must be greater than 0".to_string(),
            ));
        }

        if self.delivery_base_delay_ms > self.delivery_max_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "Delivery base delay ({}ms) exceeds max delay ({}ms)",
                self.delivery_base_delay_ms, self.delivery_max_delay_ms
            )));
        }

        if self.source_root.is_some() && self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Source poll interval must be greater than 0".to_string(),
            ));
        }

        // Output written inside the source tree would be picked up as input.
        if let Some(source_root) = &self.source_root
            && (self.output_root.starts_with(source_root)
                || self.error_root().starts_with(source_root))
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Output and error roots must not be inside the source root {}",
                source_root.display()
            )));
        }

        if self.shutdown_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Shutdown timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
