//! Configuration Manager

use super::{Config, MAX_BUS_CAPACITY};
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(listen_addr) = std::env::var("LINESERVER_LISTEN_ADDR") {
            config.server.listen_addr = listen_addr;
        }

        if let Ok(capacity) = std::env::var("LINESERVER_BUS_CAPACITY") {
            config.server.bus_capacity = capacity
                .parse::<usize>()
                .with_context(|| format!("Invalid LINESERVER_BUS_CAPACITY: {}", capacity))?;
        }

        if let Ok(backoff) = std::env::var("LINESERVER_ACCEPT_BACKOFF") {
            config.server.accept_error_backoff = humantime::parse_duration(&backoff)
                .with_context(|| format!("Invalid LINESERVER_ACCEPT_BACKOFF: {}", backoff))?;
        }

        if let Ok(log_level) = std::env::var("LINESERVER_LOG_LEVEL") {
            config.logging.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.listen_addr.trim().is_empty() {
            bail!("listen_addr must not be empty");
        }

        if self.server.bus_capacity == 0 {
            bail!("bus_capacity must be greater than 0");
        }

        if self.server.bus_capacity > MAX_BUS_CAPACITY {
            bail!("bus_capacity cannot exceed {}", MAX_BUS_CAPACITY);
        }

        if !self.server.ack_message.ends_with('\n') {
            bail!("ack_message must end with a newline");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.log_level.as_str()) {
            bail!(
                "logging.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        listen: Option<&str>,
        bus_capacity: Option<usize>,
        log_level: Option<&str>,
    ) {
        if let Some(addr) = listen {
            self.server.listen_addr = addr.to_string();
            tracing::info!("CLI override: listen address set to {}", addr);
        }

        if let Some(capacity) = bus_capacity {
            self.server.bus_capacity = capacity;
            tracing::info!("CLI override: bus capacity set to {}", capacity);
        }

        if let Some(level) = log_level {
            self.logging.log_level = level.to_string();
        }
    }
}
