//! Configuration Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Acknowledgment written back to a client for every enqueued message
pub const DEFAULT_ACK_MESSAGE: &str = "Message received\n";

/// Default capacity of the message bus
pub const DEFAULT_BUS_CAPACITY: usize = 10;

/// Largest bus capacity a server accepts
pub const MAX_BUS_CAPACITY: usize = 65_536;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on, `host:port`
    pub listen_addr: String,
    /// Number of messages the bus buffers before readers block
    pub bus_capacity: usize,
    /// Text written to the peer after each enqueued message
    pub ack_message: String,
    /// Pause after an accept error that is not tied to a single connection
    #[serde(with = "humantime_serde")]
    pub accept_error_backoff: Duration,
    /// Consecutive read errors tolerated before a connection is dropped (0 = unlimited)
    pub max_consecutive_read_errors: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            ack_message: DEFAULT_ACK_MESSAGE.to_string(),
            accept_error_backoff: Duration::from_millis(100),
            max_consecutive_read_errors: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
