//! Error types for the server and the message bus

use thiserror::Error;

/// Errors surfaced by the server lifecycle
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listening socket could not be created
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The server settings cannot be used to build a server
    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called on a server that already ran
    #[error("server has already been started")]
    AlreadyStarted,
}

/// Errors returned when handing a message to the bus
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The bus was closed by its owner; no further messages are accepted
    #[error("message bus is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:3000".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        };
        assert_eq!(
            err.to_string(),
            "failed to bind 127.0.0.1:3000: address in use"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invalid_config_display() {
        let err = ServerError::InvalidConfig("bus_capacity must be greater than 0".to_string());
        assert_eq!(
            err.to_string(),
            "invalid server configuration: bus_capacity must be greater than 0"
        );
    }

    #[test]
    fn test_bus_error_display() {
        assert_eq!(BusError::Closed.to_string(), "message bus is closed");
    }
}
