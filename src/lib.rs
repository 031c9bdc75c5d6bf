//! lineserver Library
//!
//! Line-oriented TCP server: accepts concurrent connections, reads
//! newline-delimited messages from each, funnels them through a bounded bus
//! to a single consumer and acknowledges every message to its sender.

pub mod bus;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod server;
pub mod shutdown;

pub use bus::{BusSender, Message, MessageReceiver};
pub use config::Config;
pub use error::{BusError, ServerError};
pub use server::{Server, ServerState};
pub use shutdown::ShutdownSignal;

/// Common error type for configuration and startup
pub type Result<T> = anyhow::Result<T>;
