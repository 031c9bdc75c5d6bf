//! Connection Management Module
//!
//! Accepts TCP connections and runs one reader task per connection.

pub mod acceptor;
pub mod reader;
pub mod tracker;

pub use acceptor::Acceptor;
pub use reader::{ConnectionOutcome, ConnectionReader, ReaderSettings};
pub use tracker::{ConnectionCounters, ConnectionGuard, ConnectionStats};
