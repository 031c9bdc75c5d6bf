//! Connection tracking
//!
//! Counters shared by the acceptor and every connection reader. Each accepted
//! connection holds a [`ConnectionGuard`]; dropping it marks the connection
//! closed, whichever way its reader ended.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

/// Point-in-time connection statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub active_connections: usize,
    pub total_connections: usize,
    pub messages_received: u64,
}

/// Shared connection counters
#[derive(Debug, Default)]
pub struct ConnectionCounters {
    active: AtomicUsize,
    total: AtomicUsize,
    messages: AtomicU64,
}

impl ConnectionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection
    pub fn track(self: &Arc<Self>, peer: SocketAddr) -> ConnectionGuard {
        let id = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        self.active.fetch_add(1, Ordering::Relaxed);

        ConnectionGuard {
            counters: Arc::clone(self),
            id: format!("conn_{}", id),
            peer,
            start_time: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            active_connections: self.active.load(Ordering::Relaxed),
            total_connections: self.total.load(Ordering::Relaxed),
            messages_received: self.messages.load(Ordering::Relaxed),
        }
    }
}

/// Keeps a connection counted as active for as long as it lives
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<ConnectionCounters>,
    id: String,
    peer: SocketAddr,
    start_time: Instant,
}

impl ConnectionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Count a message that made it onto the bus
    pub fn record_message(&self) {
        self.counters.messages.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        info!(
            "Connection {} from {} closed after {:?}",
            self.id,
            self.peer,
            self.start_time.elapsed()
        );
    }
}
