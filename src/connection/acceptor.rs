//! Acceptor
//!
//! Owns the listening socket and spawns one [`ConnectionReader`] task per
//! accepted connection. Accept errors never stop the loop; only the shutdown
//! signal does, and the listener is released when [`Acceptor::run`] returns.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use super::reader::{ConnectionReader, ReaderSettings};
use super::tracker::ConnectionCounters;
use crate::bus::BusSender;
use crate::shutdown::ShutdownListener;

/// Accept loop over a bound listener
pub struct Acceptor {
    listener: TcpListener,
    bus: BusSender,
    settings: ReaderSettings,
    counters: Arc<ConnectionCounters>,
    shutdown: ShutdownListener,
    error_backoff: Duration,
}

impl Acceptor {
    pub fn new(
        listener: TcpListener,
        bus: BusSender,
        settings: ReaderSettings,
        counters: Arc<ConnectionCounters>,
        shutdown: ShutdownListener,
        error_backoff: Duration,
    ) -> Self {
        Self {
            listener,
            bus,
            settings,
            counters,
            shutdown,
            error_backoff,
        }
    }

    /// Main connection acceptance loop
    pub async fn run(mut self) {
        info!("Starting connection acceptance loop");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.spawn_reader(stream, addr),
                        Err(e) => {
                            error!("Failed accepting connection: {}", e);
                            if !is_per_connection_error(&e) {
                                self.back_off().await;
                            }
                        }
                    }
                }
            }
        }

        info!("Connection acceptance loop stopped");
    }

    fn spawn_reader(&self, stream: TcpStream, addr: SocketAddr) {
        let guard = self.counters.track(addr);
        info!("Connection accepted: {} ({})", addr, guard.id());

        let reader = ConnectionReader::new(stream, guard, self.bus.clone(), self.settings.clone());
        tokio::spawn(async move {
            let outcome = reader.run().await;
            debug!("Connection from {} finished: {:?}", addr, outcome);
        });
    }

    /// Pause after a listener-level error, waking early on shutdown
    async fn back_off(&mut self) {
        if self.error_backoff.is_zero() {
            return;
        }

        debug!("Backing off for {:?} after accept error", self.error_backoff);
        tokio::select! {
            _ = tokio::time::sleep(self.error_backoff) => {}
            _ = self.shutdown.recv() => {}
        }
    }
}

/// Errors that concern only the connection being accepted, not the listener
fn is_per_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
