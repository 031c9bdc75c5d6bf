//! Server Lifecycle
//!
//! Ties the acceptor, the message bus and the shutdown signal together.
//!
//! ```text
//! Created --start (bind ok)--> Listening --stop--> ShuttingDown --bus closed--> Stopped
//!    \--start (bind failed)-----------------------------------------------------^
//! ```
//!
//! [`Server::start`] blocks until [`Server::stop`] is called. On the way out it
//! stops the acceptor, which releases the listening socket, and then closes the
//! bus so the consumer sees end-of-stream. Connections that are still open keep
//! their reader task; their next send fails against the closed bus and the
//! reader drops the connection.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::{self, BusCloser, BusSender, MessageReceiver};
use crate::config::{ServerConfig, MAX_BUS_CAPACITY};
use crate::connection::{Acceptor, ConnectionCounters, ConnectionStats, ReaderSettings};
use crate::error::ServerError;
use crate::shutdown::ShutdownSignal;

/// Lifecycle state of a [`Server`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    ShuttingDown,
    Stopped,
}

/// Line-oriented TCP server
pub struct Server {
    listen_addr: String,
    settings: ReaderSettings,
    accept_error_backoff: Duration,
    bus: BusSender,
    closer: Mutex<Option<BusCloser>>,
    shutdown: ShutdownSignal,
    state: watch::Sender<ServerState>,
    local_addr: OnceLock<SocketAddr>,
    counters: Arc<ConnectionCounters>,
}

impl Server {
    /// Create a server and the receiving end of its message bus.
    ///
    /// Fails with [`ServerError::InvalidConfig`] if the bus capacity is zero
    /// or larger than [`MAX_BUS_CAPACITY`].
    pub fn new(config: &ServerConfig) -> Result<(Self, MessageReceiver), ServerError> {
        if config.bus_capacity == 0 || config.bus_capacity > MAX_BUS_CAPACITY {
            return Err(ServerError::InvalidConfig(format!(
                "bus_capacity must be between 1 and {}, got {}",
                MAX_BUS_CAPACITY, config.bus_capacity
            )));
        }

        let (bus, closer, receiver) = bus::channel(config.bus_capacity);
        let (state, _) = watch::channel(ServerState::Created);

        let server = Self {
            listen_addr: config.listen_addr.clone(),
            settings: ReaderSettings::from(config),
            accept_error_backoff: config.accept_error_backoff,
            bus,
            closer: Mutex::new(Some(closer)),
            shutdown: ShutdownSignal::new(),
            state,
            local_addr: OnceLock::new(),
            counters: Arc::new(ConnectionCounters::new()),
        };

        Ok((server, receiver))
    }

    /// Create a server with default settings listening on `listen_addr`
    pub fn bind_to(listen_addr: impl Into<String>) -> Result<(Self, MessageReceiver), ServerError> {
        let config = ServerConfig {
            listen_addr: listen_addr.into(),
            ..ServerConfig::default()
        };
        Self::new(&config)
    }

    /// Bind, accept connections until [`Server::stop`] is called, then close the bus.
    pub async fn start(&self) -> Result<(), ServerError> {
        let closer = self
            .closer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ServerError::AlreadyStarted)?;

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                error!("{}", e);
                closer.close();
                self.state.send_replace(ServerState::Stopped);
                return Err(e);
            }
        };

        let acceptor = Acceptor::new(
            listener,
            self.bus.clone(),
            self.settings.clone(),
            Arc::clone(&self.counters),
            self.shutdown.subscribe(),
            self.accept_error_backoff,
        );
        let mut acceptor_task = AcceptorTask(tokio::spawn(acceptor.run()));
        self.state.send_replace(ServerState::Listening);

        self.shutdown.subscribe().recv().await;
        self.state.send_replace(ServerState::ShuttingDown);
        info!("Server shutting down");

        acceptor_task.join().await;
        closer.close();

        self.state.send_replace(ServerState::Stopped);
        info!("Server stopped");
        Ok(())
    }

    async fn bind(&self) -> Result<TcpListener, ServerError> {
        let bind_error = |source| ServerError::Bind {
            addr: self.listen_addr.clone(),
            source,
        };

        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let _ = self.local_addr.set(local_addr);
        info!("Server started on {}", local_addr);
        Ok(listener)
    }

    /// Fire the shutdown signal. Calling it more than once has no further effect.
    pub fn stop(&self) {
        if self.shutdown.trigger() {
            info!("Stop requested");
        } else {
            warn!("Stop requested again, shutdown already in progress");
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Address the listener is bound to, once `start` has bound it
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Configured listen address
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Wait until the server is listening. Returns `None` if it stopped first.
    pub async fn wait_for_listening(&self) -> Option<SocketAddr> {
        let mut state = self.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ServerState::Listening => return self.local_addr(),
                ServerState::ShuttingDown | ServerState::Stopped => return None,
                ServerState::Created => {
                    if state.changed().await.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        self.counters.snapshot()
    }
}

/// Handle to the spawned acceptor; aborts it if `start` is dropped mid-flight
struct AcceptorTask(JoinHandle<()>);

impl AcceptorTask {
    async fn join(&mut self) {
        if let Err(e) = (&mut self.0).await {
            if !e.is_cancelled() {
                error!("Acceptor task failed: {}", e);
            }
        }
    }
}

impl Drop for AcceptorTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}
