//! Shutdown Handling
//!
//! One-shot shutdown signal shared by the server lifecycle and the acceptor,
//! plus the OS signal listener used by the binary. The signal can be
//! triggered any number of times; only the first call has an effect.

use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::Result;

/// Fire-once shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create a new, unfired signal
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        let fired = self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        });

        if fired {
            debug!("Shutdown signal fired");
        } else {
            debug!("Shutdown signal already fired, ignoring");
        }
        fired
    }

    /// Check whether the signal has fired
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Get a listener; listeners created after the signal fired resolve immediately
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a [`ShutdownSignal`]
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Wait until the signal fires. Cancel safe.
    pub async fn recv(&mut self) {
        loop {
            let fired = *self.rx.borrow_and_update();
            if fired {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Every ShutdownSignal handle is gone; nobody can fire it any more.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Wait for SIGTERM, SIGINT or Ctrl+C
pub async fn wait_for_os_signal() -> Result<()> {
    info!("Starting shutdown signal listener");

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating shutdown");
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, initiating shutdown");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating shutdown");
    }

    Ok(())
}
