//! Message Bus
//!
//! Bounded, ordered hand-off from every connection reader to the single
//! consumer. Built on a `tokio::sync::mpsc` channel plus a `watch` flag that
//! only the [`BusCloser`] can raise.
//!
//! Closing is guarded: once the flag is up, new sends fail with
//! [`BusError::Closed`] and senders parked on a full queue are woken with the
//! same error. The receiver still hands out everything that was enqueued
//! before the close, then reports end-of-stream.

use std::borrow::Cow;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::BusError;

/// A single newline-terminated message read from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    origin: String,
    payload: Bytes,
}

impl Message {
    pub fn new(origin: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            origin: origin.into(),
            payload: payload.into(),
        }
    }

    /// Remote peer that sent the message, `address:port`
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Raw bytes as read, including the trailing delimiter
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload decoded for display
    pub fn payload_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Create a bus with the given capacity.
///
/// Panics if `capacity` is zero, like `tokio::sync::mpsc::channel`.
pub fn channel(capacity: usize) -> (BusSender, BusCloser, MessageReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let (closed_tx, closed_rx) = watch::channel(false);

    let sender = BusSender {
        tx,
        closed: closed_rx.clone(),
    };
    let closer = BusCloser { closed: closed_tx };
    let receiver = MessageReceiver {
        rx,
        closed: closed_rx,
        draining: false,
    };

    (sender, closer, receiver)
}

/// Producer side of the bus, cloned into every connection reader
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: mpsc::Sender<Message>,
    closed: watch::Receiver<bool>,
}

impl BusSender {
    /// Enqueue a message, waiting while the bus is full.
    pub async fn send(&self, message: Message) -> Result<(), BusError> {
        let mut closed = self.closed.clone();
        if *closed.borrow_and_update() {
            return Err(BusError::Closed);
        }

        tokio::select! {
            biased;
            result = self.tx.send(message) => result.map_err(|_| BusError::Closed),
            _ = wait_closed(&mut closed) => Err(BusError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }
}

/// Close handle for the bus, held only by the server lifecycle.
///
/// Dropping the handle closes the bus.
#[derive(Debug)]
pub struct BusCloser {
    closed: watch::Sender<bool>,
}

impl BusCloser {
    /// Close the bus. Returns `true` for the call that actually closed it.
    pub fn close(&self) -> bool {
        let closed_now = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });

        if closed_now {
            debug!("Message bus closed");
        }
        closed_now
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Drop for BusCloser {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer side of the bus
#[derive(Debug)]
pub struct MessageReceiver {
    rx: mpsc::Receiver<Message>,
    closed: watch::Receiver<bool>,
    draining: bool,
}

impl MessageReceiver {
    /// Receive the next message.
    ///
    /// Returns `None` once the bus is closed and everything enqueued before
    /// the close has been handed out.
    pub async fn recv(&mut self) -> Option<Message> {
        if !self.draining {
            tokio::select! {
                biased;
                message = self.rx.recv() => return message,
                _ = wait_closed(&mut self.closed) => {
                    self.rx.close();
                    self.draining = true;
                }
            }
        }

        self.rx.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.draining || *self.closed.borrow()
    }
}

/// Resolves once the closed flag is raised or the close handle is gone.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}
