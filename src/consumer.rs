//! Message consumer
//!
//! Drains the message bus until the server closes it.

use tracing::info;

use crate::bus::{Message, MessageReceiver};

/// Hand every message to `handle` until the bus is closed. Returns the number
/// of messages consumed.
pub async fn consume<F>(mut receiver: MessageReceiver, mut handle: F) -> u64
where
    F: FnMut(Message),
{
    let mut consumed = 0u64;
    while let Some(message) = receiver.recv().await {
        handle(message);
        consumed += 1;
    }
    consumed
}

/// Log every message as it arrives
pub async fn log_messages(receiver: MessageReceiver) -> u64 {
    let consumed = consume(receiver, |message| {
        info!(
            "Message received from {}: {}",
            message.origin(),
            message.payload_lossy().trim_end_matches('\n')
        );
    })
    .await;

    info!("Message bus closed after {} messages", consumed);
    consumed
}
