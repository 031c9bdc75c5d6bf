//! Connection Reader
//!
//! Owns one accepted connection. Reads newline-terminated messages, hands
//! each one to the bus and acknowledges it to the peer. The connection is
//! released when [`ConnectionReader::run`] returns.

use bytes::Bytes;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, instrument, warn};

use super::tracker::ConnectionGuard;
use crate::bus::{BusSender, Message};
use crate::config::{ServerConfig, DEFAULT_ACK_MESSAGE};

/// Message delimiter
pub const DELIMITER: u8 = b'\n';

/// Per-connection behaviour shared by every reader
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    /// Bytes written back after each enqueued message
    pub ack: Bytes,
    /// Consecutive read errors tolerated before giving up (0 = unlimited)
    pub max_consecutive_read_errors: u32,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            ack: Bytes::from_static(DEFAULT_ACK_MESSAGE.as_bytes()),
            max_consecutive_read_errors: 0,
        }
    }
}

impl From<&ServerConfig> for ReaderSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            ack: Bytes::from(config.ack_message.clone()),
            max_consecutive_read_errors: config.max_consecutive_read_errors,
        }
    }
}

/// Why a connection reader stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The peer closed its side of the stream
    PeerClosed,
    /// Writing the acknowledgment failed
    AckFailed,
    /// The bus was closed, so the server is shutting down
    BusClosed,
    /// The configured read error limit was reached
    TooManyReadErrors,
}

/// Reads messages from a single connection.
///
/// Generic over the byte stream; the peer address comes from the guard.
pub struct ConnectionReader<S> {
    stream: S,
    guard: ConnectionGuard,
    bus: BusSender,
    settings: ReaderSettings,
}

impl<S> ConnectionReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        guard: ConnectionGuard,
        bus: BusSender,
        settings: ReaderSettings,
    ) -> Self {
        Self {
            stream,
            guard,
            bus,
            settings,
        }
    }

    /// Run the read loop until a terminal condition is hit
    #[instrument(name = "connection", skip_all, fields(connection_id = %self.guard.id(), peer = %self.guard.peer()))]
    pub async fn run(self) -> ConnectionOutcome {
        let ConnectionReader {
            stream,
            guard,
            bus,
            settings,
        } = self;

        let origin = guard.peer().to_string();
        let (read_half, mut write_half) = io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();
        let mut consecutive_errors = 0u32;

        loop {
            buf.clear();

            match reader.read_until(DELIMITER, &mut buf).await {
                Ok(0) => {
                    info!("Connection closed by client {}", origin);
                    return ConnectionOutcome::PeerClosed;
                }
                Ok(n) if buf.last() != Some(&DELIMITER) => {
                    debug!("Discarding {} unterminated bytes from {}", n, origin);
                    info!("Connection closed by client {}", origin);
                    return ConnectionOutcome::PeerClosed;
                }
                Ok(n) => {
                    consecutive_errors = 0;
                    debug!("Read {} bytes from {}", n, origin);

                    let message = Message::new(origin.clone(), std::mem::take(&mut buf));
                    if let Err(e) = bus.send(message).await {
                        warn!("Dropping message from {}: {}", origin, e);
                        return ConnectionOutcome::BusClosed;
                    }
                    guard.record_message();

                    if let Err(e) = write_half.write_all(&settings.ack).await {
                        warn!("Failed sending response to client {}: {}", origin, e);
                        return ConnectionOutcome::AckFailed;
                    }
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    warn!("Failed reading from connection {}: {}", origin, e);

                    if settings.max_consecutive_read_errors > 0
                        && consecutive_errors >= settings.max_consecutive_read_errors
                    {
                        warn!(
                            "Closing connection {} after {} consecutive read errors",
                            origin, consecutive_errors
                        );
                        return ConnectionOutcome::TooManyReadErrors;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::connection::tracker::ConnectionCounters;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;
    use tokio::task::JoinHandle;
    use tokio::time::{timeout, Duration};

    /// Connect a client to a reader running over loopback
    async fn spawn_reader(
        bus: BusSender,
        settings: ReaderSettings,
    ) -> (TcpStream, JoinHandle<ConnectionOutcome>, Arc<ConnectionCounters>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();

        let counters = Arc::new(ConnectionCounters::new());
        let guard = counters.track(peer);
        let handle = tokio::spawn(ConnectionReader::new(stream, guard, bus, settings).run());

        (client, handle, counters)
    }

    async fn read_ack(client: &mut TcpStream) -> String {
        let mut ack = vec![0u8; DEFAULT_ACK_MESSAGE.len()];
        timeout(Duration::from_secs(2), client.read_exact(&mut ack))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8(ack).unwrap()
    }

    #[tokio::test]
    async fn test_message_forwarded_and_acknowledged() {
        let (tx, _closer, mut rx) = bus::channel(10);
        let (mut client, handle, counters) = spawn_reader(tx, ReaderSettings::default()).await;

        client.write_all(b"hello\n").await.unwrap();
        assert_eq!(read_ack(&mut client).await, "Message received\n");

        let message = rx.recv().await.unwrap();
        assert_eq!(&message.payload()[..], b"hello\n");
        assert_eq!(message.origin(), client.local_addr().unwrap().to_string());

        drop(client);
        assert_eq!(handle.await.unwrap(), ConnectionOutcome::PeerClosed);

        let stats = counters.snapshot();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.active_connections, 0);
    }

    #[tokio::test]
    async fn test_lines_in_one_write_are_split() {
        let (tx, _closer, mut rx) = bus::channel(10);
        let (mut client, _handle, _counters) = spawn_reader(tx, ReaderSettings::default()).await;

        client.write_all(b"one\ntwo\n\nthree\n").await.unwrap();

        for expected in [&b"one\n"[..], b"two\n", b"\n", b"three\n"] {
            let message = rx.recv().await.unwrap();
            assert_eq!(&message.payload()[..], expected);
        }
    }

    #[tokio::test]
    async fn test_unterminated_data_discarded_on_eof() {
        let (tx, _closer, mut rx) = bus::channel(10);
        // Keep a sender alive so the bus stays open after the reader exits.
        let _tx = tx.clone();
        let (mut client, handle, _counters) = spawn_reader(tx, ReaderSettings::default()).await;

        client.write_all(b"no newline here").await.unwrap();
        client.shutdown().await.unwrap();

        let outcome = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(outcome, ConnectionOutcome::PeerClosed);
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_bus_ends_connection() {
        let (tx, closer, _rx) = bus::channel(10);
        let (mut client, handle, counters) = spawn_reader(tx, ReaderSettings::default()).await;

        closer.close();
        client.write_all(b"late\n").await.unwrap();

        let outcome = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(outcome, ConnectionOutcome::BusClosed);
        assert_eq!(counters.snapshot().messages_received, 0);

        // No acknowledgment; the server side is gone.
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_custom_ack() {
        let (tx, _closer, _rx) = bus::channel(10);
        let settings = ReaderSettings {
            ack: Bytes::from_static(b"ok\n"),
            max_consecutive_read_errors: 0,
        };
        let (mut client, _handle, _counters) = spawn_reader(tx, settings).await;

        client.write_all(b"ping\n").await.unwrap();

        let mut ack = [0u8; 3];
        timeout(Duration::from_secs(2), client.read_exact(&mut ack))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&ack, b"ok\n");
    }

    fn mock_peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn read_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Other, "transient read failure")
    }

    #[tokio::test]
    async fn test_read_error_keeps_connection_open() {
        let (tx, _closer, mut rx) = bus::channel(10);
        let counters = Arc::new(ConnectionCounters::new());
        let stream = Builder::new()
            .read_error(read_error())
            .read(b"hello\n")
            .write(DEFAULT_ACK_MESSAGE.as_bytes())
            .build();

        let reader = ConnectionReader::new(
            stream,
            counters.track(mock_peer()),
            tx,
            ReaderSettings::default(),
        );
        assert_eq!(reader.run().await, ConnectionOutcome::PeerClosed);

        let message = rx.recv().await.unwrap();
        assert_eq!(&message.payload()[..], b"hello\n");
        assert_eq!(message.origin(), "127.0.0.1:40000");
        assert_eq!(counters.snapshot().messages_received, 1);
    }

    #[tokio::test]
    async fn test_read_error_limit_ends_connection() {
        let (tx, _closer, mut rx) = bus::channel(10);
        let counters = Arc::new(ConnectionCounters::new());
        // A successful read resets the count, so only the last two errors add up.
        let stream = Builder::new()
            .read_error(read_error())
            .read(b"a\n")
            .write(DEFAULT_ACK_MESSAGE.as_bytes())
            .read_error(read_error())
            .read_error(read_error())
            .build();
        let settings = ReaderSettings {
            max_consecutive_read_errors: 2,
            ..ReaderSettings::default()
        };

        let reader = ConnectionReader::new(stream, counters.track(mock_peer()), tx, settings);
        assert_eq!(reader.run().await, ConnectionOutcome::TooManyReadErrors);

        assert_eq!(&rx.recv().await.unwrap().payload()[..], b"a\n");
        assert_eq!(counters.snapshot().active_connections, 0);
    }

    #[tokio::test]
    async fn test_failed_ack_ends_connection() {
        let (tx, _closer, mut rx) = bus::channel(10);
        let counters = Arc::new(ConnectionCounters::new());
        let stream = Builder::new()
            .read(b"first\n")
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer went away",
            ))
            .build();

        let reader = ConnectionReader::new(
            stream,
            counters.track(mock_peer()),
            tx,
            ReaderSettings::default(),
        );
        assert_eq!(reader.run().await, ConnectionOutcome::AckFailed);

        // The message was enqueued before the acknowledgment failed.
        assert_eq!(&rx.recv().await.unwrap().payload()[..], b"first\n");
        assert_eq!(counters.snapshot().active_connections, 0);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = ServerConfig::default();
        config.ack_message = "got it\n".to_string();
        config.max_consecutive_read_errors = 3;

        let settings = ReaderSettings::from(&config);
        assert_eq!(&settings.ack[..], b"got it\n");
        assert_eq!(settings.max_consecutive_read_errors, 3);
    }
}
