//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! TCP transport implementation.
//!
//! This module adapts a Tokio `TcpStream` to the message-oriented
//! [`Transport`] interface. A reader task turns the byte stream into chunks
//! of at most 4 KiB and hands them to the receive callback; a writer task
//! drains an unbounded queue of outbound messages.

use crate::transport::slot::RecvSlot;
use crate::transport::{
    Message, READ_CHUNK_SIZE, RecvCallback, Transport, TransportError, TransportId,
    TransportMetadata,
};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[cfg(feature = "observability")]
use tracing::instrument;

/// Once this many bytes wait for the socket, `send` asks callers to back off.
pub const WRITE_HIGH_WATER_MARK: usize = 256 * 1024;

/// TCP transport implementation.
///
/// `TcpTransport` must be created inside a Tokio runtime, which runs its
/// reader and writer tasks. Delivery to the receive callback happens on the
/// runtime's blocking pool, so a receiver that blocks (for example on a full
/// bounded queue) never stalls the reactor.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tls_bridge::transport::{TcpTransport, Transport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listener = TcpTransport::bind("127.0.0.1:8080").await?;
/// let (server, peer_addr) = TcpTransport::accept(&listener).await?;
/// println!("Accepted connection from {}", peer_addr);
///
/// let echo = Arc::clone(&server);
/// server.on_recv(Some(Arc::new(move |message| {
///     if let Some(bytes) = message {
///         let _ = echo.send(bytes);
///     }
/// })));
/// # Ok(())
/// # }
/// ```
pub struct TcpTransport {
    metadata: TransportMetadata,
    active: bool,
    slot: Arc<RecvSlot>,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending_bytes: Arc<AtomicUsize>,
    reader_task: JoinHandle<()>,
}

impl TcpTransport {
    /// Creates a new TCP transport from an existing stream.
    ///
    /// `active` records whether this side opened the connection; a TLS
    /// bridge on top of an active transport plays the client.
    ///
    /// # Errors
    ///
    /// Fails if the socket addresses cannot be read or no Tokio runtime is
    /// running on the calling thread.
    #[cfg_attr(
        feature = "observability",
        instrument(skip(stream), fields(transport_id, local_addr, peer_addr))
    )]
    pub fn from_stream(stream: TcpStream, active: bool) -> io::Result<Arc<Self>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;
        let id = TransportId::next();
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        #[cfg(feature = "observability")]
        {
            tracing::Span::current().record("transport_id", format!("{}", id));
            tracing::Span::current().record("local_addr", format!("{}", local_addr));
            tracing::Span::current().record("peer_addr", format!("{}", peer_addr));
        }
        debug!(transport_id = %id, %local_addr, %peer_addr, active, "Created TCP transport from stream");

        let metadata = TransportMetadata::new(id, "tcp")
            .with_local_addr(local_addr)
            .with_peer_addr(peer_addr);

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(RecvSlot::new());
        let pending_bytes = Arc::new(AtomicUsize::new(0));

        let reader_task = runtime.spawn(read_loop(read_half, Arc::clone(&slot), id));
        runtime.spawn(write_loop(write_half, rx, Arc::clone(&pending_bytes), id));

        Ok(Arc::new(Self {
            metadata,
            active,
            slot,
            writer: Mutex::new(Some(tx)),
            pending_bytes,
            reader_task,
        }))
    }

    /// Connects to a remote TCP endpoint.
    ///
    /// The returned transport is active.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError::ConnectionFailed`] if the connection cannot
    /// be established.
    #[cfg_attr(feature = "observability", instrument(skip(addr), fields(address)))]
    pub async fn connect(addr: impl Into<String>) -> Result<Arc<Self>, TransportError> {
        let addr_str = addr.into();

        #[cfg(feature = "observability")]
        tracing::Span::current().record("address", addr_str.as_str());

        let stream = TcpStream::connect(&addr_str)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                address: addr_str.clone(),
                source: e,
            })?;

        Self::from_stream(stream, true).map_err(|e| TransportError::Io { source: e })
    }

    /// Binds to a local address and listens for incoming connections.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError::BindFailed`] if the address cannot be bound.
    pub async fn bind(addr: impl Into<String>) -> Result<TcpListener, TransportError> {
        let addr_str = addr.into();
        TcpListener::bind(&addr_str)
            .await
            .map_err(|e| TransportError::BindFailed {
                address: addr_str.clone(),
                source: e,
            })
    }

    /// Accepts an incoming connection from a listener.
    ///
    /// The returned transport is passive.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if accepting the connection fails.
    #[cfg_attr(
        feature = "observability",
        instrument(skip(listener), fields(peer_addr))
    )]
    pub async fn accept(listener: &TcpListener) -> Result<(Arc<Self>, SocketAddr), TransportError> {
        let (stream, peer_addr) = listener
            .accept()
            .await
            .map_err(|e| TransportError::Io { source: e })?;

        #[cfg(feature = "observability")]
        tracing::Span::current().record("peer_addr", format!("{}", peer_addr));

        let transport =
            Self::from_stream(stream, false).map_err(|e| TransportError::Io { source: e })?;
        Ok((transport, peer_addr))
    }

    /// Stops accepting outbound messages and half-closes the socket once the
    /// queued ones are written.
    ///
    /// Inbound data keeps flowing until the peer closes its side.
    pub fn close(&self) {
        if self.writer.lock().take().is_some() {
            debug!(transport_id = %self.metadata.id, "Closing TCP transport");
        }
    }

    /// Number of bytes accepted by `send` but not yet written to the socket.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes.load(Ordering::Acquire)
    }
}

async fn read_loop(mut reader: OwnedReadHalf, slot: Arc<RecvSlot>, id: TransportId) {
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let message = match reader.read(&mut buffer).await {
            Ok(0) => None,
            Ok(n) => Some(buffer[..n].to_vec()),
            Err(e) => {
                warn!(transport_id = %id, error = %e, "TCP read failed");
                None
            }
        };
        let end_of_stream = message.is_none();
        trace!(transport_id = %id, size = message.as_ref().map(Vec::len), "TCP read");

        let slot = Arc::clone(&slot);
        if tokio::task::spawn_blocking(move || slot.deliver(message))
            .await
            .is_err()
            || end_of_stream
        {
            break;
        }
    }
    debug!(transport_id = %id, "TCP reader finished");
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Message>,
    pending_bytes: Arc<AtomicUsize>,
    id: TransportId,
) {
    while let Some(message) = rx.recv().await {
        pending_bytes.fetch_sub(message.len(), Ordering::AcqRel);
        if let Err(e) = writer.write_all(&message).await {
            warn!(transport_id = %id, error = %e, "TCP write failed");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        trace!(transport_id = %id, error = %e, "TCP shutdown failed");
    }
}

impl Transport for TcpTransport {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn send(&self, message: Message) -> Result<bool, TransportError> {
        let writer = self.writer.lock();
        let tx = writer.as_ref().ok_or(TransportError::Closed)?;
        let size = message.len();
        let pending = self.pending_bytes.fetch_add(size, Ordering::AcqRel) + size;
        if tx.send(message).is_err() {
            self.pending_bytes.fetch_sub(size, Ordering::AcqRel);
            return Err(TransportError::Closed);
        }
        Ok(pending < WRITE_HIGH_WATER_MARK)
    }

    fn on_recv(&self, callback: Option<RecvCallback>) {
        self.slot.set(callback);
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("metadata", &self.metadata)
            .field("active", &self.active)
            .field("pending_bytes", &self.pending_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn channel_callback() -> (RecvCallback, mpsc::UnboundedReceiver<Option<Message>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: RecvCallback = Arc::new(move |message| {
            let _ = tx.send(message);
        });
        (callback, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Option<Message>>) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("callback dropped")
    }

    #[tokio::test]
    async fn test_tcp_connect_and_echo() {
        let listener = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (transport, _) = TcpTransport::accept(&listener).await.unwrap();
            let echo = Arc::clone(&transport);
            transport.on_recv(Some(Arc::new(move |message| {
                if let Some(bytes) = message {
                    echo.send(bytes).unwrap();
                }
            })));
            transport
        });

        let client = TcpTransport::connect(addr.to_string()).await.unwrap();
        let (callback, mut rx) = channel_callback();
        client.on_recv(Some(callback));
        let _server = server_task.await.unwrap();

        assert!(client.send(b"Hello, server!".to_vec()).unwrap());
        assert_eq!(next(&mut rx).await, Some(b"Hello, server!".to_vec()));
    }

    #[tokio::test]
    async fn test_tcp_roles_and_metadata() {
        let listener = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { TcpTransport::accept(&listener).await.unwrap() });
        let client = TcpTransport::connect(addr.to_string()).await.unwrap();
        let (server, _) = accept.await.unwrap();

        assert!(client.is_active());
        assert!(!server.is_active());
        assert_eq!(client.metadata().transport_type, "tcp");
        assert_eq!(client.metadata().peer_addr, Some(addr));
        assert_ne!(client.metadata().id, server.metadata().id);
    }

    #[tokio::test]
    async fn test_tcp_close_signals_end_of_stream() {
        let listener = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { TcpTransport::accept(&listener).await.unwrap() });
        let client = TcpTransport::connect(addr.to_string()).await.unwrap();
        let (server, _) = accept.await.unwrap();

        let (callback, mut rx) = channel_callback();
        server.on_recv(Some(callback));

        client.send(b"last words".to_vec()).unwrap();
        client.close();

        let mut received = Vec::new();
        while let Some(bytes) = next(&mut rx).await {
            received.extend_from_slice(&bytes);
        }
        assert_eq!(received, b"last words");
        assert!(matches!(
            client.send(b"late".to_vec()),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_tcp_reads_in_bounded_chunks() {
        let listener = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { TcpTransport::accept(&listener).await.unwrap() });
        let client = TcpTransport::connect(addr.to_string()).await.unwrap();
        let (server, _) = accept.await.unwrap();

        let (callback, mut rx) = channel_callback();
        server.on_recv(Some(callback));

        let payload: Vec<u8> = (0..READ_CHUNK_SIZE * 5 + 7).map(|i| i as u8).collect();
        client.send(payload.clone()).unwrap();
        client.close();

        let mut received = Vec::new();
        while let Some(bytes) = next(&mut rx).await {
            assert!(bytes.len() <= READ_CHUNK_SIZE);
            received.extend_from_slice(&bytes);
        }
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_tcp_connection_refused() {
        let result = TcpTransport::connect("127.0.0.1:1").await;

        if let Err(TransportError::ConnectionFailed { address, .. }) = result {
            assert_eq!(address, "127.0.0.1:1");
        } else {
            panic!("Expected ConnectionFailed error");
        }
    }
}
