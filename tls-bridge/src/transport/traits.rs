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

use crate::transport::{Message, RecvCallback, TransportError, TransportMetadata};

/// Core transport abstraction for message-oriented, callback-driven links.
///
/// A transport moves whole [`Message`]s. Outbound messages go through
/// [`send`](Transport::send); inbound messages are pushed to whatever
/// callback was registered with [`on_recv`](Transport::on_recv), with `None`
/// marking end of stream.
///
/// The TLS bridge consumes a `Transport` beneath it and implements
/// `Transport` itself, so bridges can be stacked or handed to any code that
/// speaks this interface.
///
/// # Implementations
///
/// - [`TcpTransport`](crate::transport::TcpTransport): TCP/IP networking
/// - [`MemoryTransport`](crate::transport::MemoryTransport): In-process pairs for testing
/// - [`TlsBridge`](crate::transport::TlsBridge): TLS on top of another transport
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use tls_bridge::pool::ManualPool;
/// use tls_bridge::transport::{MemoryTransport, Transport};
///
/// let pool = Arc::new(ManualPool::new());
/// let (client, server) = MemoryTransport::pair(pool.clone());
/// let (tx, rx) = std::sync::mpsc::channel();
/// server.on_recv(Some(Arc::new(move |message| {
///     let _ = tx.send(message);
/// })));
///
/// client.send(b"ping".to_vec()).unwrap();
/// pool.run_until_idle();
/// assert_eq!(rx.recv().unwrap(), Some(b"ping".to_vec()));
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Returns metadata about this transport.
    fn metadata(&self) -> &TransportMetadata;

    /// Returns `true` if this side opened the connection.
    ///
    /// A TLS bridge built on an active transport plays the client role.
    fn is_active(&self) -> bool;

    /// Sends one message to the peer.
    ///
    /// The returned flag is a flow-control hint: `true` means the transport
    /// can take more, `false` means the caller should slow down. The message
    /// was accepted in both cases.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed or the message cannot be
    /// handed to the underlying channel.
    fn send(&self, message: Message) -> Result<bool, TransportError>;

    /// Registers (or with `None`, removes) the callback for inbound messages.
    ///
    /// Messages that arrive while no callback is registered are held and
    /// delivered, in order, as soon as one is.
    fn on_recv(&self, callback: Option<RecvCallback>);
}
