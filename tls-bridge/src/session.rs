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

//! Crypto session adapters.
//!
//! A [`CryptoSession`] wraps one TLS engine behind the four operations the
//! bridge needs: advance the handshake, decrypt the next record, encrypt a
//! message, and shut down. Every operation receives a [`SessionIo`] through
//! which the session pulls ciphertext from the bridge's inbound queue and
//! pushes ciphertext to the lower transport.
//!
//! # Adapters
//!
//! - [`buffered`]: `rustls::Connection`, bytes copied in and out by the adapter
//! - [`stream`]: `rustls::Stream`, the engine calls back into [`SessionIo`]
//! - [`unbuffered`]: the `rustls::unbuffered` state machine
//!
//! # Outcomes
//!
//! Operations never block. They report [`Outcome::WouldBlock`] when the
//! inbound queue runs dry, and the bridge retries once more ciphertext
//! arrives.

pub mod buffered;
pub mod stream;
pub mod unbuffered;

use crate::transport::{Backend, Role, TlsConfig, TransportError};
use std::io;

pub use buffered::BufferedSession;
pub use stream::StreamSession;
pub use unbuffered::UnbufferedSession;

/// How a backend exchanges ciphertext with the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoStyle {
    /// The backend pulls input and pushes output through callbacks while it
    /// runs. The bridge never touches ciphertext directly.
    Pull,
    /// The adapter moves ciphertext between its own buffers and the bridge.
    /// Output is produced eagerly, so `start` can emit the first flight.
    Buffer,
}

/// Result of one pass through a session operation.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation finished.
    Progressed(T),
    /// No more ciphertext is queued; retry once more arrives.
    WouldBlock,
    /// The peer or the lower transport ended the session.
    ///
    /// `clean` is `true` when the peer sent `close_notify` first.
    PeerClosed {
        /// Whether the close was announced by the peer.
        clean: bool,
    },
    /// The session failed and cannot continue.
    Failed(TransportError),
}

impl<T> Outcome<T> {
    /// Maps an I/O error raised by a backend to an outcome.
    pub(crate) fn from_io_error(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Outcome::WouldBlock,
            io::ErrorKind::UnexpectedEof => Outcome::PeerClosed { clean: false },
            _ => Outcome::Failed(TransportError::from(error)),
        }
    }

    /// Returns `true` for [`Outcome::WouldBlock`].
    pub fn is_would_block(&self) -> bool {
        matches!(self, Outcome::WouldBlock)
    }
}

impl<T> From<Result<T, TransportError>> for Outcome<T> {
    fn from(result: Result<T, TransportError>) -> Self {
        match result {
            Ok(value) => Outcome::Progressed(value),
            Err(error) => Outcome::Failed(error),
        }
    }
}

/// Result of [`SessionIo::pull`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    /// This many bytes were copied; always more than zero.
    Data(usize),
    /// Nothing queued right now.
    Empty,
    /// Nothing queued and nothing more will arrive.
    Closed,
}

/// The bridge side of a session's ciphertext I/O.
pub trait SessionIo {
    /// Copies queued ciphertext into `buf`.
    ///
    /// Zero-length messages found in the queue are passed up to the
    /// application instead of being returned.
    fn pull(&mut self, buf: &mut [u8]) -> Pull;

    /// Returns `true` if `pull` would return data or report closure.
    fn readable(&self) -> bool;

    /// Sends ciphertext to the lower transport.
    ///
    /// Returns the lower transport's flow-control hint.
    fn push(&mut self, data: &[u8]) -> Result<bool, TransportError>;
}

/// One TLS session driven by the bridge.
///
/// Sessions are only ever used under the bridge's receive lock, so
/// implementations need not be `Sync`.
pub trait CryptoSession: Send {
    /// Returns how this session exchanges ciphertext.
    fn io_style(&self) -> IoStyle;

    /// Runs the handshake as far as queued ciphertext allows.
    ///
    /// Returns `Progressed` once the handshake is complete.
    fn advance_handshake(&mut self, io: &mut dyn SessionIo) -> Outcome<()>;

    /// Returns the next chunk of decrypted application data.
    fn decrypt_next(&mut self, io: &mut dyn SessionIo) -> Outcome<Vec<u8>>;

    /// Encrypts `data` and pushes all resulting records.
    ///
    /// Returns the number of plaintext bytes consumed.
    fn encrypt_and_flush(&mut self, io: &mut dyn SessionIo, data: &[u8]) -> Outcome<usize>;

    /// Sends `close_notify` and flushes it.
    fn shutdown(&mut self, io: &mut dyn SessionIo) -> Outcome<()>;

    /// Returns `true` until the handshake has completed.
    fn is_handshaking(&self) -> bool;
}

/// Opens a session for `role` using the backend selected in `config`.
///
/// # Errors
///
/// Returns an error if the configuration cannot produce a rustls config for
/// this role or rustls refuses to create the connection.
pub fn open(config: &TlsConfig, role: Role) -> Result<Box<dyn CryptoSession>, TransportError> {
    Ok(match (config.backend(), role) {
        (Backend::Buffered, Role::Client) => Box::new(BufferedSession::client(config)?),
        (Backend::Buffered, Role::Server) => Box::new(BufferedSession::server(config)?),
        (Backend::Stream, Role::Client) => Box::new(StreamSession::client(config)?),
        (Backend::Stream, Role::Server) => Box::new(StreamSession::server(config)?),
        (Backend::Unbuffered, Role::Client) => Box::new(UnbufferedSession::client(config)?),
        (Backend::Unbuffered, Role::Server) => Box::new(UnbufferedSession::server(config)?),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory [`SessionIo`] used by the adapter tests.

    use super::*;
    use std::collections::VecDeque;

    /// Queue-backed session I/O.
    #[derive(Default)]
    pub(crate) struct QueueIo {
        pub(crate) inbound: VecDeque<Vec<u8>>,
        pub(crate) offset: usize,
        pub(crate) closed: bool,
        pub(crate) outbound: Vec<Vec<u8>>,
    }

    impl QueueIo {
        /// Moves everything pushed here into `peer`'s inbound queue.
        pub(crate) fn transfer_to(&mut self, peer: &mut QueueIo) -> usize {
            let count = self.outbound.len();
            peer.inbound.extend(self.outbound.drain(..));
            count
        }
    }

    impl SessionIo for QueueIo {
        fn pull(&mut self, buf: &mut [u8]) -> Pull {
            while let Some(front) = self.inbound.front() {
                if self.offset < front.len() {
                    let n = buf.len().min(front.len() - self.offset);
                    buf[..n].copy_from_slice(&front[self.offset..self.offset + n]);
                    self.offset += n;
                    return Pull::Data(n);
                }
                self.inbound.pop_front();
                self.offset = 0;
            }
            if self.closed { Pull::Closed } else { Pull::Empty }
        }

        fn readable(&self) -> bool {
            let mut messages = self.inbound.iter();
            let front = messages.next().is_some_and(|m| self.offset < m.len());
            self.closed || front || messages.any(|m| !m.is_empty())
        }

        fn push(&mut self, data: &[u8]) -> Result<bool, TransportError> {
            self.outbound.push(data.to_vec());
            Ok(true)
        }
    }

    /// Runs both handshakes to completion, shuttling records between them.
    pub(crate) fn handshake(
        client: &mut dyn CryptoSession,
        client_io: &mut QueueIo,
        server: &mut dyn CryptoSession,
        server_io: &mut QueueIo,
    ) {
        let mut client_done = false;
        let mut server_done = false;
        for _ in 0..32 {
            if !client_done {
                match client.advance_handshake(client_io) {
                    Outcome::Progressed(()) => client_done = true,
                    Outcome::WouldBlock => {}
                    other => panic!("client handshake: {other:?}"),
                }
            }
            client_io.transfer_to(server_io);
            if !server_done {
                match server.advance_handshake(server_io) {
                    Outcome::Progressed(()) => server_done = true,
                    Outcome::WouldBlock => {}
                    other => panic!("server handshake: {other:?}"),
                }
            }
            server_io.transfer_to(client_io);
            if client_done && server_done {
                return;
            }
        }
        panic!("handshake did not complete");
    }
}
