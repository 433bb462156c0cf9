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

//! Buffer-style adapter over `rustls::Connection`.
//!
//! The adapter owns the copying: it pulls ciphertext chunks from the bridge
//! and feeds them to `read_tls`, and drains `write_tls` into the lower
//! transport after every step that may have produced records.

use crate::session::{CryptoSession, IoStyle, Outcome, Pull, SessionIo};
use crate::transport::{READ_CHUNK_SIZE, TlsConfig, TransportError};
use rustls::{ClientConnection, Connection, ServerConnection};
use std::io::{self, Read, Write};

/// What one feed step produced.
enum Fed {
    Data,
    Empty,
    Closed,
}

/// Session backed by a buffered `rustls::Connection`.
pub struct BufferedSession {
    conn: Connection,
    input: Box<[u8]>,
    plaintext: Box<[u8]>,
    output: Vec<u8>,
}

impl BufferedSession {
    /// Opens a client session.
    pub fn client(config: &TlsConfig) -> Result<Self, TransportError> {
        let conn = ClientConnection::new(config.client_config()?, config.server_name()?)?;
        Ok(Self::new(Connection::Client(conn)))
    }

    /// Opens a server session.
    pub fn server(config: &TlsConfig) -> Result<Self, TransportError> {
        let conn = ServerConnection::new(config.server_config()?)?;
        Ok(Self::new(Connection::Server(conn)))
    }

    fn new(conn: Connection) -> Self {
        Self {
            conn,
            input: vec![0; READ_CHUNK_SIZE].into_boxed_slice(),
            plaintext: vec![0; READ_CHUNK_SIZE].into_boxed_slice(),
            output: Vec::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Pushes every pending record to the lower transport.
    fn flush(&mut self, io: &mut dyn SessionIo) -> Result<(), TransportError> {
        while self.conn.wants_write() {
            self.output.clear();
            self.conn.write_tls(&mut self.output)?;
            if self.output.is_empty() {
                break;
            }
            io.push(&self.output)?;
        }
        Ok(())
    }

    /// Pulls one chunk of ciphertext and hands it to rustls.
    fn feed(&mut self, io: &mut dyn SessionIo) -> Result<Fed, TransportError> {
        let n = match io.pull(&mut self.input) {
            Pull::Data(n) => n,
            Pull::Empty => return Ok(Fed::Empty),
            Pull::Closed => {
                // A zero-length read marks end of stream.
                self.conn.read_tls(&mut io::empty())?;
                self.conn.process_new_packets()?;
                return Ok(Fed::Closed);
            }
        };

        let mut failure = None;
        let mut chunk = &self.input[..n];
        while !chunk.is_empty() {
            match self.conn.read_tls(&mut chunk) {
                Ok(0) => {
                    failure = Some(TransportError::Io {
                        source: io::Error::new(io::ErrorKind::OutOfMemory, "TLS input buffer full"),
                    });
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            }
            if let Err(e) = self.conn.process_new_packets() {
                failure = Some(e.into());
                break;
            }
        }

        match failure {
            Some(error) => {
                // Last-gasp flush so the peer sees the alert.
                let _ = self.flush(io);
                Err(error)
            }
            None => Ok(Fed::Data),
        }
    }
}

impl CryptoSession for BufferedSession {
    fn io_style(&self) -> IoStyle {
        IoStyle::Buffer
    }

    fn advance_handshake(&mut self, io: &mut dyn SessionIo) -> Outcome<()> {
        loop {
            if let Err(e) = self.flush(io) {
                return Outcome::Failed(e);
            }
            if !self.conn.is_handshaking() {
                return Outcome::Progressed(());
            }
            match self.feed(io) {
                Ok(Fed::Data) => {}
                Ok(Fed::Empty) => return Outcome::WouldBlock,
                Ok(Fed::Closed) => return Outcome::PeerClosed { clean: false },
                Err(e) => return Outcome::Failed(e),
            }
        }
    }

    fn decrypt_next(&mut self, io: &mut dyn SessionIo) -> Outcome<Vec<u8>> {
        loop {
            match self.conn.reader().read(&mut self.plaintext) {
                Ok(0) => return Outcome::PeerClosed { clean: true },
                Ok(n) => return Outcome::Progressed(self.plaintext[..n].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Outcome::from_io_error(e),
            }
            // Post-handshake messages (key updates) may need answering.
            if let Err(e) = self.flush(io) {
                return Outcome::Failed(e);
            }
            match self.feed(io) {
                Ok(Fed::Data | Fed::Closed) => {}
                Ok(Fed::Empty) => return Outcome::WouldBlock,
                Err(e) => return Outcome::Failed(e),
            }
        }
    }

    fn encrypt_and_flush(&mut self, io: &mut dyn SessionIo, data: &[u8]) -> Outcome<usize> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let written = match self.conn.writer().write(remaining) {
                Ok(written) => written,
                Err(e) => return Outcome::from_io_error(e),
            };
            if let Err(e) = self.flush(io) {
                return Outcome::Failed(e);
            }
            if written == 0 {
                return Outcome::WouldBlock;
            }
            remaining = &remaining[written..];
        }
        Outcome::Progressed(data.len())
    }

    fn shutdown(&mut self, io: &mut dyn SessionIo) -> Outcome<()> {
        self.conn.send_close_notify();
        self.flush(io).into()
    }

    fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{QueueIo, handshake};
    use crate::transport::Identity;

    fn pair() -> (BufferedSession, BufferedSession) {
        let identity = Identity::self_signed(["localhost"]).unwrap();
        let client = TlsConfig::new()
            .with_host("localhost")
            .with_root_certificates(identity.trust_store().unwrap());
        let server = TlsConfig::new().with_identity(identity);
        (
            BufferedSession::client(&client).unwrap(),
            BufferedSession::server(&server).unwrap(),
        )
    }

    #[test]
    fn test_client_emits_hello_eagerly() {
        let (mut client, _) = pair();
        let mut io = QueueIo::default();

        assert!(client.advance_handshake(&mut io).is_would_block());
        assert_eq!(io.outbound.len(), 1);
        assert_eq!(io.outbound[0][0], 0x16, "handshake record");
    }

    #[test]
    fn test_round_trip_after_handshake() {
        let (mut client, mut server) = pair();
        let (mut client_io, mut server_io) = (QueueIo::default(), QueueIo::default());
        handshake(&mut client, &mut client_io, &mut server, &mut server_io);
        assert!(!client.is_handshaking());
        assert!(!server.is_handshaking());

        assert!(matches!(
            client.encrypt_and_flush(&mut client_io, b"hello"),
            Outcome::Progressed(5)
        ));
        client_io.transfer_to(&mut server_io);

        match server.decrypt_next(&mut server_io) {
            Outcome::Progressed(data) => assert_eq!(data, b"hello"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(server.decrypt_next(&mut server_io).is_would_block());
    }

    #[test]
    fn test_close_notify_is_a_clean_close() {
        let (mut client, mut server) = pair();
        let (mut client_io, mut server_io) = (QueueIo::default(), QueueIo::default());
        handshake(&mut client, &mut client_io, &mut server, &mut server_io);

        assert!(matches!(
            client.shutdown(&mut client_io),
            Outcome::Progressed(())
        ));
        client_io.transfer_to(&mut server_io);

        assert!(matches!(
            server.decrypt_next(&mut server_io),
            Outcome::PeerClosed { clean: true }
        ));
    }

    #[test]
    fn test_eof_without_close_notify_is_unclean() {
        let (mut client, mut server) = pair();
        let (mut client_io, mut server_io) = (QueueIo::default(), QueueIo::default());
        handshake(&mut client, &mut client_io, &mut server, &mut server_io);

        server_io.closed = true;
        assert!(matches!(
            server.decrypt_next(&mut server_io),
            Outcome::PeerClosed { clean: false }
        ));
    }

    #[test]
    fn test_garbage_fails_handshake() {
        let (_, mut server) = pair();
        let mut io = QueueIo::default();
        io.inbound
            .push_back(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec());

        assert!(matches!(
            server.advance_handshake(&mut io),
            Outcome::Failed(TransportError::Tls { .. })
        ));
    }
}
