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

//! Pull-style adapter over `rustls::Stream`.
//!
//! rustls reads and writes ciphertext itself through [`CallbackIo`], which
//! forwards to the bridge's [`SessionIo`]. An empty inbound queue surfaces as
//! `io::ErrorKind::WouldBlock`, a stopped one as end of file.

use crate::session::{CryptoSession, IoStyle, Outcome, Pull, SessionIo};
use crate::transport::{READ_CHUNK_SIZE, TlsConfig, TransportError};
use rustls::{ClientConnection, ServerConnection};
use std::io::{self, Read, Write};

/// Runs `$body` with `$conn` bound to whichever side `$endpoint` holds.
macro_rules! with_conn {
    ($endpoint:expr, $conn:ident => $body:expr) => {
        match $endpoint {
            Endpoint::Client($conn) => $body,
            Endpoint::Server($conn) => $body,
        }
    };
}

enum Endpoint {
    Client(ClientConnection),
    Server(ServerConnection),
}

/// Session backed by `rustls::Stream` over the bridge callbacks.
pub struct StreamSession {
    conn: Endpoint,
}

/// `Read`/`Write` view of a [`SessionIo`].
struct CallbackIo<'a> {
    io: &'a mut dyn SessionIo,
}

impl Read for CallbackIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.io.pull(buf) {
            Pull::Data(n) => Ok(n),
            Pull::Empty => Err(io::ErrorKind::WouldBlock.into()),
            Pull::Closed => Ok(0),
        }
    }
}

impl Write for CallbackIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io
            .push(buf)
            .map(|_| buf.len())
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionReset, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StreamSession {
    /// Opens a client session.
    pub fn client(config: &TlsConfig) -> Result<Self, TransportError> {
        let conn = ClientConnection::new(config.client_config()?, config.server_name()?)?;
        Ok(Self {
            conn: Endpoint::Client(conn),
        })
    }

    /// Opens a server session.
    pub fn server(config: &TlsConfig) -> Result<Self, TransportError> {
        let conn = ServerConnection::new(config.server_config()?)?;
        Ok(Self {
            conn: Endpoint::Server(conn),
        })
    }
}

impl CryptoSession for StreamSession {
    fn io_style(&self) -> IoStyle {
        IoStyle::Pull
    }

    fn advance_handshake(&mut self, io: &mut dyn SessionIo) -> Outcome<()> {
        let mut callbacks = CallbackIo { io };
        with_conn!(&mut self.conn, conn => {
            while conn.is_handshaking() {
                match conn.complete_io(&mut callbacks) {
                    Ok((0, 0)) => return Outcome::WouldBlock,
                    Ok(_) => {}
                    Err(e) => return Outcome::from_io_error(e),
                }
            }
            // The final flight may still be buffered.
            while conn.wants_write() {
                match conn.write_tls(&mut callbacks) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => return Outcome::from_io_error(e),
                }
            }
            Outcome::Progressed(())
        })
    }

    fn decrypt_next(&mut self, io: &mut dyn SessionIo) -> Outcome<Vec<u8>> {
        // Readiness check: without queued input rustls would only report WouldBlock.
        let ready = io.readable();
        let mut callbacks = CallbackIo { io };
        let mut buffer = [0u8; READ_CHUNK_SIZE];
        with_conn!(&mut self.conn, conn => {
            if conn.wants_read() && !ready {
                return Outcome::WouldBlock;
            }
            match rustls::Stream::new(conn, &mut callbacks).read(&mut buffer) {
                Ok(0) => Outcome::PeerClosed { clean: true },
                Ok(n) => Outcome::Progressed(buffer[..n].to_vec()),
                Err(e) => Outcome::from_io_error(e),
            }
        })
    }

    fn encrypt_and_flush(&mut self, io: &mut dyn SessionIo, data: &[u8]) -> Outcome<usize> {
        let mut callbacks = CallbackIo { io };
        with_conn!(&mut self.conn, conn => {
            let mut stream = rustls::Stream::new(conn, &mut callbacks);
            match stream.write_all(data).and_then(|()| stream.flush()) {
                Ok(()) => Outcome::Progressed(data.len()),
                Err(e) => Outcome::from_io_error(e),
            }
        })
    }

    fn shutdown(&mut self, io: &mut dyn SessionIo) -> Outcome<()> {
        let mut callbacks = CallbackIo { io };
        with_conn!(&mut self.conn, conn => {
            conn.send_close_notify();
            while conn.wants_write() {
                match conn.write_tls(&mut callbacks) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => return Outcome::from_io_error(e),
                }
            }
            Outcome::Progressed(())
        })
    }

    fn is_handshaking(&self) -> bool {
        with_conn!(&self.conn, conn => conn.is_handshaking())
    }
}
