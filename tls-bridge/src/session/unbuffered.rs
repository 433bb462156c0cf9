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

//! Buffer-style adapter over the `rustls::unbuffered` state machine.
//!
//! The adapter owns both record buffers. Each step hands the unprocessed
//! inbound bytes to `process_tls_records`, acts on the returned state, and
//! then discards whatever rustls reports as consumed.

use crate::session::{CryptoSession, IoStyle, Outcome, Pull, SessionIo};
use crate::transport::{READ_CHUNK_SIZE, TlsConfig, TransportError};
use rustls::client::UnbufferedClientConnection;
use rustls::server::UnbufferedServerConnection;
use rustls::unbuffered::{
    AppDataRecord, ConnectionState, EncodeError, EncryptError, InsufficientSizeError,
    UnbufferedStatus,
};
use std::collections::VecDeque;
use std::fmt;

/// Steps taken to flush records rustls queued before failing.
const MAX_FAILURE_STEPS: usize = 8;

enum Endpoint {
    Client(UnbufferedClientConnection),
    Server(UnbufferedServerConnection),
}

/// What the caller wants from a step once rustls is ready to send data.
enum Action<'a> {
    Read,
    Encrypt(&'a [u8]),
    CloseNotify,
}

/// Where a single step left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// State changed; call again.
    Continue,
    /// rustls needs more inbound records.
    NeedInput,
    /// The handshake just completed.
    Handshaken,
    /// The requested records were sent.
    Wrote,
    /// The peer sent `close_notify`.
    PeerClosed,
    /// Both directions are closed.
    Closed,
}

/// Growable outbound record buffer.
struct Outbox {
    buffer: Vec<u8>,
    used: usize,
}

impl Outbox {
    /// Runs `encode` into the free tail, growing the buffer until it fits.
    fn fill<E: fmt::Debug>(
        &mut self,
        mut encode: impl FnMut(&mut [u8]) -> Result<usize, E>,
        required: impl Fn(&E) -> Option<usize>,
    ) -> Result<(), TransportError> {
        loop {
            match encode(&mut self.buffer[self.used..]) {
                Ok(written) => {
                    self.used += written;
                    return Ok(());
                }
                Err(e) => match required(&e) {
                    Some(size) => self.buffer.resize(self.used + size, 0),
                    None => {
                        return Err(TransportError::Tls {
                            source: rustls::Error::General(format!("{e:?}")),
                        });
                    }
                },
            }
        }
    }

    fn transmit(&mut self, io: &mut dyn SessionIo) -> Result<(), TransportError> {
        if self.used > 0 {
            io.push(&self.buffer[..self.used])?;
            self.used = 0;
        }
        Ok(())
    }
}

fn encode_required(error: &EncodeError) -> Option<usize> {
    match error {
        EncodeError::InsufficientSize(InsufficientSizeError { required_size, .. }) => {
            Some(*required_size)
        }
        _ => None,
    }
}

fn encrypt_required(error: &EncryptError) -> Option<usize> {
    match error {
        EncryptError::InsufficientSize(InsufficientSizeError { required_size, .. }) => {
            Some(*required_size)
        }
        _ => None,
    }
}

/// Session backed by an unbuffered rustls connection.
pub struct UnbufferedSession {
    conn: Endpoint,
    incoming: Vec<u8>,
    incoming_used: usize,
    outbox: Outbox,
    plaintext: VecDeque<Vec<u8>>,
    handshaking: bool,
    peer_closed: Option<bool>,
    failed: bool,
}

impl UnbufferedSession {
    /// Opens a client session.
    pub fn client(config: &TlsConfig) -> Result<Self, TransportError> {
        let conn = UnbufferedClientConnection::new(config.client_config()?, config.server_name()?)?;
        Ok(Self::new(Endpoint::Client(conn)))
    }

    /// Opens a server session.
    pub fn server(config: &TlsConfig) -> Result<Self, TransportError> {
        let conn = UnbufferedServerConnection::new(config.server_config()?)?;
        Ok(Self::new(Endpoint::Server(conn)))
    }

    fn new(conn: Endpoint) -> Self {
        Self {
            conn,
            incoming: vec![0; READ_CHUNK_SIZE * 4],
            incoming_used: 0,
            outbox: Outbox {
                buffer: vec![0; READ_CHUNK_SIZE],
                used: 0,
            },
            plaintext: VecDeque::new(),
            handshaking: true,
            peer_closed: None,
            failed: false,
        }
    }

    /// Sends what rustls queued on the way to `error`, such as a fatal alert.
    ///
    /// The inbound records are dropped so a later step cannot replay the
    /// failure.
    fn fail(&mut self, io: &mut dyn SessionIo, error: TransportError) -> TransportError {
        if !self.failed {
            self.failed = true;
            self.incoming_used = 0;
            for _ in 0..MAX_FAILURE_STEPS {
                if !matches!(self.step(io, &Action::Read), Ok(Step::Continue)) {
                    break;
                }
            }
        }
        error
    }

    /// Processes buffered records once and acts on the resulting state.
    fn step(&mut self, io: &mut dyn SessionIo, action: &Action<'_>) -> Result<Step, TransportError> {
        let records = &mut self.incoming[..self.incoming_used];
        let (step, discard) = match &mut self.conn {
            Endpoint::Client(conn) => handle_status(
                conn.process_tls_records(records),
                &mut self.outbox,
                &mut self.plaintext,
                self.handshaking,
                io,
                action,
            )?,
            Endpoint::Server(conn) => handle_status(
                conn.process_tls_records(records),
                &mut self.outbox,
                &mut self.plaintext,
                self.handshaking,
                io,
                action,
            )?,
        };

        if discard > 0 {
            self.incoming.copy_within(discard..self.incoming_used, 0);
            self.incoming_used -= discard;
        }
        Ok(step)
    }

    /// Pulls more ciphertext into the inbound buffer.
    fn fill(&mut self, io: &mut dyn SessionIo) -> Pull {
        if self.incoming.len() - self.incoming_used < READ_CHUNK_SIZE {
            self.incoming.resize(self.incoming_used + READ_CHUNK_SIZE, 0);
        }
        let pulled = io.pull(&mut self.incoming[self.incoming_used..]);
        if let Pull::Data(n) = pulled {
            self.incoming_used += n;
        }
        pulled
    }
}

fn handle_status<Data>(
    status: UnbufferedStatus<'_, '_, Data>,
    outbox: &mut Outbox,
    plaintext: &mut VecDeque<Vec<u8>>,
    handshaking: bool,
    io: &mut dyn SessionIo,
    action: &Action<'_>,
) -> Result<(Step, usize), TransportError> {
    let UnbufferedStatus { mut discard, state } = status;

    let step = match state? {
        ConnectionState::ReadTraffic(mut traffic) => {
            while let Some(record) = traffic.next_record() {
                let AppDataRecord {
                    discard: consumed,
                    payload,
                } = record?;
                discard += consumed;
                plaintext.push_back(payload.to_vec());
            }
            Step::Continue
        }
        ConnectionState::EncodeTlsData(mut encoder) => {
            outbox.fill(|buf| encoder.encode(buf), encode_required)?;
            Step::Continue
        }
        ConnectionState::TransmitTlsData(transmit) => {
            outbox.transmit(io)?;
            transmit.done();
            Step::Continue
        }
        ConnectionState::BlockedHandshake => Step::NeedInput,
        ConnectionState::WriteTraffic(mut traffic) => match action {
            Action::Read if handshaking => Step::Handshaken,
            Action::Read => Step::NeedInput,
            Action::Encrypt(data) => {
                outbox.fill(|buf| traffic.encrypt(data, buf), encrypt_required)?;
                outbox.transmit(io)?;
                Step::Wrote
            }
            Action::CloseNotify => {
                outbox.fill(|buf| traffic.queue_close_notify(buf), encrypt_required)?;
                outbox.transmit(io)?;
                Step::Wrote
            }
        },
        ConnectionState::PeerClosed => Step::PeerClosed,
        ConnectionState::Closed => Step::Closed,
        _ => {
            return Err(TransportError::Tls {
                source: rustls::Error::General("unsupported unbuffered connection state".into()),
            });
        }
    };
    Ok((step, discard))
}

impl CryptoSession for UnbufferedSession {
    fn io_style(&self) -> IoStyle {
        IoStyle::Buffer
    }

    fn advance_handshake(&mut self, io: &mut dyn SessionIo) -> Outcome<()> {
        loop {
            match self.step(io, &Action::Read) {
                Ok(Step::Continue | Step::Wrote) => {}
                Ok(Step::Handshaken) => {
                    self.handshaking = false;
                    return Outcome::Progressed(());
                }
                Ok(Step::NeedInput) => match self.fill(io) {
                    Pull::Data(_) => {}
                    Pull::Empty => return Outcome::WouldBlock,
                    Pull::Closed => return Outcome::PeerClosed { clean: false },
                },
                Ok(Step::PeerClosed | Step::Closed) => return Outcome::PeerClosed { clean: true },
                Err(e) => return Outcome::Failed(self.fail(io, e)),
            }
        }
    }

    fn decrypt_next(&mut self, io: &mut dyn SessionIo) -> Outcome<Vec<u8>> {
        loop {
            if let Some(data) = self.plaintext.pop_front() {
                return Outcome::Progressed(data);
            }
            if let Some(clean) = self.peer_closed {
                return Outcome::PeerClosed { clean };
            }
            match self.step(io, &Action::Read) {
                Ok(Step::Continue | Step::Wrote) => {}
                Ok(Step::NeedInput | Step::Handshaken) => match self.fill(io) {
                    Pull::Data(_) => {}
                    Pull::Empty => return Outcome::WouldBlock,
                    Pull::Closed => self.peer_closed = Some(false),
                },
                Ok(Step::PeerClosed | Step::Closed) => self.peer_closed = Some(true),
                Err(e) => return Outcome::Failed(self.fail(io, e)),
            }
        }
    }

    fn encrypt_and_flush(&mut self, io: &mut dyn SessionIo, data: &[u8]) -> Outcome<usize> {
        let action = Action::Encrypt(data);
        loop {
            match self.step(io, &action) {
                Ok(Step::Wrote) => return Outcome::Progressed(data.len()),
                Ok(Step::Continue) => {}
                Ok(Step::PeerClosed) => self.peer_closed = Some(true),
                Ok(Step::NeedInput | Step::Handshaken) => return Outcome::WouldBlock,
                Ok(Step::Closed) => return Outcome::PeerClosed { clean: true },
                Err(e) => return Outcome::Failed(self.fail(io, e)),
            }
        }
    }

    fn shutdown(&mut self, io: &mut dyn SessionIo) -> Outcome<()> {
        if self.failed {
            return Outcome::Progressed(());
        }
        loop {
            match self.step(io, &Action::CloseNotify) {
                Ok(Step::Continue) => {}
                Ok(Step::PeerClosed) => self.peer_closed = Some(true),
                Ok(Step::Wrote | Step::NeedInput | Step::Handshaken | Step::Closed) => {
                    return Outcome::Progressed(());
                }
                Err(e) => return Outcome::Failed(self.fail(io, e)),
            }
        }
    }

    fn is_handshaking(&self) -> bool {
        self.handshaking
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{QueueIo, handshake};
    use crate::transport::Identity;

    fn pair() -> (UnbufferedSession, UnbufferedSession) {
        let identity = Identity::self_signed(["localhost"]).unwrap();
        let client = TlsConfig::new()
            .with_host("localhost")
            .with_root_certificates(identity.trust_store().unwrap());
        let server = TlsConfig::new().with_identity(identity);
        (
            UnbufferedSession::client(&client).unwrap(),
            UnbufferedSession::server(&server).unwrap(),
        )
    }

    #[test]
    fn test_outbox_grows_to_required_size() {
        let mut outbox = Outbox {
            buffer: Vec::new(),
            used: 0,
        };
        outbox
            .fill(
                |buf: &mut [u8]| {
                    if buf.len() < 10 {
                        Err(10usize)
                    } else {
                        buf[..10].fill(7);
                        Ok(10)
                    }
                },
                |required: &usize| Some(*required),
            )
            .unwrap();

        let mut io = QueueIo::default();
        outbox.transmit(&mut io).unwrap();
        assert_eq!(io.outbound, vec![vec![7u8; 10]]);
        assert_eq!(outbox.used, 0);
    }

    #[test]
    fn test_outbox_reports_unrecoverable_errors() {
        let mut outbox = Outbox {
            buffer: vec![0; 4],
            used: 0,
        };
        let result = outbox.fill(|_: &mut [u8]| Err("exhausted"), |_: &&str| None);
        assert!(matches!(result, Err(TransportError::Tls { .. })));
    }

    #[test]
    fn test_client_emits_hello_eagerly() {
        let (mut client, _) = pair();
        let mut io = QueueIo::default();

        assert!(client.advance_handshake(&mut io).is_would_block());
        assert!(!io.outbound.is_empty());
        assert_eq!(io.outbound[0][0], 0x16, "handshake record");
        assert!(client.is_handshaking());
    }

    #[test]
    fn test_large_message_round_trip() {
        let (mut client, mut server) = pair();
        let (mut client_io, mut server_io) = (QueueIo::default(), QueueIo::default());
        handshake(&mut client, &mut client_io, &mut server, &mut server_io);

        let message: Vec<u8> = (0..40_000u32).map(|i| i as u8).collect();
        assert!(matches!(
            client.encrypt_and_flush(&mut client_io, &message),
            Outcome::Progressed(40_000)
        ));
        client_io.transfer_to(&mut server_io);

        let mut received = Vec::new();
        loop {
            match server.decrypt_next(&mut server_io) {
                Outcome::Progressed(data) => received.extend_from_slice(&data),
                Outcome::WouldBlock => break,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(received, message);
    }

    #[test]
    fn test_close_notify_then_eof() {
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

        client_io.closed = true;
        assert!(matches!(
            client.decrypt_next(&mut client_io),
            Outcome::PeerClosed { clean: false }
        ));
    }

    #[test]
    fn test_failed_handshake_alerts_peer() {
        let identity = Identity::self_signed(["localhost"]).unwrap();
        let stranger = Identity::self_signed(["localhost"]).unwrap();
        let mut client = UnbufferedSession::client(
            &TlsConfig::new()
                .with_host("localhost")
                .with_root_certificates(stranger.trust_store().unwrap()),
        )
        .unwrap();
        let mut server =
            UnbufferedSession::server(&TlsConfig::new().with_identity(identity)).unwrap();
        let (mut client_io, mut server_io) = (QueueIo::default(), QueueIo::default());

        assert!(client.advance_handshake(&mut client_io).is_would_block());
        client_io.transfer_to(&mut server_io);
        assert!(server.advance_handshake(&mut server_io).is_would_block());
        server_io.transfer_to(&mut client_io);

        assert!(matches!(
            client.advance_handshake(&mut client_io),
            Outcome::Failed(TransportError::Tls { .. })
        ));
        assert!(!client_io.outbound.is_empty(), "alert was not sent");

        // The failure is not replayed on shutdown.
        let sent = client_io.outbound.len();
        assert!(matches!(client.shutdown(&mut client_io), Outcome::Progressed(())));
        assert_eq!(client_io.outbound.len(), sent);

        client_io.transfer_to(&mut server_io);
        assert!(matches!(
            server.advance_handshake(&mut server_io),
            Outcome::Failed(_)
        ));
    }

    #[test]
    fn test_garbage_fails_handshake() {
        let (_, mut server) = pair();
        let mut io = QueueIo::default();
        io.inbound.push_back(b"GET / HTTP/1.1\r\n\r\n".to_vec());

        assert!(matches!(
            server.advance_handshake(&mut io),
            Outcome::Failed(TransportError::Tls { .. })
        ));
    }
}
