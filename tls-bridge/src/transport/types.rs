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

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque, length-delimited byte payload moved between transports.
///
/// A zero-length message carries no payload and is forwarded through the TLS
/// bridge untouched in both directions.
pub type Message = Vec<u8>;

/// Callback invoked for every message a transport delivers upward.
///
/// `None` signals end of stream and is delivered at most once.
pub type RecvCallback = Arc<dyn Fn(Option<Message>) + Send + Sync>;

/// Callback invoked after every lifecycle state change.
pub type StateCallback = Arc<dyn Fn(TransportState) + Send + Sync>;

/// Unique identifier for a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    /// Creates a new transport ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide transport ID.
    pub fn next() -> Self {
        static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transport({})", self.0)
    }
}

/// Metadata associated with a transport connection.
///
/// This provides information about the transport that can be used for
/// logging and debugging. A TLS bridge reuses the id and addresses of the
/// transport beneath it and only changes the type.
#[derive(Debug, Clone)]
pub struct TransportMetadata {
    /// Unique identifier for this transport
    pub id: TransportId,

    /// Local address of the connection, if available
    pub local_addr: Option<SocketAddr>,

    /// Remote peer address, if available
    pub peer_addr: Option<SocketAddr>,

    /// Transport type (e.g., "tcp", "memory", "tls")
    pub transport_type: String,

    /// When the transport was created
    pub created_at: std::time::Instant,
}

impl TransportMetadata {
    /// Creates new transport metadata.
    pub fn new(id: TransportId, transport_type: impl Into<String>) -> Self {
        Self {
            id,
            local_addr: None,
            peer_addr: None,
            transport_type: transport_type.into(),
            created_at: std::time::Instant::now(),
        }
    }

    /// Sets the local address.
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Sets the peer address.
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Derives metadata for a transport layered on top of this one.
    pub fn layered(&self, transport_type: impl Into<String>) -> Self {
        Self {
            transport_type: transport_type.into(),
            created_at: std::time::Instant::now(),
            ..self.clone()
        }
    }

    /// Returns the age of this transport.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

/// Lifecycle state of a transport.
///
/// Transitions only move forward:
///
/// ```text
/// New -> Connecting -> Connected -> Disconnected
///                  \-> Failed
/// ```
///
/// `Disconnected` is reachable only from `Connected`, and `Failed` only from
/// `Connecting`. Both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportState {
    /// Created but not started.
    New = 0,
    /// Handshake in progress.
    Connecting = 1,
    /// Handshake finished; application data may flow.
    Connected = 2,
    /// Closed after a successful handshake.
    Disconnected = 3,
    /// Closed before the handshake finished.
    Failed = 4,
}

impl TransportState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => TransportState::New,
            1 => TransportState::Connecting,
            2 => TransportState::Connected,
            3 => TransportState::Disconnected,
            _ => TransportState::Failed,
        }
    }

    /// Returns `true` for `Disconnected` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Disconnected | TransportState::Failed)
    }

    /// Returns `true` if `next` is a legal successor of this state.
    pub fn can_advance_to(&self, next: TransportState) -> bool {
        matches!(
            (self, next),
            (TransportState::New, TransportState::Connecting)
                | (TransportState::Connecting, TransportState::Connected)
                | (TransportState::Connecting, TransportState::Failed)
                | (TransportState::Connected, TransportState::Disconnected)
        )
    }

    /// Returns the lowercase name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the handshake a TLS bridge plays.
///
/// Derived from the lower transport: an actively opened transport is the
/// client, a passively accepted one the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends the ClientHello.
    Client,
    /// Answers it.
    Server,
}

impl Role {
    /// Maps the lower transport's `is_active` flag to a role.
    pub fn from_active(active: bool) -> Self {
        if active { Role::Client } else { Role::Server }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_id_display() {
        let id = TransportId::new(123);
        assert_eq!(format!("{}", id), "Transport(123)");
    }

    #[test]
    fn test_transport_id_next_is_unique() {
        let a = TransportId::next();
        let b = TransportId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_transport_metadata_with_addresses() {
        let id = TransportId::new(1);
        let local = "127.0.0.1:8080".parse().unwrap();
        let peer = "127.0.0.1:9090".parse().unwrap();

        let metadata = TransportMetadata::new(id, "tcp")
            .with_local_addr(local)
            .with_peer_addr(peer);

        assert_eq!(metadata.local_addr, Some(local));
        assert_eq!(metadata.peer_addr, Some(peer));
    }

    #[test]
    fn test_layered_metadata_keeps_identity() {
        let peer = "127.0.0.1:9090".parse().unwrap();
        let lower = TransportMetadata::new(TransportId::new(7), "tcp").with_peer_addr(peer);
        let upper = lower.layered("tls");

        assert_eq!(upper.id, lower.id);
        assert_eq!(upper.peer_addr, Some(peer));
        assert_eq!(upper.transport_type, "tls");
    }

    #[test]
    fn test_state_transitions_only_move_forward() {
        use TransportState::*;

        assert!(New.can_advance_to(Connecting));
        assert!(Connecting.can_advance_to(Connected));
        assert!(Connecting.can_advance_to(Failed));
        assert!(Connected.can_advance_to(Disconnected));

        assert!(!New.can_advance_to(Connected));
        assert!(!Connected.can_advance_to(Failed));
        assert!(!Connecting.can_advance_to(Disconnected));
        assert!(!Disconnected.can_advance_to(Connecting));
        assert!(!Failed.can_advance_to(Connected));
        assert!(!Connected.can_advance_to(Connected));
    }

    #[test]
    fn test_state_u8_round_trip() {
        use TransportState::*;
        for state in [New, Connecting, Connected, Disconnected, Failed] {
            assert_eq!(TransportState::from_u8(state as u8), state);
        }
        assert!(Disconnected.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Connected.is_terminal());
    }

    #[test]
    fn test_role_from_active() {
        assert_eq!(Role::from_active(true), Role::Client);
        assert_eq!(Role::from_active(false), Role::Server);
    }
}
