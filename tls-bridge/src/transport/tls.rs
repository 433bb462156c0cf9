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

//! TLS bridge over any message transport.
//!
//! [`TlsBridge`] upgrades a [`Transport`] to an encrypted one. Ciphertext
//! delivered by the lower transport is parked in a [`BoundedQueue`]; a
//! single receive task per bridge, run on a [`TaskPool`], drives the crypto
//! session over whatever is queued. Plaintext goes up through the bridge's
//! own receive callback and lifecycle changes through its state callback.
//!
//! # Lifecycle
//!
//! ```text
//! New --start--> Connecting --handshake done--> Connected --close--> Disconnected
//!                     \--handshake failed or closed--> Failed
//! ```
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use tls_bridge::pool::ManualPool;
//! use tls_bridge::transport::{
//!     Identity, MemoryTransport, TlsBridge, TlsConfig, Transport, TransportState,
//! };
//!
//! let identity = Identity::self_signed(["localhost"]).unwrap();
//! let pool = Arc::new(ManualPool::new());
//! let (client_end, server_end) = MemoryTransport::pair(pool.clone());
//!
//! let server = TlsBridge::builder(server_end)
//!     .config(TlsConfig::new().with_identity(identity.clone()))
//!     .pool(pool.clone())
//!     .build()
//!     .unwrap();
//! let client = TlsBridge::builder(client_end)
//!     .config(
//!         TlsConfig::new()
//!             .with_host("localhost")
//!             .with_root_certificates(identity.trust_store().unwrap()),
//!     )
//!     .pool(pool.clone())
//!     .build()
//!     .unwrap();
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! server.on_recv(Some(Arc::new(move |message| {
//!     let _ = tx.send(message);
//! })));
//!
//! server.start().unwrap();
//! client.start().unwrap();
//! pool.run_until_idle();
//! assert_eq!(client.state(), TransportState::Connected);
//!
//! client.send(b"hello".to_vec()).unwrap();
//! pool.run_until_idle();
//! assert_eq!(rx.try_recv().unwrap(), Some(b"hello".to_vec()));
//! ```

use crate::backpressure::{BoundedQueue, Pop};
use crate::pool::TaskPool;
use crate::session::{self, CryptoSession, IoStyle, Outcome, Pull, SessionIo};
use crate::transport::{
    Message, RecvCallback, Role, StateCallback, TlsConfig, Transport, TransportError,
    TransportMetadata, TransportState,
};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

#[cfg(feature = "observability")]
use tracing::instrument;

/// Byte limit of the inbound ciphertext queue.
pub const RECV_QUEUE_LIMIT: usize = 1024 * 1024;

/// How often `send` retries a backend that is not ready to write.
pub const MAX_SEND_ATTEMPTS: usize = 16;

/// Hook invoked once, on the receive task, right after the handshake completes.
pub type PostHandshakeHook = Arc<dyn Fn() + Send + Sync>;

/// Partially consumed inbound message.
#[derive(Default)]
struct Cursor {
    message: Option<Message>,
    position: usize,
}

/// State only touched under the receive lock.
struct RecvContext {
    session: Box<dyn CryptoSession>,
    cursor: Cursor,
}

/// TLS transport layered on top of another [`Transport`].
///
/// Create one with [`TlsBridge::builder`]. The role is taken from the lower
/// transport: an active lower transport makes this bridge the TLS client.
///
/// Callbacks are invoked with no internal borrow held, so they may call
/// [`send`](Self::send) or [`stop`](Self::stop) on the same bridge.
pub struct TlsBridge {
    weak_self: Weak<TlsBridge>,
    metadata: TransportMetadata,
    lower: Arc<dyn Transport>,
    role: Role,
    io_style: IoStyle,
    state: AtomicU8,
    queue: BoundedQueue,
    recv_lock: ReentrantMutex<RefCell<RecvContext>>,
    pending_recv: AtomicUsize,
    outgoing_result: AtomicBool,
    stopped: AtomicBool,
    pool: Arc<dyn TaskPool>,
    recv_callback: Mutex<Option<RecvCallback>>,
    state_callback: Option<StateCallback>,
    post_handshake: Option<PostHandshakeHook>,
}

/// Builder for [`TlsBridge`].
pub struct TlsBridgeBuilder {
    lower: Arc<dyn Transport>,
    config: TlsConfig,
    pool: Option<Arc<dyn TaskPool>>,
    state_callback: Option<StateCallback>,
    post_handshake: Option<PostHandshakeHook>,
    queue_limit: usize,
}

impl TlsBridgeBuilder {
    /// Sets the TLS configuration. Defaults to [`TlsConfig::new`].
    pub fn config(mut self, config: TlsConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the pool that runs receive tasks.
    ///
    /// Defaults to a [`TokioPool`](crate::pool::TokioPool) on the current
    /// runtime.
    pub fn pool(mut self, pool: Arc<dyn TaskPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Registers a callback for every lifecycle state change.
    pub fn on_state_change(mut self, callback: impl Fn(TransportState) + Send + Sync + 'static) -> Self {
        self.state_callback = Some(Arc::new(callback));
        self
    }

    /// Registers a hook that runs once when the handshake completes.
    pub fn on_post_handshake(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.post_handshake = Some(Arc::new(hook));
        self
    }

    /// Overrides the inbound queue limit ([`RECV_QUEUE_LIMIT`] bytes).
    #[cfg(test)]
    pub(crate) fn queue_limit(mut self, bytes: usize) -> Self {
        self.queue_limit = bytes;
        self
    }

    /// Creates the bridge and its crypto session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfiguration`] if the credentials
    /// cannot be used for the bridge's role, no pool was given outside a
    /// Tokio runtime, or rustls rejects the configuration.
    pub fn build(self) -> Result<Arc<TlsBridge>, TransportError> {
        if self.queue_limit == 0 {
            return Err(TransportError::InvalidConfiguration {
                reason: "inbound queue limit must be greater than 0".to_string(),
            });
        }
        let role = Role::from_active(self.lower.is_active());
        let session = session::open(&self.config, role)?;
        let pool = match self.pool {
            Some(pool) => pool,
            None => Arc::new(crate::pool::TokioPool::current()?),
        };
        let metadata = self.lower.metadata().layered("tls");
        let io_style = session.io_style();

        debug!(
            transport_id = %metadata.id,
            %role,
            backend = %self.config.backend(),
            host = self.config.host(),
            "Created TLS transport"
        );

        Ok(Arc::new_cyclic(|weak_self| TlsBridge {
            weak_self: weak_self.clone(),
            metadata,
            lower: self.lower,
            role,
            io_style,
            state: AtomicU8::new(TransportState::New as u8),
            queue: BoundedQueue::new(self.queue_limit),
            recv_lock: ReentrantMutex::new(RefCell::new(RecvContext {
                session,
                cursor: Cursor::default(),
            })),
            pending_recv: AtomicUsize::new(0),
            outgoing_result: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            pool,
            recv_callback: Mutex::new(None),
            state_callback: self.state_callback,
            post_handshake: self.post_handshake,
        }))
    }
}

/// Session I/O bound to one bridge for the duration of one session call.
struct BridgeIo<'a> {
    bridge: &'a TlsBridge,
    cursor: &'a mut Cursor,
    passthrough: &'a mut Vec<Message>,
}

impl SessionIo for BridgeIo<'_> {
    fn pull(&mut self, buf: &mut [u8]) -> Pull {
        loop {
            if let Some(message) = &self.cursor.message {
                let remaining = &message[self.cursor.position..];
                if !remaining.is_empty() {
                    let n = remaining.len().min(buf.len());
                    buf[..n].copy_from_slice(&remaining[..n]);
                    self.cursor.position += n;
                    return Pull::Data(n);
                }
            }
            self.cursor.message = None;
            self.cursor.position = 0;

            match self.bridge.queue.pop() {
                // Zero-length messages bypass the session.
                Pop::Message(message) if message.is_empty() => self.passthrough.push(message),
                Pop::Message(message) => self.cursor.message = Some(message),
                Pop::Empty => return Pull::Empty,
                Pop::Closed => return Pull::Closed,
            }
        }
    }

    fn readable(&self) -> bool {
        let buffered = self
            .cursor
            .message
            .as_ref()
            .is_some_and(|message| self.cursor.position < message.len());
        buffered || !self.bridge.queue.is_empty() || !self.bridge.queue.is_running()
    }

    fn push(&mut self, data: &[u8]) -> Result<bool, TransportError> {
        if data.is_empty() {
            return Ok(self.bridge.outgoing_result.load(Ordering::Acquire));
        }
        trace!(transport_id = %self.bridge.metadata.id, size = data.len(), "TLS outgoing");
        self.bridge.outgoing(data.to_vec())
    }
}

/// Where a receive pass left the connection.
enum Drain {
    /// Waiting for more ciphertext.
    Pending,
    /// The session is over.
    Finished,
}

impl TlsBridge {
    /// Starts building a bridge on top of `lower`.
    pub fn builder(lower: Arc<dyn Transport>) -> TlsBridgeBuilder {
        TlsBridgeBuilder {
            lower,
            config: TlsConfig::new(),
            pool: None,
            state_callback: None,
            post_handshake: None,
            queue_limit: RECV_QUEUE_LIMIT,
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns the TLS role of this bridge.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Number of receive tasks submitted but not yet started; at most one.
    pub fn pending_recv(&self) -> usize {
        self.pending_recv.load(Ordering::Acquire)
    }

    /// Registers with the lower transport and begins the handshake.
    ///
    /// Buffer-style backends emit their first flight before this returns;
    /// pull-style backends start on the first receive task.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidState`] if the bridge was already
    /// started.
    #[cfg_attr(feature = "observability", instrument(skip(self), fields(transport_id = %self.metadata.id)))]
    pub fn start(&self) -> Result<(), TransportError> {
        let state = self.state();
        if state != TransportState::New {
            return Err(TransportError::InvalidState { state });
        }
        debug!(transport_id = %self.metadata.id, role = %self.role, "Starting TLS transport");

        let weak = self.weak_self.clone();
        self.lower.on_recv(Some(Arc::new(move |message| {
            if let Some(bridge) = weak.upgrade() {
                bridge.incoming(message);
            }
        })));
        self.change_state(TransportState::Connecting);

        match self.io_style {
            IoStyle::Buffer => {
                let guard = self.recv_lock.lock();
                if let Drain::Finished = self.drain(&guard) {
                    self.finish(&guard);
                }
            }
            IoStyle::Pull => self.enqueue_recv(),
        }
        Ok(())
    }

    /// Stops the bridge.
    ///
    /// Stops the inbound queue and unregisters from the lower transport; the
    /// receive task then drains what is left, sends `close_notify` and moves
    /// the bridge to its terminal state. Calling `stop` again has no further
    /// effect.
    #[cfg_attr(feature = "observability", instrument(skip(self), fields(transport_id = %self.metadata.id)))]
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(transport_id = %self.metadata.id, "Stopping TLS transport");
        self.queue.stop();
        self.lower.on_recv(None);
        self.enqueue_recv();
    }

    /// Encrypts and sends one message.
    ///
    /// A zero-length message is forwarded to the lower transport as is.
    /// Returns the lower transport's flow-control hint for the last record
    /// sent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidState`] unless the bridge is
    /// `Connected`; nothing is sent in that case.
    pub fn send(&self, message: Message) -> Result<bool, TransportError> {
        let state = self.state();
        if state != TransportState::Connected {
            return Err(TransportError::InvalidState { state });
        }
        if message.is_empty() {
            return self.outgoing(message);
        }
        trace!(transport_id = %self.metadata.id, size = message.len(), "TLS send");

        let guard = self.recv_lock.lock();
        for attempt in 1..=MAX_SEND_ATTEMPTS {
            // The receive task may have closed the session while we waited.
            let state = self.state();
            if state != TransportState::Connected {
                return Err(TransportError::InvalidState { state });
            }
            match self.with_session(&guard, |session, io| session.encrypt_and_flush(io, &message)) {
                Outcome::Progressed(_) => return Ok(self.outgoing_result.load(Ordering::Acquire)),
                Outcome::WouldBlock => {
                    trace!(transport_id = %self.metadata.id, attempt, "TLS send not ready, retrying");
                    std::thread::yield_now();
                }
                Outcome::PeerClosed { .. } => return Err(TransportError::Closed),
                Outcome::Failed(e) => {
                    warn!(transport_id = %self.metadata.id, error = %e, "TLS send failed");
                    return Err(e);
                }
            }
        }
        Err(TransportError::WriteFailed {
            source: io::Error::new(io::ErrorKind::WouldBlock, "TLS backend not ready to write"),
        })
    }

    /// Accepts a message from the lower transport.
    ///
    /// `None` signals end of stream and stops the inbound queue. Messages are
    /// queued, blocking while the queue is over its limit, and a receive task
    /// is scheduled if none is pending.
    pub fn incoming(&self, message: Option<Message>) {
        match message {
            Some(message) => {
                trace!(transport_id = %self.metadata.id, size = message.len(), "TLS incoming");
                if !self.queue.push(message) {
                    trace!(transport_id = %self.metadata.id, "Dropped message after stop");
                }
            }
            None => {
                debug!(transport_id = %self.metadata.id, "Lower transport closed");
                self.queue.stop();
            }
        }
        self.enqueue_recv();
    }

    fn outgoing(&self, message: Message) -> Result<bool, TransportError> {
        let result = self.lower.send(message)?;
        self.outgoing_result.store(result, Ordering::Release);
        Ok(result)
    }

    fn recv(&self, message: Option<Message>) {
        let callback = self.recv_callback.lock().clone();
        match callback {
            Some(callback) => callback(message),
            None => trace!(transport_id = %self.metadata.id, "No receiver registered, dropping message"),
        }
    }

    fn change_state(&self, next: TransportState) -> bool {
        let changed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                TransportState::from_u8(current)
                    .can_advance_to(next)
                    .then_some(next as u8)
            })
            .is_ok();
        if changed {
            debug!(transport_id = %self.metadata.id, state = %next, "TLS state changed");
            if let Some(callback) = &self.state_callback {
                callback(next);
            }
        }
        changed
    }

    fn enqueue_recv(&self) {
        if self
            .pending_recv
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        match self.weak_self.upgrade() {
            Some(bridge) => self.pool.submit(Box::new(move || bridge.do_recv())),
            None => self.pending_recv.store(0, Ordering::Release),
        }
    }

    fn do_recv(&self) {
        let guard = self.recv_lock.lock();
        let _ = self
            .pending_recv
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match self.state() {
            TransportState::Connecting | TransportState::Connected => {}
            _ => return,
        }
        if let Drain::Finished = self.drain(&guard) {
            self.finish(&guard);
        }
    }

    /// Runs one session operation, then hands any pass-through messages up.
    fn with_session<T>(
        &self,
        context: &RefCell<RecvContext>,
        operation: impl FnOnce(&mut dyn CryptoSession, &mut BridgeIo<'_>) -> Outcome<T>,
    ) -> Outcome<T> {
        let mut passthrough = Vec::new();
        let outcome = {
            let mut context = context.borrow_mut();
            let RecvContext { session, cursor } = &mut *context;
            let mut io = BridgeIo {
                bridge: self,
                cursor,
                passthrough: &mut passthrough,
            };
            operation(session.as_mut(), &mut io)
        };
        for message in passthrough {
            self.recv(Some(message));
        }
        outcome
    }

    /// Drives the session over everything queued.
    fn drain(&self, context: &RefCell<RecvContext>) -> Drain {
        if self.state() == TransportState::Connecting {
            match self.with_session(context, |session, io| session.advance_handshake(io)) {
                Outcome::Progressed(()) => {
                    info!(transport_id = %self.metadata.id, role = %self.role, "TLS handshake finished");
                    self.change_state(TransportState::Connected);
                    if let Some(hook) = &self.post_handshake {
                        hook();
                    }
                }
                Outcome::WouldBlock => return Drain::Pending,
                Outcome::PeerClosed { .. } => {
                    warn!(transport_id = %self.metadata.id, "Connection closed during TLS handshake");
                    return Drain::Finished;
                }
                Outcome::Failed(e) => {
                    error!(transport_id = %self.metadata.id, error = %e, "TLS handshake failed");
                    return Drain::Finished;
                }
            }
        }

        if self.state() != TransportState::Connected {
            return Drain::Finished;
        }
        loop {
            match self.with_session(context, |session, io| session.decrypt_next(io)) {
                Outcome::Progressed(data) => {
                    trace!(transport_id = %self.metadata.id, size = data.len(), "TLS recv");
                    self.recv(Some(data));
                }
                Outcome::WouldBlock => return Drain::Pending,
                Outcome::PeerClosed { clean: true } => {
                    debug!(transport_id = %self.metadata.id, "TLS connection cleanly closed");
                    return Drain::Finished;
                }
                Outcome::PeerClosed { clean: false } if self.stopped.load(Ordering::Acquire) => {
                    debug!(transport_id = %self.metadata.id, "TLS transport stopped locally");
                    return Drain::Finished;
                }
                Outcome::PeerClosed { clean: false } => {
                    warn!(transport_id = %self.metadata.id, "TLS connection closed without close_notify");
                    return Drain::Finished;
                }
                Outcome::Failed(e) => {
                    error!(transport_id = %self.metadata.id, error = %e, "TLS recv failed");
                    return Drain::Finished;
                }
            }
        }
    }

    /// Tears the session down and moves to the terminal state.
    fn finish(&self, context: &RefCell<RecvContext>) {
        let handshaking = context.borrow().session.is_handshaking();
        debug!(transport_id = %self.metadata.id, handshaking, "Shutting down TLS session");
        if let Outcome::Failed(e) = self.with_session(context, |session, io| session.shutdown(io)) {
            debug!(transport_id = %self.metadata.id, error = %e, "TLS shutdown failed");
        }
        self.queue.stop();
        self.lower.on_recv(None);

        if self.state() == TransportState::Connected {
            info!(transport_id = %self.metadata.id, "TLS closed");
            self.change_state(TransportState::Disconnected);
            self.recv(None);
        } else {
            info!(transport_id = %self.metadata.id, "TLS handshake failed");
            self.change_state(TransportState::Failed);
        }
    }
}

impl Transport for TlsBridge {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.role == Role::Client
    }

    fn send(&self, message: Message) -> Result<bool, TransportError> {
        TlsBridge::send(self, message)
    }

    fn on_recv(&self, callback: Option<RecvCallback>) {
        *self.recv_callback.lock() = callback;
    }
}

impl Drop for TlsBridge {
    fn drop(&mut self) {
        self.queue.stop();
        self.lower.on_recv(None);
    }
}

impl std::fmt::Debug for TlsBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsBridge")
            .field("metadata", &self.metadata)
            .field("role", &self.role)
            .field("state", &self.state())
            .field("pending_recv", &self.pending_recv())
            .finish_non_exhaustive()
    }
}
