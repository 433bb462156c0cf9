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

//! In-memory transport implementation for testing.
//!
//! This module provides a pair of message transports wired to each other
//! inside one process. `send` only appends to the sending end's outbox; a
//! delivery task on the pair's [`TaskPool`] hands queued messages to the
//! peer's receive callback. A sender therefore never blocks on the peer's
//! backpressure, and with a [`ManualPool`](crate::pool::ManualPool) runs stay
//! fully deterministic.

use crate::pool::TaskPool;
use crate::transport::slot::RecvSlot;
use crate::transport::{
    Message, RecvCallback, Transport, TransportError, TransportId, TransportMetadata,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

#[cfg(feature = "observability")]
use tracing::{debug, instrument};

/// Outbound backlog above which `send` reports backpressure.
pub(crate) const SEND_HIGH_WATER_MARK: usize = 1024 * 1024;

/// Bytes one delivery task hands over before yielding to other pool work.
const DELIVERY_BATCH_BYTES: usize = 256 * 1024;

/// Messages sent by one end and not yet delivered to the other.
#[derive(Default)]
struct Outbox {
    messages: VecDeque<Option<Message>>,
    bytes: usize,
    scheduled: bool,
}

/// State shared by both ends of a pair.
struct Link {
    slots: [RecvSlot; 2],
    outboxes: [Mutex<Outbox>; 2],
    closed: AtomicBool,
    pool: Arc<dyn TaskPool>,
}

impl Link {
    /// Queues a message from end `from`, scheduling delivery if idle.
    ///
    /// Returns `false` while the backlog is above [`SEND_HIGH_WATER_MARK`].
    fn post(self: &Arc<Self>, from: usize, message: Option<Message>) -> bool {
        let (schedule, below_mark) = {
            let mut outbox = self.outboxes[from].lock();
            outbox.bytes += message.as_ref().map_or(0, Vec::len);
            outbox.messages.push_back(message);
            let schedule = !std::mem::replace(&mut outbox.scheduled, true);
            (schedule, outbox.bytes <= SEND_HIGH_WATER_MARK)
        };
        if schedule {
            self.schedule(from);
        }
        below_mark
    }

    fn schedule(self: &Arc<Self>, from: usize) {
        let link = Arc::clone(self);
        self.pool.submit(Box::new(move || link.deliver(from)));
    }

    /// Hands queued messages from end `from` to its peer, in order.
    ///
    /// At most one delivery task per direction exists at a time.
    fn deliver(self: Arc<Self>, from: usize) {
        let peer = &self.slots[1 - from];
        let mut delivered = 0;
        loop {
            let message = {
                let mut outbox = self.outboxes[from].lock();
                if outbox.messages.is_empty() {
                    outbox.scheduled = false;
                    return;
                }
                if delivered >= DELIVERY_BATCH_BYTES {
                    drop(outbox);
                    self.schedule(from);
                    return;
                }
                let message = outbox.messages.pop_front().flatten();
                outbox.bytes -= message.as_ref().map_or(0, Vec::len);
                message
            };
            delivered += message.as_ref().map_or(0, Vec::len);
            peer.deliver(message);
        }
    }
}

/// In-memory transport implementation.
///
/// `MemoryTransport` is useful for:
///
/// - Unit testing the TLS bridge without network overhead
/// - Deterministic handshake runs on a [`ManualPool`](crate::pool::ManualPool)
/// - Testing backpressure and close propagation
///
/// Each end holds messages sent before its peer registered a callback, so no
/// handshake record is lost to a registration race.
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
/// assert!(client.is_active());
/// assert!(!server.is_active());
///
/// // Sent before the server listens; delivered on registration.
/// client.send(b"Hello!".to_vec()).unwrap();
/// pool.run_until_idle();
///
/// let (tx, rx) = std::sync::mpsc::channel();
/// server.on_recv(Some(Arc::new(move |message| {
///     let _ = tx.send(message);
/// })));
/// assert_eq!(rx.recv().unwrap(), Some(b"Hello!".to_vec()));
/// ```
pub struct MemoryTransport {
    metadata: TransportMetadata,
    link: Arc<Link>,
    index: usize,
}

impl MemoryTransport {
    /// Creates a pair of connected memory transports delivering on `pool`.
    ///
    /// The first transport is the active (client) end, the second the
    /// passive (server) end.
    #[cfg_attr(feature = "observability", instrument(skip(pool)))]
    pub fn pair(pool: Arc<dyn TaskPool>) -> (Arc<Self>, Arc<Self>) {
        let link = Arc::new(Link {
            slots: [RecvSlot::new(), RecvSlot::new()],
            outboxes: [Mutex::default(), Mutex::default()],
            closed: AtomicBool::new(false),
            pool,
        });

        let client = Arc::new(Self {
            metadata: TransportMetadata::new(TransportId::next(), "memory"),
            link: Arc::clone(&link),
            index: 0,
        });
        let server = Arc::new(Self {
            metadata: TransportMetadata::new(TransportId::next(), "memory"),
            link,
            index: 1,
        });

        #[cfg(feature = "observability")]
        debug!(client = %client.metadata.id, server = %server.metadata.id, "Created memory transport pair");

        (client, server)
    }

    /// Closes the pair and signals end of stream to the peer.
    ///
    /// Messages already sent are delivered first. Later sends on either end
    /// fail with [`TransportError::Closed`]. Calling `close` more than once
    /// has no further effect.
    pub fn close(&self) {
        if self.link.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!(transport_id = %self.metadata.id, "Closing memory transport");
        self.link.post(self.index, None);
    }

    /// Returns `true` once either end has been closed.
    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::Acquire)
    }

    /// Bytes sent by this end and not yet handed to the peer.
    pub fn pending_bytes(&self) -> usize {
        self.link.outboxes[self.index].lock().bytes
    }
}

impl Transport for MemoryTransport {
    fn metadata(&self) -> &TransportMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.index == 0
    }

    fn send(&self, message: Message) -> Result<bool, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        trace!(transport_id = %self.metadata.id, size = message.len(), "Memory send");
        Ok(self.link.post(self.index, Some(message)))
    }

    fn on_recv(&self, callback: Option<RecvCallback>) {
        self.link.slots[self.index].set(callback);
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("metadata", &self.metadata)
            .field("active", &self.is_active())
            .field("closed", &self.is_closed())
            .field("pending_bytes", &self.pending_bytes())
            .finish()
    }
}
