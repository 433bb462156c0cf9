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

use crate::backpressure::BackpressureMetrics;
use crate::transport::Message;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Result of a non-blocking [`BoundedQueue::pop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop {
    /// The oldest queued message.
    Message(Message),
    /// Nothing queued right now; more may arrive.
    Empty,
    /// Nothing queued and the queue has been stopped.
    Closed,
}

/// FIFO of messages bounded by their cumulative size.
///
/// Producers call [`push`](Self::push), which blocks while the queued bytes
/// would exceed the limit. An empty queue always admits one message, so a
/// message larger than the limit cannot wedge the producer. Consumers call
/// [`pop`](Self::pop), which never blocks.
///
/// Once [`stop`](Self::stop) is called, blocked producers wake up, further
/// pushes are dropped, and consumers drain what is left before seeing
/// [`Pop::Closed`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use tls_bridge::backpressure::{BoundedQueue, Pop};
///
/// let queue = Arc::new(BoundedQueue::new(8));
/// queue.push(vec![0; 8]);
///
/// // The queue is full; this producer blocks until the consumer pops.
/// let producer = {
///     let queue = Arc::clone(&queue);
///     std::thread::spawn(move || queue.push(vec![1; 4]))
/// };
///
/// while queue.pop() != Pop::Message(vec![0; 8]) {}
/// assert!(producer.join().unwrap());
/// ```
#[derive(Debug)]
pub struct BoundedQueue {
    /// Byte limit of the queue
    capacity: usize,

    inner: Mutex<QueueInner>,

    /// Signalled whenever bytes leave the queue or it is stopped
    not_full: Condvar,

    /// Total messages accepted
    messages_pushed: AtomicU64,

    /// Total messages popped
    messages_popped: AtomicU64,

    /// Total producer wait time in milliseconds
    wait_time_ms: AtomicU64,
}

#[derive(Debug)]
struct QueueInner {
    messages: VecDeque<Message>,
    amount: usize,
    running: bool,
}

impl BoundedQueue {
    /// Create a new queue holding at most `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");

        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                messages: VecDeque::new(),
                amount: 0,
                running: true,
            }),
            not_full: Condvar::new(),
            messages_pushed: AtomicU64::new(0),
            messages_popped: AtomicU64::new(0),
            wait_time_ms: AtomicU64::new(0),
        }
    }

    /// Append a message, blocking while the queue is over its limit.
    ///
    /// Returns `false` if the queue was stopped and the message dropped.
    pub fn push(&self, message: Message) -> bool {
        let mut inner = self.inner.lock();
        if inner.running && self.must_wait(&inner, message.len()) {
            let start = Instant::now();
            while inner.running && self.must_wait(&inner, message.len()) {
                self.not_full.wait(&mut inner);
            }
            self.wait_time_ms
                .fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);
        }
        Self::enqueue(&mut inner, message, &self.messages_pushed)
    }

    /// Append a message without blocking.
    ///
    /// Hands the message back if the queue is over its limit or stopped.
    pub fn try_push(&self, message: Message) -> Result<(), Message> {
        let mut inner = self.inner.lock();
        if !inner.running || self.must_wait(&inner, message.len()) {
            return Err(message);
        }
        Self::enqueue(&mut inner, message, &self.messages_pushed);
        Ok(())
    }

    fn must_wait(&self, inner: &QueueInner, size: usize) -> bool {
        !inner.messages.is_empty() && inner.amount + size > self.capacity
    }

    fn enqueue(inner: &mut QueueInner, message: Message, pushed: &AtomicU64) -> bool {
        if !inner.running {
            return false;
        }
        inner.amount += message.len();
        inner.messages.push_back(message);
        pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove the oldest message without blocking.
    pub fn pop(&self) -> Pop {
        let mut inner = self.inner.lock();
        match inner.messages.pop_front() {
            Some(message) => {
                inner.amount -= message.len();
                self.messages_popped.fetch_add(1, Ordering::Relaxed);
                self.not_full.notify_all();
                Pop::Message(message)
            }
            None if inner.running => Pop::Empty,
            None => Pop::Closed,
        }
    }

    /// Stop the queue and wake blocked producers.
    ///
    /// Already queued messages stay poppable. Stopping twice is harmless.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.running = false;
        self.not_full.notify_all();
    }

    /// Returns `true` until [`stop`](Self::stop) is called.
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Returns `true` if no messages are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// Total size of the queued messages in bytes.
    pub fn amount(&self) -> usize {
        self.inner.lock().amount
    }

    /// Get the byte limit.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get current occupancy and throughput counters.
    pub fn metrics(&self) -> BackpressureMetrics {
        let (queue_depth, queued_bytes) = {
            let inner = self.inner.lock();
            (inner.messages.len(), inner.amount)
        };
        BackpressureMetrics {
            queue_depth,
            queued_bytes,
            capacity: self.capacity,
            messages_pushed: self.messages_pushed.load(Ordering::Relaxed),
            messages_popped: self.messages_popped.load(Ordering::Relaxed),
            wait_time_ms: self.wait_time_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_new() {
        let queue = BoundedQueue::new(100);
        assert_eq!(queue.capacity(), 100);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_running());
    }

    #[test]
    #[should_panic(expected = "Capacity must be greater than 0")]
    fn test_new_zero_capacity() {
        BoundedQueue::new(0);
    }

    #[test]
    fn test_fifo_order_and_amount() {
        let queue = BoundedQueue::new(100);
        assert!(queue.push(b"one".to_vec()));
        assert!(queue.push(b"three".to_vec()));
        assert_eq!(queue.amount(), 8);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Pop::Message(b"one".to_vec()));
        assert_eq!(queue.amount(), 5);
        assert_eq!(queue.pop(), Pop::Message(b"three".to_vec()));
        assert_eq!(queue.pop(), Pop::Empty);
    }

    #[test]
    fn test_empty_messages_are_queued() {
        let queue = BoundedQueue::new(4);
        assert!(queue.push(Vec::new()));
        assert!(!queue.is_empty());
        assert_eq!(queue.amount(), 0);
        assert_eq!(queue.pop(), Pop::Message(Vec::new()));
    }

    #[test]
    fn test_oversized_message_admitted_when_empty() {
        let queue = BoundedQueue::new(4);
        assert!(queue.push(vec![0; 16]));
        assert!(queue.try_push(vec![1]).is_err());
        assert_eq!(queue.pop(), Pop::Message(vec![0; 16]));
        assert!(queue.try_push(vec![1]).is_ok());
    }

    #[test]
    fn test_stop_drains_then_closes() {
        let queue = BoundedQueue::new(100);
        queue.push(b"tail".to_vec());
        queue.stop();
        queue.stop();

        assert!(!queue.push(b"dropped".to_vec()));
        assert_eq!(queue.try_push(b"dropped".to_vec()), Err(b"dropped".to_vec()));
        assert_eq!(queue.pop(), Pop::Message(b"tail".to_vec()));
        assert_eq!(queue.pop(), Pop::Closed);
    }

    #[test]
    fn test_push_blocks_until_pop() {
        let queue = Arc::new(BoundedQueue::new(4));
        queue.push(vec![0; 4]);

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.push(vec![1; 2]))
        };

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop(), Pop::Message(vec![0; 4]));
        assert!(producer.join().unwrap());
        assert_eq!(queue.pop(), Pop::Message(vec![1; 2]));
    }

    #[test]
    fn test_stop_wakes_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(4));
        queue.push(vec![0; 4]);

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.push(vec![1; 2]))
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.stop();

        assert!(!producer.join().unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_metrics() {
        let queue = BoundedQueue::new(100);
        for _ in 0..10 {
            queue.push(vec![0; 5]);
        }
        for _ in 0..4 {
            queue.pop();
        }

        let metrics = queue.metrics();
        assert_eq!(metrics.capacity, 100);
        assert_eq!(metrics.queue_depth, 6);
        assert_eq!(metrics.queued_bytes, 30);
        assert_eq!(metrics.messages_pushed, 10);
        assert_eq!(metrics.messages_popped, 4);
    }
}
