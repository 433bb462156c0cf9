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

//! Backpressure and flow control for inbound ciphertext.
//!
//! # Overview
//!
//! Bytes from the lower transport are parked in a [`BoundedQueue`] until the
//! TLS bridge's receive task hands them to the crypto backend. The queue is
//! bounded by the total size of the messages it holds: a producer that would
//! push it past its limit blocks until the consumer catches up or the queue
//! is stopped.
//!
//! # Examples
//!
//! ```rust
//! use tls_bridge::backpressure::{BoundedQueue, Pop};
//!
//! let queue = BoundedQueue::new(1024);
//! assert!(queue.push(b"ciphertext".to_vec()));
//!
//! let metrics = queue.metrics();
//! println!("Queued: {}/{} bytes", metrics.queued_bytes, metrics.capacity);
//!
//! assert_eq!(queue.pop(), Pop::Message(b"ciphertext".to_vec()));
//! assert_eq!(queue.pop(), Pop::Empty);
//!
//! queue.stop();
//! assert_eq!(queue.pop(), Pop::Closed);
//! ```

mod bounded_queue;
mod metrics;

pub use bounded_queue::{BoundedQueue, Pop};
pub use metrics::BackpressureMetrics;
