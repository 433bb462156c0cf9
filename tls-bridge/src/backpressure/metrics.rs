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

/// Snapshot of a queue's occupancy and throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureMetrics {
    /// Number of messages currently queued
    pub queue_depth: usize,

    /// Total size of the queued messages in bytes
    pub queued_bytes: usize,

    /// Byte limit of the queue
    pub capacity: usize,

    /// Total number of messages accepted
    pub messages_pushed: u64,

    /// Total number of messages handed to the consumer
    pub messages_popped: u64,

    /// Total time producers spent blocked waiting for capacity (milliseconds)
    pub wait_time_ms: u64,
}

impl BackpressureMetrics {
    /// Create new metrics with zero values.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue_depth: 0,
            queued_bytes: 0,
            capacity,
            messages_pushed: 0,
            messages_popped: 0,
            wait_time_ms: 0,
        }
    }

    /// Calculate the current byte utilization as a percentage.
    ///
    /// May exceed 100 since a single oversized message is always admitted
    /// into an empty queue.
    pub fn utilization_percent(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.queued_bytes as f64 / self.capacity as f64) * 100.0
        }
    }

    /// Check if the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.queued_bytes >= self.capacity
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue_depth == 0
    }
}
