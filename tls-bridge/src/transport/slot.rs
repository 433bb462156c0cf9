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

//! Receive-callback slot shared by the lower transports.

use crate::transport::{Message, RecvCallback};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::VecDeque;

/// Above this many held messages `deliver` reports backpressure.
const BACKLOG_HIGH_WATER_MARK: usize = 256;

/// Holds the registered receive callback and a backlog for deliveries that
/// arrive before one is registered.
///
/// Deliveries are serialized so the callback observes messages in the order
/// they were handed over, including the backlog flushed on registration.
pub(crate) struct RecvSlot {
    delivery: ReentrantMutex<()>,
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    callback: Option<RecvCallback>,
    backlog: VecDeque<Option<Message>>,
}

impl RecvSlot {
    pub(crate) fn new() -> Self {
        Self {
            delivery: ReentrantMutex::new(()),
            state: Mutex::new(SlotState::default()),
        }
    }

    /// Replaces the callback, flushing any backlog into the new one.
    pub(crate) fn set(&self, callback: Option<RecvCallback>) {
        let _delivery = self.delivery.lock();
        let backlog = {
            let mut state = self.state.lock();
            state.callback = callback.clone();
            if callback.is_some() {
                std::mem::take(&mut state.backlog)
            } else {
                VecDeque::new()
            }
        };
        if let Some(callback) = callback {
            for message in backlog {
                callback(message);
            }
        }
    }

    /// Hands a message to the callback, or holds it until one is registered.
    ///
    /// Returns `false` once the backlog grows past its high-water mark.
    pub(crate) fn deliver(&self, message: Option<Message>) -> bool {
        let _delivery = self.delivery.lock();
        let callback = {
            let mut state = self.state.lock();
            match state.callback.clone() {
                Some(callback) => callback,
                None => {
                    state.backlog.push_back(message);
                    return state.backlog.len() < BACKLOG_HIGH_WATER_MARK;
                }
            }
        };
        callback(message);
        true
    }

    #[cfg(test)]
    pub(crate) fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }
}
