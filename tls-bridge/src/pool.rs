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

//! Task pools that run the TLS bridge's receive work.
//!
//! The bridge never drives its crypto backend on the thread that delivered
//! ciphertext. It submits a task to a [`TaskPool`] instead, and at most one
//! such task per bridge is ever pending.
//!
//! Two pools ship with the crate:
//!
//! - [`TokioPool`]: runs tasks on a Tokio runtime's blocking thread pool
//! - [`ManualPool`]: queues tasks until the caller runs them, for
//!   deterministic tests

use crate::transport::TransportError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::runtime::Handle;
use tracing::trace;

/// A unit of work submitted to a [`TaskPool`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executes submitted tasks asynchronously.
///
/// Implementations must not run a task inline on the submitting thread: the
/// bridge submits from inside lower-transport callbacks and expects to return
/// before the task starts. Tasks may block (on locks held by another task of
/// the same bridge), so pools backed by async runtimes should use threads
/// that tolerate blocking.
pub trait TaskPool: Send + Sync + 'static {
    /// Schedule `task` to run once, later, on some pool thread.
    fn submit(&self, task: Task);
}

/// Runs tasks on a Tokio runtime's blocking thread pool.
///
/// # Examples
///
/// ```rust
/// use std::sync::mpsc;
/// use tls_bridge::pool::{TaskPool, TokioPool};
///
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// let pool = TokioPool::new(runtime.handle().clone());
///
/// let (tx, rx) = mpsc::channel();
/// pool.submit(Box::new(move || tx.send(42).unwrap()));
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
#[derive(Debug, Clone)]
pub struct TokioPool {
    handle: Handle,
}

impl TokioPool {
    /// Creates a pool on the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Creates a pool on the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfiguration`] when called outside
    /// a Tokio runtime.
    pub fn current() -> Result<Self, TransportError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| TransportError::InvalidConfiguration {
                reason: format!("no Tokio runtime available for the task pool: {e}"),
            })
    }
}

impl TaskPool for TokioPool {
    fn submit(&self, task: Task) {
        // Detached; completion is observed through the bridge's callbacks.
        drop(self.handle.spawn_blocking(task));
    }
}

/// Queues tasks until the caller runs them.
///
/// Useful for tests that need to interleave bridge work step by step on a
/// single thread.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use tls_bridge::pool::{ManualPool, TaskPool};
///
/// let pool = Arc::new(ManualPool::new());
/// let runs = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&runs);
/// let resubmit = Arc::clone(&pool);
/// pool.submit(Box::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
///     let counter = Arc::clone(&counter);
///     resubmit.submit(Box::new(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     }));
/// }));
///
/// assert_eq!(pool.pending(), 1);
/// assert_eq!(pool.run_until_idle(), 2);
/// assert_eq!(runs.load(Ordering::SeqCst), 2);
/// ```
#[derive(Default)]
pub struct ManualPool {
    tasks: Mutex<VecDeque<Task>>,
}

impl ManualPool {
    /// Upper bound on tasks run by one [`run_until_idle`](Self::run_until_idle) call.
    pub const MAX_RUN: usize = 100_000;

    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Runs the tasks that were queued when the call started.
    ///
    /// Tasks submitted while these run are left for the next call. Returns
    /// the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let batch = std::mem::take(&mut *self.tasks.lock());
        let count = batch.len();
        for task in batch {
            task();
        }
        count
    }

    /// Runs tasks until none are left, including ones submitted meanwhile.
    ///
    /// Stops after [`MAX_RUN`](Self::MAX_RUN) tasks. Returns the number of
    /// tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while count < Self::MAX_RUN {
            let Some(task) = self.tasks.lock().pop_front() else {
                break;
            };
            task();
            count += 1;
        }
        trace!(count, "Manual pool idle");
        count
    }
}

impl TaskPool for ManualPool {
    fn submit(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }
}

impl std::fmt::Debug for ManualPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualPool")
            .field("pending", &self.pending())
            .finish()
    }
}
