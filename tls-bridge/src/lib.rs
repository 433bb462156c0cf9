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

#![doc = include_str!("../../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! ## Crate Layout
//!
//! - **[`transport`]**: the [`Transport`] abstraction, memory and TCP
//!   transports, TLS configuration and the [`TlsBridge`]
//! - **[`session`]**: crypto backend adapters behind [`CryptoSession`]
//! - **[`backpressure`]**: the bounded inbound queue
//! - **[`pool`]**: task pools that run receive work

pub mod backpressure;
pub mod pool;
pub mod session;
pub mod transport;

pub use backpressure::{BackpressureMetrics, BoundedQueue};
pub use pool::{ManualPool, TaskPool, TokioPool};
pub use session::{CryptoSession, IoStyle};
pub use transport::{
    Backend, Identity, MemoryTransport, Message, RecvCallback, Role, TcpTransport, TlsBridge,
    TlsConfig, Transport, TransportError, TransportState,
};
