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

//! Transport layer abstractions.
//!
//! A [`Transport`] moves whole messages in both directions: `send` pushes a
//! message out and returns a flow-control hint, received messages arrive
//! through a callback registered with `on_recv`, and `None` marks the end of
//! the stream. This module includes several implementations:
//!
//! - [`MemoryTransport`]: in-process pairs for testing
//! - [`TcpTransport`]: TCP/IP networking on a Tokio runtime
//! - [`TlsBridge`]: TLS layered over any other transport
//!
//! # Architecture
//!
//! Transports compose. A [`TlsBridge`] is itself a [`Transport`], so it can
//! sit on a TCP connection, an in-memory pair, or another bridge:
//!
//! ```text
//!   application  <-- plaintext -->  TlsBridge  <-- ciphertext -->  TcpTransport
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tls_bridge::pool::TokioPool;
//! use tls_bridge::transport::{TcpTransport, TlsBridge, TlsConfig, Transport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tcp = TcpTransport::connect("example.com:443").await?;
//! let tls = TlsBridge::builder(tcp)
//!     .config(TlsConfig::new().with_host("example.com"))
//!     .pool(Arc::new(TokioPool::current()?))
//!     .build()?;
//!
//! tls.on_recv(Some(Arc::new(|message| match message {
//!     Some(data) => println!("received {} bytes", data.len()),
//!     None => println!("closed"),
//! })));
//! tls.start()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod memory;
pub(crate) mod slot;
mod tcp;
mod tls;
mod traits;
mod types;

pub use config::{Backend, Identity, TlsConfig, default_root_store};
pub use error::TransportError;
pub use memory::MemoryTransport;
pub use tcp::TcpTransport;
pub use tls::{MAX_SEND_ATTEMPTS, PostHandshakeHook, RECV_QUEUE_LIMIT, TlsBridge, TlsBridgeBuilder};
pub use traits::Transport;
pub use types::{
    Message, RecvCallback, Role, StateCallback, TransportId, TransportMetadata, TransportState,
};

/// Largest ciphertext chunk read at once, from a socket or an inbound queue.
pub(crate) const READ_CHUNK_SIZE: usize = 4096;
