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

//! Transport layer error types.
//!
//! Every fallible operation in this crate returns [`TransportError`]. The
//! bridge itself never surfaces handshake or record failures through a
//! `Result`: those end the connection and are reported through the state
//! callback instead. The variants here cover what callers can observe
//! synchronously.
//!
//! # Error Categories
//!
//! - **State errors**: an operation was attempted in the wrong lifecycle state
//! - **Configuration errors**: credentials or host names that cannot be used
//! - **TLS errors**: protocol failures raised by the crypto backend
//! - **I/O errors**: failures of the lower transport

use crate::transport::TransportState;
use std::io;
use thiserror::Error;

/// Errors that can occur in the transport layer.
///
/// # Examples
///
/// ```rust
/// use tls_bridge::transport::{TransportError, TransportState};
///
/// let error = TransportError::InvalidState {
///     state: TransportState::Connecting,
/// };
///
/// assert!(!error.is_recoverable());
/// assert_eq!(error.to_string(), "TLS is not open (state: connecting)");
/// ```
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish a connection to the remote endpoint.
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        /// The address that failed to connect
        address: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The operation requires a state the transport is not in.
    ///
    /// Raised by `send` on a TLS bridge that has not reached `Connected`, or
    /// that has already left it.
    #[error("TLS is not open (state: {state})")]
    InvalidState {
        /// The state the transport was in when the operation was attempted
        state: TransportState,
    },

    /// Invalid transport configuration.
    ///
    /// Covers unusable credentials, missing identities and malformed host
    /// names. It is not recoverable and indicates a programming error.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the configuration error
        reason: String,
    },

    /// The crypto backend rejected the session.
    #[error("TLS error: {source}")]
    Tls {
        /// The underlying rustls error
        #[from]
        source: rustls::Error,
    },

    /// Failed to write to the lower transport.
    #[error("write failed: {source}")]
    WriteFailed {
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Failed to bind to the specified address.
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        /// The address that failed to bind
        address: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Transport is already closed.
    #[error("transport is closed")]
    Closed,

    /// An unexpected I/O error occurred.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// Returns `true` if retrying the same operation later may succeed.
    ///
    /// Only transient I/O conditions qualify. State, configuration and TLS
    /// errors are permanent for the transport they were raised on.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransportError::ConnectionFailed { .. } => true,

            TransportError::WriteFailed { source } | TransportError::Io { source } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),

            TransportError::InvalidState { .. }
            | TransportError::InvalidConfiguration { .. }
            | TransportError::Tls { .. }
            | TransportError::BindFailed { .. }
            | TransportError::Closed => false,
        }
    }

    /// Returns `true` if this error indicates the transport should be closed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tls_bridge::transport::TransportError;
    ///
    /// let error = TransportError::Closed;
    /// assert!(error.should_close_transport());
    /// ```
    pub fn should_close_transport(&self) -> bool {
        match self {
            TransportError::Tls { .. } | TransportError::Closed => true,

            // Rejected before anything was sent.
            TransportError::InvalidState { .. }
            | TransportError::InvalidConfiguration { .. }
            | TransportError::ConnectionFailed { .. }
            | TransportError::BindFailed { .. } => false,

            TransportError::WriteFailed { source } | TransportError::Io { source } => !matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        // rustls reports record-layer failures as `InvalidData` wrapping its own error.
        if let Some(tls) = error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        {
            return TransportError::Tls {
                source: tls.clone(),
            };
        }
        TransportError::Io { source: error }
    }
}
