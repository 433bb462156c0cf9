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

//! Shared fixtures for the TLS bridge integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;
use tls_bridge::pool::ManualPool;
use tls_bridge::transport::{
    Backend, Identity, MemoryTransport, Message, RecvCallback, TlsBridge, TlsConfig, Transport,
    TransportError, TransportMetadata, TransportState,
};

pub const BACKENDS: [Backend; 3] = [Backend::Buffered, Backend::Stream, Backend::Unbuffered];

/// Installs a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls until `bridge` reaches `state`, panicking after ten seconds.
pub async fn wait_for_state(bridge: &TlsBridge, state: TransportState) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while bridge.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("bridge stuck in {} waiting for {state}", bridge.state()));
}

/// Wraps a transport, records what is sent through it and overrides the
/// flow-control hint.
pub struct Tap {
    inner: Arc<MemoryTransport>,
    sent: Mutex<Vec<Message>>,
    hint: AtomicBool,
}

impl Tap {
    pub fn new(inner: Arc<MemoryTransport>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            sent: Mutex::new(Vec::new()),
            hint: AtomicBool::new(true),
        })
    }

    pub fn set_hint(&self, hint: bool) {
        self.hint.store(hint, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn inner(&self) -> &Arc<MemoryTransport> {
        &self.inner
    }
}

impl Transport for Tap {
    fn metadata(&self) -> &TransportMetadata {
        self.inner.metadata()
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn send(&self, message: Message) -> Result<bool, TransportError> {
        self.sent.lock().push(message.clone());
        self.inner.send(message)?;
        Ok(self.hint.load(Ordering::SeqCst))
    }

    fn on_recv(&self, callback: Option<RecvCallback>) {
        self.inner.on_recv(callback)
    }
}

/// Collects everything a bridge delivers upward.
pub struct Inbox {
    rx: Receiver<Option<Message>>,
}

impl Inbox {
    pub fn attach(transport: &dyn Transport) -> Self {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        transport.on_recv(Some(Arc::new(move |message| {
            let _ = tx.lock().send(message);
        })));
        Self { rx }
    }

    pub fn drain(&self) -> Vec<Option<Message>> {
        self.rx.try_iter().collect()
    }

    /// Concatenated plaintext, ignoring end-of-stream markers.
    pub fn bytes(&self) -> Vec<u8> {
        self.drain().into_iter().flatten().flatten().collect()
    }
}

/// Records state transitions reported by a bridge.
#[derive(Clone, Default)]
pub struct StateLog(Arc<Mutex<Vec<TransportState>>>);

impl StateLog {
    pub fn callback(&self) -> impl Fn(TransportState) + Send + Sync + 'static {
        let log = self.0.clone();
        move |state| log.lock().push(state)
    }

    pub fn states(&self) -> Vec<TransportState> {
        self.0.lock().clone()
    }
}

/// A client and server bridge joined by tapped memory transports.
pub struct Harness {
    pub pool: Arc<ManualPool>,
    pub identity: Identity,
    pub client: Arc<TlsBridge>,
    pub server: Arc<TlsBridge>,
    pub client_tap: Arc<Tap>,
    pub server_tap: Arc<Tap>,
    pub client_states: StateLog,
    pub server_states: StateLog,
}

impl Harness {
    pub fn new(backend: Backend) -> Self {
        init_tracing();
        let identity = Identity::self_signed(["localhost"]).unwrap();
        let client_config = TlsConfig::new()
            .with_host("localhost")
            .with_root_certificates(identity.trust_store().unwrap())
            .with_backend(backend);
        Self::with_client_config(backend, identity, client_config)
    }

    pub fn with_client_config(backend: Backend, identity: Identity, client_config: TlsConfig) -> Self {
        init_tracing();
        let pool = Arc::new(ManualPool::new());
        let (client_end, server_end) = MemoryTransport::pair(pool.clone());
        let client_tap = Tap::new(client_end);
        let server_tap = Tap::new(server_end);
        let client_states = StateLog::default();
        let server_states = StateLog::default();

        let server = TlsBridge::builder(server_tap.clone())
            .config(TlsConfig::new().with_identity(identity.clone()).with_backend(backend))
            .pool(pool.clone())
            .on_state_change(server_states.callback())
            .build()
            .unwrap();
        let client = TlsBridge::builder(client_tap.clone())
            .config(client_config)
            .pool(pool.clone())
            .on_state_change(client_states.callback())
            .build()
            .unwrap();

        Self {
            pool,
            identity,
            client,
            server,
            client_tap,
            server_tap,
            client_states,
            server_states,
        }
    }

    pub fn start(&self) {
        self.server.start().unwrap();
        self.client.start().unwrap();
        self.pool.run_until_idle();
    }

    pub fn connect(&self) {
        self.start();
        assert_eq!(self.client.state(), TransportState::Connected);
        assert_eq!(self.server.state(), TransportState::Connected);
    }
}
