//! TLS echo between two bridges joined by an in-memory transport.
//!
//! Both bridges run their receive work on the Tokio blocking pool. The
//! server echoes every message back and the client prints what returns.
//!
//! Run with:
//! ```bash
//! RUST_LOG=tls_bridge=debug cargo run --example memory_echo
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;
use tls_bridge::pool::TokioPool;
use tls_bridge::transport::{
    Backend, Identity, MemoryTransport, TlsBridge, TlsConfig, Transport, TransportState,
};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let identity = Identity::self_signed(["localhost"])?;
    let pool = Arc::new(TokioPool::current()?);
    let (client_end, server_end) = MemoryTransport::pair(pool.clone());

    let server = TlsBridge::builder(server_end)
        .config(TlsConfig::new().with_identity(identity.clone()))
        .pool(pool.clone())
        .on_state_change(|state| println!("server: {state}"))
        .build()?;
    let client = TlsBridge::builder(client_end)
        .config(
            TlsConfig::new()
                .with_host("localhost")
                .with_root_certificates(identity.trust_store()?)
                .with_backend(Backend::Unbuffered),
        )
        .pool(pool)
        .on_state_change(|state| println!("client: {state}"))
        .build()?;

    // Echo everything straight back.
    let echo: Weak<TlsBridge> = Arc::downgrade(&server);
    server.on_recv(Some(Arc::new(move |message| {
        if let (Some(server), Some(data)) = (echo.upgrade(), message) {
            if let Err(e) = server.send(data) {
                eprintln!("Failed to echo: {e}");
            }
        }
    })));

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_recv(Some(Arc::new(move |message| {
        let _ = tx.send(message);
    })));

    server.start()?;
    client.start()?;
    while client.state() != TransportState::Connected {
        if client.state().is_terminal() {
            return Err(format!("handshake ended in {}", client.state()).into());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for text in ["hello", "from", "the other side"] {
        client.send(text.as_bytes().to_vec())?;
        if let Some(Some(reply)) = rx.recv().await {
            println!("echoed: {}", String::from_utf8_lossy(&reply));
        }
    }

    client.stop();
    while let Some(message) = rx.recv().await {
        if message.is_none() {
            println!("connection closed");
            break;
        }
    }
    Ok(())
}
