//! TLS echo server over TCP.
//!
//! Accepts connections on `127.0.0.1:8443`, upgrades each to TLS with a
//! self-signed certificate and echoes every message back.
//!
//! Run the server:
//! ```bash
//! cargo run --example tcp_echo
//! ```
//!
//! Then connect with any TLS client (in another terminal):
//! ```bash
//! openssl s_client -connect 127.0.0.1:8443
//! ```

use std::sync::{Arc, Weak};
use tls_bridge::pool::TokioPool;
use tls_bridge::transport::{Identity, TcpTransport, TlsBridge, TlsConfig, Transport};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .init();

    let identity = Identity::self_signed(["localhost", "127.0.0.1"])?;
    let pool = Arc::new(TokioPool::current()?);
    let listener = TcpTransport::bind("127.0.0.1:8443").await?;
    info!("Echo server listening on {}", listener.local_addr()?);

    // Accept connections one at a time
    loop {
        let (tcp, peer) = TcpTransport::accept(&listener).await?;
        let bridge = TlsBridge::builder(tcp)
            .config(TlsConfig::new().with_identity(identity.clone()))
            .pool(pool.clone())
            .on_state_change(move |state| info!(%peer, %state, "Connection state"))
            .build()?;

        let echo: Weak<TlsBridge> = Arc::downgrade(&bridge);
        bridge.on_recv(Some(Arc::new(move |message| {
            let Some(bridge) = echo.upgrade() else { return };
            match message {
                Some(data) => {
                    if let Err(e) = bridge.send(data) {
                        info!(error = %e, "Failed to echo");
                    }
                }
                None => info!(%peer, "Connection closed"),
            }
        })));
        bridge.start()?;

        // Keep the bridge alive until the session ends.
        tokio::spawn(async move {
            while !bridge.state().is_terminal() {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        });
    }
}
