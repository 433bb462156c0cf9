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

//! TLS configuration for the bridge.
//!
//! [`TlsConfig`] collects everything a bridge needs to open a crypto
//! session: the backend adapter, the optional host name (SNI and certificate
//! verification), the local [`Identity`] and how peer certificates are
//! trusted. Nothing is validated until a bridge is built from it.
//!
//! All sessions use the `ring` provider with TLS 1.3 and TLS 1.2. Legacy
//! protocol versions and RC4 are never offered.

use crate::transport::TransportError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Protocol versions offered by every session, most preferred first.
static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Selects the crypto backend adapter a bridge drives.
///
/// All three speak the same protocol and interoperate with each other; they
/// differ in how ciphertext moves between the backend and the bridge.
///
/// | Backend | I/O style | Handshake started by |
/// |---------|-----------|----------------------|
/// | `Buffered` | the bridge copies bytes into and out of the backend | `start` |
/// | `Stream` | the backend pulls and pushes through callbacks | the first receive task |
/// | `Unbuffered` | caller-owned buffers, state driven by the bridge | `start` |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Backend {
    /// `rustls::Connection` fed through `read_tls`/`write_tls`.
    #[default]
    Buffered,
    /// `rustls::Stream` over callback-backed `Read`/`Write`.
    Stream,
    /// The `rustls::unbuffered` state machine.
    Unbuffered,
}

impl Backend {
    /// Returns the string name of this backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Buffered => "buffered",
            Backend::Stream => "stream",
            Backend::Unbuffered => "unbuffered",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the client verifies the server's certificate.
#[derive(Clone)]
enum Trust {
    /// Process-wide store loaded from the platform.
    SystemRoots,
    /// Caller-supplied anchors.
    Roots(Arc<RootCertStore>),
    /// No verification at all.
    AcceptAny,
}

/// A certificate chain and its private key.
///
/// Servers always need one; clients only for mutual authentication.
pub struct Identity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Identity {
    /// Creates an identity from DER-encoded parts.
    pub fn new(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { chain, key }
    }

    /// Parses a PEM-encoded certificate chain and private key.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfiguration`] if either input is
    /// malformed or holds no certificate or key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TransportError> {
        let chain = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(format!("unreadable certificate PEM: {e}")))?;
        if chain.is_empty() {
            return Err(invalid("no certificate found in PEM input"));
        }

        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| invalid(format!("unreadable private key PEM: {e}")))?
            .ok_or_else(|| invalid("no private key found in PEM input"))?;

        Ok(Self { chain, key })
    }

    /// Generates a throwaway self-signed identity for the given names.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tls_bridge::transport::Identity;
    ///
    /// let identity = Identity::self_signed(["localhost"]).unwrap();
    /// assert_eq!(identity.chain().len(), 1);
    /// ```
    pub fn self_signed<I, S>(names: I) -> Result<Self, TransportError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(names)
            .map_err(|e| invalid(format!("certificate generation failed: {e}")))?;

        Ok(Self {
            chain: vec![cert.der().clone()],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        })
    }

    /// Returns the certificate chain, leaf first.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Returns the leaf certificate.
    pub fn certificate(&self) -> Option<&CertificateDer<'static>> {
        self.chain.first()
    }

    /// Returns a root store trusting exactly this identity's leaf certificate.
    ///
    /// Handy for pairing a client with a self-signed server in tests.
    pub fn trust_store(&self) -> Result<RootCertStore, TransportError> {
        let mut roots = RootCertStore::empty();
        let leaf = self
            .certificate()
            .ok_or_else(|| invalid("identity has no certificate"))?;
        roots.add(leaf.clone())?;
        Ok(roots)
    }
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// TLS configuration for a bridge.
///
/// # Examples
///
/// ```rust
/// use tls_bridge::transport::{Backend, Identity, TlsConfig};
///
/// let identity = Identity::self_signed(["localhost"]).unwrap();
///
/// let server = TlsConfig::new()
///     .with_identity(identity.clone())
///     .with_backend(Backend::Unbuffered);
///
/// let client = TlsConfig::new()
///     .with_host("localhost")
///     .with_root_certificates(identity.trust_store().unwrap());
/// # let _ = (server, client);
/// ```
#[derive(Clone)]
pub struct TlsConfig {
    backend: Backend,
    host: Option<String>,
    identity: Option<Identity>,
    trust: Trust,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsConfig {
    /// Creates a configuration using the default backend and system roots.
    pub fn new() -> Self {
        Self {
            backend: Backend::default(),
            host: None,
            identity: None,
            trust: Trust::SystemRoots,
        }
    }

    /// Sets the remote host name.
    ///
    /// A client sends it as SNI and verifies the server certificate against
    /// it. Without one, name verification only passes with
    /// [`danger_accept_invalid_certificates`](Self::danger_accept_invalid_certificates).
    /// Servers ignore it.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the local certificate chain and key.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Selects the crypto backend adapter.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Verifies server certificates against `roots` instead of the system store.
    pub fn with_root_certificates(mut self, roots: RootCertStore) -> Self {
        self.trust = Trust::Roots(Arc::new(roots));
        self
    }

    /// Disables server certificate verification.
    ///
    /// **WARNING**: Only for testing or development. Never use in production!
    pub fn danger_accept_invalid_certificates(mut self) -> Self {
        self.trust = Trust::AcceptAny;
        self
    }

    /// Returns the selected backend.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Returns the configured host name.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Builds the rustls client configuration.
    pub(crate) fn client_config(&self) -> Result<Arc<ClientConfig>, TransportError> {
        let provider = provider();
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(PROTOCOL_VERSIONS)?;

        let builder = match &self.trust {
            Trust::SystemRoots => builder.with_root_certificates(default_root_store()),
            Trust::Roots(roots) => builder.with_root_certificates(Arc::clone(roots)),
            Trust::AcceptAny => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier::new(provider))),
        };

        let config = match &self.identity {
            Some(identity) => {
                builder.with_client_auth_cert(identity.chain.clone(), identity.key.clone_key())?
            }
            None => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }

    /// Builds the rustls server configuration.
    pub(crate) fn server_config(&self) -> Result<Arc<ServerConfig>, TransportError> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| invalid("server role requires an identity"))?;

        let config = ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(PROTOCOL_VERSIONS)?
            .with_no_client_auth()
            .with_single_cert(identity.chain.clone(), identity.key.clone_key())?;
        Ok(Arc::new(config))
    }

    /// Resolves the name the client presents and verifies against.
    ///
    /// Without a host the client sends no SNI; a placeholder IP name keeps
    /// rustls from emitting the extension.
    pub(crate) fn server_name(&self) -> Result<ServerName<'static>, TransportError> {
        match &self.host {
            Some(host) => ServerName::try_from(host.clone())
                .map_err(|e| invalid(format!("invalid host name {host:?}: {e}"))),
            None => ServerName::try_from("0.0.0.0")
                .map_err(|e| invalid(format!("invalid placeholder name: {e}"))),
        }
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let trust = match &self.trust {
            Trust::SystemRoots => "system",
            Trust::Roots(_) => "custom",
            Trust::AcceptAny => "none",
        };
        f.debug_struct("TlsConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("identity", &self.identity)
            .field("trust", &trust)
            .finish()
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn invalid(reason: impl Into<String>) -> TransportError {
    TransportError::InvalidConfiguration {
        reason: reason.into(),
    }
}

/// Returns the process-wide root store loaded from the platform.
///
/// Loaded once on first use. If the platform store cannot be read the store
/// stays empty and every verification against it fails.
pub fn default_root_store() -> Arc<RootCertStore> {
    static DEFAULT_ROOTS: OnceLock<Arc<RootCertStore>> = OnceLock::new();

    Arc::clone(DEFAULT_ROOTS.get_or_init(|| {
        let mut roots = RootCertStore::empty();
        match rustls_native_certs::load_native_certs() {
            Ok(certs) => {
                let (added, ignored) = roots.add_parsable_certificates(certs);
                debug!(added, ignored, "Loaded system root certificates");
            }
            Err(e) => warn!(error = %e, "System root certificates unavailable"),
        }
        Arc::new(roots)
    }))
}

/// Certificate verifier that accepts anything.
#[derive(Debug)]
struct NoVerifier {
    provider: Arc<CryptoProvider>,
}

impl NoVerifier {
    fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
