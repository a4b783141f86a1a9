//! Trusting transport factory.
//!
//! Directory-protocol libraries accept a socket-factory shaped hook rather than a trust store, so
//! this module exposes factory operations (`create_socket`, `upgrade_socket`, cipher-suite
//! queries) and an [`LdapConnSettings`] bridge for ldap3. Certificate decisions are made by the
//! injected [`TrustPolicy`].

use crate::trust::{default_provider, PermissiveTrustPolicy, TrustPolicy};
use crate::verifier::PolicyVerifier;
use ldap3::LdapConnSettings;
use ldaps_core::{Error, Result};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConfig;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Default connect/handshake timeout (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Produces TLS connections whose certificate validation is delegated to a [`TrustPolicy`].
///
/// One rustls client configuration is built per factory and shared by every connection.
#[derive(Debug, Clone)]
pub struct TrustingTransportFactory {
    policy: Arc<dyn TrustPolicy>,
    provider: Arc<CryptoProvider>,
    config: Arc<ClientConfig>,
    connect_timeout: Duration,
}

impl TrustingTransportFactory {
    /// Creates a factory using `policy` for every certificate decision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the TLS client configuration cannot be built.
    pub fn new(policy: Arc<dyn TrustPolicy>) -> Result<Self> {
        let provider = default_provider();
        let verifier = Arc::new(PolicyVerifier::new(policy.clone(), provider.clone()));
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|err| Error::Config(format!("failed to construct TLS config: {err}")))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        debug!(
            policy = policy.name(),
            accepted_issuers = ?policy.accepted_issuers().map(|issuers| issuers.len()),
            "transport factory created"
        );

        Ok(Self {
            policy,
            provider,
            config: Arc::new(config),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        })
    }

    /// Creates a factory with the [`PermissiveTrustPolicy`]: every certificate is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the TLS client configuration cannot be built.
    pub fn permissive() -> Result<Self> {
        warn!("certificate validation bypassed: transport factory uses the permissive trust policy");
        Self::new(Arc::new(PermissiveTrustPolicy::new()))
    }

    /// Overrides the connect/handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the trust policy.
    #[must_use]
    pub fn policy(&self) -> &Arc<dyn TrustPolicy> {
        &self.policy
    }

    /// Returns the shared TLS client configuration.
    #[must_use]
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    /// Returns the connect/handshake timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connects to `host:port` and performs the TLS handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the connection or handshake fails or times out. Failures
    /// are never retried.
    pub async fn create_socket(&self, host: &str, port: u16) -> Result<EncryptedSocket> {
        let target = format!("{host}:{port}");
        let socket = timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| transport_error(&target, self.timed_out()))?
            .map_err(|err| transport_error(&target, err))?;
        self.handshake(socket, host, target, true).await
    }

    /// Upgrades an already-connected plain socket to TLS in place.
    ///
    /// With `autoclose` set, shutting the encrypted layer down also closes `socket`; otherwise
    /// [`EncryptedSocket::shutdown`] hands the plain socket back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the handshake fails or times out.
    pub async fn upgrade_socket(
        &self,
        socket: TcpStream,
        host: &str,
        port: u16,
        autoclose: bool,
    ) -> Result<EncryptedSocket> {
        self.handshake(socket, host, format!("{host}:{port}"), autoclose)
            .await
    }

    /// Names of every cipher suite the crypto backend supports.
    #[must_use]
    pub fn supported_cipher_suites(&self) -> Vec<String> {
        rustls::crypto::ring::ALL_CIPHER_SUITES
            .iter()
            .map(|suite| format!("{:?}", suite.suite()))
            .collect()
    }

    /// Names of the cipher suites enabled for connections from this factory.
    #[must_use]
    pub fn default_cipher_suites(&self) -> Vec<String> {
        self.provider
            .cipher_suites
            .iter()
            .map(|suite| format!("{:?}", suite.suite()))
            .collect()
    }

    /// ldap3 connection settings that open `ldaps://` connections through this factory.
    #[must_use]
    pub fn ldap_settings(&self) -> LdapConnSettings {
        LdapConnSettings::new()
            .set_conn_timeout(self.connect_timeout)
            .set_config(self.client_config())
    }

    async fn handshake(
        &self,
        socket: TcpStream,
        host: &str,
        target: String,
        autoclose: bool,
    ) -> Result<EncryptedSocket> {
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|err| transport_error(&target, err))?;
        let connector = TlsConnector::from(self.client_config());
        let stream = timeout(self.connect_timeout, connector.connect(server_name, socket))
            .await
            .map_err(|_| transport_error(&target, self.timed_out()))?
            .map_err(|err| transport_error(&target, err))?;

        debug!(
            target = %target,
            policy = self.policy.name(),
            cipher_suite = ?stream.get_ref().1.negotiated_cipher_suite().map(|s| s.suite()),
            "TLS handshake complete"
        );

        Ok(EncryptedSocket {
            stream,
            autoclose,
            target,
        })
    }

    fn timed_out(&self) -> String {
        format!("timed out after {}s", self.connect_timeout.as_secs())
    }
}

fn transport_error(target: &str, cause: impl ToString) -> Error {
    Error::Transport {
        target: target.to_string(),
        message: cause.to_string(),
    }
}

/// TLS connection produced by [`TrustingTransportFactory`].
#[derive(Debug)]
pub struct EncryptedSocket {
    stream: TlsStream<TcpStream>,
    autoclose: bool,
    target: String,
}

impl EncryptedSocket {
    /// `host:port` this socket is connected to.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether closing the encrypted layer also closes the underlying socket.
    #[must_use]
    pub const fn autoclose(&self) -> bool {
        self.autoclose
    }

    /// Certificates presented by the server.
    #[must_use]
    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.stream.get_ref().1.peer_certificates()
    }

    /// Sends `close_notify` and closes the encrypted layer.
    ///
    /// Returns the plain socket when the socket was created without `autoclose`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if flushing the alert or closing the socket fails.
    pub async fn shutdown(self) -> Result<Option<TcpStream>> {
        let Self {
            mut stream,
            autoclose,
            target,
        } = self;

        stream.get_mut().1.send_close_notify();
        stream
            .flush()
            .await
            .map_err(|err| transport_error(&target, err))?;

        let (mut socket, _) = stream.into_inner();
        if autoclose {
            socket
                .shutdown()
                .await
                .map_err(|err| transport_error(&target, err))?;
            Ok(None)
        } else {
            Ok(Some(socket))
        }
    }
}

impl AsyncRead for EncryptedSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for EncryptedSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
