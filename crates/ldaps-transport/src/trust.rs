//! Certificate trust policies.
//!
//! A [`TrustPolicy`] decides whether a presented certificate chain is acceptable. The transport
//! factory never validates certificates itself; it always asks the policy it was built with.

use ldaps_core::{Error, Result};
use rustls::client::danger::ServerCertVerifier;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Authentication type reported when the TLS stack does not expose the key-exchange algorithm
/// at verification time.
pub const UNSPECIFIED_AUTH_TYPE: &str = "UNKNOWN";

/// Outcome of validating a certificate chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    /// The chain is trusted.
    Accept,
    /// The chain is not trusted, with a human-readable reason.
    Reject(String),
}

impl TrustDecision {
    /// Returns true for [`TrustDecision::Accept`].
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// A certificate chain presented by a peer.
#[derive(Debug, Clone, Copy)]
pub struct CertificateChain<'a> {
    /// Leaf certificate.
    pub end_entity: &'a CertificateDer<'a>,
    /// Intermediate certificates, leaf-side first.
    pub intermediates: &'a [CertificateDer<'a>],
    /// Name the client expects the server to prove (absent for client chains).
    pub server_name: Option<&'a ServerName<'a>>,
    /// Verification time.
    pub now: UnixTime,
}

/// Capability that decides which certificate chains are trusted.
///
/// Implementations are constructed once per transport factory and reused for every connection
/// it creates, so they must be cheap to call and thread-safe.
pub trait TrustPolicy: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Validates a chain presented by a client.
    fn validate_client_chain(&self, chain: &CertificateChain<'_>, auth_type: &str) -> TrustDecision;

    /// Validates a chain presented by a server.
    fn validate_server_chain(&self, chain: &CertificateChain<'_>, auth_type: &str) -> TrustDecision;

    /// Certificate authorities this policy trusts, or `None` when unknown/unconstrained.
    fn accepted_issuers(&self) -> Option<Vec<CertificateDer<'static>>>;
}

/// Trust policy that accepts every certificate chain.
///
/// Intended for test environments with self-signed directory servers. Never use it where the
/// identity of the server matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveTrustPolicy;

impl PermissiveTrustPolicy {
    /// Creates the permissive policy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TrustPolicy for PermissiveTrustPolicy {
    fn name(&self) -> &'static str {
        "permissive"
    }

    fn validate_client_chain(&self, _: &CertificateChain<'_>, _: &str) -> TrustDecision {
        TrustDecision::Accept
    }

    fn validate_server_chain(&self, _: &CertificateChain<'_>, _: &str) -> TrustDecision {
        TrustDecision::Accept
    }

    fn accepted_issuers(&self) -> Option<Vec<CertificateDer<'static>>> {
        None
    }
}

/// Strict trust policy backed by webpki path validation against a fixed set of anchors.
#[derive(Debug)]
pub struct RootStoreTrustPolicy {
    anchors: Vec<CertificateDer<'static>>,
    server_verifier: Arc<WebPkiServerVerifier>,
    client_verifier: Arc<dyn ClientCertVerifier>,
}

impl RootStoreTrustPolicy {
    /// Builds a policy trusting exactly the given anchor certificates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no anchor is given or an anchor cannot be parsed.
    pub fn with_anchors(anchors: Vec<CertificateDer<'static>>) -> Result<Self> {
        if anchors.is_empty() {
            return Err(Error::Config(
                "strict trust policy needs at least one CA certificate".to_string(),
            ));
        }

        let mut store = RootCertStore::empty();
        for anchor in &anchors {
            store
                .add(anchor.clone())
                .map_err(|err| Error::Config(format!("invalid CA certificate: {err}")))?;
        }
        let store = Arc::new(store);
        let provider = default_provider();

        let server_verifier =
            WebPkiServerVerifier::builder_with_provider(store.clone(), provider.clone())
                .build()
                .map_err(|err| Error::Config(format!("failed to build server verifier: {err}")))?;
        let client_verifier = WebPkiClientVerifier::builder_with_provider(store, provider)
            .build()
            .map_err(|err| Error::Config(format!("failed to build client verifier: {err}")))?;

        Ok(Self {
            anchors,
            server_verifier,
            client_verifier,
        })
    }

    /// Builds a policy from PEM-encoded CA certificates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the PEM data holds no valid certificate.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let anchors = CertificateDer::pem_slice_iter(pem)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| Error::Config(format!("invalid CA certificate PEM: {err}")))?;
        Self::with_anchors(anchors)
    }

    /// Builds a policy from a PEM file of CA certificates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or holds no valid certificate.
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = fs::read(path).map_err(|err| {
            Error::Config(format!(
                "failed to read CA certificate {}: {err}",
                path.display()
            ))
        })?;
        Self::from_pem(&pem)
    }
}

impl TrustPolicy for RootStoreTrustPolicy {
    fn name(&self) -> &'static str {
        "root-store"
    }

    fn validate_client_chain(&self, chain: &CertificateChain<'_>, _: &str) -> TrustDecision {
        match self
            .client_verifier
            .verify_client_cert(chain.end_entity, chain.intermediates, chain.now)
        {
            Ok(_) => TrustDecision::Accept,
            Err(err) => TrustDecision::Reject(err.to_string()),
        }
    }

    fn validate_server_chain(&self, chain: &CertificateChain<'_>, _: &str) -> TrustDecision {
        let Some(server_name) = chain.server_name else {
            return TrustDecision::Reject("server name required for validation".to_string());
        };
        match self.server_verifier.verify_server_cert(
            chain.end_entity,
            chain.intermediates,
            server_name,
            &[],
            chain.now,
        ) {
            Ok(_) => TrustDecision::Accept,
            Err(err) => TrustDecision::Reject(err.to_string()),
        }
    }

    fn accepted_issuers(&self) -> Option<Vec<CertificateDer<'static>>> {
        Some(self.anchors.clone())
    }
}

pub(crate) fn default_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}
