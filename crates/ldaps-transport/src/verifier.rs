//! rustls adapter that routes certificate validation through a [`TrustPolicy`].

use crate::trust::{CertificateChain, TrustDecision, TrustPolicy, UNSPECIFIED_AUTH_TYPE};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tracing::debug;

/// Server certificate verifier delegating chain trust to a [`TrustPolicy`].
///
/// Only the chain decision is delegated. Handshake signatures are still checked with the
/// crypto provider, so a peer must hold the private key of the certificate it presents.
#[derive(Debug)]
pub struct PolicyVerifier {
    policy: Arc<dyn TrustPolicy>,
    provider: Arc<CryptoProvider>,
}

impl PolicyVerifier {
    /// Creates a verifier for `policy` using `provider`'s signature algorithms.
    #[must_use]
    pub fn new(policy: Arc<dyn TrustPolicy>, provider: Arc<CryptoProvider>) -> Self {
        Self { policy, provider }
    }
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain = CertificateChain {
            end_entity,
            intermediates,
            server_name: Some(server_name),
            now,
        };
        match self
            .policy
            .validate_server_chain(&chain, UNSPECIFIED_AUTH_TYPE)
        {
            TrustDecision::Accept => {
                debug!(
                    policy = self.policy.name(),
                    server = ?server_name,
                    chain_len = intermediates.len() + 1,
                    "server certificate chain accepted"
                );
                Ok(ServerCertVerified::assertion())
            }
            TrustDecision::Reject(reason) => Err(rustls::Error::General(format!(
                "certificate rejected by {} trust policy: {reason}",
                self.policy.name()
            ))),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
