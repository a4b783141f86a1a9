//! # ldaps-transport
//!
//! TLS transport for directory connections whose certificate validation is delegated to an
//! injected trust policy.
//!
//! ## Modules
//!
//! - [`trust`] - Trust policies (permissive and root-store backed)
//! - [`verifier`] - rustls verifier adapter for a trust policy
//! - [`factory`] - Transport factory producing encrypted sockets and ldap3 settings

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod factory;
pub mod trust;
pub mod verifier;

pub use factory::{EncryptedSocket, TrustingTransportFactory, DEFAULT_CONNECT_TIMEOUT_SECS};
pub use trust::{
    CertificateChain, PermissiveTrustPolicy, RootStoreTrustPolicy, TrustDecision, TrustPolicy,
};
pub use verifier::PolicyVerifier;
