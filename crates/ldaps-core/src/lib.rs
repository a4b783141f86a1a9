//! # ldaps-core
//!
//! Core types shared by the LDAPS directory probe crates.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy for transports and directory operations
//! - [`config`] - Connection parameters, referral/transport selectors and script configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{
    ConnectionParameters, ReferralPolicy, ScriptConfig, ScriptFixture, TransportSelector,
};
pub use error::{DirectoryFailure, Error, Result};
