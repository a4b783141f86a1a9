//! # ldaps-directory
//!
//! Directory session over one authenticated connection: bind, add, modify, rename, delete and
//! search with a scoped result cursor, plus the operation script that runs them in sequence with
//! per-step failure isolation.
//!
//! ## Modules
//!
//! - [`dn`] - Strict distinguished name parsing
//! - [`search`] - Search filters, scopes and requests
//! - [`entry`] - Attribute sets, modifications and result entries
//! - [`connection`] - Connector seam and the ldap3 implementation
//! - [`cursor`] - Search result cursor
//! - [`session`] - Directory session state machine
//! - [`script`] - Operation script runner and reference script

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod connection;
pub mod cursor;
pub mod dn;
pub mod entry;
pub mod script;
pub mod search;
pub mod session;

pub use connection::{DirectoryConnection, DirectoryConnector, EntryStream, Ldap3Connector};
pub use cursor::SearchCursor;
pub use dn::{
    AttributeValueAssertion, DistinguishedName, DistinguishedNameError, RelativeDistinguishedName,
};
pub use entry::{AttributeSet, LdapEntry, Modification, ModificationKind};
pub use script::{
    reference_script, run_directory_test_script, run_script, steps, OperationScript,
    ScriptReport, StepFuture, StepOutcome,
};
pub use search::{SearchFilter, SearchRequest, SearchScope};
pub use session::{DirectorySession, SessionState};
