//! Connection parameters and operation-script configuration.
//!
//! Values here are immutable once constructed and supplied once per session. Loading them from
//! the environment is the job of the hosting binary; this module only describes and validates.

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use validator::{Validate, ValidationError};

/// Default port for `ldaps://` URLs.
pub const LDAPS_DEFAULT_PORT: u16 = 636;
/// Default port for `ldap://` URLs.
pub const LDAP_DEFAULT_PORT: u16 = 389;

/// How the client treats referrals returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralPolicy {
    /// Operate on referral objects themselves (ManageDsaIT) instead of receiving referrals.
    #[default]
    Ignore,
    /// Accept referrals from the server; they are surfaced to the log but not chased.
    Follow,
}

impl ReferralPolicy {
    /// Returns the selector string for this policy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Follow => "follow",
        }
    }
}

impl fmt::Display for ReferralPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferralPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "follow" => Ok(Self::Follow),
            other => Err(Error::Config(format!(
                "unknown referral policy `{other}` (expected `ignore` or `follow`)"
            ))),
        }
    }
}

/// Selects which transport factory opens the encrypted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportSelector {
    /// Platform trust store with standard certificate validation.
    #[default]
    Default,
    /// Trusting transport factory: certificate validation is delegated to a permissive
    /// trust policy and effectively bypassed.
    Trusting,
}

impl TransportSelector {
    /// Returns the selector string for this transport.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Trusting => "trusting",
        }
    }
}

impl fmt::Display for TransportSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "system" => Ok(Self::Default),
            "trusting" | "permissive" => Ok(Self::Trusting),
            other => Err(Error::Config(format!(
                "unknown transport selector `{other}` (expected `default` or `trusting`)"
            ))),
        }
    }
}

/// Parameters for one directory session.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ConnectionParameters {
    /// Server URI (`ldaps://host:port` or `ldap://host:port`)
    #[validate(custom(function = "validate_directory_url"))]
    pub url: String,

    /// Bind principal (distinguished name or `user@REALM` principal string)
    #[validate(length(min = 1))]
    pub principal: String,

    /// Bind credential
    #[serde(skip_serializing)]
    pub credential: SecretString,

    /// Referral handling
    #[serde(default)]
    pub referral: ReferralPolicy,

    /// Transport factory selector
    #[serde(default)]
    pub transport: TransportSelector,

    /// Connect (TCP + TLS handshake) timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Per-operation timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_operation_timeout_secs() -> u64 {
    30
}

fn validate_directory_url(value: &str) -> std::result::Result<(), ValidationError> {
    let url = Url::parse(value).map_err(|_| ValidationError::new("url"))?;
    if !matches!(url.scheme(), "ldap" | "ldaps") {
        return Err(ValidationError::new("scheme"));
    }
    if url.host_str().is_none() {
        return Err(ValidationError::new("host"));
    }
    Ok(())
}

impl ConnectionParameters {
    /// Creates validated connection parameters.
    ///
    /// # Arguments
    ///
    /// * `url` - The directory URI, e.g. `ldaps://ad2016:636`
    /// * `principal` - The bind principal
    /// * `credential` - The bind secret
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is not an `ldap`/`ldaps` URL with a host, or the
    /// principal is empty.
    pub fn new(
        url: impl Into<String>,
        principal: impl Into<String>,
        credential: impl Into<String>,
    ) -> Result<Self> {
        let params = Self {
            url: url.into(),
            principal: principal.into(),
            credential: SecretString::from(credential.into()),
            referral: ReferralPolicy::default(),
            transport: TransportSelector::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        };
        params.ensure_valid()?;
        Ok(params)
    }

    /// Re-runs validation, e.g. after deserializing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing every invalid field.
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::Config(format!("invalid connection parameters: {e}")))
    }

    /// Sets the referral policy.
    #[must_use]
    pub const fn with_referral(mut self, referral: ReferralPolicy) -> Self {
        self.referral = referral;
        self
    }

    /// Sets the transport factory selector.
    #[must_use]
    pub const fn with_transport(mut self, transport: TransportSelector) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the connect timeout in seconds.
    #[must_use]
    pub const fn with_connect_timeout_secs(mut self, seconds: u64) -> Self {
        self.connect_timeout_secs = seconds;
        self
    }

    /// Sets the per-operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Get the connect timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get the operation timeout as a Duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Get the bind password.
    #[must_use]
    pub fn bind_password(&self) -> &str {
        self.credential.expose_secret()
    }

    /// Parse the directory URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn parse_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.url)?)
    }

    /// Returns true for `ldaps://` URLs.
    #[must_use]
    pub fn is_ldaps(&self) -> bool {
        self.url.trim_start().to_ascii_lowercase().starts_with("ldaps://")
    }

    /// Host component of the URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is unparsable or has no host.
    pub fn host(&self) -> Result<String> {
        self.parse_url()?
            .host_str()
            .map(str::to_owned)
            .ok_or_else(|| Error::Config(format!("directory URL `{}` has no host", self.url)))
    }

    /// Port component of the URL, falling back to the scheme's well-known port.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is unparsable.
    pub fn port(&self) -> Result<u16> {
        let url = self.parse_url()?;
        Ok(url.port().unwrap_or(if url.scheme() == "ldaps" {
            LDAPS_DEFAULT_PORT
        } else {
            LDAP_DEFAULT_PORT
        }))
    }
}

impl Clone for ConnectionParameters {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            principal: self.principal.clone(),
            credential: SecretString::from(self.bind_password().to_owned()),
            referral: self.referral,
            transport: self.transport,
            connect_timeout_secs: self.connect_timeout_secs,
            operation_timeout_secs: self.operation_timeout_secs,
        }
    }
}

/// Distinguished names, filters and payloads used by the reference operation script.
///
/// The defaults reproduce the reference scenario against an Active Directory test domain
/// `dc=example2,dc=com`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFixture {
    /// Entry created, modified, renamed and deleted by the script
    pub entry_dn: String,
    /// Attributes of the created entry, in insertion order
    pub entry_attributes: Vec<(String, Vec<String>)>,
    /// Search base that does not exist on the server
    pub missing_search_base: String,
    /// Filter used against the missing base
    pub missing_search_filter: String,
    /// Search base that exists
    pub search_base: String,
    /// Filter used against the valid base
    pub search_filter: String,
    /// Attributes requested by both searches
    pub search_attributes: Vec<String>,
    /// Attribute touched by the three modifications
    pub modify_attribute: String,
    /// Value added by the first modification
    pub added_value: String,
    /// Value that replaces it, and is then removed
    pub replacement_value: String,
    /// Rename target whose parent does not exist
    pub unreachable_rename_dn: String,
    /// Rename target under an existing parent
    pub rename_dn: String,
}

impl Default for ScriptFixture {
    fn default() -> Self {
        let disjunction = "(|(!(uid=nosuchuser))(sn:dn:2.16.840.1.113730.3.3.2.7.1:=passin)\
            (createTimestamp>=20070101000000Z)(createTimestamp<=21000101000000Z)\
            (cn=u*)(cn=*u)(cn=*u*)(cn=u*s*)(cn~=ser))";
        Self {
            entry_dn: "cn=tempuser,cn=users,dc=example2,dc=com".to_string(),
            entry_attributes: vec![
                ("samaccountname".to_string(), vec!["tempuser".to_string()]),
                ("objectClass".to_string(), vec!["user".to_string()]),
            ],
            missing_search_base: "dc=redhat,dc=com".to_string(),
            missing_search_filter: format!("(&(uid=*){disjunction})"),
            search_base: "dc=example2,dc=com".to_string(),
            search_filter: format!("(&(samaccountname=*){disjunction})"),
            search_attributes: [
                "entrydn",
                "uid",
                "objectClass",
                "givenName",
                "sn",
                "memberOf",
                "title",
                "createtimestamp",
                "uidNumber",
                "cn",
                "samaccountname",
                "member",
                "pwdLastSet",
            ]
            .iter()
            .map(|attr| (*attr).to_string())
            .collect(),
            modify_attribute: "sn".to_string(),
            added_value: "sv".to_string(),
            replacement_value: "sv_replaced".to_string(),
            unreachable_rename_dn: "cn=new_tempuser,cn=users,dc=WRONG,dc=com".to_string(),
            rename_dn: "cn=new_tempuser,cn=users,dc=example2,dc=com".to_string(),
        }
    }
}

/// Configuration for one run of the operation script.
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    bind_candidates: Vec<ConnectionParameters>,
    fixture: ScriptFixture,
}

impl ScriptConfig {
    /// Creates a script configuration.
    ///
    /// `bind_candidates` are tried in order until one bind succeeds; earlier candidates may be
    /// deliberately invalid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no candidate is given or any candidate is invalid.
    pub fn new(bind_candidates: Vec<ConnectionParameters>) -> Result<Self> {
        if bind_candidates.is_empty() {
            return Err(Error::Config(
                "operation script needs at least one bind candidate".to_string(),
            ));
        }
        for candidate in &bind_candidates {
            candidate.ensure_valid()?;
        }
        Ok(Self {
            bind_candidates,
            fixture: ScriptFixture::default(),
        })
    }

    /// Overrides the script fixture.
    #[must_use]
    pub fn with_fixture(mut self, fixture: ScriptFixture) -> Self {
        self.fixture = fixture;
        self
    }

    /// Bind candidates in attempt order.
    #[must_use]
    pub fn bind_candidates(&self) -> &[ConnectionParameters] {
        &self.bind_candidates
    }

    /// The script fixture.
    #[must_use]
    pub const fn fixture(&self) -> &ScriptFixture {
        &self.fixture
    }
}
