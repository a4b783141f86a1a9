//! Connector seam between the session and the directory protocol library, plus the ldap3
//! implementation.

use crate::dn::DistinguishedName;
use crate::entry::{AttributeSet, LdapEntry, Modification};
use crate::search::SearchRequest;
use async_trait::async_trait;
use ldap3::controls::ManageDsaIt;
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, ResultEntry, SearchEntry,
    SearchStream,
};
use ldaps_core::{
    ConnectionParameters, DirectoryFailure, Error, ReferralPolicy, Result, TransportSelector,
};
use ldaps_transport::{TrustPolicy, TrustingTransportFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Opens connections to a directory server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Opens one unauthenticated connection described by `params`.
    async fn connect(&self, params: &ConnectionParameters) -> Result<Box<dyn DirectoryConnection>>;
}

/// One live directory connection.
///
/// Implementations report failures with the error variant of the operation (`Bind`, `Add`,
/// `Modify`, `Rename`, `Delete`, `Search`) carrying a [`DirectoryFailure`] cause.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind.
    async fn simple_bind(&mut self, principal: &str, password: &str) -> Result<()>;

    /// Creates an entry.
    async fn add(&mut self, dn: &DistinguishedName, attributes: &AttributeSet) -> Result<()>;

    /// Applies the modifications as one modify request.
    async fn modify(&mut self, dn: &DistinguishedName, modifications: &[Modification])
        -> Result<()>;

    /// Renames `dn` to `new_rdn` under `new_superior`, deleting the old RDN value.
    async fn rename(
        &mut self,
        dn: &DistinguishedName,
        new_rdn: &str,
        new_superior: &DistinguishedName,
    ) -> Result<()>;

    /// Deletes a leaf entry.
    async fn delete(&mut self, dn: &DistinguishedName) -> Result<()>;

    /// Starts a search and returns its result stream.
    async fn search(&mut self, request: &SearchRequest) -> Result<Box<dyn EntryStream>>;

    /// Sends an unbind request and drops the connection.
    async fn unbind(&mut self) -> Result<()>;
}

/// Forward-only stream of search results.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntryStream: Send {
    /// Next entry, or `None` once the server reported the end of the search.
    async fn next_entry(&mut self) -> Result<Option<LdapEntry>>;

    /// Frees the server-side search. Abandons the operation if it is still running.
    async fn release(&mut self) -> Result<()>;
}

/// Connector backed by `ldap3`.
///
/// `TransportSelector::Trusting` routes TLS through a [`TrustingTransportFactory`];
/// `TransportSelector::Default` uses the platform trust store.
#[derive(Debug, Clone)]
pub struct Ldap3Connector {
    factory: TrustingTransportFactory,
}

impl Ldap3Connector {
    /// Creates a connector whose trusting transport uses the permissive trust policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the TLS configuration cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self {
            factory: TrustingTransportFactory::permissive()?,
        })
    }

    /// Creates a connector whose trusting transport uses `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the TLS configuration cannot be built.
    pub fn with_trust_policy(policy: Arc<dyn TrustPolicy>) -> Result<Self> {
        Ok(Self {
            factory: TrustingTransportFactory::new(policy)?,
        })
    }

    fn settings(&self, params: &ConnectionParameters) -> LdapConnSettings {
        match params.transport {
            TransportSelector::Trusting => self
                .factory
                .clone()
                .with_connect_timeout(params.connect_timeout())
                .ldap_settings(),
            TransportSelector::Default => {
                LdapConnSettings::new().set_conn_timeout(params.connect_timeout())
            }
        }
    }
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(&self, params: &ConnectionParameters) -> Result<Box<dyn DirectoryConnection>> {
        let target = format!("{}:{}", params.host()?, params.port()?);
        debug!(
            target = %target,
            transport = %params.transport,
            referral = %params.referral,
            "opening directory connection"
        );

        let (conn, ldap) = LdapConnAsync::with_settings(self.settings(params), &params.url)
            .await
            .map_err(|err| Error::Transport {
                target,
                message: err.to_string(),
            })?;
        ldap3::drive!(conn);

        Ok(Box::new(Ldap3Connection {
            ldap,
            referral: params.referral,
            operation_timeout: params.operation_timeout(),
        }))
    }
}

struct Ldap3Connection {
    ldap: Ldap,
    referral: ReferralPolicy,
    operation_timeout: Duration,
}

impl Ldap3Connection {
    /// Handle for the next request, with the timeout and referral control applied.
    fn request(&mut self) -> &mut Ldap {
        let ldap = self.ldap.with_timeout(self.operation_timeout);
        if let Some(control) = referral_control(self.referral) {
            ldap.with_controls(control);
        }
        ldap
    }
}

/// `ManageDsaIt` makes the server return referral objects as plain entries instead of
/// referrals, which is how `Ignore` is expressed on the wire.
fn referral_control(policy: ReferralPolicy) -> Option<ManageDsaIt> {
    match policy {
        ReferralPolicy::Ignore => Some(ManageDsaIt),
        ReferralPolicy::Follow => None,
    }
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn simple_bind(&mut self, principal: &str, password: &str) -> Result<()> {
        // Controls are not attached to bind requests.
        let result = self
            .ldap
            .with_timeout(self.operation_timeout)
            .simple_bind(principal, password)
            .await;
        check(result).map_err(|cause| Error::Bind {
            principal: principal.to_string(),
            cause,
        })
    }

    async fn add(&mut self, dn: &DistinguishedName, attributes: &AttributeSet) -> Result<()> {
        let result = self.request().add(dn.as_str(), attributes.to_ldap()).await;
        check(result).map_err(|cause| Error::Add {
            dn: dn.to_string(),
            cause,
        })
    }

    async fn modify(
        &mut self,
        dn: &DistinguishedName,
        modifications: &[Modification],
    ) -> Result<()> {
        let mods = modifications
            .iter()
            .map(Modification::to_ldap)
            .collect::<Vec<_>>();
        let result = self.request().modify(dn.as_str(), mods).await;
        check(result).map_err(|cause| Error::Modify {
            dn: dn.to_string(),
            cause,
        })
    }

    async fn rename(
        &mut self,
        dn: &DistinguishedName,
        new_rdn: &str,
        new_superior: &DistinguishedName,
    ) -> Result<()> {
        let result = self
            .request()
            .modifydn(dn.as_str(), new_rdn, true, Some(new_superior.as_str()))
            .await;
        check(result).map_err(|cause| Error::Rename {
            from: dn.to_string(),
            to: format!("{new_rdn},{new_superior}"),
            cause,
        })
    }

    async fn delete(&mut self, dn: &DistinguishedName) -> Result<()> {
        let result = self.request().delete(dn.as_str()).await;
        check(result).map_err(|cause| Error::Delete {
            dn: dn.to_string(),
            cause,
        })
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<Box<dyn EntryStream>> {
        let base = request.base().to_string();
        let stream = self
            .request()
            .streaming_search(
                request.base().as_str(),
                request.scope().into(),
                request.filter().as_str(),
                request.attributes().to_vec(),
            )
            .await
            .map_err(|err| Error::Search {
                base: base.clone(),
                cause: failure(err),
            })?;

        Ok(Box::new(Ldap3EntryStream {
            stream: Some(stream),
            base,
        }))
    }

    async fn unbind(&mut self) -> Result<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|err| Error::Transport {
                target: "directory connection".to_string(),
                message: err.to_string(),
            })
    }
}

struct Ldap3EntryStream {
    /// `None` once the search finished or was released.
    stream: Option<SearchStream<'static, String, Vec<String>>>,
    base: String,
}

/// One message read off a search stream.
#[derive(Debug)]
enum SearchItem {
    Entry(LdapEntry),
    Reference(Vec<String>),
}

fn classify(entry: ResultEntry) -> SearchItem {
    if entry.is_ref() {
        SearchItem::Reference(ldap3::parse_refs(entry.0))
    } else {
        SearchItem::Entry(SearchEntry::construct(entry).into())
    }
}

fn search_error(base: &str, cause: DirectoryFailure) -> Error {
    Error::Search {
        base: base.to_string(),
        cause,
    }
}

/// Maps the final result of a drained search.
fn search_done(base: &str, result: LdapResult) -> Result<()> {
    check(Ok(result)).map_err(|cause| search_error(base, cause))
}

#[async_trait]
impl EntryStream for Ldap3EntryStream {
    async fn next_entry(&mut self) -> Result<Option<LdapEntry>> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            let next = stream
                .next()
                .await
                .map_err(|err| search_error(&self.base, failure(err)))?;
            match next.map(classify) {
                Some(SearchItem::Reference(referrals)) => {
                    info!(base = %self.base, ?referrals, "skipping search continuation reference");
                }
                Some(SearchItem::Entry(entry)) => return Ok(Some(entry)),
                None => {
                    let result = stream.finish().await;
                    self.stream = None;
                    return search_done(&self.base, result).map(|()| None);
                }
            }
        }
    }

    async fn release(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        let msgid = stream.ldap_handle().last_id();
        let result = stream.finish().await;
        debug!(
            base = %self.base,
            rc = result.rc,
            text = %result.text,
            "search stopped before abandon"
        );
        stream
            .ldap_handle()
            .abandon(msgid)
            .await
            .map_err(|err| search_error(&self.base, failure(err)))
    }
}

fn failure(err: LdapError) -> DirectoryFailure {
    match err {
        LdapError::LdapResult { result } => DirectoryFailure::server(result.rc, result.text),
        other => DirectoryFailure::connection(other.to_string()),
    }
}

fn check(
    result: std::result::Result<LdapResult, LdapError>,
) -> std::result::Result<(), DirectoryFailure> {
    let result = result.map_err(failure)?;
    if result.rc == 0 {
        Ok(())
    } else {
        Err(DirectoryFailure::server(result.rc, result.text))
    }
}
