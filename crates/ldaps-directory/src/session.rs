//! Directory session: one authenticated connection and the operations issued over it.

use crate::connection::{DirectoryConnection, DirectoryConnector};
use crate::cursor::SearchCursor;
use crate::dn::DistinguishedName;
use crate::entry::{validate_modifications, AttributeSet, LdapEntry, Modification};
use crate::search::SearchRequest;
use ldaps_core::{ConnectionParameters, DirectoryFailure, Error, Result};
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Lifecycle state of a [`DirectorySession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No successful bind yet.
    Unbound,
    /// Authenticated; operations may be issued.
    Bound,
    /// Terminal state after [`DirectorySession::close`].
    Closed,
}

impl SessionState {
    /// Lowercase name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unbound => "unbound",
            Self::Bound => "bound",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns at most one live directory connection and issues operations over it in sequence.
///
/// `Unbound --bind--> Bound --close--> Closed`. A failed bind leaves the session unbound;
/// every operation other than `bind` and `close` requires the bound state.
pub struct DirectorySession {
    connector: Arc<dyn DirectoryConnector>,
    connection: Option<Box<dyn DirectoryConnection>>,
    state: SessionState,
    operation_timeout: Duration,
}

impl DirectorySession {
    /// Creates an unbound session that opens its connection through `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn DirectoryConnector>) -> Self {
        Self {
            connector,
            connection: None,
            state: SessionState::Unbound,
            operation_timeout: Duration::from_secs(30),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Opens a connection with `params` and authenticates.
    ///
    /// On failure the connection is dropped and the session stays unbound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] for rejected credentials, unreachable servers and handshake
    /// failures, and [`Error::InvalidState`] if the session is already bound or closed.
    pub async fn bind(&mut self, params: &ConnectionParameters) -> Result<()> {
        if self.state != SessionState::Unbound {
            return Err(Error::invalid_state("bind", self.state));
        }

        let principal = params.principal.clone();
        let bind_error = |cause: DirectoryFailure| Error::Bind {
            principal: principal.clone(),
            cause,
        };

        let mut connection = self.connector.connect(params).await.map_err(|err| match err {
            Error::Bind { .. } => err,
            other => bind_error(DirectoryFailure::connection(other.to_string())),
        })?;

        let operation_timeout = params.operation_timeout();
        let bound = timeout(
            operation_timeout,
            connection.simple_bind(&params.principal, params.bind_password()),
        )
        .await
        .map_err(|_| bind_error(DirectoryFailure::timed_out("bind", operation_timeout)))
        .and_then(|result| {
            result.map_err(|err| match err {
                Error::Bind { .. } => err,
                other => bind_error(DirectoryFailure::connection(other.to_string())),
            })
        });

        if let Err(err) = bound {
            if let Err(unbind_err) = connection.unbind().await {
                debug!(error = %unbind_err, "unbind after failed bind failed");
            }
            return Err(err);
        }

        debug!(principal = %params.principal, url = %params.url, "session bound");
        self.connection = Some(connection);
        self.operation_timeout = operation_timeout;
        self.state = SessionState::Bound;
        Ok(())
    }

    /// Creates an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless bound, [`Error::Validation`] for a malformed name
    /// or empty payload, and [`Error::Add`] if the server rejects the entry.
    pub async fn add_entry(&mut self, dn: &str, attributes: &AttributeSet) -> Result<()> {
        self.ensure_bound("add entry")?;
        let dn = DistinguishedName::parse(dn)?;
        attributes.ensure_addable()?;

        let cause_dn = dn.to_string();
        let timeout_error = move |after| Error::Add {
            dn: cause_dn,
            cause: DirectoryFailure::timed_out("add", after),
        };
        let operation_timeout = self.operation_timeout;
        let connection = self.connection_mut("add entry")?;
        run_timed(
            operation_timeout,
            connection.add(&dn, attributes),
            timeout_error,
        )
        .await
    }

    /// Applies `modifications` to an entry as one modify request.
    ///
    /// Removing a value the entry does not hold fails; it is never treated as a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless bound, [`Error::Validation`] for a malformed name
    /// or empty modification list, and [`Error::Modify`] if the server rejects the request.
    pub async fn modify_entry(&mut self, dn: &str, modifications: &[Modification]) -> Result<()> {
        self.ensure_bound("modify entry")?;
        let dn = DistinguishedName::parse(dn)?;
        validate_modifications(modifications)?;

        let cause_dn = dn.to_string();
        let timeout_error = move |after| Error::Modify {
            dn: cause_dn,
            cause: DirectoryFailure::timed_out("modify", after),
        };
        let operation_timeout = self.operation_timeout;
        let connection = self.connection_mut("modify entry")?;
        run_timed(
            operation_timeout,
            connection.modify(&dn, modifications),
            timeout_error,
        )
        .await
    }

    /// Renames (moves) `old_dn` to `new_dn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless bound, [`Error::Validation`] for malformed names or
    /// a `new_dn` without parent, and [`Error::Rename`] if the server rejects the rename, e.g.
    /// because the new parent does not exist.
    pub async fn rename_entry(&mut self, old_dn: &str, new_dn: &str) -> Result<()> {
        self.ensure_bound("rename entry")?;
        let old_dn = DistinguishedName::parse(old_dn)?;
        let new_dn = DistinguishedName::parse(new_dn)?;
        let new_superior = new_dn.parent().ok_or_else(|| {
            Error::Validation(format!("rename target `{new_dn}` has no parent entry"))
        })?;
        let new_rdn = new_dn.leaf().to_string();

        let (from, to) = (old_dn.to_string(), new_dn.to_string());
        let timeout_error = move |after| Error::Rename {
            from,
            to,
            cause: DirectoryFailure::timed_out("rename", after),
        };
        let operation_timeout = self.operation_timeout;
        let connection = self.connection_mut("rename entry")?;
        run_timed(
            operation_timeout,
            connection.rename(&old_dn, &new_rdn, &new_superior),
            timeout_error,
        )
        .await
    }

    /// Deletes a leaf entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless bound, [`Error::Validation`] for a malformed name,
    /// and [`Error::Delete`] if the entry does not exist or has children.
    pub async fn delete_entry(&mut self, dn: &str) -> Result<()> {
        self.ensure_bound("delete entry")?;
        let dn = DistinguishedName::parse(dn)?;

        let cause_dn = dn.to_string();
        let timeout_error = move |after| Error::Delete {
            dn: cause_dn,
            cause: DirectoryFailure::timed_out("delete", after),
        };
        let operation_timeout = self.operation_timeout;
        let connection = self.connection_mut("delete entry")?;
        run_timed(operation_timeout, connection.delete(&dn), timeout_error).await
    }

    /// Starts a search and returns its cursor. The caller owns closing it.
    ///
    /// Prefer [`DirectorySession::search_for_each`] or [`DirectorySession::search_collect`],
    /// which always close the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless bound and [`Error::Search`] if the search cannot
    /// be started.
    pub async fn search(&mut self, request: &SearchRequest) -> Result<SearchCursor> {
        self.ensure_bound("search")?;

        let base = request.base().to_string();
        let timeout_base = base.clone();
        let timeout_error = move |after| Error::Search {
            base: timeout_base,
            cause: DirectoryFailure::timed_out("search", after),
        };
        let operation_timeout = self.operation_timeout;
        let connection = self.connection_mut("search")?;
        let stream =
            run_timed(operation_timeout, connection.search(request), timeout_error).await?;
        Ok(SearchCursor::new(stream, base, operation_timeout))
    }

    /// Runs a search and hands every entry to `visitor` until it breaks or the results end.
    ///
    /// The cursor is closed before returning on every path. Returns the number of entries
    /// visited.
    ///
    /// # Errors
    ///
    /// Returns the first retrieval error, otherwise the close error.
    pub async fn search_for_each<F>(
        &mut self,
        request: &SearchRequest,
        mut visitor: F,
    ) -> Result<usize>
    where
        F: FnMut(&LdapEntry) -> ControlFlow<()>,
    {
        let mut cursor = self.search(request).await?;

        let mut visited = 0;
        let drained = loop {
            match cursor.next().await {
                Ok(Some(entry)) => {
                    visited += 1;
                    if visitor(&entry).is_break() {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        let closed = cursor.close().await;
        drained?;
        closed?;
        Ok(visited)
    }

    /// Runs a search and collects every entry.
    ///
    /// # Errors
    ///
    /// See [`DirectorySession::search_for_each`].
    pub async fn search_collect(&mut self, request: &SearchRequest) -> Result<Vec<LdapEntry>> {
        let mut entries = Vec::new();
        self.search_for_each(request, |entry| {
            entries.push(entry.clone());
            ControlFlow::Continue(())
        })
        .await?;
        Ok(entries)
    }

    /// Releases the connection. Idempotent; a session that never bound simply becomes closed.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            match timeout(self.operation_timeout, connection.unbind()).await {
                Ok(Ok(())) => debug!("session unbound"),
                Ok(Err(err)) => warn!(error = %err, "unbind failed while closing session"),
                Err(_) => warn!("unbind timed out while closing session"),
            }
        }
        self.state = SessionState::Closed;
    }

    fn ensure_bound(&self, operation: &str) -> Result<()> {
        if self.state == SessionState::Bound {
            Ok(())
        } else {
            Err(Error::invalid_state(operation, self.state))
        }
    }

    fn connection_mut(&mut self, operation: &str) -> Result<&mut Box<dyn DirectoryConnection>> {
        let state = self.state;
        self.connection
            .as_mut()
            .ok_or_else(|| Error::invalid_state(operation, state))
    }
}

impl fmt::Debug for DirectorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectorySession")
            .field("state", &self.state)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

async fn run_timed<T, F, E>(limit: Duration, fut: F, on_timeout: E) -> Result<T>
where
    F: Future<Output = Result<T>>,
    E: FnOnce(Duration) -> Error,
{
    timeout(limit, fut).await.map_err(|_| on_timeout(limit))?
}
