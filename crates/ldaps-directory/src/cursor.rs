//! Lazy, forward-only search result cursor with a single guaranteed release.

use crate::connection::EntryStream;
use crate::entry::LdapEntry;
use ldaps_core::{DirectoryFailure, Error, Result};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Cursor over the results of one search.
///
/// Release it with [`SearchCursor::close`]. A cursor dropped without closing schedules the
/// release on the current Tokio runtime so the server-side search is still freed exactly once.
pub struct SearchCursor {
    stream: Option<Box<dyn EntryStream>>,
    base: String,
    operation_timeout: Duration,
    yielded: usize,
    exhausted: bool,
}

impl SearchCursor {
    pub(crate) fn new(
        stream: Box<dyn EntryStream>,
        base: impl Into<String>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            stream: Some(stream),
            base: base.into(),
            operation_timeout,
            yielded: 0,
            exhausted: false,
        }
    }

    /// Fetches the next entry. Returns `None` once the search is complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] if retrieval fails or times out, and [`Error::InvalidState`] if
    /// the cursor was already closed.
    pub async fn next(&mut self) -> Result<Option<LdapEntry>> {
        if self.exhausted {
            return Ok(None);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::invalid_state("read search results", "closed"));
        };

        let entry = timeout(self.operation_timeout, stream.next_entry())
            .await
            .map_err(|_| Error::Search {
                base: self.base.clone(),
                cause: DirectoryFailure::timed_out("search", self.operation_timeout),
            })??;

        match entry {
            Some(entry) => {
                self.yielded += 1;
                Ok(Some(entry))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Number of entries returned so far.
    #[must_use]
    pub const fn yielded(&self) -> usize {
        self.yielded
    }

    /// Returns true once the server reported the end of the search.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Search base this cursor was opened for.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Releases the server-side search.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Search`] if the release request fails. The cursor is released either way.
    pub async fn close(mut self) -> Result<()> {
        self.release().await
    }

    async fn release(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        debug!(base = %self.base, yielded = self.yielded, "releasing search cursor");
        timeout(self.operation_timeout, stream.release())
            .await
            .map_err(|_| Error::Search {
                base: self.base.clone(),
                cause: DirectoryFailure::timed_out("search release", self.operation_timeout),
            })?
    }
}

impl std::fmt::Debug for SearchCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCursor")
            .field("base", &self.base)
            .field("yielded", &self.yielded)
            .field("exhausted", &self.exhausted)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl Drop for SearchCursor {
    fn drop(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                warn!(base = %self.base, "search cursor dropped without close, releasing in background");
                handle.spawn(async move {
                    if let Err(err) = stream.release().await {
                        warn!(error = %err, "background search cursor release failed");
                    }
                });
            }
            Err(_) => {
                warn!(base = %self.base, "search cursor dropped outside a runtime, release skipped");
            }
        }
    }
}
