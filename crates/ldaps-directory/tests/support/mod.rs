//! In-memory directory used by the integration tests.
//!
//! Implements the connector seam with the server-side rules the session relies on: parents must
//! exist, names are unique, value removal is strict, only leaves can be deleted, and a search
//! under a missing base ends with `noSuchObject`. Every opened search gets its own release
//! counter.

#![allow(dead_code)]

use async_trait::async_trait;
use ldaps_core::error::{
    ENTRY_ALREADY_EXISTS, INVALID_CREDENTIALS, NOT_ALLOWED_ON_NON_LEAF, NO_SUCH_ATTRIBUTE,
    NO_SUCH_OBJECT,
};
use ldaps_core::{ConnectionParameters, DirectoryFailure, Error, Result};
use ldaps_directory::{
    AttributeSet, DirectoryConnection, DirectoryConnector, DistinguishedName, EntryStream,
    LdapEntry, Modification, ModificationKind, SearchRequest, SearchScope,
};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;

pub const PRINCIPAL: &str = "Administrator@EXAMPLE2.COM";
pub const PASSWORD: &str = "Passw0rd.";
pub const WRONG_PASSWORD: &str = "WrongPassw0rd.";
pub const URL: &str = "ldaps://ad2016:636";

#[derive(Debug, Clone)]
struct StoredEntry {
    dn: DistinguishedName,
    attributes: AttributeSet,
}

#[derive(Debug, Default)]
struct DirectoryState {
    entries: BTreeMap<String, StoredEntry>,
    searches: Vec<Arc<AtomicUsize>>,
    connections: usize,
    unbinds: usize,
    unreachable: bool,
}

impl DirectoryState {
    fn get(&self, dn: &DistinguishedName) -> Option<&StoredEntry> {
        self.entries.get(&dn.normalized())
    }

    fn has_children(&self, dn: &DistinguishedName) -> bool {
        self.entries
            .values()
            .any(|entry| entry.dn.parent().is_some_and(|parent| parent.same_entry(dn)))
    }

    fn parent_exists(&self, dn: &DistinguishedName) -> bool {
        dn.parent()
            .map_or(true, |parent| self.get(&parent).is_some())
    }
}

/// Shared in-memory directory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl FakeDirectory {
    /// Directory holding the `dc=example2,dc=com` suffix and its `cn=users` container.
    pub fn new() -> Self {
        Self::default()
            .with_entry("dc=example2,dc=com", &[("objectClass", "domain")])
            .with_entry(
                "cn=users,dc=example2,dc=com",
                &[("objectClass", "container"), ("cn", "users")],
            )
    }

    pub fn with_entry(self, dn: &str, attributes: &[(&str, &str)]) -> Self {
        let dn = DistinguishedName::parse(dn).unwrap();
        let attributes = attributes.iter().copied().collect::<AttributeSet>();
        self.state.lock().unwrap().entries.insert(
            dn.normalized(),
            StoredEntry { dn, attributes },
        );
        self
    }

    /// Makes every connection attempt fail at the transport level.
    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().unreachable = true;
        self
    }

    pub fn connector(&self) -> Arc<dyn DirectoryConnector> {
        Arc::new(FakeConnector {
            state: self.state.clone(),
        })
    }

    pub fn contains(&self, dn: &str) -> bool {
        let dn = DistinguishedName::parse(dn).unwrap();
        self.state.lock().unwrap().get(&dn).is_some()
    }

    pub fn attributes(&self, dn: &str) -> Option<AttributeSet> {
        let dn = DistinguishedName::parse(dn).unwrap();
        self.state
            .lock()
            .unwrap()
            .get(&dn)
            .map(|entry| entry.attributes.clone())
    }

    /// Release count of every search opened so far, in opening order.
    pub fn search_releases(&self) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .searches
            .iter()
            .map(|count| count.load(Ordering::SeqCst))
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    pub fn unbinds(&self) -> usize {
        self.state.lock().unwrap().unbinds
    }
}

struct FakeConnector {
    state: Arc<Mutex<DirectoryState>>,
}

#[async_trait]
impl DirectoryConnector for FakeConnector {
    async fn connect(&self, params: &ConnectionParameters) -> Result<Box<dyn DirectoryConnection>> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(Error::Transport {
                target: format!("{}:{}", params.host()?, params.port()?),
                message: "connection refused".to_string(),
            });
        }
        state.connections += 1;
        Ok(Box::new(FakeConnection {
            state: self.state.clone(),
            bound: false,
        }))
    }
}

struct FakeConnection {
    state: Arc<Mutex<DirectoryState>>,
    bound: bool,
}

impl FakeConnection {
    fn require_bind(&self) -> std::result::Result<(), DirectoryFailure> {
        if self.bound {
            Ok(())
        } else {
            Err(DirectoryFailure::server(
                INSUFFICIENT_ACCESS_RIGHTS,
                "bind required",
            ))
        }
    }
}

#[async_trait]
impl DirectoryConnection for FakeConnection {
    async fn simple_bind(&mut self, principal: &str, password: &str) -> Result<()> {
        if principal == PRINCIPAL && password == PASSWORD {
            self.bound = true;
            Ok(())
        } else {
            Err(Error::Bind {
                principal: principal.to_string(),
                cause: DirectoryFailure::server(INVALID_CREDENTIALS, "invalid credentials"),
            })
        }
    }

    async fn add(&mut self, dn: &DistinguishedName, attributes: &AttributeSet) -> Result<()> {
        let add_error = |cause| Error::Add {
            dn: dn.to_string(),
            cause,
        };
        self.require_bind().map_err(add_error)?;

        let mut state = self.state.lock().unwrap();
        if state.get(dn).is_some() {
            return Err(add_error(DirectoryFailure::server(
                ENTRY_ALREADY_EXISTS,
                "entry already exists",
            )));
        }
        if !state.parent_exists(dn) {
            return Err(add_error(DirectoryFailure::server(
                NO_SUCH_OBJECT,
                "parent entry does not exist",
            )));
        }

        let mut attributes = attributes.clone();
        for ava in dn.leaf().assertions() {
            attributes.insert(ava.attribute(), ava.value());
        }
        state.entries.insert(
            dn.normalized(),
            StoredEntry {
                dn: dn.clone(),
                attributes,
            },
        );
        Ok(())
    }

    async fn modify(
        &mut self,
        dn: &DistinguishedName,
        modifications: &[Modification],
    ) -> Result<()> {
        let modify_error = |cause| Error::Modify {
            dn: dn.to_string(),
            cause,
        };
        self.require_bind().map_err(modify_error)?;

        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.entries.get_mut(&dn.normalized()) else {
            return Err(modify_error(DirectoryFailure::server(
                NO_SUCH_OBJECT,
                "no such object",
            )));
        };

        let mut updated = entry.attributes.clone();
        for modification in modifications {
            apply(&mut updated, modification).map_err(modify_error)?;
        }
        entry.attributes = updated;
        Ok(())
    }

    async fn rename(
        &mut self,
        dn: &DistinguishedName,
        new_rdn: &str,
        new_superior: &DistinguishedName,
    ) -> Result<()> {
        let target = DistinguishedName::parse(format!("{new_rdn},{new_superior}"))?;
        let rename_error = |cause| Error::Rename {
            from: dn.to_string(),
            to: target.to_string(),
            cause,
        };
        self.require_bind().map_err(rename_error)?;

        let mut state = self.state.lock().unwrap();
        if state.get(dn).is_none() || state.get(new_superior).is_none() {
            return Err(rename_error(DirectoryFailure::server(
                NO_SUCH_OBJECT,
                "no such object",
            )));
        }
        if state.get(&target).is_some() {
            return Err(rename_error(DirectoryFailure::server(
                ENTRY_ALREADY_EXISTS,
                "entry already exists",
            )));
        }
        if state.has_children(dn) {
            return Err(rename_error(DirectoryFailure::server(
                NOT_ALLOWED_ON_NON_LEAF,
                "subtree rename not supported",
            )));
        }

        let Some(mut entry) = state.entries.remove(&dn.normalized()) else {
            return Err(rename_error(DirectoryFailure::server(
                NO_SUCH_OBJECT,
                "no such object",
            )));
        };
        for ava in dn.leaf().assertions() {
            entry.attributes.remove_value(ava.attribute(), ava.value());
        }
        for ava in target.leaf().assertions() {
            entry.attributes.insert(ava.attribute(), ava.value());
        }
        entry.dn = target.clone();
        state.entries.insert(target.normalized(), entry);
        Ok(())
    }

    async fn delete(&mut self, dn: &DistinguishedName) -> Result<()> {
        let delete_error = |cause| Error::Delete {
            dn: dn.to_string(),
            cause,
        };
        self.require_bind().map_err(delete_error)?;

        let mut state = self.state.lock().unwrap();
        if state.get(dn).is_none() {
            return Err(delete_error(DirectoryFailure::server(
                NO_SUCH_OBJECT,
                "no such object",
            )));
        }
        if state.has_children(dn) {
            return Err(delete_error(DirectoryFailure::server(
                NOT_ALLOWED_ON_NON_LEAF,
                "entry has children",
            )));
        }
        state.entries.remove(&dn.normalized());
        Ok(())
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<Box<dyn EntryStream>> {
        self.require_bind().map_err(|cause| Error::Search {
            base: request.base().to_string(),
            cause,
        })?;

        let mut state = self.state.lock().unwrap();
        let filter = Filter::parse(request.filter().as_str());
        let base = request.base();

        let (entries, failure) = if state.get(base).is_some() {
            let entries = state
                .entries
                .values()
                .filter(|entry| in_scope(&entry.dn, base, request.scope()))
                .filter(|entry| filter.matches(&entry.attributes))
                .map(|entry| project(entry, request.attributes()))
                .collect();
            (entries, None)
        } else {
            (
                VecDeque::new(),
                Some(Error::Search {
                    base: base.to_string(),
                    cause: DirectoryFailure::server(NO_SUCH_OBJECT, "no such object"),
                }),
            )
        };

        let releases = Arc::new(AtomicUsize::new(0));
        state.searches.push(releases.clone());
        Ok(Box::new(FakeEntryStream {
            entries,
            failure,
            releases,
        }))
    }

    async fn unbind(&mut self) -> Result<()> {
        self.bound = false;
        self.state.lock().unwrap().unbinds += 1;
        Ok(())
    }
}

fn apply(
    attributes: &mut AttributeSet,
    modification: &Modification,
) -> std::result::Result<(), DirectoryFailure> {
    let attribute = modification.attribute.as_str();
    match modification.kind {
        ModificationKind::AddValue => {
            for value in &modification.values {
                if !attributes.insert(attribute, value.clone()) {
                    return Err(DirectoryFailure::server(
                        ATTRIBUTE_OR_VALUE_EXISTS,
                        format!("{attribute} already holds {value}"),
                    ));
                }
            }
        }
        ModificationKind::ReplaceValue => {
            attributes.replace(attribute, modification.values.clone());
        }
        ModificationKind::RemoveValue => {
            if modification.values.is_empty() {
                if !attributes.contains(attribute) {
                    return Err(no_such_attribute(attribute));
                }
                attributes.replace(attribute, Vec::new());
            }
            for value in &modification.values {
                if !attributes.remove_value(attribute, value) {
                    return Err(no_such_attribute(attribute));
                }
            }
        }
    }
    Ok(())
}

fn no_such_attribute(attribute: &str) -> DirectoryFailure {
    DirectoryFailure::server(NO_SUCH_ATTRIBUTE, format!("no such attribute value: {attribute}"))
}

fn in_scope(dn: &DistinguishedName, base: &DistinguishedName, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => dn.same_entry(base),
        SearchScope::OneLevel => dn.parent().is_some_and(|parent| parent.same_entry(base)),
        SearchScope::Subtree => dn.same_entry(base) || dn.is_descendant_of(base),
    }
}

fn project(entry: &StoredEntry, requested: &[String]) -> LdapEntry {
    let attributes = if requested.is_empty() {
        entry.attributes.clone()
    } else {
        let mut projected = AttributeSet::new();
        for (name, values) in entry.attributes.iter() {
            if requested
                .iter()
                .any(|wanted| wanted.eq_ignore_ascii_case(name))
            {
                projected.replace(name, values.to_vec());
            }
        }
        projected
    };
    LdapEntry::new(entry.dn.to_string(), attributes)
}

struct FakeEntryStream {
    entries: VecDeque<LdapEntry>,
    failure: Option<Error>,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl EntryStream for FakeEntryStream {
    async fn next_entry(&mut self) -> Result<Option<LdapEntry>> {
        if let Some(entry) = self.entries.pop_front() {
            return Ok(Some(entry));
        }
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    async fn release(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Filter subset evaluated by the fake: `&`, `|`, `!`, presence, equality and substring.
/// Ordering, approximate and extensible matches never match.
#[derive(Debug)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, String),
    Substring(String, Vec<String>),
    Never,
}

impl Filter {
    fn parse(input: &str) -> Self {
        let input = input.trim();
        let inner = input
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(input);

        if let Some(rest) = inner.strip_prefix('&') {
            return Self::And(split_components(rest).into_iter().map(Self::parse).collect());
        }
        if let Some(rest) = inner.strip_prefix('|') {
            return Self::Or(split_components(rest).into_iter().map(Self::parse).collect());
        }
        if let Some(rest) = inner.strip_prefix('!') {
            return Self::Not(Box::new(Self::parse(rest)));
        }

        let Some((attribute, value)) = inner.split_once('=') else {
            return Self::Never;
        };
        if attribute.ends_with(['>', '<', '~', ':']) || attribute.contains(':') {
            return Self::Never;
        }
        let attribute = attribute.to_string();
        if value == "*" {
            Self::Present(attribute)
        } else if value.contains('*') {
            Self::Substring(attribute, value.split('*').map(str::to_string).collect())
        } else {
            Self::Equal(attribute, value.to_string())
        }
    }

    fn matches(&self, attributes: &AttributeSet) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|filter| filter.matches(attributes)),
            Self::Or(filters) => filters.iter().any(|filter| filter.matches(attributes)),
            Self::Not(filter) => !filter.matches(attributes),
            Self::Present(attribute) => attributes.contains(attribute),
            Self::Equal(attribute, expected) => attributes
                .values(attribute)
                .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case(expected))),
            Self::Substring(attribute, parts) => attributes
                .values(attribute)
                .is_some_and(|values| values.iter().any(|v| substring_match(v, parts))),
            Self::Never => false,
        }
    }
}

fn substring_match(value: &str, parts: &[String]) -> bool {
    let value = value.to_ascii_lowercase();
    let mut rest = value.as_str();
    let last = parts.len() - 1;
    for (index, part) in parts.iter().enumerate() {
        let part = part.to_ascii_lowercase();
        if index == 0 {
            let Some(stripped) = rest.strip_prefix(part.as_str()) else {
                return false;
            };
            rest = stripped;
        } else if index == last {
            return rest.ends_with(part.as_str());
        } else {
            let Some(position) = rest.find(part.as_str()) else {
                return false;
            };
            rest = &rest[position + part.len()..];
        }
    }
    true
}

/// Splits `(a)(b)(c)` into its parenthesized components.
fn split_components(input: &str) -> Vec<&str> {
    let mut components = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in input.char_indices() {
        match ch {
            '(' => {
                if depth == 0 {
                    start = index;
                }
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    components.push(&input[start..=index]);
                }
            }
            _ => {}
        }
    }
    components
}

pub fn params(credential: &str) -> ConnectionParameters {
    ConnectionParameters::new(URL, PRINCIPAL, credential).unwrap()
}

/// In-memory log sink for asserting on emitted events.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Routes this thread's log events into the returned buffer until the guard is dropped.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}
