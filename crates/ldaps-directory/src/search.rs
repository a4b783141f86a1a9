//! Search requests: base, RFC 4515 filter, scope and requested attributes.

use crate::dn::DistinguishedName;
use ldap3::Scope;
use ldaps_core::{Error, Result};
use std::fmt;

/// Search scope for directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    #[default]
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Search filter checked against the RFC 4515 string grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter(String);

impl SearchFilter {
    /// Parses and validates a filter string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the filter is empty or not well-formed.
    pub fn parse(filter: impl Into<String>) -> Result<Self> {
        let filter = filter.into();
        let trimmed = filter.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("search filter cannot be empty".to_string()));
        }
        ldap3::parse_filter(trimmed)
            .map_err(|()| Error::Validation(format!("malformed search filter `{trimmed}`")))?;
        Ok(Self(trimmed.to_string()))
    }

    /// Borrows the filter string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    base: DistinguishedName,
    filter: SearchFilter,
    scope: SearchScope,
    attributes: Vec<String>,
}

impl SearchRequest {
    /// Creates a subtree search returning all user attributes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the base or the filter is malformed.
    pub fn new(base: &str, filter: &str) -> Result<Self> {
        Ok(Self {
            base: DistinguishedName::parse(base)?,
            filter: SearchFilter::parse(filter)?,
            scope: SearchScope::default(),
            attributes: Vec::new(),
        })
    }

    /// Sets the scope.
    #[must_use]
    pub const fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the requested attributes. Duplicates are dropped, first occurrence wins.
    #[must_use]
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.clear();
        for attribute in attributes {
            let attribute = attribute.into();
            if !self
                .attributes
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(&attribute))
            {
                self.attributes.push(attribute);
            }
        }
        self
    }

    /// Search base.
    #[must_use]
    pub fn base(&self) -> &DistinguishedName {
        &self.base
    }

    /// Filter.
    #[must_use]
    pub fn filter(&self) -> &SearchFilter {
        &self.filter
    }

    /// Scope.
    #[must_use]
    pub const fn scope(&self) -> SearchScope {
        self.scope
    }

    /// Requested attributes; empty means all user attributes.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_compound_filters() {
        let filter = SearchFilter::parse(
            "(&(samaccountname=*)(|(!(uid=nosuchuser))(createTimestamp>=20070101000000Z)(cn=u*s*)(cn~=ser)))",
        )
        .unwrap();
        assert!(filter.as_str().starts_with("(&(samaccountname=*)"));
        assert!(SearchFilter::parse("uid=jdoe").is_ok());
    }

    #[test]
    fn rejects_malformed_filters() {
        assert!(matches!(
            SearchFilter::parse("  "),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            SearchFilter::parse("(&(uid=*)"),
            Err(Error::Validation(_))
        ));
        assert!(SearchFilter::parse("(uid=a)(uid=b)").is_err());
    }

    #[test]
    fn request_builder() {
        let request = SearchRequest::new("dc=example2,dc=com", "(samaccountname=*)")
            .unwrap()
            .with_scope(SearchScope::OneLevel)
            .with_attributes(["cn", "sn", "CN"]);
        assert_eq!(request.base().as_str(), "dc=example2,dc=com");
        assert_eq!(request.scope(), SearchScope::OneLevel);
        assert_eq!(request.attributes(), ["cn", "sn"]);
        assert_eq!(Scope::from(request.scope()), Scope::OneLevel);
    }

    #[test]
    fn request_validates_base() {
        let err = SearchRequest::new("dc=example2,", "(cn=*)").unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
