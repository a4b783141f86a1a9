//! Attribute payloads and search results.

use crate::dn::DistinguishedName;
use ldap3::Mod;
use ldaps_core::{Error, Result};
use std::collections::HashSet;

/// Mapping from attribute name to one or more ordered values.
///
/// Attribute names are matched case-insensitively; the spelling of the first insertion is kept.
/// Iteration follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    attributes: Vec<(String, Vec<String>)>,
}

impl AttributeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` to `attribute`, keeping value order. Duplicate values are ignored.
    #[must_use]
    pub fn with_value(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(attribute, value);
        self
    }

    /// Adds `value` to `attribute`. Returns false if the value was already present.
    pub fn insert(&mut self, attribute: impl Into<String>, value: impl Into<String>) -> bool {
        let attribute = attribute.into();
        let value = value.into();
        let values = match self.position(&attribute) {
            Some(index) => &mut self.attributes[index].1,
            None => {
                self.attributes.push((attribute, Vec::new()));
                let last = self.attributes.len() - 1;
                &mut self.attributes[last].1
            }
        };
        if values.contains(&value) {
            return false;
        }
        values.push(value);
        true
    }

    /// Replaces every value of `attribute`. An empty `values` removes the attribute.
    pub fn replace(&mut self, attribute: impl Into<String>, values: Vec<String>) {
        let attribute = attribute.into();
        match (self.position(&attribute), values.is_empty()) {
            (Some(index), true) => {
                self.attributes.remove(index);
            }
            (Some(index), false) => self.attributes[index].1 = values,
            (None, true) => {}
            (None, false) => self.attributes.push((attribute, values)),
        }
    }

    /// Removes one value. Returns false if the attribute does not hold it.
    pub fn remove_value(&mut self, attribute: &str, value: &str) -> bool {
        let Some(index) = self.position(attribute) else {
            return false;
        };
        let values = &mut self.attributes[index].1;
        let Some(value_index) = values.iter().position(|existing| existing == value) else {
            return false;
        };
        values.remove(value_index);
        if values.is_empty() {
            self.attributes.remove(index);
        }
        true
    }

    /// All values of `attribute`.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.position(attribute)
            .map(|index| self.attributes[index].1.as_slice())
    }

    /// First value of `attribute`.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.first().map(String::as_str))
    }

    /// Returns true if `attribute` holds at least one value.
    #[must_use]
    pub fn contains(&self, attribute: &str) -> bool {
        self.position(attribute).is_some()
    }

    /// Iterates `(attribute, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> + '_ {
        self.attributes
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns true if the set has no attribute.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Checks the set is usable as an add payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the set is empty or an attribute has no value.
    pub fn ensure_addable(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::Validation("attribute set cannot be empty".to_string()));
        }
        if let Some((name, _)) = self.iter().find(|(_, values)| values.is_empty()) {
            return Err(Error::Validation(format!(
                "attribute `{name}` needs at least one value"
            )));
        }
        Ok(())
    }

    /// Converts to the ldap3 add payload.
    #[must_use]
    pub fn to_ldap(&self) -> Vec<(String, HashSet<String>)> {
        self.iter()
            .map(|(name, values)| (name.to_string(), values.iter().cloned().collect()))
            .collect()
    }

    fn position(&self, attribute: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(attribute))
    }
}

impl<K, V> FromIterator<(K, V)> for AttributeSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (attribute, value) in iter {
            set.insert(attribute, value);
        }
        set
    }
}

/// Kind of attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    /// Add values to the attribute.
    AddValue,
    /// Replace all values of the attribute.
    ReplaceValue,
    /// Remove values from the attribute. Removing a value the entry does not hold is an error.
    RemoveValue,
}

impl ModificationKind {
    /// Lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddValue => "add_value",
            Self::ReplaceValue => "replace_value",
            Self::RemoveValue => "remove_value",
        }
    }
}

/// One attribute modification within a modify request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// Modification kind.
    pub kind: ModificationKind,
    /// Target attribute.
    pub attribute: String,
    /// Values; for `RemoveValue` an empty list removes the whole attribute.
    pub values: Vec<String>,
}

impl Modification {
    /// Creates a modification.
    #[must_use]
    pub fn new(kind: ModificationKind, attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            kind,
            attribute: attribute.into(),
            values,
        }
    }

    /// Adds one value.
    #[must_use]
    pub fn add_value(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(ModificationKind::AddValue, attribute, vec![value.into()])
    }

    /// Replaces all values with one value.
    #[must_use]
    pub fn replace_value(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(ModificationKind::ReplaceValue, attribute, vec![value.into()])
    }

    /// Removes one value.
    #[must_use]
    pub fn remove_value(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(ModificationKind::RemoveValue, attribute, vec![value.into()])
    }

    /// Converts to the ldap3 modification.
    #[must_use]
    pub fn to_ldap(&self) -> Mod<String> {
        let values = self.values.iter().cloned().collect::<HashSet<_>>();
        match self.kind {
            ModificationKind::AddValue => Mod::Add(self.attribute.clone(), values),
            ModificationKind::ReplaceValue => Mod::Replace(self.attribute.clone(), values),
            ModificationKind::RemoveValue => Mod::Delete(self.attribute.clone(), values),
        }
    }
}

/// Checks a modify payload before it is sent.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the list is empty, an attribute name is blank, or an
/// `AddValue` carries no value.
pub fn validate_modifications(modifications: &[Modification]) -> Result<()> {
    if modifications.is_empty() {
        return Err(Error::Validation(
            "modification list cannot be empty".to_string(),
        ));
    }
    for modification in modifications {
        if modification.attribute.trim().is_empty() {
            return Err(Error::Validation(
                "modification attribute cannot be empty".to_string(),
            ));
        }
        if modification.kind == ModificationKind::AddValue && modification.values.is_empty() {
            return Err(Error::Validation(format!(
                "add_value on `{}` needs at least one value",
                modification.attribute
            )));
        }
    }
    Ok(())
}

/// Entry returned by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapEntry {
    /// Entry name as returned by the server.
    pub dn: String,
    /// Attributes.
    pub attributes: AttributeSet,
}

impl LdapEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(dn: impl Into<String>, attributes: AttributeSet) -> Self {
        Self {
            dn: dn.into(),
            attributes,
        }
    }

    /// Parses the entry name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the server returned a malformed name.
    pub fn distinguished_name(&self) -> Result<DistinguishedName> {
        Ok(DistinguishedName::parse(&self.dn)?)
    }

    /// First value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.attributes.first(attribute)
    }

    /// All values of the attribute.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes.values(attribute)
    }
}

impl From<ldap3::SearchEntry> for LdapEntry {
    fn from(entry: ldap3::SearchEntry) -> Self {
        let mut names = entry.attrs.into_iter().collect::<Vec<_>>();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        let mut attributes = AttributeSet::new();
        for (name, values) in names {
            attributes.replace(name, values);
        }
        Self {
            dn: entry.dn,
            attributes,
        }
    }
}
