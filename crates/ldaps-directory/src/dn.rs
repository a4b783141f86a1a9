//! Distinguished names (RFC 4514) for directory entry references.

use ldaps_core::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component in the distinguished name was invalid.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component was missing the attribute type to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component was missing the value to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The distinguished name ended with an escape character.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
}

impl From<DistinguishedNameError> for Error {
    fn from(err: DistinguishedNameError) -> Self {
        Error::Validation(err.to_string())
    }
}

/// Single `type=value` pair of a relative distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValueAssertion {
    attribute: String,
    value: String,
}

impl AttributeValueAssertion {
    /// Creates an attribute/value pair.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute type (e.g. `cn`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped attribute value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if the attribute type matches (case-insensitive).
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }
}

/// Relative distinguished name: one or more `+`-joined attribute/value pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeDistinguishedName {
    raw: String,
    assertions: Vec<AttributeValueAssertion>,
}

impl RelativeDistinguishedName {
    /// The RDN exactly as written in the parsed name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Attribute/value pairs of this RDN.
    #[must_use]
    pub fn assertions(&self) -> &[AttributeValueAssertion] {
        &self.assertions
    }

    /// Value of the first pair whose attribute type matches.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.assertions
            .iter()
            .find(|ava| ava.matches_attribute(attribute))
            .map(AttributeValueAssertion::value)
    }

    fn same_rdn(&self, other: &Self) -> bool {
        self.assertions.len() == other.assertions.len()
            && self.assertions.iter().zip(&other.assertions).all(|(a, b)| {
                a.attribute.eq_ignore_ascii_case(&b.attribute)
                    && a.value.to_lowercase() == b.value.to_lowercase()
            })
    }

    fn normalized(&self) -> String {
        self.assertions
            .iter()
            .map(|ava| {
                format!(
                    "{}={}",
                    ava.attribute.to_ascii_lowercase(),
                    ldap3::dn_escape(ava.value.to_lowercase())
                )
            })
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl fmt::Display for RelativeDistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Strongly-typed distinguished name.
///
/// The validated input is kept verbatim and is what goes on the wire; the parsed RDN sequence
/// only serves structural queries such as [`DistinguishedName::parent`]. Parsing is strict so
/// malformed names are rejected before they reach the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<RelativeDistinguishedName>,
    /// Byte offset of each RDN in `raw`.
    offsets: Vec<usize>,
}

impl DistinguishedName {
    /// Parses a distinguished name from a string.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if the name is empty or contains invalid syntax.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DistinguishedNameError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }

        let mut rdns = Vec::new();
        let mut offsets = Vec::new();
        for (offset, component) in split_escaped(raw, ',')? {
            let mut assertions = Vec::new();
            for (_, part) in split_escaped(component, '+')? {
                let (attribute, value) = split_attribute_value(part)?;
                assertions.push(AttributeValueAssertion::new(attribute, value));
            }
            rdns.push(RelativeDistinguishedName {
                raw: component.to_string(),
                assertions,
            });
            offsets.push(offset);
        }

        Ok(Self {
            raw: raw.to_string(),
            rdns,
            offsets,
        })
    }

    /// Borrows the name as written by the caller.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The leading (most specific) RDN.
    #[must_use]
    pub fn leaf(&self) -> &RelativeDistinguishedName {
        // parse() never produces an empty RDN sequence
        &self.rdns[0]
    }

    /// Name of the parent entry, or `None` for a single-RDN name.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let start = *self.offsets.get(1)?;
        Some(Self {
            raw: self.raw[start..].to_string(),
            rdns: self.rdns[1..].to_vec(),
            offsets: self.offsets[1..].iter().map(|offset| offset - start).collect(),
        })
    }

    /// Case-insensitive form used to compare names.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.rdns
            .iter()
            .map(RelativeDistinguishedName::normalized)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Returns true if both names identify the same entry (attribute types and values compared
    /// case-insensitively).
    #[must_use]
    pub fn same_entry(&self, other: &Self) -> bool {
        self.rdns.len() == other.rdns.len() && self.ends_with(other)
    }

    /// Returns true if `self` lies strictly below `ancestor`.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        self.rdns.len() > ancestor.rdns.len() && self.ends_with(ancestor)
    }

    fn ends_with(&self, suffix: &Self) -> bool {
        self.rdns
            .iter()
            .rev()
            .zip(suffix.rdns.iter().rev())
            .all(|(a, b)| a.same_rdn(b))
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DistinguishedNameError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<DistinguishedName> for String {
    fn from(value: DistinguishedName) -> Self {
        value.raw
    }
}

impl TryFrom<&str> for DistinguishedName {
    type Error = DistinguishedNameError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Self::parse(value)
    }
}

/// Splits on unescaped `delimiter`, returning each trimmed part with its byte offset in `input`.
fn split_escaped(
    input: &str,
    delimiter: char,
) -> std::result::Result<Vec<(usize, &str)>, DistinguishedNameError> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escape = false;

    for (index, ch) in input.char_indices() {
        if escape {
            escape = false;
        } else if ch == '\\' {
            escape = true;
        } else if ch == delimiter {
            parts.push(trimmed(input, start, index));
            start = index + ch.len_utf8();
        }
    }

    if escape {
        return Err(DistinguishedNameError::UnterminatedEscape);
    }

    parts.push(trimmed(input, start, input.len()));
    if parts.iter().any(|(_, part)| part.is_empty()) {
        return Err(DistinguishedNameError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

fn trimmed(input: &str, start: usize, end: usize) -> (usize, &str) {
    let segment = &input[start..end];
    let leading = segment.len() - segment.trim_start().len();
    (start + leading, segment.trim())
}

fn split_attribute_value(
    component: &str,
) -> std::result::Result<(String, String), DistinguishedNameError> {
    let mut escape = false;
    let mut index = None;

    for (i, ch) in component.char_indices() {
        if escape {
            escape = false;
            continue;
        }

        if ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '=' {
            index = Some(i);
            break;
        }
    }

    let idx =
        index.ok_or_else(|| DistinguishedNameError::InvalidComponent(component.to_string()))?;
    let attribute = component[..idx].trim();
    let value_part = component[idx + 1..].trim_start();

    if attribute.is_empty() {
        return Err(DistinguishedNameError::MissingAttribute(
            component.to_string(),
        ));
    }
    if !attribute
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '.')
    {
        return Err(DistinguishedNameError::InvalidComponent(
            component.to_string(),
        ));
    }

    if value_part.is_empty() {
        return Err(DistinguishedNameError::MissingValue(attribute.to_string()));
    }

    // `#` introduces a hex-encoded BER value, kept as written.
    if let Some(hex) = value_part.strip_prefix('#') {
        if hex.is_empty() || hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DistinguishedNameError::InvalidComponent(
                component.to_string(),
            ));
        }
        return Ok((attribute.to_string(), value_part.to_string()));
    }

    Ok((attribute.to_string(), unescape(value_part)?))
}

/// Resolves `\c` and `\XX` escapes. Hex pairs are decoded as bytes, so multi-byte UTF-8
/// sequences such as `\C3\A9` yield one character.
fn unescape(value: &str) -> std::result::Result<String, DistinguishedNameError> {
    let invalid = || DistinguishedNameError::InvalidComponent(value.to_string());
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        let byte = bytes[index];
        if byte != b'\\' {
            decoded.push(byte);
            index += 1;
            continue;
        }

        let next = *bytes
            .get(index + 1)
            .ok_or(DistinguishedNameError::UnterminatedEscape)?;
        match bytes.get(index + 2) {
            Some(low) if next.is_ascii_hexdigit() && low.is_ascii_hexdigit() => {
                let pair = std::str::from_utf8(&bytes[index + 1..index + 3]).map_err(|_| invalid())?;
                decoded.push(u8::from_str_radix(pair, 16).map_err(|_| invalid())?);
                index += 3;
            }
            _ => {
                decoded.push(next);
                index += 2;
            }
        }
    }

    String::from_utf8(decoded).map_err(|_| invalid())
}
