//! Search definitions: URL descriptors and LDAP URL parsing.
//!
//! A [`UrlDescriptor`] names *what* a mirror holds: base DN, scope, filter
//! and requested attributes. It is recorded in the store the first time a
//! session runs, and every later session must ask for exactly the same
//! thing. [`LdapUrl`] parses the RFC 4516 string form
//! `scheme://host/dn?attributes?scope?filter?extensions` into a descriptor.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Filter used when a URL does not name one.
pub const DEFAULT_FILTER: &str = "(objectClass=*)";

/// Search scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Only the base entry.
    #[default]
    Base,
    /// Immediate children of the base.
    One,
    /// The base and everything below it.
    Subtree,
}

impl Scope {
    /// Parses the URL spelling of a scope.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "" | "base" => Some(Self::Base),
            "one" | "onelevel" => Some(Self::One),
            "sub" | "subtree" => Some(Self::Subtree),
            _ => None,
        }
    }

    /// Returns the URL spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::One => "one",
            Self::Subtree => "sub",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field of a descriptor, used to report what differs in a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorField {
    /// The search base.
    BaseDn,
    /// The search scope.
    Scope,
    /// The search filter.
    Filter,
    /// The requested attribute list.
    Attributes,
}

/// Immutable description of the searched subset of the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UrlDescriptor {
    base_dn: String,
    scope: Scope,
    filter: String,
    attributes: Vec<String>,
}

impl UrlDescriptor {
    /// Creates a descriptor.
    ///
    /// Duplicate attribute names are dropped (first occurrence wins, order
    /// is kept). An empty filter becomes [`DEFAULT_FILTER`].
    pub fn new<I, S>(
        base_dn: impl Into<String>,
        scope: Scope,
        filter: impl Into<String>,
        attributes: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut attrs: Vec<String> = Vec::new();
        for attr in attributes {
            let attr = attr.into();
            if !attr.is_empty() && !attrs.contains(&attr) {
                attrs.push(attr);
            }
        }

        let filter = filter.into();
        Self {
            base_dn: base_dn.into(),
            scope,
            filter: if filter.is_empty() {
                DEFAULT_FILTER.to_string()
            } else {
                filter
            },
            attributes: attrs,
        }
    }

    /// Returns the base DN.
    #[must_use]
    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// Returns the scope.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Returns the filter.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Returns the requested attributes, in request order.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Lists the fields in which `other` differs from `self`.
    #[must_use]
    pub fn differing_fields(&self, other: &UrlDescriptor) -> Vec<DescriptorField> {
        let mut fields = Vec::new();
        if self.base_dn != other.base_dn {
            fields.push(DescriptorField::BaseDn);
        }
        if self.scope != other.scope {
            fields.push(DescriptorField::Scope);
        }
        if self.filter != other.filter {
            fields.push(DescriptorField::Filter);
        }
        if self.attributes != other.attributes {
            fields.push(DescriptorField::Attributes);
        }
        fields
    }
}

impl fmt::Display for UrlDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}?{}?{}?{}",
            percent_encode(&self.base_dn),
            self.attributes.join(","),
            self.scope,
            percent_encode(&self.filter)
        )
    }
}

/// Errors about search definitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlError {
    /// The requested descriptor differs from the one recorded in the store.
    #[error(
        "search conflicts with the stored one ({fields:?} differ): \
         stored {current}, requested {requested}"
    )]
    Conflict {
        /// Descriptor recorded in the store.
        current: Box<UrlDescriptor>,
        /// Descriptor the caller asked for.
        requested: Box<UrlDescriptor>,
        /// Which fields differ.
        fields: Vec<DescriptorField>,
    },

    /// A URL string could not be parsed.
    #[error("cannot parse LDAP URL {url:?}: {reason}")]
    Parse {
        /// The string supplied by the caller.
        url: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl UrlError {
    fn parse(url: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed LDAP URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUrl {
    scheme: String,
    host: Option<String>,
    descriptor: UrlDescriptor,
    extensions: Vec<String>,
}

impl LdapUrl {
    /// Parses `scheme://host/dn?attributes?scope?filter?extensions`.
    ///
    /// # Errors
    ///
    /// Returns [`UrlError::Parse`] carrying the input when the scheme is not
    /// `ldap`, `ldaps` or `ldapi`, when a component is malformed, or when
    /// percent escapes are invalid.
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| UrlError::parse(url, "missing scheme"))?;

        let scheme = scheme.to_ascii_lowercase();
        if !matches!(scheme.as_str(), "ldap" | "ldaps" | "ldapi") {
            return Err(UrlError::parse(url, format!("unsupported scheme {scheme:?}")));
        }

        let (host, query) = match rest.split_once('/') {
            Some((host, query)) => (host, query),
            None => (rest, ""),
        };
        if host.contains('?') {
            return Err(UrlError::parse(url, "search components require a '/' after the host"));
        }
        let host = if host.is_empty() {
            None
        } else {
            Some(percent_decode(host).map_err(|reason| UrlError::parse(url, reason))?)
        };

        let parts: Vec<&str> = query.split('?').collect();
        if parts.len() > 5 {
            return Err(UrlError::parse(url, "too many '?' separated components"));
        }
        let part = |i: usize| parts.get(i).copied().unwrap_or("");
        let decode = |raw: &str| percent_decode(raw).map_err(|reason| UrlError::parse(url, reason));

        let base_dn = decode(part(0))?;

        let mut attributes = Vec::new();
        for attr in part(1).split(',') {
            let attr = decode(attr)?;
            let attr = attr.trim();
            if attr.is_empty() {
                continue;
            }
            if !attr
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | ';' | '.' | '*' | '+'))
            {
                return Err(UrlError::parse(url, format!("invalid attribute name {attr:?}")));
            }
            attributes.push(attr.to_string());
        }

        let scope_raw = decode(part(2))?;
        let scope = Scope::parse(&scope_raw)
            .ok_or_else(|| UrlError::parse(url, format!("unknown scope {scope_raw:?}")))?;

        let filter = decode(part(3))?;
        if !filter.is_empty() {
            validate_filter(&filter).map_err(|reason| UrlError::parse(url, reason))?;
        }

        let mut extensions = Vec::new();
        for ext in part(4).split(',').filter(|e| !e.is_empty()) {
            extensions.push(decode(ext)?);
        }

        Ok(Self {
            scheme,
            host,
            descriptor: UrlDescriptor::new(base_dn, scope, filter, attributes),
            extensions,
        })
    }

    /// Returns the scheme in lowercase.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the host part, if any.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Returns the search descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &UrlDescriptor {
        &self.descriptor
    }

    /// Consumes the URL, returning its descriptor.
    #[must_use]
    pub fn into_descriptor(self) -> UrlDescriptor {
        self.descriptor
    }

    /// Returns the URL extensions, decoded.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

impl std::str::FromStr for LdapUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LdapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}",
            self.scheme,
            self.host.as_deref().map(percent_encode).unwrap_or_default(),
            self.descriptor
        )?;
        if !self.extensions.is_empty() {
            let encoded: Vec<String> = self.extensions.iter().map(|e| percent_encode(e)).collect();
            write!(f, "?{}", encoded.join(","))?;
        }
        Ok(())
    }
}

/// Checks that a filter is parenthesized and balanced.
fn validate_filter(filter: &str) -> Result<(), String> {
    if !filter.starts_with('(') || !filter.ends_with(')') {
        return Err(format!("filter {filter:?} must be enclosed in parentheses"));
    }

    let mut depth = 0usize;
    for (i, c) in filter.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced ')' at byte {i} in filter"))?;
                if depth == 0 && i + 1 != filter.len() {
                    return Err("filter has trailing text after the closing ')'".to_string());
                }
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err("unbalanced '(' in filter".to_string());
    }
    Ok(())
}

fn percent_decode(raw: &str) -> Result<String, String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| format!("invalid percent escape at byte {i}"))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|_| "percent escapes do not decode to UTF-8".to_string())
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'?' | b'%' | b'/' | b' ' | b'#' => out.push_str(&format!("%{b:02X}")),
            _ if b.is_ascii() && !b.is_ascii_control() => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_dedupes_attributes() {
        let d = UrlDescriptor::new("dc=example,dc=com", Scope::Subtree, "", ["cn", "mail", "cn"]);
        assert_eq!(d.attributes(), ["cn", "mail"]);
        assert_eq!(d.filter(), DEFAULT_FILTER);
    }

    #[test]
    fn differing_fields_lists_each_change() {
        let a = UrlDescriptor::new("dc=example,dc=com", Scope::Subtree, "(objectClass=*)", ["cn"]);
        let b = UrlDescriptor::new("dc=example,dc=com", Scope::One, "(objectClass=person)", ["cn"]);
        assert_eq!(
            a.differing_fields(&b),
            vec![DescriptorField::Scope, DescriptorField::Filter]
        );
        assert!(a.differing_fields(&a).is_empty());
    }

    #[test]
    fn parse_full_url() {
        let url = LdapUrl::parse(
            "ldap://ldap.example.com:389/ou=People,dc=example,dc=com?uid,cn,mail?sub?(objectClass=posixAccount)",
        )
        .unwrap();

        assert_eq!(url.scheme(), "ldap");
        assert_eq!(url.host(), Some("ldap.example.com:389"));
        let d = url.descriptor();
        assert_eq!(d.base_dn(), "ou=People,dc=example,dc=com");
        assert_eq!(d.attributes(), ["uid", "cn", "mail"]);
        assert_eq!(d.scope(), Scope::Subtree);
        assert_eq!(d.filter(), "(objectClass=posixAccount)");
    }

    #[test]
    fn parse_defaults() {
        let url = LdapUrl::parse("ldaps://host/dc=example,dc=com").unwrap();
        let d = url.descriptor();
        assert_eq!(d.scope(), Scope::Base);
        assert_eq!(d.filter(), DEFAULT_FILTER);
        assert!(d.attributes().is_empty());
    }

    #[test]
    fn parse_percent_escapes() {
        let url = LdapUrl::parse("ldapi://%2Fvar%2Frun%2Fslapd.sock/dc=ex%20ample??one").unwrap();
        assert_eq!(url.host(), Some("/var/run/slapd.sock"));
        assert_eq!(url.descriptor().base_dn(), "dc=ex ample");
        assert_eq!(url.descriptor().scope(), Scope::One);
    }

    #[test]
    fn parse_rejects_bad_input() {
        let cases = [
            "http://host/dc=example",
            "no-scheme-here",
            "ldap://host/dc=example??bogus",
            "ldap://host/dc=example???objectClass=*",
            "ldap://host/dc=example???(cn=a))",
            "ldap://host/dc=ex%zz",
            "ldap://host/a?b?base?(x=y)?ext?extra",
            "ldap://host/dc=example?c n",
        ];
        for case in cases {
            match LdapUrl::parse(case) {
                Err(UrlError::Parse { url, .. }) => assert_eq!(url, case),
                other => panic!("expected parse error for {case}, got {other:?}"),
            }
        }
    }

    #[test]
    fn display_round_trips() {
        let text = "ldap://host/dc=example,dc=com?cn,mail?sub?(objectClass=*)";
        let url: LdapUrl = text.parse().unwrap();
        let again = LdapUrl::parse(&url.to_string()).unwrap();
        assert_eq!(url, again);
    }
}
