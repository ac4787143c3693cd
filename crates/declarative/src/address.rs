//! Resource addresses (`kind.name`)

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Unique identity of a declared resource.
///
/// The kind's prefix up to the first underscore names the provider that
/// owns it (`aws_vpc` belongs to `aws`, `random_id` to `random`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddress {
    pub kind: String,
    pub name: String,
}

impl ResourceAddress {
    /// Create an address, validating both identifiers.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        let name = name.into();
        if !is_identifier(&kind) || !is_identifier(&name) {
            return Err(Error::InvalidAddress(format!("{kind}.{name}")));
        }
        Ok(Self { kind, name })
    }

    /// Provider prefix of the kind.
    pub fn provider_prefix(&self) -> &str {
        provider_prefix(&self.kind)
    }
}

/// Provider prefix of a resource kind.
pub fn provider_prefix(kind: &str) -> &str {
    kind.split('_').next().unwrap_or(kind)
}

/// Identifiers start with a letter or underscore and continue with
/// letters, digits, underscores or dashes.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
        Self::new(kind, name).map_err(|_| Error::InvalidAddress(s.to_string()))
    }
}

impl Serialize for ResourceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
