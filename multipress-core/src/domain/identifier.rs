//! Instance identifier

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, human-readable token naming one managed instance (e.g. `user7`)
///
/// Identifiers key the credential mapping of the configuration record and
/// name everything derived from an instance: container, volume, compose file
/// and URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Creates an identifier from any string-like value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Builds `prefix` followed by the decimal `number`
    pub fn with_suffix(prefix: &str, number: u64) -> Self {
        Self(format!("{}{}", prefix, number))
    }

    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the numeric suffix following `prefix`
    ///
    /// Returns `None` when the identifier does not start with `prefix` or
    /// when the remainder is not a plain decimal number.
    pub fn numeric_suffix(&self, prefix: &str) -> Option<u64> {
        let rest = self.0.strip_prefix(prefix)?;
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
