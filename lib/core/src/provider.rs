//! Provider keys.
//!
//! A provider is one external data source (a CRM, a social network, a banking
//! aggregator). At most one integration is connected per provider, so the
//! provider key doubles as the integration key everywhere in pons.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a provider key is empty or malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidProviderType {
    /// The rejected input.
    pub input: String,
}

impl fmt::Display for InvalidProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid provider type: {:?}", self.input)
    }
}

impl std::error::Error for InvalidProviderType {}

/// Key identifying a provider, e.g. `hubspot`, `twitter` or `plaid`.
///
/// Keys are normalised to trimmed lowercase and may contain ASCII letters,
/// digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderType(String);

impl ProviderType {
    /// Parses and normalises a provider key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or contains characters other than
    /// ASCII alphanumerics, `-` and `_`.
    pub fn new(key: impl AsRef<str>) -> Result<Self, InvalidProviderType> {
        let normalised = key.as_ref().trim().to_ascii_lowercase();
        let valid = !normalised.is_empty()
            && normalised
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if valid {
            Ok(Self(normalised))
        } else {
            Err(InvalidProviderType {
                input: key.as_ref().to_string(),
            })
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProviderType {
    type Err = InvalidProviderType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProviderType {
    type Error = InvalidProviderType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProviderType> for String {
    fn from(provider: ProviderType) -> Self {
        provider.0
    }
}

impl AsRef<str> for ProviderType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
