//! Integration configuration and credential material.
//!
//! Credential values never appear in `Debug` output or logs; only the
//! credential kind and non-secret metadata are printed.

use chrono::{DateTime, Utc};
use pons_core::ProviderType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// OAuth 2.0 tokens.
    Oauth2,
    /// API key.
    ApiKey,
    /// Username and password.
    BasicAuth,
    /// Bearer token.
    BearerToken,
    /// Provider-specific credential blob.
    Custom,
}

impl CredentialType {
    /// Returns the snake_case name of the credential kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oauth2 => "oauth2",
            Self::ApiKey => "api_key",
            Self::BasicAuth => "basic_auth",
            Self::BearerToken => "bearer_token",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential material for one provider.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialData {
    /// OAuth 2.0 tokens.
    Oauth2 {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
        #[serde(default)]
        scope: Option<String>,
    },
    /// API key.
    ApiKey {
        key: String,
        #[serde(default)]
        header_name: Option<String>,
    },
    /// Basic authentication.
    BasicAuth { username: String, password: String },
    /// Bearer token.
    BearerToken { token: String },
    /// Provider-specific credential data.
    Custom { data: serde_json::Value },
}

impl CredentialData {
    /// Creates OAuth2 credential data.
    #[must_use]
    pub fn oauth2(access_token: impl Into<String>) -> Self {
        Self::Oauth2 {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            scope: None,
        }
    }

    /// Creates API key credential data.
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey {
            key: key.into(),
            header_name: None,
        }
    }

    /// Creates basic auth credential data.
    #[must_use]
    pub fn basic_auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::BasicAuth {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates bearer token credential data.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::BearerToken {
            token: token.into(),
        }
    }

    /// Returns the credential type.
    #[must_use]
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Oauth2 { .. } => CredentialType::Oauth2,
            Self::ApiKey { .. } => CredentialType::ApiKey,
            Self::BasicAuth { .. } => CredentialType::BasicAuth,
            Self::BearerToken { .. } => CredentialType::BearerToken,
            Self::Custom { .. } => CredentialType::Custom,
        }
    }

    /// Returns the first required field that is blank, if any.
    #[must_use]
    pub fn missing_field(&self) -> Option<&'static str> {
        let blank = |value: &str| value.trim().is_empty();
        match self {
            Self::Oauth2 { access_token, .. } if blank(access_token) => Some("access_token"),
            Self::ApiKey { key, .. } if blank(key) => Some("key"),
            Self::BasicAuth { username, .. } if blank(username) => Some("username"),
            Self::BasicAuth { password, .. } if password.is_empty() => Some("password"),
            Self::BearerToken { token } if blank(token) => Some("token"),
            Self::Custom { data } if data.is_null() => Some("data"),
            _ => None,
        }
    }

    /// Returns the value for an `Authorization` header, when the credential
    /// kind maps onto one.
    #[must_use]
    pub fn authorization_header(&self) -> Option<String> {
        match self {
            Self::Oauth2 { access_token, .. } => Some(format!("Bearer {access_token}")),
            Self::BearerToken { token } => Some(format!("Bearer {token}")),
            _ => None,
        }
    }
}

impl fmt::Debug for CredentialData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const REDACTED: &str = "<redacted>";
        match self {
            Self::Oauth2 {
                refresh_token,
                expires_at,
                scope,
                ..
            } => f
                .debug_struct("Oauth2")
                .field("access_token", &REDACTED)
                .field("refresh_token", &refresh_token.as_ref().map(|_| REDACTED))
                .field("expires_at", expires_at)
                .field("scope", scope)
                .finish(),
            Self::ApiKey { header_name, .. } => f
                .debug_struct("ApiKey")
                .field("key", &REDACTED)
                .field("header_name", header_name)
                .finish(),
            Self::BasicAuth { username, .. } => f
                .debug_struct("BasicAuth")
                .field("username", username)
                .field("password", &REDACTED)
                .finish(),
            Self::BearerToken { .. } => f
                .debug_struct("BearerToken")
                .field("token", &REDACTED)
                .finish(),
            Self::Custom { .. } => f.debug_struct("Custom").field("data", &REDACTED).finish(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Configuration for one connected provider.
///
/// Immutable once built; reconnecting replaces the whole config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    provider: ProviderType,
    credentials: CredentialData,
    /// Base URL for providers that are reached through a user-supplied
    /// endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    /// Disabled integrations stay connected but are skipped by sync cycles.
    #[serde(default = "default_enabled")]
    enabled: bool,
}

impl IntegrationConfig {
    /// Creates an enabled config with no custom endpoint.
    #[must_use]
    pub fn new(provider: ProviderType, credentials: CredentialData) -> Self {
        Self {
            provider,
            credentials,
            endpoint: None,
            enabled: true,
        }
    }

    /// Sets the provider endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets whether sync cycles include this integration.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the provider key.
    #[must_use]
    pub fn provider(&self) -> &ProviderType {
        &self.provider
    }

    /// Returns the credential material.
    #[must_use]
    pub fn credentials(&self) -> &CredentialData {
        &self.credentials
    }

    /// Returns the provider endpoint, if one was configured.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Returns whether sync cycles include this integration.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(key: &str) -> ProviderType {
        ProviderType::new(key).expect("valid provider")
    }

    #[test]
    fn credential_type_of_constructors() {
        assert_eq!(
            CredentialData::oauth2("t").credential_type(),
            CredentialType::Oauth2
        );
        assert_eq!(
            CredentialData::api_key("k").credential_type(),
            CredentialType::ApiKey
        );
        assert_eq!(
            CredentialData::basic_auth("u", "p").credential_type(),
            CredentialType::BasicAuth
        );
        assert_eq!(
            CredentialData::bearer("t").credential_type(),
            CredentialType::BearerToken
        );
    }

    #[test]
    fn missing_field_detects_blank_secrets() {
        assert_eq!(
            CredentialData::oauth2("  ").missing_field(),
            Some("access_token")
        );
        assert_eq!(CredentialData::api_key("").missing_field(), Some("key"));
        assert_eq!(
            CredentialData::basic_auth("alice", "").missing_field(),
            Some("password")
        );
        assert_eq!(
            CredentialData::Custom {
                data: serde_json::Value::Null
            }
            .missing_field(),
            Some("data")
        );
        assert_eq!(CredentialData::bearer("abc").missing_field(), None);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let data = CredentialData::Oauth2 {
            access_token: "super-secret-access".to_string(),
            refresh_token: Some("super-secret-refresh".to_string()),
            expires_at: None,
            scope: Some("read".to_string()),
        };
        let config = IntegrationConfig::new(provider("twitter"), data);
        let rendered = format!("{config:?}");

        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("twitter"));
    }

    #[test]
    fn authorization_header_for_token_kinds() {
        assert_eq!(
            CredentialData::bearer("abc").authorization_header().as_deref(),
            Some("Bearer abc")
        );
        assert_eq!(CredentialData::api_key("k").authorization_header(), None);
    }

    #[test]
    fn config_defaults_to_enabled_when_field_absent() {
        let json = r#"{
            "provider": "plaid",
            "credentials": {"type": "api_key", "key": "k"}
        }"#;
        let config: IntegrationConfig = serde_json::from_str(json).expect("deserialize");

        assert!(config.enabled());
        assert_eq!(config.provider().as_str(), "plaid");
        assert_eq!(config.endpoint(), None);
    }

    #[test]
    fn config_keeps_endpoint_and_enabled_flag() {
        let config = IntegrationConfig::new(provider("custom"), CredentialData::bearer("t"))
            .with_endpoint("https://example.test/feed")
            .with_enabled(false);

        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: IntegrationConfig = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(parsed.endpoint(), Some("https://example.test/feed"));
        assert!(!parsed.enabled());
    }
}
