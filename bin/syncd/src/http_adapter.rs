//! Adapter for user-supplied JSON endpoints.
//!
//! The `custom` provider polls one HTTP endpoint that returns a JSON
//! document. `connect` checks the endpoint with the configured credentials,
//! `sync` fetches the document and keeps it in memory, and `insights` hands
//! the last document to the AI layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pons_core::ProviderType;
use pons_integration::{
    Adapter, AdapterCapability, AdapterError, AdapterInfo, CredentialData, IntegrationConfig,
};
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{Value as JsonValue, json};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, instrument};

/// Provider key served by [`HttpEndpointAdapter`].
pub const CUSTOM_PROVIDER: &str = "custom";

const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone)]
struct Connection {
    endpoint: String,
    credentials: CredentialData,
    document: Option<JsonValue>,
    synced_at: Option<DateTime<Utc>>,
}

/// Polls a JSON endpoint.
pub struct HttpEndpointAdapter {
    provider: ProviderType,
    client: reqwest::Client,
    connection: RwLock<Option<Connection>>,
}

impl HttpEndpointAdapter {
    /// Creates a disconnected adapter that issues requests through `client`.
    #[must_use]
    pub fn new(provider: ProviderType, client: reqwest::Client) -> Self {
        Self {
            provider,
            client,
            connection: RwLock::new(None),
        }
    }

    fn current(&self) -> Option<Connection> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn fetch(
        &self,
        endpoint: &str,
        credentials: &CredentialData,
    ) -> Result<Response, AdapterError> {
        let request = authorize(self.client.get(endpoint), credentials);
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                AdapterError::Timeout
            } else {
                AdapterError::ConnectionFailed {
                    reason: e.to_string(),
                }
            }
        })
    }
}

fn authorize(request: RequestBuilder, credentials: &CredentialData) -> RequestBuilder {
    match credentials {
        CredentialData::Oauth2 { access_token, .. } => request.bearer_auth(access_token),
        CredentialData::BearerToken { token } => request.bearer_auth(token),
        CredentialData::ApiKey { key, header_name } => request.header(
            header_name.as_deref().unwrap_or(DEFAULT_API_KEY_HEADER),
            key,
        ),
        CredentialData::BasicAuth { username, password } => {
            request.basic_auth(username, Some(password))
        }
        CredentialData::Custom { .. } => request,
    }
}

fn retry_after_ms(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|seconds| seconds.saturating_mul(1000))
}

#[async_trait]
impl Adapter for HttpEndpointAdapter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo::new(self.provider.clone(), "Custom endpoint")
            .with_description("Polls a JSON document from a user-supplied URL")
            .with_capability(AdapterCapability::Sync)
            .with_capability(AdapterCapability::Insights)
    }

    #[instrument(skip(self, config), fields(provider = %config.provider()))]
    async fn connect(&self, config: &IntegrationConfig) -> Result<(), AdapterError> {
        if config.provider() != &self.provider {
            return Err(AdapterError::ProviderMismatch {
                expected: self.provider.clone(),
                actual: config.provider().clone(),
            });
        }
        let endpoint = config
            .endpoint()
            .ok_or_else(|| AdapterError::ConnectionFailed {
                reason: "no endpoint configured".to_string(),
            })?
            .to_string();

        let response = self.fetch(&endpoint, config.credentials()).await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AdapterError::AuthenticationFailed {
                    reason: format!("endpoint answered {}", response.status()),
                });
            }
            status => {
                return Err(AdapterError::ConnectionFailed {
                    reason: format!("endpoint answered {status}"),
                });
            }
        }

        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Connection {
            endpoint,
            credentials: config.credentials().clone(),
            document: None,
            synced_at: None,
        });
        debug!("endpoint reachable");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_connected(&self) -> bool {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    #[instrument(skip(self), fields(provider = %self.provider))]
    async fn sync(&self) -> Result<(), AdapterError> {
        let connection = self.current().ok_or(AdapterError::NotConnected)?;
        let response = self
            .fetch(&connection.endpoint, &connection.credentials)
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AdapterError::RateLimited {
                retry_after_ms: retry_after_ms(&response),
            });
        }
        if !status.is_success() {
            return Err(AdapterError::SyncFailed {
                reason: format!("endpoint answered {status}"),
            });
        }
        let document: JsonValue =
            response
                .json()
                .await
                .map_err(|e| AdapterError::ProtocolError {
                    reason: e.to_string(),
                })?;

        let mut guard = self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // A disconnect while the request was in flight wins.
        if let Some(current) = guard.as_mut() {
            current.document = Some(document);
            current.synced_at = Some(Utc::now());
        }
        debug!("endpoint document refreshed");
        Ok(())
    }

    async fn insights(&self) -> Result<JsonValue, AdapterError> {
        let connection = self.current().ok_or(AdapterError::NotConnected)?;
        Ok(json!({
            "endpoint": connection.endpoint,
            "synced_at": connection.synced_at,
            "document": connection.document,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter() -> HttpEndpointAdapter {
        HttpEndpointAdapter::new(
            ProviderType::new(CUSTOM_PROVIDER).expect("valid"),
            reqwest::Client::new(),
        )
    }

    fn config(server: &MockServer, credentials: CredentialData) -> IntegrationConfig {
        IntegrationConfig::new(ProviderType::new(CUSTOM_PROVIDER).expect("valid"), credentials)
            .with_endpoint(format!("{}/feed", server.uri()))
    }

    #[tokio::test]
    async fn connect_then_sync_keeps_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [1, 2]})))
            .mount(&server)
            .await;

        let adapter = adapter();
        adapter
            .connect(&config(&server, CredentialData::bearer("secret")))
            .await
            .expect("connect");
        adapter.sync().await.expect("sync");

        let insights = adapter.insights().await.expect("insights");
        assert_eq!(insights["document"]["items"][1], 2);
        assert!(insights["synced_at"].is_string());
    }

    #[tokio::test]
    async fn api_key_goes_in_named_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("x-feed-token", "k-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let credentials = CredentialData::ApiKey {
            key: "k-123".to_string(),
            header_name: Some("X-Feed-Token".to_string()),
        };
        adapter()
            .connect(&config(&server, credentials))
            .await
            .expect("connect with header");
    }

    #[tokio::test]
    async fn rejected_credentials_are_authentication_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let adapter = adapter();
        let err = adapter
            .connect(&config(&server, CredentialData::bearer("expired")))
            .await
            .expect_err("401");

        assert!(matches!(err, AdapterError::AuthenticationFailed { .. }));
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn missing_endpoint_fails_connect() {
        let config = IntegrationConfig::new(
            ProviderType::new(CUSTOM_PROVIDER).expect("valid"),
            CredentialData::bearer("t"),
        );
        let err = adapter().connect(&config).await.expect_err("no endpoint");
        assert!(err.to_string().contains("no endpoint configured"));
    }

    #[tokio::test]
    async fn throttled_sync_reports_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let adapter = adapter();
        adapter
            .connect(&config(&server, CredentialData::bearer("t")))
            .await
            .expect("connect");
        let err = adapter.sync().await.expect_err("throttled");

        assert_eq!(
            err,
            AdapterError::RateLimited {
                retry_after_ms: Some(7000)
            }
        );
    }

    #[tokio::test]
    async fn non_json_body_is_a_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let adapter = adapter();
        adapter
            .connect(&config(&server, CredentialData::bearer("t")))
            .await
            .expect("connect");
        let err = adapter.sync().await.expect_err("not json");

        assert!(matches!(err, AdapterError::ProtocolError { .. }));
    }

    #[tokio::test]
    async fn sync_requires_connection() {
        assert_eq!(adapter().sync().await, Err(AdapterError::NotConnected));
        assert_eq!(
            adapter().insights().await.expect_err("not connected"),
            AdapterError::NotConnected
        );
    }
}
