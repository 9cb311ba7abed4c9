use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use microhost_models::{AuthConfig, OrchestratorError};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Caller identity resolved by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

/// Maps a bearer credential to a user id.
#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    /// Forbidden when the credential is rejected.
    async fn verify(&self, token: &str) -> Result<String, OrchestratorError>;
}

/// `Authorization: Bearer <t>` (or the raw header value), else `?token=<t>`.
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
        return (!token.is_empty()).then(|| token.to_string());
    }

    query.and_then(|q| {
        form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .filter(|v| !v.is_empty())
    })
}

#[derive(Debug, Deserialize)]
struct VerifyTokenResponse {
    #[serde(default)]
    valid: Option<bool>,
    user: VerifiedUser,
}

#[derive(Debug, Deserialize)]
struct VerifiedUser {
    sub: String,
}

/// Delegates to the identity service: `GET verify_url` with the token as bearer.
pub struct HttpTokenVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpTokenVerifier {
    pub fn new(config: &AuthConfig) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| OrchestratorError::Config {
                reason: format!("failed to build identity client: {e}"),
            })?;

        Ok(Self {
            client,
            verify_url: config.verify_url.clone(),
        })
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String, OrchestratorError> {
        let response = self
            .client
            .get(&self.verify_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                warn!("Identity service request failed: {}", e);
                OrchestratorError::Forbidden
            })?;

        let status = response.status();
        if !status.is_success() {
            debug!("Identity service rejected token with {}", status);
            return Err(OrchestratorError::Forbidden);
        }

        let body: VerifyTokenResponse = response.json().await.map_err(|e| {
            warn!("Unreadable identity service response: {}", e);
            OrchestratorError::Forbidden
        })?;

        if body.valid == Some(false) || body.user.sub.trim().is_empty() {
            return Err(OrchestratorError::Forbidden);
        }
        Ok(body.user.sub)
    }
}

/// Fixed token table, for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new<I, K, V>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String, OrchestratorError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(OrchestratorError::Forbidden)
    }
}
