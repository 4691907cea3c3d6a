//! Inbound bearer-token verification
//!
//! The server middleware asks a [`TokenVerifier`] about every bearer token
//! sent to an agent whose card declares a security scheme. Google access
//! tokens are opaque, so [`GoogleTokenInfoVerifier`] checks them against the
//! tokeninfo endpoint: the token must be live, issued to the expected client
//! and carry the required scopes. Accepted tokens are remembered for a
//! short while so a conversation does not cost one tokeninfo call per turn.

use async_trait::async_trait;
use axum::http::StatusCode;
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use tandem_core::config::{AuthConfig, VerifierKind};

use crate::protocol::AgentCard;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Token rejected: {0}")]
    Rejected(String),
    #[error("Token expired")]
    Expired,
    #[error("Token audience '{actual}' does not match '{expected}'")]
    AudienceMismatch { expected: String, actual: String },
    #[error("Token lacks required scope {0}")]
    InsufficientScope(String),
    #[error("Token verification failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AuthError {
    /// 401 when no credentials were presented, 403 when they were refused
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken => StatusCode::UNAUTHORIZED,
            _ => StatusCode::FORBIDDEN,
        }
    }
}

/// What a verifier learned about a token
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenInfo {
    pub audience: Option<String>,
    pub scopes: Vec<String>,
    pub expires_in: Option<u64>,
    pub email: Option<String>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    fn name(&self) -> &str;

    async fn verify(&self, token: &str) -> Result<TokenInfo, AuthError>;
}

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Verifies Google OAuth2 access tokens through the tokeninfo endpoint
pub struct GoogleTokenInfoVerifier {
    http: Client,
    tokeninfo_url: String,
    audience: Option<String>,
    required_scopes: Vec<String>,
    /// Accepted tokens and when their verdict lapses
    accepted: DashMap<String, (Instant, TokenInfo)>,
    cache_ttl: Duration,
}

/// tokeninfo reports numbers as strings
#[derive(Debug, Deserialize)]
struct TokenInfoResponse {
    #[serde(default)]
    aud: Option<String>,
    #[serde(default)]
    azp: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    #[serde(default)]
    email: Option<String>,
}

impl GoogleTokenInfoVerifier {
    pub fn new(tokeninfo_url: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            tokeninfo_url: tokeninfo_url.into(),
            audience: None,
            required_scopes: Vec::new(),
            accepted: DashMap::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// How long an accepted token skips tokeninfo. Zero disables the cache.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    fn cached(&self, token: &str) -> Option<TokenInfo> {
        let entry = self.accepted.get(token)?;
        let (valid_until, info) = entry.value();
        (Instant::now() < *valid_until).then(|| info.clone())
    }

    fn remember(&self, token: &str, info: &TokenInfo) {
        if self.cache_ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        // Never trust a verdict past the token's own lifetime
        let ttl = info
            .expires_in
            .map(|secs| self.cache_ttl.min(Duration::from_secs(secs)))
            .unwrap_or(self.cache_ttl);
        self.accepted.retain(|_, (valid_until, _)| *valid_until > now);
        self.accepted.insert(token.to_string(), (now + ttl, info.clone()));
    }

    /// Accept only tokens issued to this client id (`aud` or `azp`)
    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience.filter(|a| !a.is_empty());
        self
    }

    pub fn with_required_scopes(mut self, scopes: Vec<String>) -> Self {
        self.required_scopes = scopes;
        self
    }

    async fn introspect(&self, token: &str) -> Result<TokenInfo, AuthError> {
        let resp = self
            .http
            .get(&self.tokeninfo_url)
            .query(&[("access_token", token)])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            debug!("tokeninfo refused {}: HTTP {} {}", redact_token(token), status, body);
            return Err(AuthError::Rejected(format!("HTTP {}", status.as_u16())));
        }

        let info: TokenInfoResponse = resp.json().await?;
        let expires_in = info.expires_in.as_ref().and_then(parse_seconds);
        if expires_in == Some(0) {
            return Err(AuthError::Expired);
        }

        if let Some(expected) = &self.audience {
            let matches = [&info.aud, &info.azp]
                .into_iter()
                .flatten()
                .any(|a| a == expected);
            if !matches {
                return Err(AuthError::AudienceMismatch {
                    expected: expected.clone(),
                    actual: info.aud.clone().unwrap_or_default(),
                });
            }
        }

        let scopes: Vec<String> = info
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect();
        if let Some(missing) = self
            .required_scopes
            .iter()
            .find(|required| !scopes.contains(required))
        {
            return Err(AuthError::InsufficientScope(missing.clone()));
        }

        Ok(TokenInfo {
            audience: info.aud,
            scopes,
            expires_in,
            email: info.email,
        })
    }
}

fn parse_seconds(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}


#[async_trait]
impl TokenVerifier for GoogleTokenInfoVerifier {
    fn name(&self) -> &str {
        "google"
    }

    async fn verify(&self, token: &str) -> Result<TokenInfo, AuthError> {
        if let Some(info) = self.cached(token) {
            debug!("Token {} accepted from cache", redact_token(token));
            return Ok(info);
        }
        let info = self.introspect(token).await?;
        self.remember(token, &info);
        Ok(info)
    }
}

/// Accepts every token without checking it. Only for local development.
pub struct NoVerification;

impl NoVerification {
    pub fn new() -> Self {
        warn!("Inbound bearer tokens will NOT be verified (auth.verifier = \"none\")");
        Self
    }
}

impl Default for NoVerification {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenVerifier for NoVerification {
    fn name(&self) -> &str {
        "none"
    }

    async fn verify(&self, _token: &str) -> Result<TokenInfo, AuthError> {
        Ok(TokenInfo::default())
    }
}

/// Verifier for the agent behind `card`. Google verification requires every
/// scope the card's authorization-code flow declares.
pub fn verifier_from_config(config: &AuthConfig, card: &AgentCard) -> Arc<dyn TokenVerifier> {
    match config.verifier {
        VerifierKind::None => Arc::new(NoVerification::new()),
        VerifierKind::Google => {
            let scopes: Vec<String> = card
                .authorization_code_flow()
                .map(|flow| flow.scopes.keys().cloned().collect())
                .unwrap_or_default();
            info!(
                "Verifying bearer tokens via {} ({} required scopes)",
                config.tokeninfo_url,
                scopes.len()
            );
            Arc::new(
                GoogleTokenInfoVerifier::new(config.tokeninfo_url.clone())
                    .with_audience(config.audience.clone())
                    .with_required_scopes(scopes),
            )
        }
    }
}

/// Short, log-safe form of a token
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    if prefix.len() < token.len() {
        format!("{}…", prefix)
    } else {
        "[REDACTED]".to_string()
    }
}
