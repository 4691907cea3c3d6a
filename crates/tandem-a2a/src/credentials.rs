//! Host-side credential cache
//!
//! The first call to a protected agent runs the OAuth flow; the access
//! token is then reused for every later call in the same process.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::redact_token;
use crate::oauth::{InstalledAppFlow, OAuthToken};
use crate::protocol::AuthorizationCodeFlow;

/// Something that can produce a fresh access token
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// `flow` is the authorization-code flow declared by the target
    /// agent's card, when it declares one.
    async fn obtain(&self, flow: Option<&AuthorizationCodeFlow>) -> Result<OAuthToken>;
}

#[async_trait]
impl TokenSource for InstalledAppFlow {
    async fn obtain(&self, flow: Option<&AuthorizationCodeFlow>) -> Result<OAuthToken> {
        let client = match flow {
            Some(flow) => self.client().for_flow(flow),
            None => self.client().clone(),
        };
        self.run_local_server(&client).await
    }
}

pub struct CredentialProvider {
    source: Option<Box<dyn TokenSource>>,
    cached: Mutex<Option<String>>,
}

impl CredentialProvider {
    pub fn new(source: Box<dyn TokenSource>) -> Self {
        Self {
            source: Some(source),
            cached: Mutex::new(None),
        }
    }

    /// A provider holding a token obtained elsewhere (e.g. `--token`)
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            source: None,
            cached: Mutex::new(Some(token.into())),
        }
    }

    /// Cached token, or run the source once. The lock is held across the
    /// grant so concurrent callers share a single consent prompt.
    pub async fn token(&self, flow: Option<&AuthorizationCodeFlow>) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            debug!("Reusing cached access token {}", redact_token(token));
            return Ok(token.clone());
        }

        let Some(source) = &self.source else {
            anyhow::bail!("No access token available and no OAuth flow configured");
        };
        let token = source.obtain(flow).await?;
        info!("Obtained access token {}", redact_token(&token.access_token));
        *cached = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    pub async fn cached(&self) -> Option<String> {
        self.cached.lock().await.clone()
    }

    /// Forget the cached token so the next call re-runs the flow
    pub async fn clear(&self) {
        self.cached.lock().await.take();
    }
}
