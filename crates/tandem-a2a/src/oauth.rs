//! OAuth2 installed-app flow (authorization code with a loopback redirect)
//!
//! 1. bind `localhost:<redirect_port>` and serve the redirect URI
//! 2. open the consent page in the browser
//! 3. wait for the redirect carrying `code` and `state`
//! 4. exchange the code at the token endpoint

use anyhow::{Context, Result, anyhow, bail};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use tandem_core::config::OAuthConfig;

use crate::protocol::AuthorizationCodeFlow;

const SUCCESS_PAGE: &str = "The authentication flow has completed. You may close this window.";

/// Token endpoint response
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

/// Client registration and endpoints for one grant
#[derive(Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub redirect_port: u16,
    pub scopes: Vec<String>,
}

impl From<&OAuthConfig> for OAuthClient {
    fn from(config: &OAuthConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            auth_uri: config.auth_uri.clone(),
            token_uri: config.token_uri.clone(),
            redirect_port: config.redirect_port,
            scopes: config.scopes.clone(),
        }
    }
}

impl OAuthClient {
    /// Endpoints and scopes declared by an agent card replace the
    /// configured ones; the client registration stays.
    pub fn for_flow(&self, flow: &AuthorizationCodeFlow) -> Self {
        let mut client = self.clone();
        client.auth_uri = flow.authorization_url.clone();
        client.token_uri = flow.token_url.clone();
        if !flow.scopes.is_empty() {
            client.scopes = flow.scopes.keys().cloned().collect();
        }
        client
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.redirect_port)
    }

    pub fn authorization_url(&self, state: &str) -> Result<Url> {
        let redirect_uri = self.redirect_uri();
        let scope = self.scopes.join(" ");
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("state", state),
                ("access_type", "offline"),
            ],
        )
        .with_context(|| format!("Invalid authorization URI: {}", self.auth_uri))
    }
}

/// Runs the interactive grant
pub struct InstalledAppFlow {
    http: Client,
    client: OAuthClient,
    open_browser: bool,
}

impl InstalledAppFlow {
    pub fn new(client: OAuthClient) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            client,
            open_browser: true,
        }
    }

    pub fn with_open_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    pub fn client(&self) -> &OAuthClient {
        &self.client
    }

    /// Full grant against `client`, blocking until the user consents
    pub async fn run_local_server(&self, client: &OAuthClient) -> Result<OAuthToken> {
        if client.client_id.is_empty() {
            bail!("OAuth client id not configured (set OAUTH_CLIENT_ID or [oauth] client_id)");
        }

        let listener = bind_redirect_listener(client.redirect_port).await?;

        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = client.authorization_url(&state)?;
        info!("Please visit this URL to authorize this application: {}", url);
        if self.open_browser {
            if let Err(e) = open::that(url.as_str()) {
                warn!("Could not open a browser: {}", e);
            }
        }

        let code = wait_for_redirect(listener, &state).await?;
        debug!("Authorization code received");
        self.exchange_code(client, &code).await
    }

    pub async fn exchange_code(&self, client: &OAuthClient, code: &str) -> Result<OAuthToken> {
        let redirect_uri = client.redirect_uri();
        let resp = self
            .http
            .post(&client.token_uri)
            .form(&[
                ("code", code),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to reach token endpoint {}", client.token_uri))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Token exchange failed: HTTP {} — {}", status, body));
        }

        let token: OAuthToken = resp.json().await.context("Failed to parse token response")?;
        info!("OAuth token received (expires in {:?}s)", token.expires_in);
        Ok(token)
    }
}

/// Listen on the host name the redirect URI advertises, so the browser
/// reaches us whichever address family `localhost` resolves to first.
pub async fn bind_redirect_listener(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("localhost", port))
        .await
        .with_context(|| format!("Failed to bind OAuth redirect listener on localhost:{}", port))
}

/// Authorization response parameters on the redirect
#[derive(Debug, Deserialize)]
struct RedirectQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
struct RedirectState {
    expected_state: Arc<str>,
    outcome: Arc<Mutex<Option<oneshot::Sender<Result<String>>>>>,
}

impl RedirectState {
    fn finish(&self, outcome: Result<String>) {
        let sender = self.outcome.lock().ok().and_then(|mut slot| slot.take());
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!("OAuth redirect arrived after the grant finished"),
        }
    }
}

async fn handle_redirect(
    State(state): State<RedirectState>,
    Query(query): Query<RedirectQuery>,
) -> (StatusCode, String) {
    if let Some(error) = query.error {
        let reply = format!("Authorization failed: {}", error);
        state.finish(Err(anyhow!("Authorization denied: {}", error)));
        return (StatusCode::BAD_REQUEST, reply);
    }
    let Some(code) = query.code else {
        return (StatusCode::NOT_FOUND, "Not found".to_string());
    };
    if query.state.as_deref() != Some(&*state.expected_state) {
        state.finish(Err(anyhow!("OAuth state mismatch in redirect")));
        return (StatusCode::BAD_REQUEST, "State mismatch".to_string());
    }
    state.finish(Ok(code));
    (StatusCode::OK, SUCCESS_PAGE.to_string())
}

/// Serve the redirect URI on `listener` until a request carries the
/// authorization response. Requests without `code` or `error` (favicon and
/// preconnect probes) get a 404 and the wait goes on.
pub async fn wait_for_redirect(listener: TcpListener, expected_state: &str) -> Result<String> {
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let state = RedirectState {
        expected_state: Arc::from(expected_state),
        outcome: Arc::new(Mutex::new(Some(outcome_tx))),
    };
    let app = Router::new()
        .route("/", get(handle_redirect))
        .with_state(state);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    let outcome = outcome_rx.await.context("OAuth redirect listener stopped")?;
    let _ = stop_tx.send(());
    // Let the browser's response flush; idle sockets must not hold the grant
    match tokio::time::timeout(Duration::from_secs(5), server).await {
        Ok(Ok(Err(e))) => warn!("OAuth redirect listener failed: {}", e),
        Ok(Err(e)) => warn!("OAuth redirect listener panicked: {}", e),
        Err(_) => debug!("OAuth redirect listener still draining connections"),
        Ok(Ok(Ok(()))) => {}
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> OAuthClient {
        OAuthClient {
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".into(),
            token_uri: "https://oauth2.googleapis.com/token".into(),
            redirect_port: 10010,
            scopes: vec![
                "https://www.googleapis.com/auth/calendar".into(),
                "https://www.googleapis.com/auth/calendar.events".into(),
            ],
        }
    }

    async fn redirect(port: u16, target: &str) -> (u16, String) {
        let resp = reqwest::get(format!("http://127.0.0.1:{}{}", port, target))
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.text().await.unwrap())
    }

    #[test]
    fn test_authorization_url() {
        let url = client().authorization_url("xyz").unwrap();
        let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["redirect_uri"], "http://localhost:10010/");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["state"], "xyz");
        assert!(pairs["scope"].contains("calendar.events"));
    }

    #[test]
    fn test_card_flow_overrides_endpoints_and_scopes() {
        let mut scopes = BTreeMap::new();
        scopes.insert("https://www.googleapis.com/auth/calendar".to_string(), "Calendar".to_string());
        let flow = AuthorizationCodeFlow {
            authorization_url: "https://idp.example.com/auth".into(),
            token_url: "https://idp.example.com/token".into(),
            refresh_url: None,
            scopes,
        };
        let derived = client().for_flow(&flow);
        assert_eq!(derived.auth_uri, "https://idp.example.com/auth");
        assert_eq!(derived.token_uri, "https://idp.example.com/token");
        assert_eq!(derived.scopes, vec!["https://www.googleapis.com/auth/calendar"]);
        assert_eq!(derived.client_id, "client-1");
    }

    #[tokio::test]
    async fn test_wait_for_redirect_skips_probes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let waiter = tokio::spawn(async move { wait_for_redirect(listener, "s1").await });
        assert_eq!(redirect(port, "/favicon.ico").await.0, 404);
        assert_eq!(redirect(port, "/").await.0, 404);
        let (status, body) = redirect(port, "/?state=s1&code=4%2F0Abc&scope=calendar").await;
        assert_eq!(status, 200);
        assert_eq!(body, SUCCESS_PAGE);

        assert_eq!(waiter.await.unwrap().unwrap(), "4/0Abc");
    }

    #[tokio::test]
    async fn test_redirect_listener_binds_loopback() {
        let listener = bind_redirect_listener(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());

        let port = addr.port();
        let waiter = tokio::spawn(async move { wait_for_redirect(listener, "s1").await });
        let resp = reqwest::get(format!("http://localhost:{}/?state=s1&code=xyz", port))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(waiter.await.unwrap().unwrap(), "xyz");
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_redirect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let waiter = tokio::spawn(async move { wait_for_redirect(listener, "s1").await });
        // A browser preconnect: opened, never written to
        let _idle = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        let answered = tokio::time::timeout(
            Duration::from_secs(3),
            redirect(port, "/?state=s1&code=abc"),
        )
        .await
        .expect("redirect answered while another socket sits idle");
        assert_eq!(answered.0, 200);

        let code = tokio::time::timeout(Duration::from_secs(10), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(code, "abc");
    }

    #[tokio::test]
    async fn test_wait_for_redirect_rejects_state_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let waiter = tokio::spawn(async move { wait_for_redirect(listener, "expected").await });
        assert_eq!(redirect(port, "/?state=forged&code=abc").await.0, 400);
        assert!(waiter.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_wait_for_redirect_reports_denial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let waiter = tokio::spawn(async move { wait_for_redirect(listener, "s").await });
        let (status, body) = redirect(port, "/?error=access_denied&state=s").await;
        assert_eq!(status, 400);
        assert!(body.contains("access_denied"));
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=4%2F0Abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.token",
                "token_type": "Bearer",
                "expires_in": 3599,
                "refresh_token": "1//refresh",
                "scope": "https://www.googleapis.com/auth/calendar"
            })))
            .mount(&server)
            .await;

        let mut c = client();
        c.token_uri = format!("{}/token", server.uri());
        let flow = InstalledAppFlow::new(c.clone()).with_open_browser(false);
        let token = flow.exchange_code(&c, "4/0Abc").await.unwrap();
        assert_eq!(token.access_token, "ya29.token");
        assert_eq!(token.refresh_token.as_deref(), Some("1//refresh"));
        assert!(!format!("{:?}", token).contains("ya29.token"));
    }

    #[tokio::test]
    async fn test_exchange_code_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let mut c = client();
        c.token_uri = format!("{}/token", server.uri());
        let flow = InstalledAppFlow::new(c.clone());
        let err = flow.exchange_code(&c, "bad").await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_missing_client_id_fails_fast() {
        let mut c = client();
        c.client_id.clear();
        let flow = InstalledAppFlow::new(c.clone()).with_open_browser(false);
        assert!(flow.run_local_server(&c).await.is_err());
    }
}
