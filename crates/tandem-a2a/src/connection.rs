//! Outbound connection to one remote agent, with the auth hook applied

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::A2aClient;
use crate::credentials::CredentialProvider;
use crate::protocol::{AgentCard, Message, MessageSendParams, SendMessageResult, Task};

/// Decides whether a request to `card`'s agent carries a bearer token
pub struct AgentAuth {
    card: AgentCard,
    credentials: Arc<CredentialProvider>,
}

impl AgentAuth {
    pub fn new(card: AgentCard, credentials: Arc<CredentialProvider>) -> Self {
        Self { card, credentials }
    }

    /// `None` for agents without a security scheme; otherwise the cached
    /// token, running the grant once if nothing is cached yet.
    pub async fn authorize(&self) -> Result<Option<String>> {
        if !self.card.requires_auth() {
            return Ok(None);
        }
        let token = self
            .credentials
            .token(self.card.authorization_code_flow())
            .await?;
        Ok(Some(token))
    }
}

pub struct RemoteAgentConnection {
    client: A2aClient,
    auth: AgentAuth,
}

impl RemoteAgentConnection {
    pub fn new(client: A2aClient, card: AgentCard, credentials: Arc<CredentialProvider>) -> Self {
        Self {
            client,
            auth: AgentAuth::new(card, credentials),
        }
    }

    /// Resolve the card at `base_url`, then wrap it
    pub async fn connect(base_url: &str, credentials: Arc<CredentialProvider>) -> Result<Self> {
        let client = A2aClient::new();
        let card = client.fetch_agent_card(base_url, None).await?;
        info!("Connected to remote agent '{}' at {}", card.name, card.url);
        Ok(Self::new(client, card, credentials))
    }

    pub fn card(&self) -> &AgentCard {
        &self.auth.card
    }

    pub fn name(&self) -> &str {
        &self.auth.card.name
    }

    pub async fn send_message(&self, message: Message) -> Result<SendMessageResult> {
        let token = self.auth.authorize().await?;
        debug!(
            "Sending message {} to '{}' (authenticated: {})",
            message.message_id,
            self.name(),
            token.is_some()
        );
        let params = MessageSendParams {
            message,
            configuration: None,
            metadata: None,
        };
        self.client
            .send_message(&self.auth.card.url, token.as_deref(), params)
            .await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        let token = self.auth.authorize().await?;
        self.client
            .get_task(&self.auth.card.url, token.as_deref(), task_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        AgentCapabilities, AuthorizationCodeFlow, GOOGLE_SCHEME, OAuthFlows, SecurityScheme,
    };
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, header_exists, method};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn card(url: &str, secured: bool) -> AgentCard {
        let mut security_schemes = BTreeMap::new();
        if secured {
            security_schemes.insert(
                GOOGLE_SCHEME.to_string(),
                SecurityScheme::OAuth2 {
                    flows: OAuthFlows {
                        authorization_code: Some(AuthorizationCodeFlow {
                            authorization_url: "https://accounts.google.com/o/oauth2/auth".into(),
                            token_url: "https://oauth2.googleapis.com/token".into(),
                            refresh_url: None,
                            scopes: BTreeMap::new(),
                        }),
                        client_credentials: None,
                    },
                    description: None,
                },
            );
        }
        AgentCard {
            name: "Calendar Agent".into(),
            description: "calendar".into(),
            url: url.into(),
            version: "1.0.0".into(),
            protocol_version: crate::protocol::PROTOCOL_VERSION.into(),
            default_input_modes: vec!["text".into()],
            default_output_modes: vec!["text".into()],
            capabilities: AgentCapabilities::default(),
            skills: Vec::new(),
            security_schemes,
            security: Vec::new(),
        }
    }

    fn completed() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {"kind": "message", "role": "agent", "messageId": "m",
                       "parts": [{"kind": "text", "text": "ok"}]}
        }))
    }

    #[tokio::test]
    async fn test_secured_agent_gets_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer ya29.cached"))
            .respond_with(completed())
            .expect(2)
            .mount(&server)
            .await;

        let credentials = Arc::new(CredentialProvider::with_token("ya29.cached"));
        let conn = RemoteAgentConnection::new(A2aClient::new(), card(&server.uri(), true), credentials);
        assert_eq!(conn.send_message(Message::user_text("a")).await.unwrap().text(), "ok");
        assert_eq!(conn.send_message(Message::user_text("b")).await.unwrap().text(), "ok");
    }

    #[tokio::test]
    async fn test_open_agent_is_forwarded_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(move |req: &Request| {
                assert!(!req.headers.contains_key("authorization"));
                completed()
            })
            .mount(&server)
            .await;

        let credentials = Arc::new(CredentialProvider::with_token("ya29.unused"));
        let conn = RemoteAgentConnection::new(A2aClient::new(), card(&server.uri(), false), credentials);
        assert_eq!(conn.send_message(Message::user_text("hi")).await.unwrap().text(), "ok");
    }

    #[tokio::test]
    async fn test_connect_resolves_card() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::to_value(card(&server.uri(), true)).unwrap()),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header_exists("authorization"))
            .respond_with(completed())
            .mount(&server)
            .await;

        let credentials = Arc::new(CredentialProvider::with_token("ya29.x"));
        let conn = RemoteAgentConnection::connect(&server.uri(), credentials)
            .await
            .unwrap();
        assert_eq!(conn.name(), "Calendar Agent");
        assert!(conn.card().requires_auth());
        assert!(conn.send_message(Message::user_text("hi")).await.is_ok());
    }
}
