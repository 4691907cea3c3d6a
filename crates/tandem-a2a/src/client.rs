//! A2A client: calls remote agents over JSON-RPC

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::protocol::*;

/// Stateless JSON-RPC transport; the bearer token is passed per call
#[derive(Clone)]
pub struct A2aClient {
    http: Client,
}

impl Default for A2aClient {
    fn default() -> Self {
        Self::new()
    }
}

impl A2aClient {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Fetch an agent's card from `/.well-known/agent.json`
    pub async fn fetch_agent_card(&self, base_url: &str, token: Option<&str>) -> Result<AgentCard> {
        let url = format!("{}/.well-known/agent.json", base_url.trim_end_matches('/'));
        debug!("Fetching agent card from {}", url);

        let mut req = self.http.get(&url);
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to connect to agent at {}", url))?;

        if !resp.status().is_success() {
            return Err(anyhow!("Agent card request failed: HTTP {}", resp.status()));
        }

        let card: AgentCard = resp.json().await.context("Failed to parse agent card")?;

        info!(
            "Fetched agent card: {} ({} skills, auth: {})",
            card.name,
            card.skills.len(),
            card.requires_auth()
        );
        Ok(card)
    }

    /// `message/send` to the agent at `url`
    pub async fn send_message(
        &self,
        url: &str,
        token: Option<&str>,
        params: MessageSendParams,
    ) -> Result<SendMessageResult> {
        self.call(url, token, METHOD_MESSAGE_SEND, &params).await
    }

    pub async fn get_task(&self, url: &str, token: Option<&str>, task_id: &str) -> Result<Task> {
        let params = TaskQueryParams {
            id: task_id.to_string(),
            history_length: None,
        };
        self.call(url, token, METHOD_TASKS_GET, &params).await
    }

    pub async fn cancel_task(&self, url: &str, token: Option<&str>, task_id: &str) -> Result<Task> {
        let params = TaskIdParams {
            id: task_id.to_string(),
        };
        self.call(url, token, METHOD_TASKS_CANCEL, &params).await
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        token: Option<&str>,
        method: &str,
        params: &P,
    ) -> Result<R> {
        let request = JsonRpcRequest::new(
            method,
            serde_json::to_value(params).context("Failed to encode request params")?,
        );
        debug!("{} → {}", method, url);

        let mut req = self.http.post(url).json(&request);
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to reach agent at {}", url))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Agent refused credentials: HTTP {} — {}", status, body));
        }

        // JSON-RPC errors may arrive with HTTP 500, so decode before
        // looking at the status.
        let body = resp.text().await.context("Failed to read agent response")?;
        let rpc: JsonRpcResponse = serde_json::from_str(&body).with_context(|| {
            format!("Invalid JSON-RPC response (HTTP {}): {}", status, body)
        })?;

        if let Some(err) = rpc.error {
            return Err(anyhow!("{} failed: {} (code {})", method, err.message, err.code));
        }
        let result = rpc
            .result
            .ok_or_else(|| anyhow!("{} returned neither result nor error", method))?;
        serde_json::from_value(result).with_context(|| format!("Failed to parse {} result", method))
    }
}
