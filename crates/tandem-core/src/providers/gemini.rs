//! Google Gemini `generateContent` provider

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::types::{LlmModel, LlmRequest};
use crate::config::LlmCredentials;
use crate::content::{Content, Role};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini model reached through the Generative Language API or Vertex AI
pub struct GeminiModel {
    http: Client,
    model: String,
    credentials: LlmCredentials,
    api_base: String,
}

impl std::fmt::Debug for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiModel")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("credentials", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl GeminiModel {
    pub fn new(model: impl Into<String>, credentials: LlmCredentials) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            model: model.into(),
            credentials,
            api_base: GEMINI_API_BASE.to_string(),
        }
    }

    /// Override the API base (Generative Language API only)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn endpoint(&self) -> String {
        match &self.credentials {
            LlmCredentials::ApiKey(_) => format!(
                "{}/models/{}:generateContent",
                self.api_base.trim_end_matches('/'),
                self.model
            ),
            LlmCredentials::Vertex {
                project, location, ..
            } => format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{}:generateContent",
                self.model
            ),
        }
    }

    fn build_request_body(&self, request: &LlmRequest) -> Value {
        let mut body = serde_json::json!({ "contents": request.contents });
        if let Some(obj) = body.as_object_mut() {
            if let Some(system) = &request.system_instruction {
                obj.insert(
                    "systemInstruction".into(),
                    serde_json::json!({ "parts": [{ "text": system }] }),
                );
            }
            if !request.tools.is_empty() {
                let declarations: Vec<Value> = request
                    .tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        })
                    })
                    .collect();
                obj.insert(
                    "tools".into(),
                    serde_json::json!([{ "functionDeclarations": declarations }]),
                );
            }
        }
        body
    }
}

#[async_trait]
impl LlmModel for GeminiModel {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<Content> {
        let url = self.endpoint();
        let body = self.build_request_body(request);
        debug!(
            "Gemini request to {} ({} contents, {} tools)",
            self.model,
            request.contents.len(),
            request.tools.len()
        );

        let req = self.http.post(&url).json(&body);
        let req = match &self.credentials {
            LlmCredentials::ApiKey(key) => req.header("x-goog-api-key", key),
            LlmCredentials::Vertex { access_token, .. } => req.bearer_auth(access_token),
        };

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to reach Gemini at {}", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini request failed: HTTP {} — {}", status, body));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        let candidate = parsed.candidates.into_iter().next().ok_or_else(|| {
            anyhow!(
                "Gemini returned no candidates (feedback: {})",
                parsed
                    .prompt_feedback
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "none".to_string())
            )
        })?;

        debug!("Gemini finish reason: {:?}", candidate.finish_reason);

        let mut content = candidate.content.unwrap_or_else(|| Content::model(Vec::new()));
        content.role = Some(Role::Model);
        Ok(content)
    }
}
