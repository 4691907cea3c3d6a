//! Provider-agnostic request types

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::Content;

/// A tool the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One generation request
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    pub tools: Vec<ToolDefinition>,
}

/// Trait that all LLM providers implement
#[async_trait]
pub trait LlmModel: Send + Sync {
    /// Human-readable provider name (e.g. "gemini")
    fn provider_name(&self) -> &str;

    /// Model identifier (e.g. "gemini-2.0-flash")
    fn model(&self) -> &str;

    /// Generate the next model content for the conversation
    async fn generate(&self, request: &LlmRequest) -> Result<Content>;
}
