//! `send_message` tool: lets a host agent delegate to remote A2A agents

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use tandem_core::tools::{ToolContext, ToolHandler, json_schema};

use crate::connection::RemoteAgentConnection;
use crate::protocol::{Message, SendMessageResult};

pub struct SendMessageTool {
    connections: BTreeMap<String, Arc<RemoteAgentConnection>>,
}

impl SendMessageTool {
    pub fn new(connections: impl IntoIterator<Item = Arc<RemoteAgentConnection>>) -> Self {
        Self {
            connections: connections
                .into_iter()
                .map(|c| (c.name().to_string(), c))
                .collect(),
        }
    }

    /// One `- name: description` line per reachable agent
    pub fn roster(&self) -> String {
        self.connections
            .values()
            .map(|c| format!("- {}: {}", c.name(), c.card().description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl ToolHandler for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a task to a named remote agent and return its answer."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "agent_name": {
                    "type": "string",
                    "description": "Name of the remote agent, exactly as listed"
                },
                "task": {
                    "type": "string",
                    "description": "The request to send, in the user's words"
                }
            }),
            vec!["agent_name", "task"],
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let agent_name = input
            .get("agent_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'agent_name' parameter"))?;
        let task = input
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'task' parameter"))?;

        let connection = self.connections.get(agent_name).ok_or_else(|| {
            anyhow!(
                "Unknown agent '{}'. Known agents: {}",
                agent_name,
                self.connections.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })?;

        // The host session id doubles as the remote context id so that a
        // conversation stays in one remote session.
        let message = Message::user_text(task).with_context_id(ctx.session_id.clone());
        debug!("Delegating to '{}': {}", agent_name, task);

        let result = connection.send_message(message).await?;
        let answer = result.text();
        let state = match &result {
            SendMessageResult::Task(task) => task.status.state.to_string(),
            SendMessageResult::Message(_) => "completed".to_string(),
        };
        info!("Agent '{}' answered ({})", agent_name, state);

        Ok(serde_json::json!({
            "agent": agent_name,
            "state": state,
            "result": answer,
        }))
    }
}
