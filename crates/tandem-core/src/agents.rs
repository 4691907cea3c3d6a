//! Agent definitions: model, instruction and tools for each served agent

use anyhow::{Result, anyhow};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::tools::ToolRegistry;
use crate::tools::calendar::{CalendarClient, ListCalendarEventsTool};

pub const CALENDAR_AGENT_MODEL: &str = "gemini-2.0-flash";
pub const QUOTE_AGENT_MODEL: &str = "gemini-2.0-flash-001";

const CALENDAR_INSTRUCTION: &str = r#"You are a helpful personal calendar assistant.
Use the provided tools to search for calendar events (use 10 as limit if user doesn't specify), and update them.
Use "primary" as the calendarId if users don't specify.

Scenario1:
The user want to query the calendar events.
Use list_calendar_events to search for calendar events.

Current user:
<User>
{userInfo?}
</User>
"#;

const QUOTE_INSTRUCTION: &str = "You are a specialized Einstein quote retrieval assistant. \
Your primary function is to return a famous quote from Einstein and no one else.";

const HOST_INSTRUCTION: &str = r#"You are an expert delegator that routes user requests to remote agents.

Use send_message to ask a remote agent for help. Pick the agent whose
description matches the request, pass the user's request as the message,
and relay the agent's answer. Do not make up answers yourself.

Available agents:
"#;

/// What an LLM agent is: a model, an instruction and its tools
#[derive(Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub model: String,
    pub description: String,
    pub instruction: String,
    pub tools: ToolRegistry,
    /// Store the local time under `_time` in session state before each turn
    pub record_time: bool,
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl AgentDefinition {
    /// Fill `{key}` and `{key?}` placeholders from session state.
    ///
    /// String values are inserted verbatim, other values as JSON. A missing
    /// `{key}` is an error; a missing `{key?}` renders as empty.
    pub fn render_instruction(&self, state: &Map<String, Value>) -> Result<String> {
        render_template(&self.instruction, state)
    }
}

pub fn render_template(template: &str, state: &Map<String, Value>) -> Result<String> {
    let re = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_:]*)(\?)?\}")
        .map_err(|e| anyhow!("Invalid regex: {}", e))?;
    let mut missing: Option<String> = None;
    let rendered = re.replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        let optional = caps.get(2).is_some();
        match state.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None if optional => String::new(),
            Some(other) => other.to_string(),
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(key) => Err(anyhow!("Context variable not found: `{}`", key)),
        None => Ok(rendered.into_owned()),
    }
}

/// Calendar assistant with the `list_calendar_events` tool
pub fn calendar_agent(calendar: CalendarClient) -> AgentDefinition {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ListCalendarEventsTool::new(calendar)));
    AgentDefinition {
        name: "calendar_agent".to_string(),
        model: CALENDAR_AGENT_MODEL.to_string(),
        description: "Helps with calendar events".to_string(),
        instruction: CALENDAR_INSTRUCTION.to_string(),
        tools,
        record_time: true,
    }
}

/// Einstein quote assistant; no tools
pub fn quote_agent() -> AgentDefinition {
    AgentDefinition {
        name: "quote_agent".to_string(),
        model: QUOTE_AGENT_MODEL.to_string(),
        description: "An agent that can help questions about getting a quote from Einstein".to_string(),
        instruction: QUOTE_INSTRUCTION.to_string(),
        tools: ToolRegistry::new(),
        record_time: false,
    }
}

/// Delegating host agent. `tools` should carry the remote-agent send tool;
/// `roster` lists the agents it can reach, one per line.
pub fn host_agent(model: impl Into<String>, tools: ToolRegistry, roster: &str) -> AgentDefinition {
    AgentDefinition {
        name: "host_agent".to_string(),
        model: model.into(),
        description: "Routes requests to remote agents".to_string(),
        instruction: format!("{}{}\n", HOST_INSTRUCTION, roster),
        tools,
        record_time: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_fills_known_keys() {
        let s = state(&[("name", Value::from("Ada")), ("count", Value::from(3))]);
        let out = render_template("Hi {name}, you have {count} events.", &s).unwrap();
        assert_eq!(out, "Hi Ada, you have 3 events.");
    }

    #[test]
    fn test_render_optional_missing_is_empty() {
        let out = render_template("<User>{userInfo?}</User>", &Map::new()).unwrap();
        assert_eq!(out, "<User></User>");
    }

    #[test]
    fn test_render_required_missing_fails() {
        let err = render_template("Token {calendar_access_token}", &Map::new()).unwrap_err();
        assert!(err.to_string().contains("calendar_access_token"));
    }

    #[test]
    fn test_render_leaves_non_placeholders() {
        let out = render_template(r#"JSON like {"a": 1} stays"#, &Map::new()).unwrap();
        assert_eq!(out, r#"JSON like {"a": 1} stays"#);
    }

    #[test]
    fn test_calendar_agent_shape() {
        let agent = calendar_agent(CalendarClient::default());
        assert_eq!(agent.model, "gemini-2.0-flash");
        assert!(agent.record_time);
        assert!(agent.tools.get("list_calendar_events").is_some());
        assert!(agent.render_instruction(&Map::new()).is_ok());
    }

    #[test]
    fn test_quote_agent_has_no_tools() {
        let agent = quote_agent();
        assert_eq!(agent.model, "gemini-2.0-flash-001");
        assert!(agent.tools.is_empty());
        assert!(agent.instruction.contains("Einstein"));
    }

    #[test]
    fn test_host_agent_lists_roster() {
        let roster = "- Calendar Agent: Reads your calendar";
        let agent = host_agent("gemini-2.0-flash", ToolRegistry::new(), roster);
        let rendered = agent.render_instruction(&Map::new()).unwrap();
        assert!(rendered.contains("send_message"));
        assert!(rendered.ends_with("- Calendar Agent: Reads your calendar\n"));
    }
}
