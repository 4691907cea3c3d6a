//! LLM runner: the model/tool loop behind an agent turn
//!
//! Per turn:
//! 1. append the user message (and `_time` when the agent records it)
//! 2. ask the model, with the session history and the rendered instruction
//! 3. function calls → yield them, run the tools, yield the responses, repeat
//! 4. plain answer → yield it as the final event

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::{AgentRuntime, TurnEvent, TurnStream};
use crate::agents::AgentDefinition;
use crate::content::{Content, Part};
use crate::providers::{LlmModel, LlmRequest};
use crate::session::{Event, SessionManager, SessionService};
use crate::tools::ToolContext;

/// Upper bound on model calls in one turn
pub const DEFAULT_MAX_LLM_CALLS: usize = 20;

/// Runs an [`AgentDefinition`] against a model over a session store
pub struct LlmRunner {
    agent: Arc<AgentDefinition>,
    model: Arc<dyn LlmModel>,
    sessions: SessionManager,
    max_llm_calls: usize,
}

impl LlmRunner {
    pub fn new(
        app_name: impl Into<String>,
        agent: AgentDefinition,
        model: Arc<dyn LlmModel>,
        sessions: Arc<dyn SessionService>,
    ) -> Self {
        Self {
            agent: Arc::new(agent),
            model,
            sessions: SessionManager::new(sessions, app_name),
            max_llm_calls: DEFAULT_MAX_LLM_CALLS,
        }
    }

    pub fn with_max_llm_calls(mut self, max_llm_calls: usize) -> Self {
        self.max_llm_calls = max_llm_calls.max(1);
        self
    }

    pub fn agent(&self) -> &AgentDefinition {
        &self.agent
    }
}

impl AgentRuntime for LlmRunner {
    fn app_name(&self) -> &str {
        self.sessions.app_name()
    }

    fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn run(&self, user_id: &str, session_id: &str, new_message: Content) -> TurnStream {
        let agent = self.agent.clone();
        let model = self.model.clone();
        let sessions = self.sessions.clone();
        let max_llm_calls = self.max_llm_calls;
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();

        Box::pin(async_stream::try_stream! {
            let mut session = sessions
                .service()
                .get_session(sessions.app_name(), &user_id, &session_id)
                .await?
                .ok_or_else(|| anyhow!("Session not found: {}", session_id))?;

            let invocation_id = format!("e-{}", uuid::Uuid::new_v4());
            info!("Agent '{}' starting invocation {} on session '{}'", agent.name, invocation_id, session_id);

            let mut delta = Map::new();
            if agent.record_time {
                let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
                delta.insert("_time".to_string(), Value::String(now));
            }
            let user_event = Event::new(&invocation_id, "user")
                .with_content(new_message)
                .with_state_delta(delta);
            sessions.append(&mut session, user_event).await?;

            let mut finished = false;
            for call_index in 0..max_llm_calls {
                let request = LlmRequest {
                    system_instruction: Some(agent.render_instruction(&session.state)?),
                    contents: session.history(),
                    tools: agent.tools.definitions(),
                };
                debug!("Model call {} for invocation {}", call_index + 1, invocation_id);
                let response = model.generate(&request).await?;

                let model_event = Event::new(&invocation_id, &agent.name).with_content(response.clone());
                sessions.append(&mut session, model_event).await?;

                let calls: Vec<_> = response.function_calls().into_iter().cloned().collect();
                if calls.is_empty() {
                    yield TurnEvent::Final(response);
                    finished = true;
                    break;
                }
                yield TurnEvent::Intermediate(response);

                let ctx = ToolContext::new(session.id.clone(), session.state.clone());
                let mut parts = Vec::with_capacity(calls.len());
                for call in calls {
                    info!("Agent '{}' calling tool {}", agent.name, call.name);
                    let result = agent.tools.call(&call.name, call.args.clone(), &ctx).await;
                    parts.push(Part::function_response(call.id.clone(), call.name.clone(), result));
                }
                let responses = Content::user(parts);
                let tool_event = Event::new(&invocation_id, &agent.name).with_content(responses.clone());
                sessions.append(&mut session, tool_event).await?;
                yield TurnEvent::Intermediate(responses);
            }

            if !finished {
                Err::<(), _>(anyhow!(
                    "Agent '{}' made {} model calls without a final answer",
                    agent.name,
                    max_llm_calls
                ))?;
            }
        })
    }
}

/// Run a turn to completion and return the final content. Convenience for
/// callers that do not stream.
pub async fn run_to_final(
    runtime: &dyn AgentRuntime,
    user_id: &str,
    session_id: &str,
    message: Content,
) -> Result<Content> {
    use futures_util::StreamExt;

    let mut events = runtime.run(user_id, session_id, message);
    while let Some(event) = events.next().await {
        if let TurnEvent::Final(content) = event? {
            return Ok(content);
        }
    }
    Err(anyhow!("Turn ended without a final response"))
}
