//! Turn driver: runs one agent turn per inbound message
//!
//! The executor converts the inbound parts, resolves the session, installs
//! the caller's bearer token into session state and then translates the
//! runtime's [`TurnEvent`]s into A2A status and artifact updates:
//!
//! ```text
//! [Submitted] → Working → (Working + interim message)* → Artifact → Completed
//! ```
//!
//! `Submitted` is only emitted for a brand-new task. Function-call events
//! are not surfaced. Nothing after the final event is consumed.

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

use tandem_core::content::{self, Content};
use tandem_core::runtime::{AgentRuntime, TurnEvent};
use tandem_core::session::DEFAULT_USER_ID;

use crate::auth::redact_token;
use crate::convert;
use crate::error::A2aError;
use crate::protocol::{
    Artifact, Message, Part, StreamEvent, Task, TaskArtifactUpdateEvent, TaskState, TaskStatus,
    TaskStatusUpdateEvent,
};

/// Transport-level facts about the inbound call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    headers: HeaderMap,
}

impl CallContext {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Token from an `Authorization: Bearer <token>` header
    pub fn bearer_token(&self) -> Option<&str> {
        bearer_token(&self.headers)
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Everything an executor needs to know about one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub task_id: String,
    pub context_id: String,
    /// Absent for cancellation requests
    pub message: Option<Message>,
    pub current_task: Option<Task>,
    pub call_context: CallContext,
}

/// Outbound event channel of one request
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl EventQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish an event. A closed consumer is not an error: the turn keeps
    /// running even when nobody is listening any more.
    pub fn enqueue(&self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event consumer gone, dropping event");
        }
    }
}

/// Publishes status and artifact updates for one task
#[derive(Debug, Clone)]
pub struct TaskUpdater {
    queue: EventQueue,
    task_id: String,
    context_id: String,
}

impl TaskUpdater {
    pub fn new(queue: EventQueue, task_id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            queue,
            task_id: task_id.into(),
            context_id: context_id.into(),
        }
    }

    pub fn update_status(&self, state: TaskState, message: Option<Message>, is_final: bool) {
        self.queue.enqueue(StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: TaskStatus::new(state, message),
            is_final,
        }));
    }

    pub fn add_artifact(&self, parts: Vec<Part>) {
        self.queue.enqueue(StreamEvent::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            artifact: Artifact::new(parts),
            append: None,
            last_chunk: None,
        }));
    }

    pub fn complete(&self) {
        self.update_status(TaskState::Completed, None, true);
    }

    pub fn new_agent_message(&self, parts: Vec<Part>) -> Message {
        Message::agent(parts)
            .with_task_id(self.task_id.clone())
            .with_context_id(self.context_id.clone())
    }
}

/// Something that serves A2A requests for one agent
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, context: RequestContext, queue: EventQueue) -> Result<(), A2aError>;

    async fn cancel(&self, context: RequestContext, queue: EventQueue) -> Result<(), A2aError>;
}

/// Session ids with a turn in flight
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a session active until the returned guard drops
    pub fn track(&self, session_id: impl Into<String>) -> ActiveSessionGuard {
        let session_id = session_id.into();
        self.lock().insert(session_id.clone());
        ActiveSessionGuard {
            sessions: self.clone(),
            session_id,
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains(session_id)
    }

    /// Remove a session; true when it was present
    pub fn remove(&self, session_id: &str) -> bool {
        self.lock().remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[must_use = "the session is untracked as soon as the guard drops"]
pub struct ActiveSessionGuard {
    sessions: ActiveSessions,
    session_id: String,
}

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.session_id);
    }
}

/// Drives an [`AgentRuntime`] for A2A requests
pub struct AgentTurnExecutor {
    runtime: Arc<dyn AgentRuntime>,
    active: ActiveSessions,
    annotate_time: bool,
}

impl AgentTurnExecutor {
    pub fn new(runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            runtime,
            active: ActiveSessions::new(),
            annotate_time: false,
        }
    }

    /// Append a "Time now is ..." text part to every inbound message
    pub fn with_time_annotation(mut self, enabled: bool) -> Self {
        self.annotate_time = enabled;
        self
    }

    pub fn active_sessions(&self) -> &ActiveSessions {
        &self.active
    }

    async fn process_request(
        &self,
        new_message: Content,
        session_id: &str,
        access_token: Option<&str>,
        updater: &TaskUpdater,
    ) -> Result<(), A2aError> {
        let sessions = self.runtime.sessions();
        let mut session = sessions.upsert(session_id).await?;
        debug!("Initial state of session '{}': {} keys", session.id, session.state.len());

        let _active = self.active.track(session.id.clone());

        match access_token {
            Some(token) => {
                sessions.inject_access_token(&mut session, token).await?;
                debug!("Session '{}' token set to {}", session.id, redact_token(token));
            }
            None => debug!("No bearer token on request for session '{}'", session.id),
        }

        let mut events = self.runtime.run(DEFAULT_USER_ID, &session.id, new_message);
        while let Some(event) = events.next().await {
            match event? {
                TurnEvent::Final(content) => {
                    let parts = convert::payload_to_external(&content)?;
                    debug!("Final response with {} parts", parts.len());
                    updater.add_artifact(parts);
                    updater.complete();
                    break;
                }
                TurnEvent::Intermediate(content) if !content.has_function_calls() => {
                    let parts = convert::payload_to_external(&content)?;
                    debug!("Interim update with {} parts", parts.len());
                    updater.update_status(
                        TaskState::Working,
                        Some(updater.new_agent_message(parts)),
                        false,
                    );
                }
                TurnEvent::Intermediate(_) => debug!("Skipping function call event"),
            }
        }
        Ok(())
    }
}

/// Text part stamping the local wall-clock time
pub fn time_annotation() -> content::Part {
    content::Part::text(format!(
        "Time now is {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ))
}

#[async_trait]
impl AgentExecutor for AgentTurnExecutor {
    async fn execute(&self, context: RequestContext, queue: EventQueue) -> Result<(), A2aError> {
        let message = context
            .message
            .as_ref()
            .ok_or_else(|| A2aError::InvalidParams("message is required".to_string()))?;

        // Conversion failures abort before anything is published
        let mut parts = convert::message_to_internal(&message.parts)?;
        if self.annotate_time {
            parts.push(time_annotation());
        }

        let updater = TaskUpdater::new(queue, &context.task_id, &context.context_id);
        if context.current_task.is_none() {
            updater.update_status(TaskState::Submitted, None, false);
        }
        updater.update_status(TaskState::Working, None, false);

        self.process_request(
            Content::user(parts),
            &context.context_id,
            context.call_context.bearer_token(),
            &updater,
        )
        .await?;
        debug!("Turn for task {} finished", context.task_id);
        Ok(())
    }

    async fn cancel(&self, context: RequestContext, _queue: EventQueue) -> Result<(), A2aError> {
        let session_id = &context.context_id;
        if self.active.remove(session_id) {
            info!("Cancellation requested for active session: {}", session_id);
        } else {
            debug!("Cancellation requested for inactive session: {}", session_id);
        }
        Err(A2aError::UnsupportedOperation)
    }
}
