//! Session management: each conversation gets its own session
//!
//! A session is a state bag plus an append-only event log. State is never
//! written directly: every mutation is an [`Event`] whose `state_delta` is
//! merged into the state when the event is appended.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::content::{Content, FunctionCall};

/// Every session belongs to this single user
pub const DEFAULT_USER_ID: &str = "self";

/// State key the calendar tool reads the bearer token from
pub const ACCESS_TOKEN_KEY: &str = "calendar_access_token";

/// Invocation id stamped on token injection events
pub const TOKEN_UPDATE_INVOCATION: &str = "token_update";

/// Mutations carried by an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventActions {
    #[serde(default)]
    pub state_delta: Map<String, Value>,
}

/// An appended, auditable record in a session's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default)]
    pub actions: EventActions,
}

impl Event {
    pub fn new(invocation_id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            timestamp: Utc::now(),
            content: None,
            actions: EventActions::default(),
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_state_delta(mut self, delta: Map<String, Value>) -> Self {
        self.actions.state_delta = delta;
        self
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.content
            .as_ref()
            .map(|c| c.function_calls())
            .unwrap_or_default()
    }
}

/// A single conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub state: Map<String, Value>,
    pub events: Vec<Event>,
    pub last_update_time: DateTime<Utc>,
}

impl Session {
    fn new(app_name: &str, user_id: &str, id: &str, state: Map<String, Value>) -> Self {
        Self {
            id: id.to_string(),
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            state,
            events: Vec::new(),
            last_update_time: Utc::now(),
        }
    }

    fn apply(&mut self, event: &Event) {
        for (key, value) in &event.actions.state_delta {
            self.state.insert(key.clone(), value.clone());
        }
        self.last_update_time = event.timestamp;
    }

    /// Conversation history as model content, oldest first
    pub fn history(&self) -> Vec<Content> {
        self.events
            .iter()
            .filter_map(|e| e.content.clone())
            .filter(|c| !c.parts.is_empty())
            .collect()
    }
}

/// Storage backend for sessions
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn get_session(&self, app_name: &str, user_id: &str, id: &str) -> Result<Option<Session>>;

    /// Create a session. When one already exists under the same key it is
    /// returned unchanged.
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
        state: Map<String, Value>,
    ) -> Result<Session>;

    /// Append an event, merging its state delta into both the stored
    /// session and the caller's copy
    async fn append_event(&self, session: &mut Session, event: Event) -> Result<Event>;
}

type SessionKey = (String, String, String);

fn key(app_name: &str, user_id: &str, id: &str) -> SessionKey {
    (app_name.to_string(), user_id.to_string(), id.to_string())
}

/// Process-local session store
#[derive(Default)]
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<SessionKey, Session>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn get_session(&self, app_name: &str, user_id: &str, id: &str) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&key(app_name, user_id, id)).cloned())
    }

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        id: &str,
        state: Map<String, Value>,
    ) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(key(app_name, user_id, id))
            .or_insert_with(|| {
                info!("Created session '{}' for app '{}'", id, app_name);
                Session::new(app_name, user_id, id, state)
            });
        Ok(session.clone())
    }

    async fn append_event(&self, session: &mut Session, event: Event) -> Result<Event> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&key(&session.app_name, &session.user_id, &session.id))
            .ok_or_else(|| anyhow!("Session not found: {}", session.id))?;

        stored.apply(&event);
        stored.events.push(event.clone());
        session.apply(&event);
        session.events.push(event.clone());

        debug!(
            "Session '{}' appended event from '{}' ({} events)",
            session.id,
            event.author,
            stored.events.len()
        );
        Ok(event)
    }
}

/// Resolves sessions for one application under the fixed user id
#[derive(Clone)]
pub struct SessionManager {
    service: Arc<dyn SessionService>,
    app_name: String,
}

impl SessionManager {
    pub fn new(service: Arc<dyn SessionService>, app_name: impl Into<String>) -> Self {
        Self {
            service,
            app_name: app_name.into(),
        }
    }

    /// In-memory manager, mostly useful for tests and single-process serving
    pub fn in_memory(app_name: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemorySessionService::new()), app_name)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn service(&self) -> &Arc<dyn SessionService> {
        &self.service
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        self.service
            .get_session(&self.app_name, DEFAULT_USER_ID, session_id)
            .await
    }

    /// Get the session with this id, creating an empty one when absent.
    ///
    /// The returned session's id is the one to drive the turn with; it may
    /// equal the requested id.
    pub async fn upsert(&self, session_id: &str) -> Result<Session> {
        if let Some(session) = self.get(session_id).await? {
            debug!("Resolved existing session '{}'", session.id);
            return Ok(session);
        }
        self.service
            .create_session(&self.app_name, DEFAULT_USER_ID, session_id, Map::new())
            .await
    }

    pub async fn append(&self, session: &mut Session, event: Event) -> Result<Event> {
        self.service.append_event(session, event).await
    }

    /// Install a bearer token into session state through an appended
    /// state-delta event. Overwrites any token from an earlier turn.
    pub async fn inject_access_token(&self, session: &mut Session, token: &str) -> Result<()> {
        let mut delta = Map::new();
        delta.insert(ACCESS_TOKEN_KEY.to_string(), Value::String(token.to_string()));
        let event = Event::new(TOKEN_UPDATE_INVOCATION, "user").with_state_delta(delta);
        self.append(session, event).await?;
        debug!("Injected access token into session '{}'", session.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Part;

    #[tokio::test]
    async fn test_upsert_creates_then_reuses() {
        let mgr = SessionManager::in_memory("Calendar Agent");
        let created = mgr.upsert("ctx-1").await.unwrap();
        assert_eq!(created.id, "ctx-1");
        assert!(created.state.is_empty());

        let mut again = mgr.upsert("ctx-1").await.unwrap();
        assert_eq!(again.id, "ctx-1");

        mgr.append(
            &mut again,
            Event::new("inv", "user").with_content(Content::user(vec![Part::text("hi")])),
        )
        .await
        .unwrap();
        let third = mgr.upsert("ctx-1").await.unwrap();
        assert_eq!(third.events.len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_scoped_by_app() {
        let service = Arc::new(InMemorySessionService::new());
        let a = SessionManager::new(service.clone(), "a");
        let b = SessionManager::new(service.clone(), "b");
        a.upsert("same").await.unwrap();
        assert!(b.get("same").await.unwrap().is_none());
        b.upsert("same").await.unwrap();
        assert_eq!(service.count().await, 2);
    }

    #[tokio::test]
    async fn test_racing_create_returns_first_session() {
        let service = InMemorySessionService::new();
        let mut state = Map::new();
        state.insert("k".to_string(), Value::from(1));
        let first = service.create_session("app", "self", "s", state).await.unwrap();
        let second = service.create_session("app", "self", "s", Map::new()).await.unwrap();
        assert_eq!(first.state, second.state);
        assert_eq!(service.count().await, 1);
    }

    #[tokio::test]
    async fn test_inject_access_token_sets_state() {
        let mgr = SessionManager::in_memory("Calendar Agent");
        let mut session = mgr.upsert("ctx").await.unwrap();
        mgr.inject_access_token(&mut session, "abc123").await.unwrap();

        assert_eq!(session.state[ACCESS_TOKEN_KEY], "abc123");
        let stored = mgr.get("ctx").await.unwrap().unwrap();
        assert_eq!(stored.state[ACCESS_TOKEN_KEY], "abc123");

        let event = &stored.events[0];
        assert_eq!(event.author, "user");
        assert_eq!(event.invocation_id, TOKEN_UPDATE_INVOCATION);
        assert!(event.content.is_none());
    }

    #[tokio::test]
    async fn test_inject_overwrites_previous_token() {
        let mgr = SessionManager::in_memory("app");
        let mut session = mgr.upsert("ctx").await.unwrap();
        mgr.inject_access_token(&mut session, "old").await.unwrap();
        mgr.inject_access_token(&mut session, "new").await.unwrap();
        let stored = mgr.get("ctx").await.unwrap().unwrap();
        assert_eq!(stored.state[ACCESS_TOKEN_KEY], "new");
        assert_eq!(stored.events.len(), 2);
    }

    #[tokio::test]
    async fn test_append_to_unknown_session_fails() {
        let service = InMemorySessionService::new();
        let mut ghost = Session::new("app", "self", "ghost", Map::new());
        let result = service.append_event(&mut ghost, Event::new("i", "user")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_history_skips_state_only_events() {
        let mut session = Session::new("app", "self", "s", Map::new());
        let mut delta = Map::new();
        delta.insert("x".to_string(), Value::from(1));
        let state_only = Event::new("i", "user").with_state_delta(delta);
        let message = Event::new("i", "user").with_content(Content::user(vec![Part::text("hello")]));
        session.apply(&state_only);
        session.events.push(state_only);
        session.events.push(message);
        let history = session.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text(), "hello");
        assert_eq!(session.state["x"], 1);
    }
}
