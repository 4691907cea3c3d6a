//! tandem-core: the agent side of tandem
//!
//! Content model shared with the LLM provider, per-conversation sessions,
//! tool registry (including the Google Calendar tool), the Gemini provider
//! and the runner that turns one user message into a stream of turn events.

pub mod agents;
pub mod config;
pub mod content;
pub mod providers;
pub mod runtime;
pub mod session;
pub mod tools;

pub use agents::AgentDefinition;
pub use config::{LlmCredentials, TandemConfig};
pub use content::{Blob, Content, FileData, FunctionCall, FunctionResponse, Part, Role};
pub use runtime::{AgentRuntime, LlmRunner, TurnEvent, TurnStream};
pub use session::{
    ACCESS_TOKEN_KEY, DEFAULT_USER_ID, Event, EventActions, InMemorySessionService, Session,
    SessionManager, SessionService,
};
