//! Agent runtime contract
//!
//! A runtime turns one user message into a lazy, ordered stream of
//! [`TurnEvent`]s. Consumers may stop polling at any point (typically right
//! after the final event); the runtime must not rely on being drained.

use anyhow::Result;
use futures_util::stream::BoxStream;

use crate::content::Content;
use crate::session::SessionManager;

pub mod runner;

pub use runner::LlmRunner;

/// One event yielded by a running turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Completed output; ends the turn
    Final(Content),
    /// In-progress output, or a pending tool invocation when the content
    /// holds function calls
    Intermediate(Content),
}

impl TurnEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }

    pub fn content(&self) -> &Content {
        match self {
            Self::Final(c) | Self::Intermediate(c) => c,
        }
    }

    /// Whether this event is a pending tool invocation
    pub fn has_function_calls(&self) -> bool {
        self.content().has_function_calls()
    }
}

pub type TurnStream = BoxStream<'static, Result<TurnEvent>>;

/// Something that can run an agent turn over a session
pub trait AgentRuntime: Send + Sync {
    fn app_name(&self) -> &str;

    /// Sessions this runtime reads and appends to
    fn sessions(&self) -> &SessionManager;

    /// Start a turn. The session must already exist.
    fn run(&self, user_id: &str, session_id: &str, new_message: Content) -> TurnStream;
}
