//! A2A (Agent-to-Agent) protocol support for tandem
//!
//! Server side: agent cards, the JSON-RPC endpoint, bearer verification and
//! the turn driver that maps an [`tandem_core::AgentRuntime`] onto task
//! status and artifact updates. Client side: remote-agent connections with
//! an OAuth2 auth hook and the `send_message` delegation tool.

pub mod auth;
pub mod cards;
pub mod client;
pub mod connection;
pub mod convert;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod handler;
pub mod oauth;
pub mod protocol;
pub mod server;
pub mod task_store;
pub mod tool;

pub use auth::{GoogleTokenInfoVerifier, NoVerification, TokenVerifier, verifier_from_config};
pub use client::A2aClient;
pub use connection::{AgentAuth, RemoteAgentConnection};
pub use convert::ConversionError;
pub use credentials::{CredentialProvider, TokenSource};
pub use error::A2aError;
pub use executor::{ActiveSessions, AgentExecutor, AgentTurnExecutor};
pub use handler::RequestHandler;
pub use oauth::{InstalledAppFlow, OAuthClient, OAuthToken};
pub use protocol::{AgentCard, Message, Part, SendMessageResult, Task, TaskState};
pub use server::A2aServer;
pub use task_store::{InMemoryTaskStore, TaskStore};
pub use tool::SendMessageTool;
