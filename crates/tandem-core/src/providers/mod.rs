//! LLM provider abstraction
//!
//! The runner only needs "content in, content out"; [`GeminiModel`] is the
//! production implementation and tests plug in scripted models.

pub mod gemini;
pub mod types;

pub use gemini::GeminiModel;
pub use types::{LlmModel, LlmRequest, ToolDefinition};
