//! LLM integration for dbsage.
//!
//! A single streaming interface: send the conversation plus tool
//! declarations, receive a stream of deltas.

mod assembler;
pub mod mock;
pub mod openai;
pub mod prompt;
pub mod types;

pub use assembler::StreamAssembler;
pub use mock::{ScriptStep, ScriptedLlmClient};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use prompt::{build_messages, build_system_prompt};
pub use types::{
    ChatDelta, ChatRequest, FunctionCall, Message, Role, ToolCall, ToolCallDelta, Transcript,
    DECLINED_TOOL_BODY,
};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// A chat completions backend that supports tool calling.
///
/// Implementations must be thread-safe (Send + Sync); streams are consumed
/// on background tasks.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Opens a streaming completion. Errors before the first delta (bad key,
    /// unreachable host) are returned directly; later ones arrive in the
    /// stream.
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<ChatDelta>>>;
}
