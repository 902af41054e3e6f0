//! Scripted LLM client for tests.
//!
//! Each call to `stream_chat` consumes the next queued reply and replays it
//! as a delta stream. Every request is recorded.

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{DbSageError, Result};
use crate::llm::types::{ChatDelta, ChatRequest};
use crate::llm::LlmClient;

/// One element of a scripted stream.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Delta(ChatDelta),
    /// The stream fails with this message.
    Error(String),
    /// Pause before the next step.
    Delay(Duration),
}

impl ScriptStep {
    pub fn text(content: &str) -> Self {
        Self::Delta(ChatDelta::text(content))
    }

    /// A complete tool call in one fragment.
    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self::Delta(ChatDelta::tool(0, Some(id), Some(name), arguments))
    }

    /// A continuation fragment of the tool call at `index`.
    pub fn tool_args(index: usize, arguments: &str) -> Self {
        Self::Delta(ChatDelta::tool(index, None, None, arguments))
    }

    pub fn error(message: &str) -> Self {
        Self::Error(message.to_string())
    }
}

#[derive(Debug)]
enum Reply {
    Stream(Vec<ScriptStep>),
    /// `stream_chat` itself fails.
    Refuse(String),
}

/// LLM client that replays queued scripts.
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply made of the given steps.
    pub fn with_script(self, steps: Vec<ScriptStep>) -> Self {
        self.push_script(steps);
        self
    }

    /// Queues a plain text reply, one delta per chunk.
    pub fn with_text(self, chunks: &[&str]) -> Self {
        self.with_script(chunks.iter().map(|c| ScriptStep::text(c)).collect())
    }

    pub fn push_script(&self, steps: Vec<ScriptStep>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Reply::Stream(steps));
        }
    }

    /// Queues a reply where opening the stream fails.
    pub fn push_refusal(&self, message: &str) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Reply::Refuse(message.to_string()));
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Replies not consumed yet.
    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<ChatDelta>>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let reply = self
            .replies
            .lock()
            .map_err(|_| DbSageError::internal("Scripted client lock poisoned"))?
            .pop_front();

        let steps = match reply {
            Some(Reply::Stream(steps)) => steps,
            Some(Reply::Refuse(message)) => return Err(DbSageError::llm(message)),
            None => return Err(DbSageError::llm("No scripted reply left")),
        };

        let stream = stream::iter(steps)
            .then(|step| async move {
                match step {
                    ScriptStep::Delta(delta) => Some(Ok(delta)),
                    ScriptStep::Error(message) => Some(Err(DbSageError::llm(message))),
                    ScriptStep::Delay(duration) => {
                        tokio::time::sleep(duration).await;
                        None
                    }
                }
            })
            .filter_map(future::ready);

        Ok(stream.boxed())
    }
}
