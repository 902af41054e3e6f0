//! Message and streaming types for chat completions.

use crate::error::{DbSageError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of the synthetic tool response sent for calls the user declined.
pub const DECLINED_TOOL_BODY: &str = r#"{"error":"Tool call was declined by the user"}"#;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Result of a tool call, keyed by `tool_call_id`.
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text as streamed by the model.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parses the accumulated arguments. An empty string is `{}`; anything
    /// that is not a JSON object is rejected.
    pub fn parse_arguments(&self) -> Result<Value> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(Value::Object(Default::default()));
        }

        match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(_) => Err(DbSageError::MalformedToolArgs(
                "arguments must be a JSON object".to_string(),
            )),
            Err(e) => Err(DbSageError::MalformedToolArgs(e.to_string())),
        }
    }
}

/// A single message in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Present iff `role` is `Tool`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Only on assistant messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// A tool response for the call with id `call_id`.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One streamed frame of a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
}

impl ChatDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A tool-call fragment. `id` and `name` normally arrive only on the
    /// first fragment of a call.
    pub fn tool(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCallDelta {
                index,
                id: id.map(str::to_string),
                call_type: id.map(|_| "function".to_string()),
                name: name.map(str::to_string),
                arguments: Some(arguments.into()),
            }],
        }
    }
}

/// Partial tool call as it appears in a stream frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub call_type: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Everything needed for one completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// System prompt first, then the conversation.
    pub messages: Vec<Message>,
    /// Tool declarations in chat completions format.
    pub tools: Vec<Value>,
}

/// The conversation so far, without the system prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops everything after the first `len` messages.
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Tool calls that have no matching tool response.
    pub fn unresolved_tool_calls(&self) -> Vec<&ToolCall> {
        let mut unresolved = Vec::new();
        for (i, message) in self.messages.iter().enumerate() {
            if message.role != Role::Assistant {
                continue;
            }
            let answered = answered_ids(&self.messages[i + 1..]);
            unresolved.extend(
                message
                    .tool_calls
                    .iter()
                    .filter(|call| !answered.contains(&call.id.as_str())),
            );
        }
        unresolved
    }

    /// Messages to send, with a declined-call response inserted after every
    /// unanswered tool call.
    pub fn request_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len());
        let mut i = 0;

        while i < self.messages.len() {
            let message = &self.messages[i];
            out.push(message.clone());
            i += 1;

            if !message.has_tool_calls() {
                continue;
            }

            let responses_end = self.messages[i..]
                .iter()
                .position(|m| m.role != Role::Tool)
                .map_or(self.messages.len(), |offset| i + offset);
            let answered = answered_ids(&self.messages[i..responses_end]);

            out.extend(self.messages[i..responses_end].iter().cloned());
            out.extend(
                message
                    .tool_calls
                    .iter()
                    .filter(|call| !answered.contains(&call.id.as_str()))
                    .map(|call| Message::tool(call.id.clone(), DECLINED_TOOL_BODY)),
            );
            i = responses_end;
        }

        out
    }
}

/// Ids answered by the tool messages directly following an assistant
/// message.
fn answered_ids(following: &[Message]) -> Vec<&str> {
    following
        .iter()
        .take_while(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect()
}
