//! OpenAI-compatible chat completions client.
//!
//! Streams `POST {base_url}/chat/completions` with tool declarations and
//! decodes the server-sent events into [`ChatDelta`]s.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Settings, DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT};
use crate::error::{DbSageError, Result};
use crate::llm::types::{ChatDelta, ChatRequest, Message, Role, ToolCall, ToolCallDelta};
use crate::llm::LlmClient;

/// OpenAI client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    /// Base URL without the `/chat/completions` suffix.
    pub base_url: String,
    pub connect_timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: settings.base_url.clone(),
            connect_timeout: settings.connect_timeout,
        }
    }
}

/// OpenAI chat completions client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiClient {
    /// Creates a client. Only connecting is time-limited; a stream may run
    /// as long as the model keeps sending.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| DbSageError::llm(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn build_request<'a>(&'a self, request: &'a ChatRequest) -> WireRequest<'a> {
        WireRequest {
            model: &self.config.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: &request.tools,
            stream: true,
        }
    }

    /// Maps an HTTP error response to a user-facing error.
    fn parse_error(status: reqwest::StatusCode, body: &str) -> DbSageError {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return DbSageError::llm("Authentication failed. Check your OPENAI_API_KEY.");
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return DbSageError::llm("Rate limited. Please wait and try again.");
        }

        if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(body) {
            return DbSageError::llm(format!("API error: {}", error_response.error.message));
        }

        DbSageError::llm(format!("API error ({status}): {body}"))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<ChatDelta>>> {
        let body = self.build_request(&request);
        debug!(
            model = %self.config.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Opening completion stream"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DbSageError::llm("Request timed out. Try again.")
                } else if e.is_connect() {
                    DbSageError::llm("Failed to connect to the API. Check your network and OPENAI_BASE_URL.")
                } else {
                    DbSageError::llm(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Self::parse_error(status, &body));
        }

        let state = StreamState {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };

        Ok(stream::unfold(state, StreamState::next).boxed())
    }
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<ChatDelta>>,
    finished: bool,
}

impl StreamState {
    async fn next(mut self) -> Option<(Result<ChatDelta>, Self)> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some((item, self));
            }
            if self.finished {
                return None;
            }

            match self.body.next().await {
                Some(Ok(bytes)) => {
                    self.pending.extend(self.decoder.feed(&bytes));
                    self.finished = self.decoder.is_done();
                }
                Some(Err(e)) => {
                    self.finished = true;
                    self.pending
                        .push_back(Err(DbSageError::llm(format!("Stream error: {e}"))));
                }
                None => {
                    self.finished = true;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }
}

/// Incremental server-sent events decoder.
///
/// Bytes are buffered until a full line is available, so events and UTF-8
/// sequences split across network chunks decode the same as unsplit ones.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Feeds a chunk and returns the deltas of every completed line.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<Result<ChatDelta>> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(item) = self.decode_line(&line) {
                out.push(item);
            }
        }
        out
    }

    /// Decodes a trailing line that had no newline.
    pub(crate) fn finish(&mut self) -> Vec<Result<ChatDelta>> {
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    /// Whether `data: [DONE]` has been seen.
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<Result<ChatDelta>> {
        if self.done {
            return None;
        }

        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        let data = line.strip_prefix("data:")?.trim_start();

        if data == "[DONE]" {
            self.done = true;
            return None;
        }

        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping undecodable stream event: {e}");
                return None;
            }
        };

        if let Some(error) = event.error {
            return Some(Err(DbSageError::llm(format!("API error: {}", error.message))));
        }

        let delta = event.choices.into_iter().next()?.delta;
        let delta = ChatDelta {
            content: delta.content,
            tool_calls: delta
                .tool_calls
                .into_iter()
                .map(|call| {
                    let function = call.function.unwrap_or_default();
                    ToolCallDelta {
                        index: call.index,
                        id: call.id,
                        call_type: call.call_type,
                        name: function.name,
                        arguments: function.arguments,
                    }
                })
                .collect(),
        };

        if delta.content.is_none() && delta.tool_calls.is_empty() {
            return None;
        }
        Some(Ok(delta))
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    tools: &'a [Value],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    /// `null` for assistant messages that only carry tool calls.
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "<[ToolCall]>::is_empty")]
    tool_calls: &'a [ToolCall],
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        let content = if message.role == Role::Assistant
            && message.has_tool_calls()
            && message.content.is_empty()
        {
            None
        } else {
            Some(message.content.as_str())
        };

        Self {
            role: message.role.as_str(),
            content,
            tool_call_id: message.tool_call_id.as_deref(),
            tool_calls: &message.tool_calls,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    call_type: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
