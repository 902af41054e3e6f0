//! Reassembles a streamed completion into an assistant message.

use super::types::{ChatDelta, Message, ToolCall};
use tracing::warn;

/// Upper bound on tool-call slots; fragments with a larger index are dropped.
const MAX_TOOL_CALLS: usize = 128;

/// Accumulates deltas for one completion.
///
/// Text is appended as it arrives. Tool-call fragments are merged by index:
/// id, type and name are taken the first time they are seen and argument
/// chunks are concatenated.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    content: String,
    tool_calls: Vec<ToolCall>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a delta. Returns the text it carried, if any.
    pub fn push(&mut self, delta: ChatDelta) -> Option<String> {
        for fragment in delta.tool_calls {
            let index = fragment.index;
            if index >= MAX_TOOL_CALLS {
                warn!(index, "Tool call index exceeds limit, dropping fragment");
                continue;
            }
            if self.tool_calls.len() <= index {
                self.tool_calls
                    .resize_with(index + 1, || ToolCall::new("", "", ""));
            }

            let slot = &mut self.tool_calls[index];
            if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                if slot.id.is_empty() {
                    slot.id = id;
                }
            }
            if let Some(call_type) = fragment.call_type.filter(|t| !t.is_empty()) {
                slot.call_type = call_type;
            }
            if let Some(name) = fragment.name.filter(|n| !n.is_empty()) {
                if slot.function.name.is_empty() {
                    slot.function.name = name;
                }
            }
            if let Some(arguments) = fragment.arguments {
                slot.function.arguments.push_str(&arguments);
            }
        }

        match delta.content {
            Some(text) if !text.is_empty() => {
                self.content.push_str(&text);
                Some(text)
            }
            _ => None,
        }
    }

    /// Text received so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The assembled assistant message. Slots that never received a name
    /// (gaps in the index sequence) are dropped.
    pub fn finish(self) -> Message {
        let calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .filter(|call| !call.function.name.is_empty())
            .collect();
        Message::assistant_with_tools(self.content, calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolCallDelta;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_text_only() {
        let mut assembler = StreamAssembler::new();
        assert_eq!(assembler.push(ChatDelta::text("hi")), Some("hi".into()));
        assert_eq!(assembler.push(ChatDelta::text("")), None);
        assert_eq!(assembler.push(ChatDelta::text(" there")), Some(" there".into()));

        assert_eq!(assembler.finish(), Message::assistant("hi there"));
    }

    #[test]
    fn test_tool_call_arguments_are_concatenated() {
        let mut assembler = StreamAssembler::new();
        assembler.push(ChatDelta::tool(0, Some("call_1"), Some("execute_sql"), ""));
        assembler.push(ChatDelta::tool(0, None, None, r#"{"sql":"#));
        assembler.push(ChatDelta::tool(0, None, None, r#""DELETE FROM t"}"#));

        let message = assembler.finish();
        assert_eq!(message.content, "");
        assert_eq!(
            message.tool_calls,
            vec![ToolCall::new("call_1", "execute_sql", r#"{"sql":"DELETE FROM t"}"#)]
        );
    }

    #[test]
    fn test_interleaved_indices() {
        let mut assembler = StreamAssembler::new();
        assembler.push(ChatDelta::tool(1, Some("b"), Some("get_table_schema"), "{\"tableName\""));
        assembler.push(ChatDelta::tool(0, Some("a"), Some("get_all_tables"), "{}"));
        assembler.push(ChatDelta::tool(1, None, None, ":\"users\"}"));

        let calls = assembler.finish().tool_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[1].function.arguments, r#"{"tableName":"users"}"#);
    }

    #[test]
    fn test_text_and_tool_in_one_delta() {
        let mut assembler = StreamAssembler::new();
        let delta = ChatDelta {
            content: Some("Checking".into()),
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: Some("x".into()),
                call_type: Some("function".into()),
                name: Some("get_database_size".into()),
                arguments: Some("{}".into()),
            }],
        };

        assert_eq!(assembler.push(delta), Some("Checking".into()));
        let message = assembler.finish();
        assert_eq!(message.content, "Checking");
        assert_eq!(message.tool_calls.len(), 1);
    }

    #[test]
    fn test_index_limit() {
        let mut assembler = StreamAssembler::new();
        assembler.push(ChatDelta::tool(MAX_TOOL_CALLS, Some("x"), Some("get_all_tables"), "{}"));
        assert!(!assembler.has_tool_calls());
    }
}
