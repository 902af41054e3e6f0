//! Application state for the TUI.
//!
//! Contains the main App struct and related types for managing UI state.

use crate::commands::GuidanceState;
use crate::orchestrator::{TurnOutcome, TurnUpdate};
use crate::tools::RiskLevel;
use crossterm::event::{KeyCode, KeyEvent};

/// A message in the chat panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    /// A message from the user.
    User(String),
    /// A response from the assistant.
    Assistant(String),
    /// Tool activity, e.g. `get_table_schema(users)`.
    Tool(String),
    /// An error message.
    Error(String),
    /// A system message (help text, command output).
    System(String),
}

impl ChatMessage {
    /// Returns the message type as a string for display purposes.
    pub fn type_label(&self) -> &'static str {
        match self {
            Self::User(_) => "You",
            Self::Assistant(_) => "dbsage",
            Self::Tool(_) => "Tool",
            Self::Error(_) => "Error",
            Self::System(_) => "System",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::User(text)
            | Self::Assistant(text)
            | Self::Tool(text)
            | Self::Error(text)
            | Self::System(text) => text,
        }
    }
}

/// Input state for text editing. The cursor counts characters.
#[derive(Debug, Default)]
pub struct InputState {
    /// Current input text.
    pub text: String,
    /// Cursor position (character index).
    pub cursor: usize,
}

impl InputState {
    /// Creates a new empty input state.
    pub fn new() -> Self {
        Self::default()
    }

    fn byte_index(&self, cursor: usize) -> usize {
        self.text
            .char_indices()
            .nth(cursor)
            .map_or(self.text.len(), |(i, _)| i)
    }

    fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Inserts a character at the cursor position.
    pub fn insert(&mut self, c: char) {
        let at = self.byte_index(self.cursor);
        self.text.insert(at, c);
        self.cursor += 1;
    }

    /// Deletes the character before the cursor (backspace).
    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let at = self.byte_index(self.cursor);
            self.text.remove(at);
        }
    }

    /// Deletes the character at the cursor (delete key).
    pub fn delete(&mut self) {
        if self.cursor < self.char_len() {
            let at = self.byte_index(self.cursor);
            self.text.remove(at);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        if self.cursor < self.char_len() {
            self.cursor += 1;
        }
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.char_len();
    }

    /// Clears the input and returns the previous text.
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// A tool call shown in the confirmation dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirm {
    pub tool: String,
    pub risk: RiskLevel,
    pub prompt: String,
    /// First prompt line shown when the dialog does not fit.
    pub scroll: usize,
}

/// Main application state.
pub struct App {
    /// Whether the application is still running.
    pub running: bool,
    pub input: InputState,
    pub messages: Vec<ChatMessage>,
    /// Chat scroll offset (lines from bottom).
    pub chat_scroll: usize,
    /// Current connection for the header, e.g. `prod (PostgreSQL)`.
    pub connection_info: Option<String>,
    /// A turn is in flight.
    pub busy: bool,
    pub pending: Option<PendingConfirm>,
    pub guidance: GuidanceState,
    /// The last message is an assistant message still receiving text.
    streaming: bool,
}

impl App {
    pub fn new(connection_info: Option<String>, guidance: GuidanceState) -> Self {
        let mut messages = vec![ChatMessage::System(
            "Welcome to dbsage! Ask questions about your database in plain language.".to_string(),
        )];
        if let Some(hint) = guidance.hint() {
            messages.push(ChatMessage::System(hint.to_string()));
        }

        Self {
            running: true,
            input: InputState::new(),
            messages,
            chat_scroll: 0,
            connection_info,
            busy: false,
            pending: None,
            guidance,
            streaming: false,
        }
    }

    /// Adds a message to the chat.
    pub fn add_message(&mut self, message: ChatMessage) {
        self.streaming = false;
        self.messages.push(message);
        self.chat_scroll = 0;
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.streaming = false;
        self.chat_scroll = 0;
    }

    /// Applies an orchestrator update to the display.
    pub fn apply_update(&mut self, update: TurnUpdate) {
        match update {
            TurnUpdate::Text(text) => {
                match self.messages.last_mut() {
                    Some(ChatMessage::Assistant(current)) if self.streaming => {
                        current.push_str(&text);
                    }
                    _ => {
                        self.messages.push(ChatMessage::Assistant(text));
                        self.streaming = true;
                    }
                }
                self.chat_scroll = 0;
            }
            TurnUpdate::ToolStarted { summary, .. } => {
                self.add_message(ChatMessage::Tool(format!("Running {summary}")));
            }
            TurnUpdate::ToolFinished { name, ok } => {
                let status = if ok { "done" } else { "returned an error" };
                self.add_message(ChatMessage::Tool(format!("{name} {status}")));
            }
            TurnUpdate::ConfirmationRequested { tool, risk, prompt } => {
                self.streaming = false;
                self.pending = Some(PendingConfirm {
                    tool,
                    risk,
                    prompt,
                    scroll: 0,
                });
            }
            TurnUpdate::Finished(outcome) => {
                self.busy = false;
                self.pending = None;
                self.streaming = false;
                match outcome {
                    TurnOutcome::Completed => {}
                    TurnOutcome::Declined => self.add_message(ChatMessage::System(
                        "Declined. The tool call was not run.".to_string(),
                    )),
                    TurnOutcome::Cancelled => {
                        self.add_message(ChatMessage::System("Cancelled.".to_string()))
                    }
                    TurnOutcome::Failed(error) => self.add_message(ChatMessage::Error(error)),
                }
            }
        }
    }

    /// Handles editing and scrolling keys. Enter, Ctrl-C and the
    /// confirmation keys are handled by the event loop.
    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char(c) => self.input.insert(c),
            KeyCode::Backspace => self.input.backspace(),
            KeyCode::Delete => self.input.delete(),
            KeyCode::Left => self.input.move_left(),
            KeyCode::Right => self.input.move_right(),
            KeyCode::Home => self.input.move_home(),
            KeyCode::End => self.input.move_end(),
            KeyCode::Up => self.chat_scroll = self.chat_scroll.saturating_add(1),
            KeyCode::Down => self.chat_scroll = self.chat_scroll.saturating_sub(1),
            KeyCode::PageUp => self.chat_scroll = self.chat_scroll.saturating_add(10),
            KeyCode::PageDown => self.chat_scroll = self.chat_scroll.saturating_sub(10),
            KeyCode::Esc => {
                self.input.take();
            }
            _ => {}
        }
    }

    /// Submits the current input for processing.
    pub fn submit_input(&mut self) -> Option<String> {
        let text = self.input.take();
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;
    use pretty_assertions::assert_eq;

    fn app() -> App {
        App::new(None, GuidanceState::new(true, false))
    }

    #[test]
    fn test_input_editing() {
        let mut input = InputState::new();
        for c in "héllo".chars() {
            input.insert(c);
        }
        input.move_left();
        input.backspace();
        assert_eq!(input.text, "hélo");
        input.move_home();
        input.delete();
        assert_eq!(input.text, "élo");
        input.move_end();
        input.insert('!');
        assert_eq!(input.text, "élo!");
        assert_eq!(input.take(), "élo!");
        assert!(input.is_empty());
        assert_eq!(input.cursor, 0);
    }

    #[test]
    fn test_backspace_at_start() {
        let mut input = InputState::new();
        input.backspace();
        input.delete();
        assert!(input.is_empty());
    }

    #[test]
    fn test_new_shows_guidance() {
        let app = App::new(None, GuidanceState::new(false, true));
        assert_eq!(app.messages.len(), 2);
        assert!(app.messages[1].text().contains("/add"));
    }

    #[test]
    fn test_streamed_text_is_appended() {
        let mut app = app();
        app.add_message(ChatMessage::User("hello".into()));
        app.apply_update(TurnUpdate::Text("hi".into()));
        app.apply_update(TurnUpdate::Text(" there".into()));
        app.apply_update(TurnUpdate::Finished(TurnOutcome::Completed));

        assert_eq!(
            app.messages.last(),
            Some(&ChatMessage::Assistant("hi there".into()))
        );
        app.apply_update(TurnUpdate::Text("next".into()));
        assert_eq!(app.messages.last(), Some(&ChatMessage::Assistant("next".into())));
    }

    #[test]
    fn test_text_after_tool_starts_new_message() {
        let mut app = app();
        app.apply_update(TurnUpdate::Text("Checking".into()));
        app.apply_update(TurnUpdate::ToolStarted {
            name: "get_all_tables".into(),
            summary: "get_all_tables()".into(),
        });
        app.apply_update(TurnUpdate::ToolFinished {
            name: "get_all_tables".into(),
            ok: true,
        });
        app.apply_update(TurnUpdate::Text("One table".into()));

        let tail: Vec<_> = app.messages.iter().rev().take(4).cloned().collect();
        assert_eq!(tail[0], ChatMessage::Assistant("One table".into()));
        assert_eq!(tail[1], ChatMessage::Tool("get_all_tables done".into()));
        assert_eq!(tail[3], ChatMessage::Assistant("Checking".into()));
    }

    #[test]
    fn test_confirmation_and_outcomes() {
        let mut app = app();
        app.busy = true;
        app.apply_update(TurnUpdate::ConfirmationRequested {
            tool: "execute_sql".into(),
            risk: RiskLevel::High,
            prompt: "DELETE FROM t".into(),
        });
        assert!(app.pending.is_some());

        app.apply_update(TurnUpdate::Finished(TurnOutcome::Declined));
        assert!(app.pending.is_none());
        assert!(!app.busy);
        assert!(app.messages.last().unwrap().text().contains("Declined"));

        app.apply_update(TurnUpdate::Finished(TurnOutcome::Failed("LLM error: boom".into())));
        assert_eq!(
            app.messages.last(),
            Some(&ChatMessage::Error("LLM error: boom".into()))
        );
    }

    #[test]
    fn test_handle_key_and_submit() {
        let mut app = app();
        for c in "  /list ".chars() {
            app.handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }
        assert_eq!(app.submit_input(), Some("/list".into()));
        assert_eq!(app.submit_input(), None);

        app.handle_key(KeyEvent::new(KeyCode::PageUp, KeyModifiers::NONE));
        assert_eq!(app.chat_scroll, 10);
        app.add_message(ChatMessage::System("x".into()));
        assert_eq!(app.chat_scroll, 0);
    }
}
