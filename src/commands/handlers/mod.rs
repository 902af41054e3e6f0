//! Command handlers for dbsage.
//!
//! Commands act on the connection registry directly and never reach the
//! model. Each handler returns the messages to show.

pub mod connection;
pub mod system;

use crate::commands::router::Command;
use crate::connection::ConnectionRegistry;
use crate::tui::app::ChatMessage;

/// Context provided to command handlers.
pub struct CommandContext<'a> {
    pub registry: &'a ConnectionRegistry,
}

/// Result of executing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Messages to add to the chat.
    Messages(Vec<ChatMessage>),
    /// The conversation should be cleared by its owner.
    ClearConversation,
    /// Application should exit.
    Exit,
    /// No action needed.
    None,
}

impl CommandResult {
    /// Creates a single system message result.
    pub fn system(msg: impl Into<String>) -> Self {
        Self::Messages(vec![ChatMessage::System(msg.into())])
    }

    /// Creates a single error message result.
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Messages(vec![ChatMessage::Error(msg.into())])
    }
}

/// Runs a command. Natural-language input is not a command and yields
/// [`CommandResult::None`].
pub async fn execute(command: Command, ctx: &CommandContext<'_>) -> CommandResult {
    match command {
        Command::Add(args) => connection::handle_add(ctx, args).await,
        Command::Switch(name) => connection::handle_switch(ctx, &name).await,
        Command::Remove(name) => connection::handle_remove(ctx, &name).await,
        Command::List => connection::handle_list(ctx).await,
        Command::Status => connection::handle_status(ctx).await,
        Command::Help => system::handle_help(),
        Command::Clear => CommandResult::ClearConversation,
        Command::Exit => CommandResult::Exit,
        Command::Unknown(command) => system::handle_unknown(&command),
        Command::Usage(usage) => CommandResult::error(usage),
        Command::NaturalLanguage(_) => CommandResult::None,
    }
}
