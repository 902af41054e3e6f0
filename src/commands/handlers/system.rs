//! System command handlers (/help, unknown commands).

use super::CommandResult;
use crate::commands::help::HELP_TEXT;

/// Handle /help command.
pub fn handle_help() -> CommandResult {
    CommandResult::system(HELP_TEXT)
}

/// Handle unknown command.
pub fn handle_unknown(command: &str) -> CommandResult {
    CommandResult::error(format!(
        "Unknown command: {command}. Type /help for available commands."
    ))
}
