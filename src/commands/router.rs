//! Command parsing for dbsage.
//!
//! Parses user input into structured commands. Anything that is not a
//! command goes to the model.

use super::tokenizer::split_args;

pub const ADD_USAGE: &str = "Usage: /add <name> <database-url>\n       \
     /add <name> <host> <port> <database> <user> <password> [sslmode]";

/// Arguments of `/add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddArgs {
    /// `/add <name> <database-url>`
    Url { name: String, url: String },
    /// `/add <name> <host> <port> <database> <user> <password> [sslmode]`,
    /// always PostgreSQL.
    Fields {
        name: String,
        host: String,
        port: u16,
        database: String,
        user: String,
        password: String,
        sslmode: Option<String>,
    },
    /// `/add <name>` alone prints how to add a connection.
    Guidance { name: String },
}

/// Parsed command with arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(AddArgs),
    /// Switch to a saved connection (`/switch` or `@name`).
    Switch(String),
    Remove(String),
    /// List connections (`/list` or `@`).
    List,
    Status,
    Help,
    /// Clear the conversation.
    Clear,
    Exit,
    /// Free-form text for the model.
    NaturalLanguage(String),
    Unknown(String),
    /// A known command with bad arguments; carries the usage text.
    Usage(String),
}

/// Command router for parsing user input.
pub struct CommandRouter;

impl CommandRouter {
    /// Parse user input into a Command.
    pub fn parse(input: &str) -> Command {
        let input = input.trim();

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            return Command::Exit;
        }

        if let Some(name) = input.strip_prefix('@') {
            let name = name.trim();
            return if name.is_empty() {
                Command::List
            } else {
                Command::Switch(name.to_string())
            };
        }

        if !input.starts_with('/') {
            return Command::NaturalLanguage(input.to_string());
        }

        let (command, args) = match input.split_once(char::is_whitespace) {
            Some((command, args)) => (command.to_lowercase(), args.trim()),
            None => (input.to_lowercase(), ""),
        };

        match command.as_str() {
            "/add" => Self::parse_add(args),
            "/switch" => Self::single_name(args, "/switch", Command::Switch),
            "/remove" => Self::single_name(args, "/remove", Command::Remove),
            "/list" => Command::List,
            "/status" => Command::Status,
            "/help" => Command::Help,
            "/clear" => Command::Clear,
            "/exit" | "/quit" => Command::Exit,
            _ => Command::Unknown(command),
        }
    }

    fn single_name(args: &str, command: &str, build: fn(String) -> Command) -> Command {
        let words = split_args(args);
        match words.as_slice() {
            [name] => build(name.clone()),
            _ => Command::Usage(format!("Usage: {command} <name>")),
        }
    }

    /// Parse /add arguments by word count.
    fn parse_add(args: &str) -> Command {
        let words = split_args(args);

        match words.as_slice() {
            [name] => Command::Add(AddArgs::Guidance { name: name.clone() }),
            [name, url] => Command::Add(AddArgs::Url {
                name: name.clone(),
                url: url.clone(),
            }),
            [name, host, port, database, user, password, rest @ ..] if rest.len() <= 1 => {
                let Ok(port) = port.parse::<u16>() else {
                    return Command::Usage(format!(
                        "Invalid port '{port}': expected a number between 1 and 65535\n{ADD_USAGE}"
                    ));
                };
                if port == 0 {
                    return Command::Usage(format!(
                        "Invalid port '0': expected a number between 1 and 65535\n{ADD_USAGE}"
                    ));
                }
                Command::Add(AddArgs::Fields {
                    name: name.clone(),
                    host: host.clone(),
                    port,
                    database: database.clone(),
                    user: user.clone(),
                    password: password.clone(),
                    sslmode: rest.first().cloned(),
                })
            }
            _ => Command::Usage(ADD_USAGE.to_string()),
        }
    }
}
