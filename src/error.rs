//! Error types for dbsage.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for dbsage operations.
#[derive(Error, Debug)]
pub enum DbSageError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (syntax errors, constraint violations, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Chat completion API errors (rate limits, auth, broken streams, etc.)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration errors (invalid config file, missing API key, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors reading or writing the connections file.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// No connection is selected in the registry.
    #[error("No active connection. Use /add or /switch to select one.")]
    NoActiveConnection,

    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("Connection '{0}' already exists")]
    DuplicateConnection(String),

    /// The model asked for a tool that is not in the catalog.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool-call arguments were not a JSON object.
    #[error("Malformed tool arguments: {0}")]
    MalformedToolArgs(String),

    /// A request or confirmation is already in flight.
    #[error("{0}")]
    Busy(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbSageError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an LLM error with the given message.
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) | Self::NoActiveConnection => "Connection Error",
            Self::ConnectionNotFound(_) | Self::DuplicateConnection(_) => "Registry Error",
            Self::Query(_) => "Query Error",
            Self::Llm(_) => "LLM Error",
            Self::Config(_) => "Configuration Error",
            Self::Persistence(_) => "Persistence Error",
            Self::UnknownTool(_) | Self::MalformedToolArgs(_) => "Tool Error",
            Self::Busy(_) => "Busy",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Renders the error as the JSON body handed back to the model as a tool
    /// response.
    pub fn to_tool_body(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}

/// Result type alias using DbSageError.
pub type Result<T> = std::result::Result<T, DbSageError>;
