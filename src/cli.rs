//! Command-line argument parsing for dbsage.

use clap::Parser;
use std::path::PathBuf;

/// A conversational database assistant for the terminal.
#[derive(Parser, Debug)]
#[command(name = "dbsage")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path (default: ~/.dbsage/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// API key for the chat completions endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", value_name = "URL")]
    pub base_url: Option<String>,

    /// Model name
    #[arg(long, env = "OPENAI_MODEL", value_name = "MODEL")]
    pub model: Option<String>,

    /// Connections file path (default: ~/.dbsage/connections.json)
    #[arg(long, value_name = "PATH")]
    pub connections: Option<PathBuf>,

    /// Seconds a single model response may take before the turn fails
    #[arg(long, value_name = "SECS")]
    pub turn_timeout: Option<u64>,

    /// Log to stderr instead of the log file
    #[arg(long)]
    pub log_stderr: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::Config::default_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse() {
        let cli = Cli::try_parse_from([
            "dbsage",
            "--model",
            "gpt-4o",
            "--connections",
            "/tmp/c.json",
            "--turn-timeout",
            "45",
            "--log-stderr",
        ])
        .unwrap();

        assert_eq!(cli.model.as_deref(), Some("gpt-4o"));
        assert_eq!(cli.connections, Some(PathBuf::from("/tmp/c.json")));
        assert_eq!(cli.turn_timeout, Some(45));
        assert!(cli.log_stderr);
    }

    #[test]
    fn test_config_path_override() {
        let cli = Cli::try_parse_from(["dbsage", "--config", "/etc/dbsage.toml"]).unwrap();
        assert_eq!(cli.config_path(), PathBuf::from("/etc/dbsage.toml"));
    }

    #[test]
    fn test_rejects_positional_arguments() {
        assert!(Cli::try_parse_from(["dbsage", "postgres://localhost/db"]).is_err());
    }

    #[test]
    fn test_bad_timeout_rejected() {
        assert!(Cli::try_parse_from(["dbsage", "--turn-timeout", "soon"]).is_err());
    }
}
