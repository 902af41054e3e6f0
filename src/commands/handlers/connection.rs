//! Connection command handlers (/add, /switch, /remove, /list, /status).

use super::{CommandContext, CommandResult};
use crate::commands::help::add_guidance;
use crate::commands::router::AddArgs;
use crate::config::ConnectionConfig;
use crate::connection::{ConnectionState, ConnectionStatus};
use crate::error::DbSageError;
use tracing::warn;

/// Handle /add.
pub async fn handle_add(ctx: &CommandContext<'_>, args: AddArgs) -> CommandResult {
    let config = match args {
        AddArgs::Guidance { name } => return CommandResult::system(add_guidance(&name)),
        AddArgs::Url { name, url } => match ConnectionConfig::from_url(name, &url) {
            Ok(config) => config,
            Err(e) => return CommandResult::error(e.to_string()),
        },
        AddArgs::Fields {
            name,
            host,
            port,
            database,
            user,
            password,
            sslmode,
        } => ConnectionConfig::postgres(name, host, port, database, user, password, sslmode),
    };

    let name = config.name.clone();
    let summary = format!("{} {}", config.db_type.dialect_name(), config.display_target());

    match ctx.registry.add(config).await {
        Ok(true) => CommandResult::system(format!(
            "Added '{name}' ({summary}). It is now the active connection."
        )),
        Ok(false) => CommandResult::system(format!(
            "Added '{name}' ({summary}). Use /switch {name} to make it active."
        )),
        Err(e @ DbSageError::Persistence(_)) => {
            warn!(connection = %name, error = %e, "Connection added but not saved");
            CommandResult::error(format!("Added '{name}', but it could not be saved: {e}"))
        }
        Err(e) => CommandResult::error(format!("Could not add '{name}': {e}")),
    }
}

/// Handle /switch and @name.
pub async fn handle_switch(ctx: &CommandContext<'_>, name: &str) -> CommandResult {
    match ctx.registry.switch(name).await {
        Ok(()) => {
            let target = ctx
                .registry
                .list()
                .await
                .into_iter()
                .find(|c| c.name == name)
                .map(|c| format!(" ({} {})", c.db_type.dialect_name(), c.display_target()))
                .unwrap_or_default();
            CommandResult::system(format!("Switched to '{name}'{target}."))
        }
        Err(e @ DbSageError::Persistence(_)) => {
            CommandResult::error(format!("Switched to '{name}', but it could not be saved: {e}"))
        }
        Err(e) => CommandResult::error(format!("Could not switch to '{name}': {e}")),
    }
}

/// Handle /remove.
pub async fn handle_remove(ctx: &CommandContext<'_>, name: &str) -> CommandResult {
    match ctx.registry.remove(name).await {
        Ok(current) => {
            let next = match current {
                Some(current) => format!(" Active connection: '{current}'."),
                None if ctx.registry.is_empty().await => {
                    " No connections left; use /add to add one.".to_string()
                }
                None => String::new(),
            };
            CommandResult::system(format!("Removed '{name}'.{next}"))
        }
        Err(e) => CommandResult::error(format!("Could not remove '{name}': {e}")),
    }
}

/// Handle /list and @.
pub async fn handle_list(ctx: &CommandContext<'_>) -> CommandResult {
    let statuses = ctx.registry.status().await;
    if statuses.is_empty() {
        return CommandResult::system(
            "No saved connections. Use /add <name> <database-url> to add one.",
        );
    }
    CommandResult::system(format!("Connections:\n{}", format_table(&statuses)))
}

/// Handle /status.
pub async fn handle_status(ctx: &CommandContext<'_>) -> CommandResult {
    let statuses = ctx.registry.status().await;
    let Some(current) = statuses.iter().find(|s| s.is_current) else {
        let hint = if statuses.is_empty() {
            "Use /add to add a connection."
        } else {
            "Use /switch <name> to select one."
        };
        return CommandResult::system(format!("No active connection. {hint}"));
    };

    let health = match (&current.state, &current.detail) {
        (ConnectionState::Unhealthy, Some(detail)) => {
            format!("unhealthy: {detail}\nUse /switch {} to reconnect.", current.config.name)
        }
        (ConnectionState::Disconnected, _) => "not connected yet (opens on first use)".to_string(),
        (state, _) => state.to_string(),
    };

    CommandResult::system(format!(
        "Active connection: '{}'\n  Type: {}\n  Target: {}\n  Health: {}\n\nAll connections:\n{}",
        current.config.name,
        current.config.db_type.dialect_name(),
        current.config.display_target(),
        health,
        format_table(&statuses)
    ))
}

/// One line per connection; the current one is marked with `*`.
fn format_table(statuses: &[ConnectionStatus]) -> String {
    let name_width = statuses
        .iter()
        .map(|s| s.config.name.len())
        .max()
        .unwrap_or(0);
    let target_width = statuses
        .iter()
        .map(|s| s.config.display_target().len())
        .max()
        .unwrap_or(0);

    statuses
        .iter()
        .map(|s| {
            let marker = if s.is_current { '*' } else { ' ' };
            let last_used = match &s.config.last_used {
                Some(_) => s
                    .config
                    .last_used_at()
                    .format("%Y-%m-%d %H:%M UTC")
                    .to_string(),
                None => "never".to_string(),
            };
            format!(
                "{marker} {:<name_width$}  {:<10}  {:<target_width$}  {:<12}  last used: {last_used}",
                s.config.name,
                s.config.db_type.dialect_name(),
                s.config.display_target(),
                s.state.as_str(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionRegistry;
    use crate::db::{MockConnector, MockDatabaseClient};
    use crate::persistence::ConnectionStore;
    use crate::tui::app::ChatMessage;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry(dir: &TempDir, connector: Arc<MockConnector>) -> ConnectionRegistry {
        let store = ConnectionStore::new(dir.path().join("connections.json"));
        ConnectionRegistry::load(store, connector).unwrap()
    }

    fn text(result: CommandResult) -> String {
        match result {
            CommandResult::Messages(messages) => match &messages[0] {
                ChatMessage::System(text) | ChatMessage::Error(text) => text.clone(),
                other => panic!("unexpected message {other:?}"),
            },
            other => panic!("unexpected result {other:?}"),
        }
    }

    fn is_error(result: &CommandResult) -> bool {
        matches!(result, CommandResult::Messages(m) if matches!(m[0], ChatMessage::Error(_)))
    }

    #[tokio::test]
    async fn test_add_list_switch_remove() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(MockConnector::new()));
        let ctx = CommandContext { registry: &registry };

        let result = handle_add(
            &ctx,
            AddArgs::Url {
                name: "prod".into(),
                url: "postgres://app:secret@db:5432/shop".into(),
            },
        )
        .await;
        let message = text(result);
        assert!(message.contains("now the active connection"));
        assert!(!message.contains("secret"));

        let result = handle_add(
            &ctx,
            AddArgs::Fields {
                name: "local".into(),
                host: "localhost".into(),
                port: 5432,
                database: "dev".into(),
                user: "me".into(),
                password: "pw".into(),
                sslmode: None,
            },
        )
        .await;
        assert!(text(result).contains("/switch local"));

        let listing = text(handle_list(&ctx).await);
        assert!(listing.contains("* prod"));
        assert!(listing.contains("active"));
        assert!(listing.contains("connected"));
        assert!(!listing.contains("secret"));

        assert!(text(handle_switch(&ctx, "local").await).contains("Switched to 'local'"));
        assert_eq!(registry.current_name().await.as_deref(), Some("local"));

        let removed = text(handle_remove(&ctx, "local").await);
        assert!(removed.contains("Active connection: 'prod'"));
        let removed = text(handle_remove(&ctx, "prod").await);
        assert!(removed.contains("No connections left"));
    }

    #[tokio::test]
    async fn test_errors_are_reported() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new());
        connector.set_failing("down", true);
        let registry = registry(&dir, Arc::clone(&connector));
        let ctx = CommandContext { registry: &registry };

        let failed = handle_add(
            &ctx,
            AddArgs::Url {
                name: "down".into(),
                url: "mysql://u:p@h:3306/db".into(),
            },
        )
        .await;
        assert!(is_error(&failed));
        assert!(registry.is_empty().await);

        assert!(is_error(
            &handle_add(
                &ctx,
                AddArgs::Url {
                    name: "bad".into(),
                    url: "sqlite://x".into()
                }
            )
            .await
        ));
        assert!(is_error(&handle_switch(&ctx, "missing").await));
        assert!(is_error(&handle_remove(&ctx, "missing").await));
    }

    #[tokio::test]
    async fn test_status() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockDatabaseClient::new());
        let connector = Arc::new(MockConnector::new().with_client("prod", Arc::clone(&client)));
        let registry = registry(&dir, connector);
        let ctx = CommandContext { registry: &registry };

        assert!(text(handle_status(&ctx).await).contains("No active connection"));

        registry
            .add(ConnectionConfig::from_url("prod", "postgres://u@h/db").unwrap())
            .await
            .unwrap();
        let status = text(handle_status(&ctx).await);
        assert!(status.contains("Active connection: 'prod'"));
        assert!(status.contains("Health: active"));

        client.set_healthy(false);
        let status = text(handle_status(&ctx).await);
        assert!(status.contains("unhealthy"));
        assert!(status.contains("/switch prod"));
    }

    #[tokio::test]
    async fn test_add_guidance() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(MockConnector::new()));
        let ctx = CommandContext { registry: &registry };

        let message = text(handle_add(&ctx, AddArgs::Guidance { name: "prod".into() }).await);
        assert!(message.contains("/add prod postgres://"));
        assert!(registry.is_empty().await);
    }
}
