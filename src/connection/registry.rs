//! The set of named connections and their live handles.

use super::HandleProvider;
use crate::config::{validate_name, ConnectionConfig};
use crate::db::{DatabaseBackend, DatabaseClient, DatabaseConnector};
use crate::error::{DbSageError, Result};
use crate::persistence::{ConnectionSet, ConnectionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Observed state of a saved connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Current and healthy.
    Active,
    /// Open and healthy, but not current.
    Connected,
    /// Open, but the health check failed.
    Unhealthy,
    /// No open handle.
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Connected => "connected",
            Self::Unhealthy => "unhealthy",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of [`ConnectionRegistry::status`].
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub config: ConnectionConfig,
    pub state: ConnectionState,
    pub is_current: bool,
    /// Health check failure, when there was one.
    pub detail: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    configs: ConnectionSet,
    handles: HashMap<String, Arc<dyn DatabaseClient>>,
    current: Option<String>,
}

impl RegistryState {
    fn save(&self, store: &ConnectionStore) -> Result<()> {
        store.save(&self.configs)
    }
}

/// Owns saved connection configurations and the live handles opened for
/// them.
///
/// Handles are cloned out under the lock and used after it is released, so a
/// slow query never blocks `/list` or `/switch`. If writing the connections
/// file fails the in-memory change is kept and the error is returned.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    connector: Arc<dyn DatabaseConnector>,
    store: ConnectionStore,
}

impl ConnectionRegistry {
    /// Loads saved connections without connecting. The most recently used
    /// entry becomes current and is opened on first use.
    pub fn load(store: ConnectionStore, connector: Arc<dyn DatabaseConnector>) -> Result<Self> {
        let configs = store.load()?;
        let current = sort_by_last_used(configs.values())
            .first()
            .map(|c| c.name.clone());

        info!(
            count = configs.len(),
            current = current.as_deref().unwrap_or("none"),
            "Connection registry loaded"
        );

        Ok(Self {
            state: RwLock::new(RegistryState {
                configs,
                handles: HashMap::new(),
                current,
            }),
            connector,
            store,
        })
    }

    /// Adds a connection and opens it. Returns `true` if it became current.
    ///
    /// Nothing changes if the name is taken or the connection cannot be
    /// opened.
    pub async fn add(&self, mut config: ConnectionConfig) -> Result<bool> {
        validate_name(&config.name)?;
        let name = config.name.clone();

        if self.state.read().await.configs.contains_key(&name) {
            return Err(DbSageError::DuplicateConnection(name));
        }

        let handle = self.connector.open(&config).await?;

        let mut state = self.state.write().await;
        if state.configs.contains_key(&name) {
            drop(state);
            close_quietly(&name, handle).await;
            return Err(DbSageError::DuplicateConnection(name));
        }

        let became_current = state.current.is_none();
        if became_current {
            config.touch();
            state.current = Some(name.clone());
        }
        state.configs.insert(name.clone(), config);
        state.handles.insert(name.clone(), handle);

        info!(connection = %name, became_current, "Connection added");
        state.save(&self.store)?;
        Ok(became_current)
    }

    /// Removes a connection, closing its handle. Returns the new current
    /// connection name.
    pub async fn remove(&self, name: &str) -> Result<Option<String>> {
        let mut state = self.state.write().await;
        if state.configs.remove(name).is_none() {
            return Err(DbSageError::ConnectionNotFound(name.to_string()));
        }
        let handle = state.handles.remove(name);

        if state.current.as_deref() == Some(name) {
            state.current = sort_by_last_used(state.configs.values())
                .first()
                .map(|c| c.name.clone());
        }
        let current = state.current.clone();
        let saved = state.save(&self.store);
        drop(state);

        if let Some(handle) = handle {
            close_quietly(name, handle).await;
        }

        info!(connection = %name, "Connection removed");
        saved.map(|_| current)
    }

    /// Makes `name` current, reconnecting if its handle is missing or
    /// unhealthy. On failure the previous selection is kept.
    pub async fn switch(&self, name: &str) -> Result<()> {
        let (config, existing) = {
            let state = self.state.read().await;
            let config = state
                .configs
                .get(name)
                .cloned()
                .ok_or_else(|| DbSageError::ConnectionNotFound(name.to_string()))?;
            (config, state.handles.get(name).cloned())
        };

        let mut stale = None;
        let reusable = match existing {
            Some(handle) => match handle.check().await {
                Ok(()) => Some(handle),
                Err(e) => {
                    warn!(connection = %name, "Handle failed health check, reconnecting: {e}");
                    if let Err(e) = handle.close().await {
                        debug!(connection = %name, "Error closing stale handle: {e}");
                    }
                    stale = Some(handle);
                    None
                }
            },
            None => None,
        };

        let handle = match reusable {
            Some(handle) => handle,
            None => match self.connector.open(&config).await {
                Ok(handle) => handle,
                Err(e) => {
                    if let Some(stale) = stale {
                        let mut state = self.state.write().await;
                        if state
                            .handles
                            .get(name)
                            .is_some_and(|h| Arc::ptr_eq(h, &stale))
                        {
                            state.handles.remove(name);
                        }
                    }
                    return Err(e);
                }
            },
        };

        let mut state = self.state.write().await;
        let Some(config) = state.configs.get_mut(name) else {
            drop(state);
            close_quietly(name, handle).await;
            return Err(DbSageError::ConnectionNotFound(name.to_string()));
        };
        config.touch();
        state.handles.insert(name.to_string(), handle);
        state.current = Some(name.to_string());

        info!(connection = %name, "Switched connection");
        state.save(&self.store)
    }

    /// The current handle and its name.
    ///
    /// A missing handle is opened lazily. A handle that fails its health
    /// check is reported, not reopened; `/switch` reconnects.
    pub async fn current(&self) -> Result<(Arc<dyn DatabaseClient>, String)> {
        let (name, config, existing) = {
            let state = self.state.read().await;
            let name = state.current.clone().ok_or(DbSageError::NoActiveConnection)?;
            let config = state
                .configs
                .get(&name)
                .cloned()
                .ok_or(DbSageError::NoActiveConnection)?;
            let existing = state.handles.get(&name).cloned();
            (name, config, existing)
        };

        if let Some(handle) = existing {
            handle.check().await.map_err(|e| {
                DbSageError::connection(format!(
                    "'{name}' failed its health check ({e}). Use /switch {name} to reconnect."
                ))
            })?;
            return Ok((handle, name));
        }

        debug!(connection = %name, "Opening handle on first use");
        let opened = self.connector.open(&config).await?;

        let mut state = self.state.write().await;
        if let Some(raced) = state.handles.get(&name).cloned() {
            drop(state);
            close_quietly(&name, opened).await;
            return Ok((raced, name));
        }
        state.handles.insert(name.clone(), opened.clone());
        Ok((opened, name))
    }

    pub async fn current_name(&self) -> Option<String> {
        self.state.read().await.current.clone()
    }

    /// Snapshot of saved configurations, ordered by name.
    pub async fn list(&self) -> Vec<ConnectionConfig> {
        self.state.read().await.configs.values().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.configs.is_empty()
    }

    /// Configurations ordered most recently used first. Entries never used
    /// sort last, by name.
    pub async fn sorted_by_last_used(&self) -> Vec<ConnectionConfig> {
        let state = self.state.read().await;
        sort_by_last_used(state.configs.values())
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn last_used_name(&self) -> Option<String> {
        let state = self.state.read().await;
        sort_by_last_used(state.configs.values())
            .first()
            .map(|c| c.name.clone())
    }

    /// Per-connection state. Open handles are health-checked.
    pub async fn status(&self) -> Vec<ConnectionStatus> {
        let (configs, handles, current) = {
            let state = self.state.read().await;
            (
                state.configs.clone(),
                state.handles.clone(),
                state.current.clone(),
            )
        };

        let mut statuses = Vec::with_capacity(configs.len());
        for (name, config) in configs {
            let is_current = current.as_deref() == Some(name.as_str());
            let (state, detail) = match handles.get(&name) {
                None => (ConnectionState::Disconnected, None),
                Some(handle) => match handle.check().await {
                    Ok(()) if is_current => (ConnectionState::Active, None),
                    Ok(()) => (ConnectionState::Connected, None),
                    Err(e) => (ConnectionState::Unhealthy, Some(e.to_string())),
                },
            };
            statuses.push(ConnectionStatus {
                config,
                state,
                is_current,
                detail,
            });
        }
        statuses
    }

    /// Closes every open handle. Saved configurations are kept.
    pub async fn close_all(&self) {
        let handles: Vec<_> = self.state.write().await.handles.drain().collect();
        for (name, handle) in handles {
            close_quietly(&name, handle).await;
        }
    }
}

#[async_trait]
impl HandleProvider for ConnectionRegistry {
    async fn current_handle(&self) -> Result<(Arc<dyn DatabaseClient>, String)> {
        self.current().await
    }

    async fn current_target(&self) -> Option<(String, DatabaseBackend)> {
        let state = self.state.read().await;
        let name = state.current.clone()?;
        let backend = state.configs.get(&name)?.db_type;
        Some((name, backend))
    }
}

fn sort_by_last_used<'a>(
    configs: impl Iterator<Item = &'a ConnectionConfig>,
) -> Vec<&'a ConnectionConfig> {
    let mut sorted: Vec<_> = configs.collect();
    sorted.sort_by(|a, b| {
        b.last_used_at()
            .cmp(&a.last_used_at())
            .then_with(|| a.name.cmp(&b.name))
    });
    sorted
}

async fn close_quietly(name: &str, handle: Arc<dyn DatabaseClient>) {
    if let Err(e) = handle.close().await {
        warn!(connection = %name, "Error closing connection: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MockConnector, MockDatabaseClient};
    use tempfile::TempDir;

    fn pg(name: &str) -> ConnectionConfig {
        ConnectionConfig::postgres(name, "localhost", 5432, "app", "user", "secret", None)
    }

    fn registry(dir: &TempDir, connector: Arc<MockConnector>) -> ConnectionRegistry {
        let store = ConnectionStore::new(dir.path().join("connections.json"));
        ConnectionRegistry::load(store, connector).unwrap()
    }

    #[tokio::test]
    async fn test_first_add_becomes_current() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(MockConnector::new()));

        assert!(registry.add(pg("a")).await.unwrap());
        assert!(!registry.add(pg("b")).await.unwrap());

        assert_eq!(registry.current_name().await.as_deref(), Some("a"));
        let list = registry.list().await;
        assert!(list[0].last_used.is_some());
        assert!(list[1].last_used.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_add_fails() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new());
        let registry = registry(&dir, connector.clone());

        registry.add(pg("a")).await.unwrap();
        let err = registry.add(pg("a")).await.unwrap_err();

        assert!(matches!(err, DbSageError::DuplicateConnection(_)));
        assert_eq!(connector.opened(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_failed_add_leaves_registry_unchanged() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new());
        connector.set_failing("down", true);
        let registry = registry(&dir, connector);

        assert!(registry.add(pg("down")).await.is_err());
        assert!(registry.is_empty().await);
        assert_eq!(registry.current_name().await, None);
        assert!(!dir.path().join("connections.json").exists());
    }

    #[tokio::test]
    async fn test_remove_current_reassigns() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new());
        let registry = registry(&dir, connector.clone());
        registry.add(pg("a")).await.unwrap();
        registry.add(pg("b")).await.unwrap();

        let next = registry.remove("a").await.unwrap();

        assert_eq!(next.as_deref(), Some("b"));
        assert_eq!(registry.current_name().await.as_deref(), Some("b"));
        assert!(connector.client("a").unwrap().is_closed());

        assert_eq!(registry.remove("b").await.unwrap(), None);
        assert!(matches!(
            registry.current().await.err().unwrap(),
            DbSageError::NoActiveConnection
        ));
    }

    #[tokio::test]
    async fn test_remove_unknown() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(MockConnector::new()));
        assert!(matches!(
            registry.remove("ghost").await.unwrap_err(),
            DbSageError::ConnectionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_switch_reuses_healthy_handle() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new());
        let registry = registry(&dir, connector.clone());
        registry.add(pg("a")).await.unwrap();
        registry.add(pg("b")).await.unwrap();

        registry.switch("b").await.unwrap();

        assert_eq!(registry.current_name().await.as_deref(), Some("b"));
        assert_eq!(connector.opened(), vec!["a", "b"]);
        assert!(registry.list().await[1].last_used.is_some());
    }

    #[tokio::test]
    async fn test_switch_reconnects_unhealthy_handle() {
        let dir = TempDir::new().unwrap();
        let stale = Arc::new(MockDatabaseClient::new());
        let connector = Arc::new(MockConnector::new().with_client("a", stale.clone()));
        let registry = registry(&dir, connector.clone());
        registry.add(pg("a")).await.unwrap();

        stale.set_healthy(false);
        let fresh = Arc::new(MockDatabaseClient::new());
        connector.register("a", fresh.clone());
        registry.switch("a").await.unwrap();

        assert!(stale.is_closed());
        let (handle, _) = registry.current().await.unwrap();
        handle.get_all_tables().await.unwrap();
        assert_eq!(fresh.call_count("get_all_tables"), 1);
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_previous_current() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(MockConnector::new());
        let registry = registry(&dir, connector.clone());
        registry.add(pg("a")).await.unwrap();
        registry.add(pg("b")).await.unwrap();
        registry.close_all().await;

        connector.set_failing("b", true);
        assert!(registry.switch("b").await.is_err());
        assert_eq!(registry.current_name().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_current_reports_unhealthy_without_reconnecting() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockDatabaseClient::new());
        let connector = Arc::new(MockConnector::new().with_client("a", client.clone()));
        let registry = registry(&dir, connector.clone());
        registry.add(pg("a")).await.unwrap();

        client.set_healthy(false);
        let err = registry.current().await.err().unwrap();

        assert!(matches!(err, DbSageError::Connection(_)));
        assert_eq!(connector.opened(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_load_selects_most_recent_and_connects_lazily() {
        let dir = TempDir::new().unwrap();
        let store = ConnectionStore::new(dir.path().join("connections.json"));
        let mut set = ConnectionSet::new();
        let mut old = pg("old");
        old.last_used = Some("2024-01-01T00:00:00+00:00".into());
        let mut recent = pg("recent");
        recent.last_used = Some("2025-06-01T12:00:00+00:00".into());
        set.insert("old".into(), old);
        set.insert("recent".into(), recent);
        set.insert("never".into(), pg("never"));
        store.save(&set).unwrap();

        let connector = Arc::new(MockConnector::new());
        let registry = ConnectionRegistry::load(store, connector.clone()).unwrap();

        assert_eq!(registry.current_name().await.as_deref(), Some("recent"));
        assert!(connector.opened().is_empty());

        let names: Vec<_> = registry
            .sorted_by_last_used()
            .await
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["recent", "old", "never"]);

        let (_, name) = registry.current().await.unwrap();
        assert_eq!(name, "recent");
        assert_eq!(connector.opened(), vec!["recent"]);
    }

    #[tokio::test]
    async fn test_status_states() {
        let dir = TempDir::new().unwrap();
        let store = ConnectionStore::new(dir.path().join("connections.json"));
        let mut saved = ConnectionSet::new();
        saved.insert("d".into(), pg("d"));
        store.save(&saved).unwrap();

        let b_client = Arc::new(MockDatabaseClient::new());
        let connector = Arc::new(MockConnector::new().with_client("b", b_client.clone()));
        let registry = ConnectionRegistry::load(store, connector).unwrap();
        registry.add(pg("a")).await.unwrap();
        registry.add(pg("b")).await.unwrap();
        registry.add(pg("c")).await.unwrap();
        registry.switch("a").await.unwrap();
        b_client.set_healthy(false);

        let states: Vec<_> = registry
            .status()
            .await
            .into_iter()
            .map(|s| (s.config.name, s.state))
            .collect();

        assert_eq!(
            states,
            vec![
                ("a".to_string(), ConnectionState::Active),
                ("b".to_string(), ConnectionState::Unhealthy),
                ("c".to_string(), ConnectionState::Connected),
                ("d".to_string(), ConnectionState::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn test_switch_persists_last_used() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(MockConnector::new()));
        registry.add(pg("a")).await.unwrap();
        registry.add(pg("b")).await.unwrap();

        registry.switch("b").await.unwrap();

        let saved = ConnectionStore::new(dir.path().join("connections.json"))
            .load()
            .unwrap();
        assert!(saved["b"].last_used.is_some());
    }
}
