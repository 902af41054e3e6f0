//! Shared helpers for integration tests.

use dbsage::config::ConnectionConfig;
use dbsage::connection::ConnectionRegistry;
use dbsage::db::{MockConnector, MockDatabaseClient};
use dbsage::llm::ScriptedLlmClient;
use dbsage::orchestrator::{Orchestrator, OrchestratorEvent, TurnState, TurnUpdate};
use dbsage::persistence::ConnectionStore;
use dbsage::tools::ToolCatalog;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// A registry backed by a temp connections file and a mock connector.
pub struct TestRegistry {
    pub dir: TempDir,
    pub connector: Arc<MockConnector>,
    pub registry: Arc<ConnectionRegistry>,
}

impl TestRegistry {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let connector = Arc::new(MockConnector::new());
        let registry = Arc::new(
            ConnectionRegistry::load(ConnectionStore::new(Self::path_in(&dir)), connector.clone())
                .unwrap(),
        );
        Self {
            dir,
            connector,
            registry,
        }
    }

    fn path_in(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("connections.json")
    }

    pub fn store(&self) -> ConnectionStore {
        ConnectionStore::new(Self::path_in(&self.dir))
    }

    /// Registers a mock client for `name` and adds it to the registry.
    pub async fn add(&self, name: &str, client: MockDatabaseClient) -> Arc<MockDatabaseClient> {
        let client = Arc::new(client);
        self.connector.register(name, Arc::clone(&client));
        let url = format!("postgres://user:secret@{name}.internal:5432/{name}_db");
        self.registry
            .add(ConnectionConfig::from_url(name, &url).unwrap())
            .await
            .unwrap();
        client
    }

    /// An orchestrator that resolves handles through this registry.
    pub fn orchestrator(
        &self,
        llm: Arc<ScriptedLlmClient>,
    ) -> (Orchestrator, mpsc::UnboundedReceiver<OrchestratorEvent>) {
        Orchestrator::new(
            llm,
            Arc::new(ToolCatalog::new()),
            self.registry.clone(),
            None,
        )
    }
}

/// Feeds events until the turn finishes or stops for confirmation.
pub async fn settle(
    orchestrator: &mut Orchestrator,
    rx: &mut mpsc::UnboundedReceiver<OrchestratorEvent>,
) -> Vec<TurnUpdate> {
    let mut updates = Vec::new();
    while matches!(
        orchestrator.state(),
        TurnState::Streaming | TurnState::Dispatching
    ) {
        let event = rx.recv().await.expect("event channel closed");
        updates.extend(orchestrator.on_event(event).await);
    }
    updates
}

/// Concatenated streamed text.
pub fn streamed_text(updates: &[TurnUpdate]) -> String {
    updates
        .iter()
        .filter_map(|u| match u {
            TurnUpdate::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
