//! Connection management for dbsage.
//!
//! The registry owns every live database handle. Everything else reaches the
//! database through [`HandleProvider`], resolved at call time so `/switch`
//! takes effect on the next tool dispatch.

mod registry;

pub use registry::{ConnectionRegistry, ConnectionState, ConnectionStatus};

use crate::db::{DatabaseBackend, DatabaseClient};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves the currently selected database handle.
#[async_trait]
pub trait HandleProvider: Send + Sync {
    /// The current handle and connection name.
    async fn current_handle(&self) -> Result<(Arc<dyn DatabaseClient>, String)>;

    /// Name and backend of the current connection, without connecting.
    async fn current_target(&self) -> Option<(String, DatabaseBackend)>;
}
