//! Saved connection configurations.
//!
//! Stored as a single JSON object keyed by connection name. Writes go to a
//! temp file in the same directory which is then renamed over the target.

use crate::config::{app_dir, ConnectionConfig};
use crate::error::{DbSageError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Connection configurations keyed by name.
pub type ConnectionSet = BTreeMap<String, ConnectionConfig>;

const FILE_NAME: &str = "connections.json";

/// Reads and writes the connections file.
#[derive(Debug, Clone)]
pub struct ConnectionStore {
    path: PathBuf,
}

impl ConnectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.dbsage/connections.json`, or the platform config dir equivalent.
    pub fn default_path() -> Result<PathBuf> {
        app_dir()
            .map(|dir| dir.join(FILE_NAME))
            .ok_or_else(|| DbSageError::persistence("Could not determine home directory"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads all saved connections.
    ///
    /// A missing file is an empty set. A file that cannot be parsed is logged
    /// and treated as empty; only I/O failures are errors.
    pub fn load(&self) -> Result<ConnectionSet> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No connections file yet");
                return Ok(ConnectionSet::new());
            }
            Err(e) => {
                return Err(DbSageError::persistence(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let mut connections: ConnectionSet = match serde_json::from_str(&content) {
            Ok(set) => set,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "Ignoring unreadable connections file: {e}"
                );
                return Ok(ConnectionSet::new());
            }
        };

        // The key is authoritative.
        for (name, config) in connections.iter_mut() {
            config.name.clone_from(name);
        }

        debug!(count = connections.len(), "Loaded saved connections");
        Ok(connections)
    }

    /// Writes the full set atomically.
    pub fn save(&self, connections: &ConnectionSet) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        ensure_private_dir(&dir)?;

        let json = serde_json::to_string_pretty(connections).map_err(|e| {
            DbSageError::persistence(format!("Failed to serialize connections: {e}"))
        })?;

        let write_err =
            |e: std::io::Error| DbSageError::persistence(format!("Failed to save connections: {e}"));

        let mut file = NamedTempFile::new_in(&dir).map_err(write_err)?;
        file.write_all(json.as_bytes()).map_err(write_err)?;
        file.write_all(b"\n").map_err(write_err)?;
        file.as_file().sync_all().map_err(write_err)?;
        file.persist(&self.path)
            .map_err(|e| write_err(e.error))?;

        debug!(count = connections.len(), path = %self.path.display(), "Saved connections");
        Ok(())
    }
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }

    fs::create_dir_all(dir).map_err(|e| {
        DbSageError::persistence(format!("Failed to create {}: {e}", dir.display()))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
            DbSageError::persistence(format!(
                "Failed to set permissions on {}: {e}",
                dir.display()
            ))
        })?;
    }

    Ok(())
}
