//! Ledger snapshot persistence

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

use super::models::LedgerState;
use super::LedgerError;

/// Durable home of the ledger document
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the last persisted document, `None` if nothing was ever written
    async fn load(&self) -> Result<Option<LedgerState>, LedgerError>;

    /// Replace the persisted document. Must be all-or-nothing.
    async fn persist(&self, state: &LedgerState) -> Result<(), LedgerError>;
}

/// JSON document on local disk, replaced atomically via temp file + fsync + rename
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self) -> Result<Option<LedgerState>, LedgerError> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            info!("No ledger at {}, starting empty", self.path.display());
            return Ok(None);
        }

        info!("Loading ledger from {}", self.path.display());
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| LedgerError::Persistence(format!("read {}: {}", self.path.display(), e)))?;

        let state = serde_json::from_str::<LedgerState>(&content)
            .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        Ok(Some(state))
    }

    async fn persist(&self, state: &LedgerState) -> Result<(), LedgerError> {
        let io = |what: &str, e: std::io::Error| LedgerError::Persistence(format!("{}: {}", what, e));

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| LedgerError::Persistence(format!("serialize: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| io("create dir", e))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json).await.map_err(|e| io("write temp", e))?;

        let file = fs::File::open(&temp_path).await.map_err(|e| io("open temp", e))?;
        file.sync_all().await.map_err(|e| io("fsync", e))?;

        fs::rename(&temp_path, &self.path).await.map_err(|e| io("rename", e))?;

        debug!("Ledger persisted to {}", self.path.display());
        Ok(())
    }
}

/// Volatile store for dry runs and tests
#[derive(Default)]
pub struct MemoryStore;

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<LedgerState>, LedgerError> {
        Ok(None)
    }

    async fn persist(&self, _state: &LedgerState) -> Result<(), LedgerError> {
        Ok(())
    }
}
