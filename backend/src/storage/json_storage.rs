//! JSON file-based storage implementation.

use super::{Result, SessionStorage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use streamwire_types::SessionState;
use tokio::fs;
use tracing::{debug, info};

/// JSON file storage format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StorageFormat {
    version: u32,
    session: SessionState,
}

/// Storage backend that persists one session's state to a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// Create a new JSON file storage.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Delete the state file. A missing file is not an error.
    pub async fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Removed session state {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionStorage for JsonFileStorage {
    async fn get(&self) -> Result<Option<SessionState>> {
        if !self.path.exists() {
            debug!("No session state at {:?}", self.path);
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path).await?;
        if contents.trim().is_empty() {
            return Ok(None);
        }

        let storage: StorageFormat = serde_json::from_str(&contents)?;
        debug!("Loaded session state from {:?}", self.path);
        Ok(Some(storage.session))
    }

    async fn set(&self, state: &SessionState) -> Result<()> {
        let storage = StorageFormat {
            version: 1,
            session: state.clone(),
        };
        let json = serde_json::to_string_pretty(&storage)?;

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }

        // Write to temporary file first, then rename (atomic operation)
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).await?;
        fs::rename(&temp_path, &self.path).await?;

        info!("Persisted session state to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("missing.json"));
        assert!(storage.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions").join("abc.json");
        let storage = JsonFileStorage::new(&path);

        let state = SessionState::initialized(Some("abc".to_string()));
        storage.set(&state).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(storage.get().await.unwrap(), Some(state));

        storage.remove().await.unwrap();
        assert!(!path.exists());
        // Removing twice is fine
        storage.remove().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        let storage = JsonFileStorage::new(&path);
        assert!(matches!(
            storage.get().await,
            Err(crate::storage::StorageError::Serialization(_))
        ));
    }
}
