//! In-memory storage, for tests and for hosts that persist elsewhere.

use super::{Result, SessionStorage};
use async_trait::async_trait;
use streamwire_types::SessionState;
use tokio::sync::RwLock;

/// Storage backend that keeps the state in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<Option<SessionState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage that already holds `state`.
    pub fn with_state(state: SessionState) -> Self {
        Self {
            state: RwLock::new(Some(state)),
        }
    }

    /// The currently stored state.
    pub async fn snapshot(&self) -> Option<SessionState> {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn get(&self) -> Result<Option<SessionState>> {
        Ok(self.state.read().await.clone())
    }

    async fn set(&self, state: &SessionState) -> Result<()> {
        *self.state.write().await = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let storage = MemoryStorage::new();
        assert!(storage.get().await.unwrap().is_none());

        let state = SessionState::initialized(Some("s-1".to_string()));
        storage.set(&state).await.unwrap();
        assert_eq!(storage.get().await.unwrap(), Some(state.clone()));
        assert_eq!(storage.snapshot().await, Some(state));
    }
}
