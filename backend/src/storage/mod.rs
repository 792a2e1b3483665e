//! Storage layer for persisting session state.
//!
//! A transport reads its state at most once, lazily, before handling its
//! first message, and writes it back after the initialize exchange.

mod json_storage;
mod memory_storage;

pub use json_storage::JsonFileStorage;
pub use memory_storage::MemoryStorage;

use async_trait::async_trait;
use streamwire_types::SessionState;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Trait for session storage backends.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Load the stored state, if any was ever written.
    async fn get(&self) -> Result<Option<SessionState>>;

    /// Replace the stored state.
    async fn set(&self, state: &SessionState) -> Result<()>;
}
