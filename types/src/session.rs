//! Persisted session state.

use serde::{Deserialize, Serialize};

/// Session identity as written to and restored from session storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Id issued at initialize; `None` for stateless transports.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Whether the initialize exchange has completed.
    #[serde(default)]
    pub initialized: bool,
}

impl SessionState {
    pub fn initialized(session_id: Option<String>) -> Self {
        Self {
            session_id,
            initialized: true,
        }
    }
}
