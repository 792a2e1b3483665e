//! Session state of one transport.
//!
//! The session id is assigned once, by the initialize exchange or by the
//! one-time restore from storage, and never changes afterwards.

use axum::http::HeaderMap;
use parking_lot::Mutex;
use std::sync::Arc;
use streamwire_types::protocol::SESSION_ID_HEADER;
use streamwire_types::SessionState;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::SessionIdGenerator;
use crate::error::HttpError;
use crate::storage::{SessionStorage, StorageError};

/// Result of an initialize attempt that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Initialization {
    /// First initialize: the state must be persisted and announced.
    Fresh(Option<String>),
    /// Repeated initialize for the session that is already ready.
    Repeat,
}

pub(crate) struct SessionStore {
    state: Mutex<SessionState>,
    generator: Option<SessionIdGenerator>,
    storage: Option<Arc<dyn SessionStorage>>,
    restored: OnceCell<()>,
}

impl SessionStore {
    pub(crate) fn new(
        generator: Option<SessionIdGenerator>,
        storage: Option<Arc<dyn SessionStorage>>,
    ) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            generator,
            storage,
            restored: OnceCell::new(),
        }
    }

    /// Without a generator there is no session to enforce.
    pub(crate) fn is_stateless(&self) -> bool {
        self.generator.is_none()
    }

    pub(crate) fn session_id(&self) -> Option<String> {
        self.state.lock().session_id.clone()
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub(crate) fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Load persisted state, at most once per store.
    ///
    /// Later calls are no-ops, whether or not the first one succeeded.
    pub(crate) async fn restore(&self) -> Result<(), StorageError> {
        let Some(storage) = self.storage.as_ref() else {
            return Ok(());
        };

        let mut failure = None;
        let slot = &mut failure;
        self.restored
            .get_or_init(|| async move {
                match storage.get().await {
                    Ok(Some(stored)) => {
                        let mut state = self.state.lock();
                        if !state.initialized {
                            info!("Restored session state: {:?}", stored.session_id);
                            *state = stored;
                        }
                    }
                    Ok(None) => debug!("No stored session state"),
                    Err(e) => *slot = Some(e),
                }
            })
            .await;

        failure.map_or(Ok(()), Err)
    }

    /// Check-and-set the initialized flag for an initialize request.
    pub(crate) fn initialize(&self, headers: &HeaderMap) -> Result<Initialization, HttpError> {
        let mut state = self.state.lock();
        if state.initialized {
            let requested = session_header(headers)?;
            return match (requested, state.session_id.as_deref()) {
                (Some(requested), Some(current)) if requested == current => {
                    debug!("Repeated initialize for session {}", current);
                    Ok(Initialization::Repeat)
                }
                _ => Err(HttpError::InvalidRequest("Server already initialized")),
            };
        }

        let session_id = self.generator.as_ref().map(|generate| generate());
        *state = SessionState::initialized(session_id.clone());
        Ok(Initialization::Fresh(session_id))
    }

    /// Write the current state through to storage, if any is configured.
    pub(crate) async fn persist(&self) -> Result<(), StorageError> {
        match self.storage.as_ref() {
            Some(storage) => storage.set(&self.snapshot()).await,
            None => Ok(()),
        }
    }

    /// Check the session header of a non-initialize request.
    pub(crate) fn validate(&self, headers: &HeaderMap) -> Result<(), HttpError> {
        if self.is_stateless() {
            return Ok(());
        }

        let state = self.state.lock();
        if !state.initialized {
            return Err(HttpError::NotInitialized);
        }

        match session_header(headers)? {
            None => Err(HttpError::MissingSessionId),
            Some(id) if state.session_id.as_deref() == Some(id) => Ok(()),
            Some(_) => Err(HttpError::SessionNotFound),
        }
    }
}

/// The `mcp-session-id` header, rejecting repeated values.
pub(crate) fn session_header(headers: &HeaderMap) -> Result<Option<&str>, HttpError> {
    let mut values = headers.get_all(SESSION_ID_HEADER).iter();
    let Some(first) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(HttpError::AmbiguousSessionId);
    }
    // A value that is not visible ASCII cannot match any issued id.
    Ok(Some(first.to_str().unwrap_or("")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use axum::http::HeaderValue;

    fn fixed_generator(id: &'static str) -> Option<SessionIdGenerator> {
        Some(Arc::new(move || id.to_string()))
    }

    fn with_session(id: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static(id));
        headers
    }

    #[test]
    fn test_stateless_always_validates() {
        let store = SessionStore::new(None, None);
        assert!(store.validate(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let store = SessionStore::new(fixed_generator("abc"), None);
        assert!(matches!(
            store.validate(&with_session("abc")),
            Err(HttpError::NotInitialized)
        ));

        assert_eq!(
            store.initialize(&HeaderMap::new()).unwrap(),
            Initialization::Fresh(Some("abc".to_string()))
        );
        assert!(matches!(
            store.validate(&HeaderMap::new()),
            Err(HttpError::MissingSessionId)
        ));
        assert!(matches!(
            store.validate(&with_session("other")),
            Err(HttpError::SessionNotFound)
        ));
        assert!(store.validate(&with_session("abc")).is_ok());

        let mut doubled = with_session("abc");
        doubled.append(SESSION_ID_HEADER, HeaderValue::from_static("abc"));
        assert!(matches!(
            store.validate(&doubled),
            Err(HttpError::AmbiguousSessionId)
        ));
    }

    #[test]
    fn test_second_initialize() {
        let store = SessionStore::new(fixed_generator("abc"), None);
        store.initialize(&HeaderMap::new()).unwrap();

        assert!(matches!(
            store.initialize(&HeaderMap::new()),
            Err(HttpError::InvalidRequest(_))
        ));
        assert!(matches!(
            store.initialize(&with_session("zzz")),
            Err(HttpError::InvalidRequest(_))
        ));
        assert_eq!(
            store.initialize(&with_session("abc")).unwrap(),
            Initialization::Repeat
        );
        assert_eq!(store.session_id().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_restore_happens_once() {
        let storage = Arc::new(MemoryStorage::with_state(SessionState::initialized(Some(
            "restored".to_string(),
        ))));
        let store = SessionStore::new(fixed_generator("fresh"), Some(storage.clone()));

        store.restore().await.unwrap();
        assert!(store.is_initialized());
        assert_eq!(store.session_id().as_deref(), Some("restored"));

        // Changes in storage after the first read are not picked up
        storage
            .set(&SessionState::initialized(Some("later".to_string())))
            .await
            .unwrap();
        store.restore().await.unwrap();
        assert_eq!(store.session_id().as_deref(), Some("restored"));
    }

    #[tokio::test]
    async fn test_persist_writes_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(fixed_generator("abc"), Some(storage.clone()));
        store.initialize(&HeaderMap::new()).unwrap();
        store.persist().await.unwrap();

        assert_eq!(
            storage.snapshot().await,
            Some(SessionState::initialized(Some("abc".to_string())))
        );
    }
}
