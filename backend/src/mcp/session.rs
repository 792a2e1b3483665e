//! MCP session management.
//!
//! The host owns one [`StreamableHttpTransport`] per live session and routes
//! each HTTP request to the transport named by its `mcp-session-id` header.
//! Requests without the header start a new transport, which is registered
//! once its initialize exchange succeeds.

use axum::extract::Request;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use streamwire_types::JsonRpcMessage;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HttpError, TransportError};
use crate::storage::{JsonFileStorage, SessionStorage};
use crate::transport::{
    session_header, CorsPolicy, StreamableHttpTransport, TransportHandler, TransportOptions,
};

/// Manager for MCP sessions.
#[derive(Clone)]
pub struct SessionHost {
    inner: Arc<HostInner>,
}

struct HostInner {
    sessions: RwLock<HashMap<String, StreamableHttpTransport>>,
    options: TransportOptions,
    handler: Arc<dyn TransportHandler>,
    session_dir: Option<PathBuf>,
    cors: CorsPolicy,
}

impl SessionHost {
    /// Create a host.
    ///
    /// `options` is the template for every transport. Its session id
    /// generator only decides between stateful and stateless operation: the
    /// host assigns UUIDs itself. With a `session_dir`, each session is
    /// persisted to `<session_dir>/<id>.json`.
    pub fn new(
        options: TransportOptions,
        handler: Arc<dyn TransportHandler>,
        session_dir: Option<PathBuf>,
    ) -> Self {
        let cors = CorsPolicy::new(&options.cors);
        Self {
            inner: Arc::new(HostInner {
                sessions: RwLock::new(HashMap::new()),
                options,
                handler,
                session_dir,
                cors,
            }),
        }
    }

    pub fn is_stateless(&self) -> bool {
        self.inner.options.session_id_generator.is_none()
    }

    /// Route one HTTP request.
    pub async fn handle(&self, request: Request) -> Response {
        if self.is_stateless() {
            return self.handle_stateless(request).await;
        }

        let session_id = match session_header(request.headers()) {
            Ok(id) => id.map(str::to_string),
            Err(e) => return self.reject(e),
        };

        match session_id {
            Some(id) => match self.lookup(&id).await {
                Some(transport) => self.dispatch(&id, transport, request).await,
                None => {
                    debug!("MCP: Unknown session {}", id);
                    self.reject(HttpError::SessionNotFound)
                }
            },
            None => match request.method().clone() {
                Method::OPTIONS => self.preflight(),
                Method::POST => self.start_session(request).await,
                Method::GET | Method::DELETE => self.reject(HttpError::MissingSessionId),
                _ => self.reject(HttpError::MethodNotAllowed),
            },
        }
    }

    /// Get a live session by id.
    pub async fn get(&self, id: &str) -> Option<StreamableHttpTransport> {
        self.inner.sessions.read().await.get(id).cloned()
    }

    /// Get the number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Close a session and forget its persisted state.
    pub async fn terminate(&self, id: &str) -> bool {
        let Some(transport) = self.inner.sessions.write().await.remove(id) else {
            return false;
        };
        transport.close();
        self.remove_state(id).await;
        info!("Terminated MCP session: {}", id);
        true
    }

    /// Close and evict sessions idle for longer than `max_idle`.
    ///
    /// Sessions with an open standalone stream are kept. Persisted state is
    /// kept too, so an evicted session can be re-hydrated later.
    pub async fn cleanup_stale(&self, max_idle: Duration) -> usize {
        let stale: Vec<StreamableHttpTransport> = {
            let mut sessions = self.inner.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, transport)| {
                    !transport.has_standalone_stream() && transport.idle_for() > max_idle
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| {
                    let transport = sessions.remove(id)?;
                    info!(
                        "Cleaning up stale MCP session: {} (idle: {}s)",
                        id,
                        transport.idle_for().as_secs()
                    );
                    Some(transport)
                })
                .collect()
        };

        for transport in &stale {
            transport.close();
        }
        stale.len()
    }

    /// Close every live session.
    pub async fn close_all(&self) {
        let sessions: Vec<StreamableHttpTransport> = self
            .inner
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, transport)| transport)
            .collect();
        if !sessions.is_empty() {
            info!("Closing {} MCP session(s)", sessions.len());
        }
        for transport in sessions {
            transport.close();
        }
    }

    async fn handle_stateless(&self, request: Request) -> Response {
        match request.method().clone() {
            Method::OPTIONS => self.preflight(),
            Method::POST => {
                let transport = StreamableHttpTransport::new(
                    self.inner.options.clone(),
                    self.inner.handler.clone(),
                );
                transport.handle_request(request).await
            }
            _ => self.reject(HttpError::MethodNotAllowed),
        }
    }

    /// POST without a session: a fresh transport that may become a session.
    async fn start_session(&self, request: Request) -> Response {
        let id = Uuid::new_v4().to_string();
        let transport = self.build_transport(&id);
        let response = transport.handle_request(request).await;

        if transport.is_initialized() && !transport.is_closed() {
            self.inner
                .sessions
                .write()
                .await
                .insert(id.clone(), transport);
            info!("Created MCP session: {}", id);
        }
        response
    }

    async fn dispatch(
        &self,
        id: &str,
        transport: StreamableHttpTransport,
        request: Request,
    ) -> Response {
        let deleting = request.method() == Method::DELETE;
        let response = transport.handle_request(request).await;
        if transport.is_closed() {
            self.inner.sessions.write().await.remove(id);
            if deleting {
                self.remove_state(id).await;
                info!("Terminated MCP session: {}", id);
            }
        }
        response
    }

    /// A live session, or one re-hydrated from its state file.
    async fn lookup(&self, id: &str) -> Option<StreamableHttpTransport> {
        if let Some(transport) = self.get(id).await {
            return Some(transport);
        }

        let path = self.state_path(id)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return None;
        }

        let mut sessions = self.inner.sessions.write().await;
        let transport = sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                info!("Re-hydrating MCP session {} from {:?}", id, path);
                self.build_transport(id)
            })
            .clone();
        Some(transport)
    }

    fn build_transport(&self, id: &str) -> StreamableHttpTransport {
        let session_id = id.to_string();
        let mut options = self
            .inner
            .options
            .clone()
            .with_session_id_generator(move || session_id.clone());
        options.storage = self
            .state_path(id)
            .map(|path| Arc::new(JsonFileStorage::new(path)) as Arc<dyn SessionStorage>);

        let handler = Arc::new(HostedHandler {
            handler: self.inner.handler.clone(),
            host: Arc::downgrade(&self.inner),
            session_id: id.to_string(),
        });
        StreamableHttpTransport::new(options, handler)
    }

    /// State file of a session; only UUID-shaped ids map to a file.
    fn state_path(&self, id: &str) -> Option<PathBuf> {
        let dir = self.inner.session_dir.as_deref()?;
        Uuid::parse_str(id).ok()?;
        Some(state_file(dir, id))
    }

    async fn remove_state(&self, id: &str) {
        if let Some(path) = self.state_path(id) {
            if let Err(e) = JsonFileStorage::new(path).remove().await {
                warn!("Failed to remove state of session {}: {}", id, e);
            }
        }
    }

    fn preflight(&self) -> Response {
        let mut response = StatusCode::NO_CONTENT.into_response();
        self.inner.cors.apply_preflight(response.headers_mut());
        response
    }

    fn reject(&self, error: HttpError) -> Response {
        warn!("Rejected request: {}", error);
        let mut response = error.into_response();
        self.inner.cors.apply_actual(response.headers_mut());
        response
    }
}

impl std::fmt::Debug for SessionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHost")
            .field("options", &self.inner.options)
            .field("session_dir", &self.inner.session_dir)
            .finish()
    }
}

/// Path of the state file for a session id.
pub fn state_file(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Forwards to the application handler and drops the session from the host
/// when its transport closes.
struct HostedHandler {
    handler: Arc<dyn TransportHandler>,
    host: Weak<HostInner>,
    session_id: String,
}

impl TransportHandler for HostedHandler {
    fn on_message(&self, transport: &StreamableHttpTransport, message: JsonRpcMessage) {
        self.handler.on_message(transport, message);
    }

    fn on_close(&self) {
        self.handler.on_close();

        let Some(host) = self.host.upgrade() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let id = self.session_id.clone();
        runtime.spawn(async move {
            // The id may already belong to a re-hydrated transport
            let mut sessions = host.sessions.write().await;
            if sessions
                .get(&id)
                .is_some_and(StreamableHttpTransport::is_closed)
            {
                sessions.remove(&id);
                debug!("MCP session {} removed on close", id);
            }
        });
    }

    fn on_error(&self, error: &TransportError) {
        self.handler.on_error(error);
    }
}

/// Headers of a request routed by the host, for logging.
pub(crate) fn describe(headers: &HeaderMap) -> String {
    match session_header(headers) {
        Ok(Some(id)) => format!("session {id}"),
        Ok(None) => "no session".to_string(),
        Err(_) => "ambiguous session".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::McpHandler;

    fn host() -> SessionHost {
        SessionHost::new(TransportOptions::default(), Arc::new(McpHandler::new()), None)
    }

    #[tokio::test]
    async fn test_close_removes_only_the_closed_transport() {
        let host = host();
        let id = Uuid::new_v4().to_string();

        let first = host.build_transport(&id);
        host.inner
            .sessions
            .write()
            .await
            .insert(id.clone(), first.clone());
        first.close();

        // Re-hydrated under the same id before the removal task runs
        let second = host.build_transport(&id);
        host.inner
            .sessions
            .try_write()
            .unwrap()
            .insert(id.clone(), second.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let live = host.get(&id).await.unwrap();
        assert!(!live.is_closed());

        second.close();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(host.session_count().await, 0);
    }

    #[test]
    fn test_state_file_path() {
        let id = Uuid::new_v4().to_string();
        assert_eq!(
            state_file(Path::new("/tmp/sessions"), &id),
            PathBuf::from(format!("/tmp/sessions/{id}.json"))
        );
    }

    #[test]
    fn test_describe_session_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(describe(&headers), "no session");
        headers.insert("mcp-session-id", "abc".parse().unwrap());
        assert_eq!(describe(&headers), "session abc");
    }
}
