//! Streamable HTTP transport.
//!
//! One [`StreamableHttpTransport`] serves one logical session on a single
//! route:
//!
//! - `OPTIONS` answers the CORS preflight
//! - `GET` opens the standalone SSE stream for server-initiated messages
//! - `POST` delivers one message or a batch; requests get a stream of their own
//!   (SSE, or a buffered JSON body when JSON responses are enabled)
//! - `DELETE` closes the transport
//!
//! Inbound messages are handed to a [`TransportHandler`]; replies come back
//! through [`StreamableHttpTransport::send`], which routes them to the stream
//! that owns the originating request.

mod cors;
mod negotiate;
mod session;
mod streams;

pub use cors::CorsOptions;
pub use streams::STANDALONE_STREAM_ID;

use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use streamwire_types::protocol::SESSION_ID_HEADER;
use streamwire_types::{parse_messages, JsonRpcMessage, RequestId};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HttpError, TransportError};
use crate::storage::SessionStorage;
pub(crate) use cors::CorsPolicy;
use negotiate::{APPLICATION_JSON, EVENT_STREAM};
pub(crate) use session::session_header;
use session::{Initialization, SessionStore};
use streams::{StreamEntry, StreamRegistry};

/// Produces the id of a new session.
pub type SessionIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Called once with the id assigned by the initialize exchange.
pub type SessionInitializedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Default maximum POST body size (4 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Default interval between keep-alive pings on the standalone stream.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default wait for a JSON-mode batch to be answered.
pub const DEFAULT_JSON_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// The application side of a transport.
///
/// `on_message` is called once per inbound message, in batch order. It must
/// not block: replies are produced later with [`StreamableHttpTransport::send`],
/// typically from a spawned task holding a clone of the transport.
pub trait TransportHandler: Send + Sync + 'static {
    fn on_message(&self, transport: &StreamableHttpTransport, message: JsonRpcMessage);

    /// Called exactly once, when the transport closes.
    fn on_close(&self) {}

    /// Failures that have no HTTP response to travel on.
    fn on_error(&self, error: &TransportError) {
        warn!("Transport error: {}", error);
    }
}

/// Transport configuration.
#[derive(Clone)]
pub struct TransportOptions {
    /// Session id source; `None` makes the transport stateless.
    pub session_id_generator: Option<SessionIdGenerator>,
    /// Answer POSTed requests with one buffered JSON body instead of SSE.
    pub enable_json_response: bool,
    pub on_session_initialized: Option<SessionInitializedCallback>,
    pub cors: CorsOptions,
    pub storage: Option<Arc<dyn SessionStorage>>,
    pub keep_alive_interval: Duration,
    /// Upper bound on a JSON-mode batch; `None` waits forever.
    pub json_response_timeout: Option<Duration>,
    pub max_body_bytes: usize,
}

impl TransportOptions {
    /// Options for a session-less transport.
    pub fn stateless() -> Self {
        Self {
            session_id_generator: None,
            ..Self::default()
        }
    }

    pub fn with_session_id_generator(
        mut self,
        generator: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.session_id_generator = Some(Arc::new(generator));
        self
    }

    pub fn with_json_response(mut self, enabled: bool) -> Self {
        self.enable_json_response = enabled;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_cors(mut self, cors: CorsOptions) -> Self {
        self.cors = cors;
        self
    }

    pub fn with_on_session_initialized(
        mut self,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_session_initialized = Some(Arc::new(callback));
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_json_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.json_response_timeout = timeout;
        self
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            session_id_generator: Some(Arc::new(|| Uuid::new_v4().to_string())),
            enable_json_response: false,
            on_session_initialized: None,
            cors: CorsOptions::default(),
            storage: None,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            json_response_timeout: Some(DEFAULT_JSON_RESPONSE_TIMEOUT),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOptions")
            .field("stateful", &self.session_id_generator.is_some())
            .field("enable_json_response", &self.enable_json_response)
            .field("cors", &self.cors)
            .field("storage", &self.storage.is_some())
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("json_response_timeout", &self.json_response_timeout)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

/// Handle to a transport; clones share the same session and streams.
#[derive(Clone)]
pub struct StreamableHttpTransport {
    inner: Arc<Inner>,
}

struct Inner {
    handler: Arc<dyn TransportHandler>,
    session: SessionStore,
    streams: Mutex<StreamRegistry>,
    cors: CorsPolicy,
    enable_json_response: bool,
    on_session_initialized: Option<SessionInitializedCallback>,
    keep_alive_interval: Duration,
    json_response_timeout: Option<Duration>,
    max_body_bytes: usize,
    closed: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl StreamableHttpTransport {
    pub fn new(options: TransportOptions, handler: Arc<dyn TransportHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler,
                session: SessionStore::new(options.session_id_generator, options.storage),
                streams: Mutex::new(StreamRegistry::default()),
                cors: CorsPolicy::new(&options.cors),
                enable_json_response: options.enable_json_response,
                on_session_initialized: options.on_session_initialized,
                keep_alive_interval: options.keep_alive_interval,
                json_response_timeout: options.json_response_timeout,
                max_body_bytes: options.max_body_bytes,
                closed: AtomicBool::new(false),
                last_activity: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session.session_id()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.session.is_initialized()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Time since the last HTTP request or outbound message.
    pub fn idle_for(&self) -> Duration {
        self.inner.last_activity.lock().elapsed()
    }

    /// Number of open streams, standalone included.
    pub fn stream_count(&self) -> usize {
        self.inner.streams.lock().len()
    }

    pub fn has_standalone_stream(&self) -> bool {
        self.inner.streams.lock().contains(STANDALONE_STREAM_ID)
    }

    /// Dispatch one HTTP request by method.
    pub async fn handle_request(&self, request: Request) -> Response {
        self.touch();
        let method = request.method().clone();
        let result = match method {
            Method::OPTIONS => return self.handle_options(),
            Method::GET => self.handle_get(request.headers()).await,
            Method::POST => self.handle_post(request).await,
            Method::DELETE => self.handle_delete(request.headers()).await,
            _ => Err(HttpError::MethodNotAllowed),
        };

        let mut response = result.unwrap_or_else(|err| {
            warn!("Rejected request: {}", err);
            err.into_response()
        });
        self.inner.cors.apply_actual(response.headers_mut());
        response
    }

    /// Route an outbound message to its stream.
    ///
    /// Responses and errors go to the stream holding their request id;
    /// `related_request_id` is ignored for them. Requests and notifications
    /// follow `related_request_id`, or the standalone stream without one, and
    /// are dropped when no standalone stream is open.
    pub fn send(
        &self,
        message: JsonRpcMessage,
        related_request_id: Option<RequestId>,
    ) -> Result<(), TransportError> {
        self.touch();
        let disconnected = {
            let mut streams = self.inner.streams.lock();
            let Some(stream_id) = streams.target_for(&message, related_request_id.as_ref())? else {
                debug!(
                    "No standalone stream, dropping {}",
                    message.method().unwrap_or("message")
                );
                return Ok(());
            };

            match streams.write(&stream_id, &message) {
                Ok(()) => {
                    if let Some(request_id) = message.response_id().cloned() {
                        if streams.complete(&stream_id, request_id, message) {
                            debug!("Stream {} finalized", stream_id);
                        }
                    }
                    None
                }
                Err(TransportError::Disconnected(stream_id)) => Some(stream_id),
                Err(e) => return Err(e),
            }
        };

        if let Some(stream_id) = disconnected {
            warn!("Client disconnected from stream {}, message dropped", stream_id);
            self.inner
                .handler
                .on_error(&TransportError::Disconnected(stream_id));
        }
        Ok(())
    }

    /// Close every stream and notify the handler. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let streams = self.inner.streams.lock().clear();
        info!(
            "Transport closed (session {:?}, {} streams)",
            self.session_id(),
            streams.len()
        );
        drop(streams);
        self.inner.handler.on_close();
    }

    fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    fn handle_options(&self) -> Response {
        let mut response = StatusCode::NO_CONTENT.into_response();
        self.inner.cors.apply_preflight(response.headers_mut());
        response
    }

    async fn handle_get(&self, headers: &HeaderMap) -> Result<Response, HttpError> {
        if !negotiate::accepts(headers, EVENT_STREAM) {
            return Err(HttpError::NotAcceptable(
                "Client must accept text/event-stream",
            ));
        }
        self.ensure_open()?;
        self.restore().await;
        self.inner.session.validate(headers)?;
        negotiate::validate_protocol_version(headers)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut streams = self.inner.streams.lock();
            if streams.contains(STANDALONE_STREAM_ID) {
                return Err(HttpError::Conflict(
                    "Only one SSE stream is allowed per session",
                ));
            }
            let keep_alive = self.spawn_keep_alive(sender.clone());
            streams.open(
                STANDALONE_STREAM_ID,
                StreamEntry::sse(sender).with_keep_alive(keep_alive),
            );
        }

        info!("Standalone SSE stream opened (session {:?})", self.session_id());
        Ok(self.sse_response(receiver))
    }

    async fn handle_post(&self, request: Request) -> Result<Response, HttpError> {
        let (parts, body) = request.into_parts();
        let headers = &parts.headers;

        if !(negotiate::accepts(headers, APPLICATION_JSON)
            && negotiate::accepts(headers, EVENT_STREAM))
        {
            return Err(HttpError::NotAcceptable(
                "Client must accept both application/json and text/event-stream",
            ));
        }
        if !negotiate::is_json_content_type(headers) {
            return Err(HttpError::UnsupportedMediaType);
        }
        let limit = self.inner.max_body_bytes;
        if negotiate::content_length(headers).is_some_and(|length| length > limit) {
            return Err(HttpError::PayloadTooLarge(limit));
        }
        self.ensure_open()?;

        let bytes = axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| HttpError::Parse(format!("Failed to read body: {e}")))?;
        let messages = parse_messages(&bytes)?;

        self.restore().await;
        if messages.iter().any(JsonRpcMessage::is_initialize_request) {
            if messages.len() > 1 {
                return Err(HttpError::InvalidRequest(
                    "Only one initialization request is allowed",
                ));
            }
            self.initialize(headers).await?;
        } else {
            self.inner.session.validate(headers)?;
            negotiate::validate_protocol_version(headers)?;
        }

        let request_ids: Vec<RequestId> = messages
            .iter()
            .filter_map(|message| message.as_request().map(|request| request.id.clone()))
            .collect();

        if request_ids.is_empty() {
            debug!("Accepted {} message(s) without requests", messages.len());
            for message in messages {
                self.deliver(message);
            }
            return Ok(StatusCode::ACCEPTED.into_response());
        }

        let stream_id = Uuid::new_v4().to_string();
        debug!(
            "Opening stream {} for {} request(s)",
            stream_id,
            request_ids.len()
        );

        if self.inner.enable_json_response {
            let (resolver, completion) = oneshot::channel();
            self.open_batch(&stream_id, StreamEntry::json(resolver), request_ids);
            for message in messages {
                self.deliver(message);
            }
            return self.await_batch(&stream_id, completion).await;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.open_batch(&stream_id, StreamEntry::sse(sender), request_ids);
        for message in messages {
            self.deliver(message);
        }
        Ok(self.sse_response(receiver))
    }

    async fn handle_delete(&self, headers: &HeaderMap) -> Result<Response, HttpError> {
        self.ensure_open()?;
        self.restore().await;
        self.inner.session.validate(headers)?;
        negotiate::validate_protocol_version(headers)?;

        self.close();
        Ok(StatusCode::OK.into_response())
    }

    fn ensure_open(&self) -> Result<(), HttpError> {
        if self.is_closed() {
            return Err(HttpError::SessionNotFound);
        }
        Ok(())
    }

    /// One-time lazy restore; a storage failure leaves the in-memory state.
    async fn restore(&self) {
        if let Err(e) = self.inner.session.restore().await {
            self.inner.handler.on_error(&TransportError::Storage(e));
        }
    }

    async fn initialize(&self, headers: &HeaderMap) -> Result<(), HttpError> {
        let Initialization::Fresh(session_id) = self.inner.session.initialize(headers)? else {
            return Ok(());
        };

        if let Err(e) = self.inner.session.persist().await {
            self.inner.handler.on_error(&TransportError::Storage(e));
        }
        if let Some(id) = session_id.as_deref() {
            info!("Session initialized: {}", id);
            if let Some(callback) = self.inner.on_session_initialized.as_ref() {
                callback(id);
            }
        }
        Ok(())
    }

    fn open_batch(&self, stream_id: &str, entry: StreamEntry, request_ids: Vec<RequestId>) {
        let mut streams = self.inner.streams.lock();
        streams.open(stream_id, entry);
        for request_id in request_ids {
            streams.map_request(request_id, stream_id);
        }
    }

    fn deliver(&self, message: JsonRpcMessage) {
        debug!("Delivering {}", message.method().unwrap_or("response"));
        self.inner.handler.on_message(self, message);
    }

    /// Suspend until every request of a JSON-mode batch has been answered.
    async fn await_batch(
        &self,
        stream_id: &str,
        completion: oneshot::Receiver<Vec<JsonRpcMessage>>,
    ) -> Result<Response, HttpError> {
        let _guard = BatchGuard {
            transport: self,
            stream_id,
        };

        let outcome = match self.inner.json_response_timeout {
            Some(limit) => match tokio::time::timeout(limit, completion).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Timed out waiting for responses on stream {}", stream_id);
                    return Err(HttpError::ResponseTimeout);
                }
            },
            None => completion.await,
        };

        let batch = outcome.map_err(|_| HttpError::TransportClosed)?;
        Ok(self.json_response(batch))
    }

    fn json_response(&self, batch: Vec<JsonRpcMessage>) -> Response {
        let mut response = match batch.as_slice() {
            [single] => Json(single).into_response(),
            many => Json(many).into_response(),
        };
        self.insert_session_header(response.headers_mut());
        response
    }

    fn sse_response(&self, receiver: mpsc::UnboundedReceiver<Event>) -> Response {
        let stream = UnboundedReceiverStream::new(receiver).map(Ok::<_, Infallible>);
        let mut response = Sse::new(stream).into_response();
        self.insert_session_header(response.headers_mut());
        response
    }

    fn insert_session_header(&self, headers: &mut HeaderMap) {
        if let Some(value) = self
            .session_id()
            .and_then(|id| HeaderValue::from_str(&id).ok())
        {
            headers.insert(HeaderName::from_static(SESSION_ID_HEADER), value);
        }
    }

    /// Ping the standalone stream until a write fails, then drop the stream.
    fn spawn_keep_alive(&self, sender: mpsc::UnboundedSender<Event>) -> tokio::task::AbortHandle {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.keep_alive_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if sender.send(Event::default().comment("ping")).is_err() {
                    debug!("Keep-alive failed, standalone stream disconnected");
                    if let Some(inner) = inner.upgrade() {
                        let stale = inner.streams.lock().remove(STANDALONE_STREAM_ID);
                        drop(stale);
                    }
                    break;
                }
            }
        })
        .abort_handle()
    }
}

impl fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("session_id", &self.session_id())
            .field("closed", &self.is_closed())
            .field("streams", &self.stream_count())
            .finish()
    }
}

/// Removes a JSON-mode stream when its POST handler stops waiting.
///
/// A finalized stream is already gone, so this only matters on timeout,
/// transport close or client disconnect.
struct BatchGuard<'a> {
    transport: &'a StreamableHttpTransport,
    stream_id: &'a str,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let stale = self.transport.inner.streams.lock().remove(self.stream_id);
        drop(stale);
    }
}
