//! Stream registry: where outbound messages go.
//!
//! Every open stream is either an SSE writer or a one-shot resolver for a
//! buffered JSON response. Request ids from an inbound POST map to the stream
//! opened for that POST, and responses are buffered per request id until the
//! whole batch is answered.

use axum::response::sse::Event;
use std::collections::HashMap;
use streamwire_types::{JsonRpcMessage, RequestId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::TransportError;

/// Id of the single standalone stream opened by GET.
pub const STANDALONE_STREAM_ID: &str = "_GET_stream";

/// Where a stream's messages end up.
pub(crate) enum StreamSink {
    Sse(mpsc::UnboundedSender<Event>),
    Json(Option<oneshot::Sender<Vec<JsonRpcMessage>>>),
}

/// An open stream. Dropping it closes the writer and stops its keep-alive.
pub(crate) struct StreamEntry {
    sink: StreamSink,
    keep_alive: Option<AbortHandle>,
}

impl StreamEntry {
    pub(crate) fn sse(sender: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            sink: StreamSink::Sse(sender),
            keep_alive: None,
        }
    }

    pub(crate) fn json(resolver: oneshot::Sender<Vec<JsonRpcMessage>>) -> Self {
        Self {
            sink: StreamSink::Json(Some(resolver)),
            keep_alive: None,
        }
    }

    pub(crate) fn with_keep_alive(mut self, handle: AbortHandle) -> Self {
        self.keep_alive = Some(handle);
        self
    }

    /// Hand the completed batch to whoever awaits it (JSON streams only).
    fn resolve(&mut self, batch: Vec<JsonRpcMessage>) {
        if let StreamSink::Json(resolver) = &mut self.sink {
            if let Some(resolver) = resolver.take() {
                // The POST handler may have given up already (timeout or disconnect)
                let _ = resolver.send(batch);
            }
        }
    }
}

impl Drop for StreamEntry {
    fn drop(&mut self) {
        if let Some(handle) = self.keep_alive.take() {
            handle.abort();
        }
    }
}

/// Frame a message as `event: message` with the JSON as data.
pub(crate) fn message_event(message: &JsonRpcMessage) -> Result<Event, serde_json::Error> {
    Ok(Event::default()
        .event("message")
        .data(serde_json::to_string(message)?))
}

#[derive(Default)]
pub(crate) struct StreamRegistry {
    streams: HashMap<String, StreamEntry>,
    request_streams: HashMap<RequestId, String>,
    responses: HashMap<RequestId, (u64, JsonRpcMessage)>,
    next_sequence: u64,
}

impl StreamRegistry {
    pub(crate) fn contains(&self, stream_id: &str) -> bool {
        self.streams.contains_key(stream_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    pub(crate) fn open(&mut self, stream_id: impl Into<String>, entry: StreamEntry) {
        let stream_id = stream_id.into();
        debug!("Opened stream {}", stream_id);
        self.streams.insert(stream_id, entry);
    }

    /// Route responses for `request_id` to `stream_id`.
    ///
    /// A response still buffered from an earlier use of the id is discarded.
    pub(crate) fn map_request(&mut self, request_id: RequestId, stream_id: &str) {
        self.responses.remove(&request_id);
        self.request_streams
            .insert(request_id, stream_id.to_string());
    }

    /// Close a stream, forgetting the request ids still mapped to it and
    /// their buffered responses.
    pub(crate) fn remove(&mut self, stream_id: &str) -> Option<StreamEntry> {
        let entry = self.streams.remove(stream_id);
        let responses = &mut self.responses;
        self.request_streams.retain(|request_id, mapped| {
            if mapped.as_str() != stream_id {
                return true;
            }
            responses.remove(request_id);
            false
        });
        if entry.is_some() {
            debug!("Closed stream {}", stream_id);
        }
        entry
    }

    /// Empty every map, returning the streams for cleanup.
    pub(crate) fn clear(&mut self) -> Vec<StreamEntry> {
        self.request_streams.clear();
        self.responses.clear();
        self.streams.drain().map(|(_, entry)| entry).collect()
    }

    /// Pick the stream for an outbound message.
    ///
    /// Responses and errors are routed by their own id, ignoring the hint.
    /// Other messages follow `related`, or go to the standalone stream when
    /// there is no hint. `Ok(None)` means there is no standalone listener.
    pub(crate) fn target_for(
        &self,
        message: &JsonRpcMessage,
        related: Option<&RequestId>,
    ) -> Result<Option<String>, TransportError> {
        let Some(request_id) = message.response_id().or(related) else {
            return Ok(self
                .contains(STANDALONE_STREAM_ID)
                .then(|| STANDALONE_STREAM_ID.to_string()));
        };

        let stream_id = self
            .request_streams
            .get(request_id)
            .ok_or_else(|| TransportError::UnknownRequest(request_id.clone()))?;
        if !self.contains(stream_id) {
            return Err(TransportError::StreamClosed {
                request_id: request_id.clone(),
                stream_id: stream_id.clone(),
            });
        }
        Ok(Some(stream_id.clone()))
    }

    /// Write to an SSE stream; buffered JSON streams ignore writes.
    ///
    /// A failed write means the client went away: the stream is removed.
    pub(crate) fn write(
        &mut self,
        stream_id: &str,
        message: &JsonRpcMessage,
    ) -> Result<(), TransportError> {
        let Some(entry) = self.streams.get(stream_id) else {
            return Ok(());
        };
        let StreamSink::Sse(sender) = &entry.sink else {
            return Ok(());
        };

        if sender.send(message_event(message)?).is_err() {
            self.remove(stream_id);
            return Err(TransportError::Disconnected(stream_id.to_string()));
        }
        Ok(())
    }

    /// Buffer a response and finalize its stream once the batch is complete.
    ///
    /// Returns `true` when this response completed the batch. The completed
    /// ids are forgotten and the stream is closed; JSON streams are resolved
    /// with the responses in the order they were recorded.
    pub(crate) fn complete(
        &mut self,
        stream_id: &str,
        request_id: RequestId,
        message: JsonRpcMessage,
    ) -> bool {
        self.next_sequence += 1;
        self.responses
            .insert(request_id, (self.next_sequence, message));

        let batch_ids: Vec<RequestId> = self
            .request_streams
            .iter()
            .filter(|(_, mapped)| mapped.as_str() == stream_id)
            .map(|(id, _)| id.clone())
            .collect();
        if !batch_ids.iter().all(|id| self.responses.contains_key(id)) {
            return false;
        }

        let mut batch: Vec<(u64, JsonRpcMessage)> = batch_ids
            .iter()
            .filter_map(|id| {
                self.request_streams.remove(id);
                self.responses.remove(id)
            })
            .collect();
        batch.sort_by_key(|(sequence, _)| *sequence);

        if let Some(mut entry) = self.remove(stream_id) {
            entry.resolve(batch.into_iter().map(|(_, message)| message).collect());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use streamwire_types::{JsonRpcNotification, JsonRpcResponse};

    fn response(id: i64) -> JsonRpcMessage {
        JsonRpcResponse::success(id, json!({"n": id})).into()
    }

    fn notification() -> JsonRpcMessage {
        JsonRpcNotification::new("notifications/message", None).into()
    }

    #[test]
    fn test_responses_route_by_own_id() {
        let mut registry = StreamRegistry::default();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        registry.open("a", StreamEntry::sse(tx_a));
        registry.open("b", StreamEntry::sse(tx_b));
        registry.map_request(RequestId::from(1), "a");
        registry.map_request(RequestId::from(2), "b");

        let target = registry
            .target_for(&response(1), Some(&RequestId::from(2)))
            .unwrap();
        assert_eq!(target.as_deref(), Some("a"));

        let target = registry
            .target_for(&notification(), Some(&RequestId::from(2)))
            .unwrap();
        assert_eq!(target.as_deref(), Some("b"));
    }

    #[test]
    fn test_unrelated_messages_need_standalone_stream() {
        let mut registry = StreamRegistry::default();
        assert_eq!(registry.target_for(&notification(), None).unwrap(), None);

        let (tx, _rx) = mpsc::unbounded_channel();
        registry.open(STANDALONE_STREAM_ID, StreamEntry::sse(tx));
        assert_eq!(
            registry
                .target_for(&notification(), None)
                .unwrap()
                .as_deref(),
            Some(STANDALONE_STREAM_ID)
        );
    }

    #[test]
    fn test_unmapped_and_stale_ids_are_violations() {
        let mut registry = StreamRegistry::default();
        assert!(matches!(
            registry.target_for(&response(9), None),
            Err(TransportError::UnknownRequest(_))
        ));

        registry.map_request(RequestId::from(9), "gone");
        assert!(matches!(
            registry.target_for(&response(9), None),
            Err(TransportError::StreamClosed { .. })
        ));
    }

    #[test]
    fn test_batch_completes_in_send_order() {
        let mut registry = StreamRegistry::default();
        let (tx, mut rx) = oneshot::channel();
        registry.open("batch", StreamEntry::json(tx));
        registry.map_request(RequestId::from(1), "batch");
        registry.map_request(RequestId::from(2), "batch");

        assert!(!registry.complete("batch", RequestId::from(2), response(2)));
        assert!(registry.contains("batch"));
        assert!(rx.try_recv().is_err());

        assert!(registry.complete("batch", RequestId::from(1), response(1)));
        assert!(!registry.contains("batch"));

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch, vec![response(2), response(1)]);

        // The ids are forgotten once the batch is finalized
        assert!(matches!(
            registry.target_for(&response(1), None),
            Err(TransportError::UnknownRequest(_))
        ));
    }

    #[test]
    fn test_write_frames_sse_and_detects_disconnect() {
        let mut registry = StreamRegistry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.open("s", StreamEntry::sse(tx));

        registry.write("s", &notification()).unwrap();
        assert!(rx.try_recv().is_ok());

        drop(rx);
        assert!(matches!(
            registry.write("s", &notification()),
            Err(TransportError::Disconnected(_))
        ));
        assert!(!registry.contains("s"));
    }

    #[test]
    fn test_json_streams_ignore_writes() {
        let mut registry = StreamRegistry::default();
        let (tx, _rx) = oneshot::channel();
        registry.open("j", StreamEntry::json(tx));
        registry.write("j", &notification()).unwrap();
        assert!(registry.contains("j"));
    }

    #[test]
    fn test_removed_stream_forgets_its_requests() {
        let mut registry = StreamRegistry::default();
        let (tx, _rx) = oneshot::channel();
        registry.open("batch", StreamEntry::json(tx));
        registry.map_request(RequestId::from(1), "batch");
        registry.map_request(RequestId::from(2), "batch");
        assert!(!registry.complete("batch", RequestId::from(1), response(1)));

        let (tx, _rx) = oneshot::channel();
        registry.open("other", StreamEntry::json(tx));
        registry.map_request(RequestId::from(3), "other");

        drop(registry.remove("batch"));
        assert!(registry.responses.is_empty());
        assert_eq!(registry.request_streams.len(), 1);
        assert!(matches!(
            registry.target_for(&response(1), None),
            Err(TransportError::UnknownRequest(_))
        ));
        assert_eq!(
            registry.target_for(&response(3), None).unwrap().as_deref(),
            Some("other")
        );
    }

    #[test]
    fn test_remapped_id_drops_stale_response() {
        let mut registry = StreamRegistry::default();
        let (tx, _rx) = oneshot::channel();
        registry.open("first", StreamEntry::json(tx));
        registry.map_request(RequestId::from(1), "first");
        registry.map_request(RequestId::from(2), "first");
        assert!(!registry.complete("first", RequestId::from(1), response(1)));

        let (tx, mut rx) = oneshot::channel();
        registry.open("second", StreamEntry::json(tx));
        registry.map_request(RequestId::from(1), "second");
        registry.map_request(RequestId::from(3), "second");

        assert!(!registry.complete("second", RequestId::from(3), response(3)));
        assert!(registry.contains("second"));

        let fresh: JsonRpcMessage = JsonRpcResponse::success(1, json!({"fresh": true})).into();
        assert!(registry.complete("second", RequestId::from(1), fresh.clone()));
        assert_eq!(rx.try_recv().unwrap(), vec![response(3), fresh]);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut registry = StreamRegistry::default();
        let (tx, mut rx) = oneshot::channel();
        registry.open("j", StreamEntry::json(tx));
        registry.map_request(RequestId::from(1), "j");

        let drained = registry.clear();
        assert_eq!(drained.len(), 1);
        drop(drained);

        assert_eq!(registry.len(), 0);
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            registry.target_for(&response(1), None),
            Err(TransportError::UnknownRequest(_))
        ));
    }
}
