//! Event storage for resumable SSE streams.
//!
//! When an [`EventStore`] is configured, every message written to an SSE
//! stream is stored first and the id the store assigns becomes the SSE `id:`
//! field. A client that loses its connection can reconnect with a
//! `Last-Event-ID` header and the store replays whatever it missed.
//!
//! [`InMemoryEventStore`] keeps everything in process memory and is meant for
//! demos and tests. Implement the trait against a database or a cache to make
//! streams survive restarts.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{RwLock, mpsc::UnboundedSender};

pub use super::common::server_side_http::{EventId, StreamId};
use super::common::server_side_http::ServerSseMessage;
use crate::model::JsonRpcMessage;

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("Unknown event id: {0}")]
    UnknownEvent(EventId),
    #[error("Replay target closed")]
    SinkClosed,
    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EventStoreError {
    pub fn storage(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        EventStoreError::Storage(error.into())
    }
}

/// Write half of a reconnected SSE stream, handed to
/// [`EventStore::replay_events_after`].
#[derive(Debug)]
pub struct ReplaySink {
    tx: UnboundedSender<Bytes>,
    replayed: usize,
}

impl ReplaySink {
    pub(crate) fn new(tx: UnboundedSender<Bytes>) -> Self {
        Self { tx, replayed: 0 }
    }

    /// Write one stored event, keeping its original event id.
    pub fn send(
        &mut self,
        event_id: &EventId,
        message: &JsonRpcMessage,
    ) -> Result<(), EventStoreError> {
        let frame = ServerSseMessage::new(Some(event_id.clone()), message).to_bytes()?;
        self.tx
            .send(frame)
            .map_err(|_| EventStoreError::SinkClosed)?;
        self.replayed += 1;
        Ok(())
    }

    pub fn replayed(&self) -> usize {
        self.replayed
    }
}

#[async_trait::async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Persist a message written to `stream_id` and return its event id.
    async fn store_event(
        &self,
        stream_id: &StreamId,
        message: &JsonRpcMessage,
    ) -> Result<EventId, EventStoreError>;

    /// Replay every event of the stream that `last_event_id` belongs to,
    /// strictly after it, and return that stream's id.
    async fn replay_events_after(
        &self,
        last_event_id: &EventId,
        sink: &mut ReplaySink,
    ) -> Result<StreamId, EventStoreError>;
}

#[derive(Debug, Clone)]
struct StoredEvent {
    event_id: EventId,
    stream_id: StreamId,
    message: JsonRpcMessage,
}

/// Append-only in-memory [`EventStore`].
///
/// Event ids have the form `<stream id>_<sequence>`.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<StoredEvent>>,
    sequence: AtomicU64,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Messages stored for one stream, oldest first.
    pub async fn stream_events(&self, stream_id: &str) -> Vec<(EventId, JsonRpcMessage)> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| &*event.stream_id == stream_id)
            .map(|event| (event.event_id.clone(), event.message.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(
        &self,
        stream_id: &StreamId,
        message: &JsonRpcMessage,
    ) -> Result<EventId, EventStoreError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let event_id: EventId = format!("{stream_id}_{sequence}").into();
        self.events.write().await.push(StoredEvent {
            event_id: event_id.clone(),
            stream_id: stream_id.clone(),
            message: message.clone(),
        });
        Ok(event_id)
    }

    async fn replay_events_after(
        &self,
        last_event_id: &EventId,
        sink: &mut ReplaySink,
    ) -> Result<StreamId, EventStoreError> {
        let events = self.events.read().await;
        let position = events
            .iter()
            .position(|event| event.event_id == *last_event_id)
            .ok_or_else(|| EventStoreError::UnknownEvent(last_event_id.clone()))?;
        let stream_id = events[position].stream_id.clone();
        for event in events[position + 1..]
            .iter()
            .filter(|event| event.stream_id == stream_id)
        {
            sink.send(&event.event_id, &event.message)?;
        }
        tracing::debug!(%stream_id, %last_event_id, replayed = sink.replayed(), "replayed events");
        Ok(stream_id)
    }
}
