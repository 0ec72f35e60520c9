use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode, header};
use http_body::Frame;
use http_body_util::{BodyExt, Empty, Full, StreamBody, combinators::BoxBody};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::DropGuard;

use super::http_header::{
    EVENT_STREAM_MIME_TYPE, HEADER_SESSION_ID, HEADER_X_ACCEL_BUFFERING, JSON_MIME_TYPE,
};
use crate::model::{ErrorData, JsonRpcMessage};

pub type SessionId = Arc<str>;
pub type StreamId = Arc<str>;
pub type EventId = Arc<str>;

pub fn session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string().into()
}

pub fn stream_id() -> StreamId {
    uuid::Uuid::new_v4().to_string().into()
}

pub const DEFAULT_AUTO_PING_INTERVAL: Duration = Duration::from_secs(15);

const KEEP_ALIVE_FRAME: &[u8] = b":ping\n\n";

pub type BoxResponse = Response<BoxBody<Bytes, Infallible>>;

/// One outbound SSE event.
#[derive(Debug, Clone)]
pub struct ServerSseMessage<'a> {
    pub event_id: Option<EventId>,
    pub message: &'a JsonRpcMessage,
}

impl<'a> ServerSseMessage<'a> {
    pub fn new(event_id: Option<EventId>, message: &'a JsonRpcMessage) -> Self {
        Self { event_id, message }
    }

    /// Encode as `event: message\n[id: <id>\n]data: <json>\n\n`.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        let data = serde_json::to_string(self.message)?;
        let mut output = String::with_capacity(data.len() + 32);
        output.push_str("event: message\n");
        if let Some(id) = &self.event_id {
            output.push_str("id: ");
            output.push_str(id);
            output.push('\n');
        }
        output.push_str("data: ");
        output.push_str(&data);
        output.push_str("\n\n");
        Ok(Bytes::from(output))
    }
}

pub(crate) fn empty_response(status: StatusCode) -> BoxResponse {
    let mut response = Response::new(Empty::new().boxed());
    *response.status_mut() = status;
    response
}

pub(crate) fn accepted_response() -> BoxResponse {
    empty_response(StatusCode::ACCEPTED)
}

pub(crate) fn insert_session_header(headers: &mut HeaderMap, session_id: Option<&SessionId>) {
    let Some(session_id) = session_id else {
        return;
    };
    match HeaderValue::from_str(session_id) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(HEADER_SESSION_ID), value);
        }
        Err(e) => {
            tracing::warn!(%session_id, "session id is not a valid header value: {e}");
        }
    }
}

pub(crate) fn json_response(
    status: StatusCode,
    body: Vec<u8>,
    session_id: Option<&SessionId>,
) -> BoxResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)).boxed());
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(JSON_MIME_TYPE),
    );
    insert_session_header(headers, session_id);
    response
}

/// A JSON-RPC error envelope with `"id": null`.
pub(crate) fn json_rpc_error_response(status: StatusCode, error: ErrorData) -> BoxResponse {
    let body = serde_json::to_vec(&JsonRpcMessage::error(None, error))
        .unwrap_or_else(|_| b"{}".to_vec());
    json_response(status, body, None)
}

pin_project_lite::pin_project! {
    /// Frames coming from the transport, interleaved with keep-alive
    /// comments while the channel is idle.
    ///
    /// The drop guard fires when the HTTP body is dropped, which is how a
    /// client disconnect becomes visible to the transport.
    pub struct SseBodyStream<S> {
        #[pin]
        inner: S,
        keep_alive: Option<Interval>,
        _guard: Option<DropGuard>,
    }
}

impl<S> SseBodyStream<S> {
    pub fn new(inner: S, keep_alive: Option<Duration>, guard: Option<DropGuard>) -> Self {
        let keep_alive = keep_alive.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Self {
            inner,
            keep_alive,
            _guard: guard,
        }
    }
}

impl<S> Stream for SseBodyStream<S>
where
    S: Stream<Item = Bytes>,
{
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(frame)) => {
                if let Some(interval) = this.keep_alive.as_mut() {
                    interval.reset();
                }
                return Poll::Ready(Some(frame));
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => {}
        }
        if let Some(interval) = this.keep_alive.as_mut() {
            if interval.poll_tick(cx).is_ready() {
                return Poll::Ready(Some(Bytes::from_static(KEEP_ALIVE_FRAME)));
            }
        }
        Poll::Pending
    }
}

pub(crate) fn sse_stream_response<S>(
    stream: S,
    keep_alive: Option<Duration>,
    guard: DropGuard,
    session_id: Option<&SessionId>,
) -> BoxResponse
where
    S: Stream<Item = Bytes> + Send + Sync + 'static,
{
    let stream = SseBodyStream::new(stream, keep_alive, Some(guard))
        .map(|bytes| Ok::<_, Infallible>(Frame::data(bytes)));
    let mut response = Response::new(BodyExt::boxed(StreamBody::new(stream)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(EVENT_STREAM_MIME_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static(HEADER_X_ACCEL_BUFFERING),
        HeaderValue::from_static("no"),
    );
    insert_session_header(headers, session_id);
    response
}
