use std::{collections::HashMap, fmt::Display, sync::Arc};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use http_body::Body;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::{
    Mutex,
    mpsc::{self, UnboundedSender},
    oneshot,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{
    StreamableHttpServerConfig,
    session::{
        Rejection, SessionId, SessionIdGenerator, SessionState, UuidSessionIdGenerator,
        validate_protocol_version, validate_session,
    },
};
use crate::{
    error::TransportError,
    handler::{AuthInfo, MessageContext, MessageHandler},
    model::{ClassifiedMessage, ErrorData, JsonRpcMessage, MessageKind, RequestId, parse_messages},
    transport::{
        common::{
            http_header::{
                ALLOWED_METHODS, EVENT_STREAM_MIME_TYPE, HEADER_LAST_EVENT_ID, JSON_MIME_TYPE,
            },
            server_side_http::{
                BoxResponse, EventId, ServerSseMessage, StreamId, accepted_response,
                empty_response, json_response, json_rpc_error_response, sse_stream_response,
                stream_id,
            },
        },
        event_store::{EventStore, ReplaySink},
    },
};

/// Stream id of the stream opened by `GET` without `Last-Event-ID`.
pub const STANDALONE_SSE_STREAM_ID: &str = "_GET_stream";

type SessionInitializedCallback = Arc<dyn Fn(&SessionId) + Send + Sync>;
type CloseCallback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&ErrorData) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Route the message to the stream of this request. Without it only
    /// responses and errors (through their own id) reach a request stream.
    pub related_request_id: Option<RequestId>,
}

impl SendOptions {
    pub fn related_to(request_id: impl Into<RequestId>) -> Self {
        Self {
            related_request_id: Some(request_id.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandleRequestOptions {
    /// Takes precedence over an [`AuthInfo`] found in the request extensions.
    pub auth_info: Option<AuthInfo>,
    /// A body some middleware already read; the request body is then ignored.
    pub parsed_body: Option<Value>,
}

struct SseStreamHandle {
    tx: UnboundedSender<Bytes>,
    /// Distinguishes a reconnection from the connection it replaced.
    connection: u64,
}

#[derive(Default)]
struct TransportState {
    started: bool,
    closed: bool,
    session: SessionState,
    handler: Option<Arc<dyn MessageHandler>>,
    streams: HashMap<StreamId, SseStreamHandle>,
    request_to_stream: HashMap<RequestId, StreamId>,
    request_responses: HashMap<RequestId, JsonRpcMessage>,
    pending_json: HashMap<StreamId, oneshot::Sender<BoxResponse>>,
    /// Request ids of every POST stream, in batch order.
    stream_requests: HashMap<StreamId, Vec<RequestId>>,
    next_connection: u64,
}

impl TransportState {
    fn all_answered(&self, stream_id: &StreamId) -> bool {
        self.stream_requests.get(stream_id).is_some_and(|ids| {
            ids.iter()
                .all(|id| self.request_responses.contains_key(id))
        })
    }

    /// Drop every table entry of a finished POST stream and return its
    /// responses in batch order.
    fn purge_stream(&mut self, stream_id: &StreamId) -> Vec<JsonRpcMessage> {
        let ids = self.stream_requests.remove(stream_id).unwrap_or_default();
        ids.iter()
            .filter_map(|id| {
                self.request_to_stream.remove(id);
                self.request_responses.remove(id)
            })
            .collect()
    }
}

struct Inner {
    config: StreamableHttpServerConfig,
    session_id_generator: Option<Arc<dyn SessionIdGenerator>>,
    event_store: Option<Arc<dyn EventStore>>,
    on_session_initialized: Option<SessionInitializedCallback>,
    on_close: Option<CloseCallback>,
    on_error: Option<ErrorCallback>,
    state: Mutex<TransportState>,
    /// Held while an event is stored and written, and while a resumed stream
    /// is replayed and registered. Event ids and frames keep the same order.
    event_order: Mutex<()>,
}

/// Server side of the MCP streamable HTTP transport.
///
/// Cloning is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct StreamableHttpServerTransport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamableHttpServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpServerTransport")
            .field("config", &self.inner.config)
            .field("stateful", &self.is_stateful())
            .field("event_store", &self.inner.event_store.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct StreamableHttpServerTransportBuilder {
    config: StreamableHttpServerConfig,
    session_id_generator: Option<Arc<dyn SessionIdGenerator>>,
    event_store: Option<Arc<dyn EventStore>>,
    handler: Option<Arc<dyn MessageHandler>>,
    on_session_initialized: Option<SessionInitializedCallback>,
    on_close: Option<CloseCallback>,
    on_error: Option<ErrorCallback>,
}

impl StreamableHttpServerTransportBuilder {
    pub fn config(mut self, config: StreamableHttpServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn enable_json_response(mut self, enable: bool) -> Self {
        self.config.enable_json_response = enable;
        self
    }

    pub fn sse_keep_alive(mut self, keep_alive: Option<std::time::Duration>) -> Self {
        self.config.sse_keep_alive = keep_alive;
        self
    }

    /// Enables sessions. Without a generator the transport is stateless.
    pub fn session_id_generator(mut self, generator: impl SessionIdGenerator) -> Self {
        self.session_id_generator = Some(Arc::new(generator));
        self
    }

    /// Sessions with random UUID ids.
    pub fn stateful(self) -> Self {
        self.session_id_generator(UuidSessionIdGenerator)
    }

    pub fn event_store(mut self, event_store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(event_store);
        self
    }

    pub fn message_handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn on_session_initialized(
        mut self,
        callback: impl Fn(&SessionId) + Send + Sync + 'static,
    ) -> Self {
        self.on_session_initialized = Some(Arc::new(callback));
        self
    }

    pub fn on_close(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(callback));
        self
    }

    /// Called with the error body of every rejected request.
    pub fn on_error(mut self, callback: impl Fn(&ErrorData) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> StreamableHttpServerTransport {
        let state = TransportState {
            handler: self.handler,
            ..Default::default()
        };
        StreamableHttpServerTransport {
            inner: Arc::new(Inner {
                config: self.config,
                session_id_generator: self.session_id_generator,
                event_store: self.event_store,
                on_session_initialized: self.on_session_initialized,
                on_close: self.on_close,
                on_error: self.on_error,
                state: Mutex::new(state),
                event_order: Mutex::new(()),
            }),
        }
    }
}

/// Where the answer to a POST will come from.
enum PostRoute {
    Accepted,
    Json(oneshot::Receiver<BoxResponse>),
    Sse {
        rx: mpsc::UnboundedReceiver<Bytes>,
        guard: DropGuard,
        session_id: Option<SessionId>,
    },
}

struct PostPlan {
    route: PostRoute,
    handler: Option<Arc<dyn MessageHandler>>,
    new_session: Option<SessionId>,
    initialized: bool,
}

/// What `send` does once the tables are updated.
enum Delivery {
    Json {
        tx: oneshot::Sender<BoxResponse>,
        responses: Vec<JsonRpcMessage>,
        session_id: Option<SessionId>,
    },
    Sse {
        stream_id: StreamId,
        /// The message completes its stream.
        finish: bool,
    },
    Nothing,
}

impl StreamableHttpServerTransport {
    /// A stateless transport with the given config.
    pub fn new(config: StreamableHttpServerConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> StreamableHttpServerTransportBuilder {
        StreamableHttpServerTransportBuilder::default()
    }

    pub fn config(&self) -> &StreamableHttpServerConfig {
        &self.inner.config
    }

    pub fn is_stateful(&self) -> bool {
        self.inner.session_id_generator.is_some()
    }

    /// Marks the transport as started. HTTP requests are served whether or
    /// not this was called; it only guards against double starts.
    pub async fn start(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock().await;
        if state.started {
            return Err(TransportError::AlreadyStarted);
        }
        state.started = true;
        Ok(())
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.inner.state.lock().await.session.session_id.clone()
    }

    pub async fn set_message_handler(&self, handler: impl MessageHandler) {
        self.inner.state.lock().await.handler = Some(Arc::new(handler));
    }

    pub async fn handle_request<B>(&self, request: Request<B>) -> BoxResponse
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Display,
    {
        self.handle_request_with(request, HandleRequestOptions::default())
            .await
    }

    pub async fn handle_request_with<B>(
        &self,
        request: Request<B>,
        options: HandleRequestOptions,
    ) -> BoxResponse
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Display,
    {
        if let Err(rejection) = self.validate_request_headers(request.headers()) {
            return self.reject(rejection);
        }
        let method = request.method().clone();
        match method {
            Method::POST => self.handle_post(request, options).await,
            Method::GET => self.handle_get(request).await,
            Method::DELETE => self.handle_delete(request).await,
            _ => {
                let mut response = self.reject(Rejection::new(
                    StatusCode::METHOD_NOT_ALLOWED,
                    ErrorData::transport_error("Method not allowed."),
                ));
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
                response
            }
        }
    }

    /// Route a message from the handler to the client.
    pub async fn send(
        &self,
        message: JsonRpcMessage,
        options: SendOptions,
    ) -> Result<(), TransportError> {
        let request_id = options
            .related_request_id
            .or_else(|| message.response_id().cloned());
        let Some(request_id) = request_id else {
            return self.send_standalone(message).await;
        };

        let delivery = {
            let mut state = self.inner.state.lock().await;
            let Some(stream_id) = state.request_to_stream.get(&request_id).cloned() else {
                return Err(TransportError::NoActiveStream(request_id));
            };
            let is_final = message.is_response_or_error();
            if is_final {
                state
                    .request_responses
                    .insert(request_id.clone(), message.clone());
            }
            let complete = is_final && state.all_answered(&stream_id);

            if self.inner.config.enable_json_response {
                if !complete {
                    if !is_final {
                        tracing::debug!(
                            ?request_id,
                            "json response mode, dropping related message"
                        );
                    }
                    Delivery::Nothing
                } else {
                    let pending = state.pending_json.remove(&stream_id);
                    let responses = state.purge_stream(&stream_id);
                    match pending {
                        Some(tx) => Delivery::Json {
                            tx,
                            responses,
                            session_id: state.session.session_id.clone(),
                        },
                        None => {
                            tracing::warn!(%stream_id, "no pending response for stream");
                            Delivery::Nothing
                        }
                    }
                }
            } else {
                Delivery::Sse {
                    stream_id,
                    finish: complete,
                }
            }
        };

        match delivery {
            Delivery::Json {
                tx,
                responses,
                session_id,
            } => {
                let body = match responses.as_slice() {
                    [single] => serde_json::to_vec(single)?,
                    batch => serde_json::to_vec(batch)?,
                };
                let response = json_response(StatusCode::OK, body, session_id.as_ref());
                if tx.send(response).is_err() {
                    tracing::debug!(?request_id, "client went away before the response was ready");
                }
                Ok(())
            }
            Delivery::Sse { stream_id, finish } => {
                self.write_event(&stream_id, &message, finish).await
            }
            Delivery::Nothing => Ok(()),
        }
    }

    async fn send_standalone(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        let stream_id = StreamId::from(STANDALONE_SSE_STREAM_ID);
        let listening = self.inner.state.lock().await.streams.contains_key(&stream_id);
        if !listening {
            tracing::debug!("no standalone stream open, message dropped");
            return Ok(());
        }
        self.write_event(&stream_id, &message, false).await
    }

    /// Store the event when an event store is configured, then push it to the
    /// connection if one is still there. A `finish` message ends the stream
    /// once it is stored.
    ///
    /// A failing store does not keep the message from a live connection: the
    /// frame goes out without an id and the store error is returned.
    async fn write_event(
        &self,
        stream_id: &StreamId,
        message: &JsonRpcMessage,
        finish: bool,
    ) -> Result<(), TransportError> {
        let _order = self.inner.event_order.lock().await;
        let (event_id, store_error) = match &self.inner.event_store {
            Some(store) => match store.store_event(stream_id, message).await {
                Ok(event_id) => (Some(event_id), None),
                Err(e) => {
                    tracing::error!(%stream_id, "failed to store event: {e}");
                    (None, Some(e))
                }
            },
            None => (None, None),
        };
        let tx = {
            let mut state = self.inner.state.lock().await;
            if finish {
                state.purge_stream(stream_id);
                state.streams.remove(stream_id).map(|handle| handle.tx)
            } else {
                state.streams.get(stream_id).map(|handle| handle.tx.clone())
            }
        };
        match tx {
            Some(tx) => {
                let frame = ServerSseMessage::new(event_id, message).to_bytes()?;
                if tx.send(frame).is_err() {
                    tracing::debug!(%stream_id, "connection closed, event not written");
                }
            }
            None => tracing::debug!(%stream_id, "no connection for stream, event not written"),
        }
        match store_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Re-open the stream `last_event_id` belongs to and replay what the
    /// client missed.
    ///
    /// Fails with [`TransportError::NotImplemented`] when no event store is
    /// configured.
    pub async fn replay_events(
        &self,
        last_event_id: &EventId,
    ) -> Result<BoxResponse, TransportError> {
        let Some(store) = &self.inner.event_store else {
            return Err(TransportError::NotImplemented(
                "resuming a stream requires an event store".into(),
            ));
        };
        // Events stored for this stream are either in the replay or written
        // to the registered connection, never lost in between.
        let _order = self.inner.event_order.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sink = ReplaySink::new(tx.clone());
        let stream_id = store.replay_events_after(last_event_id, &mut sink).await?;
        tracing::debug!(%stream_id, %last_event_id, replayed = sink.replayed(), "resuming stream");
        drop(sink);

        let mut state = self.inner.state.lock().await;
        if state.streams.contains_key(&stream_id) {
            drop(state);
            return Ok(self.reject(Rejection::new(
                StatusCode::CONFLICT,
                ErrorData::transport_error("Conflict: Stream already has an active connection"),
            )));
        }
        let session_id = state.session.session_id.clone();
        let guard = if &*stream_id == STANDALONE_SSE_STREAM_ID
            || state.stream_requests.contains_key(&stream_id)
        {
            self.register_stream(&mut state, stream_id, tx)
        } else {
            // Nothing will be written to a finished stream again.
            drop(tx);
            CancellationToken::new().drop_guard()
        };
        drop(state);
        Ok(sse_stream_response(
            UnboundedReceiverStream::new(rx),
            self.inner.config.sse_keep_alive,
            guard,
            session_id.as_ref(),
        ))
    }

    /// End the SSE connection serving `request_id`. The request stays
    /// routable so later messages are still stored for a resuming client.
    pub async fn close_sse_stream(&self, request_id: &RequestId) {
        let mut state = self.inner.state.lock().await;
        let Some(stream_id) = state.request_to_stream.get(request_id).cloned() else {
            return;
        };
        if state.streams.remove(&stream_id).is_some() {
            tracing::debug!(%stream_id, ?request_id, "closed SSE stream");
        }
    }

    pub async fn close_standalone_sse_stream(&self) {
        let mut state = self.inner.state.lock().await;
        if state.streams.remove(STANDALONE_SSE_STREAM_ID).is_some() {
            tracing::debug!("closed standalone SSE stream");
        }
    }

    /// Close every stream and answer every pending JSON response with 503.
    /// Calling it more than once is harmless.
    pub async fn close(&self) {
        let (pending, first_close, session_id) = {
            let mut state = self.inner.state.lock().await;
            state.streams.clear();
            state.request_to_stream.clear();
            state.request_responses.clear();
            state.stream_requests.clear();
            let pending: Vec<_> = state.pending_json.drain().map(|(_, tx)| tx).collect();
            let first_close = !std::mem::replace(&mut state.closed, true);
            (pending, first_close, state.session.session_id.clone())
        };
        for tx in pending {
            let _ = tx.send(json_rpc_error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorData::transport_error("Service Unavailable: transport closed"),
            ));
        }
        if first_close {
            tracing::info!(session_id = ?session_id, "transport closed");
            if let Some(on_close) = &self.inner.on_close {
                on_close();
            }
        }
    }

    fn reject(&self, rejection: Rejection) -> BoxResponse {
        tracing::warn!(status = %rejection.status, error = %rejection.error, "rejecting request");
        if let Some(on_error) = &self.inner.on_error {
            on_error(&rejection.error);
        }
        json_rpc_error_response(rejection.status, rejection.error)
    }

    fn validate_request_headers(&self, headers: &HeaderMap) -> Result<(), Rejection> {
        let config = &self.inner.config;
        if !config.enable_dns_rebinding_protection {
            return Ok(());
        }
        if let Some(allowed_hosts) = config.allowed_hosts.as_ref().filter(|l| !l.is_empty()) {
            let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
            if !host.is_some_and(|host| allowed_hosts.iter().any(|allowed| allowed == host)) {
                return Err(Rejection::new(
                    StatusCode::FORBIDDEN,
                    ErrorData::transport_error(format!(
                        "Invalid Host header: {}",
                        host.unwrap_or_default()
                    )),
                ));
            }
        }
        if let Some(allowed_origins) = config.allowed_origins.as_ref().filter(|l| !l.is_empty()) {
            if let Some(origin) = headers.get(header::ORIGIN) {
                let origin = origin.to_str().unwrap_or_default();
                if !allowed_origins.iter().any(|allowed| allowed == origin) {
                    return Err(Rejection::new(
                        StatusCode::FORBIDDEN,
                        ErrorData::transport_error(format!("Invalid Origin header: {origin}")),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn validate_existing_session(&self, headers: &HeaderMap) -> Result<(), Rejection> {
        {
            let state = self.inner.state.lock().await;
            validate_session(self.is_stateful(), &state.session, headers)?;
        }
        validate_protocol_version(headers)
    }

    /// Register the write half of a new SSE connection. The returned guard
    /// belongs in the response body; dropping it unregisters the connection.
    fn register_stream(
        &self,
        state: &mut TransportState,
        stream_id: StreamId,
        tx: UnboundedSender<Bytes>,
    ) -> DropGuard {
        state.next_connection += 1;
        let connection = state.next_connection;
        state
            .streams
            .insert(stream_id.clone(), SseStreamHandle { tx, connection });

        let ct = CancellationToken::new();
        let cancelled = ct.clone();
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            cancelled.cancelled().await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut state = inner.state.lock().await;
            let current = state
                .streams
                .get(&stream_id)
                .is_some_and(|handle| handle.connection == connection);
            if current {
                state.streams.remove(&stream_id);
                tracing::debug!(%stream_id, "client disconnected from SSE stream");
            }
        });
        ct.drop_guard()
    }

    async fn handle_post<B>(&self, request: Request<B>, options: HandleRequestOptions) -> BoxResponse
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Display,
    {
        let (parts, body) = request.into_parts();
        if !accepts(&parts.headers, JSON_MIME_TYPE) || !accepts(&parts.headers, EVENT_STREAM_MIME_TYPE)
        {
            return self.reject(Rejection::new(
                StatusCode::NOT_ACCEPTABLE,
                ErrorData::transport_error(
                    "Not Acceptable: Client must accept both application/json and text/event-stream",
                ),
            ));
        }
        let is_json = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(JSON_MIME_TYPE));
        if !is_json {
            return self.reject(Rejection::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ErrorData::transport_error(
                    "Unsupported Media Type: Content-Type must be application/json",
                ),
            ));
        }

        let value = match options.parsed_body {
            Some(value) => Ok(value),
            None => read_json(body).await,
        };
        let messages = match value.and_then(|value| parse_messages(value).map_err(|e| e.to_string()))
        {
            Ok(messages) => messages,
            Err(e) => {
                return self.reject(Rejection::new(
                    StatusCode::BAD_REQUEST,
                    ErrorData::parse_error("Parse error", Some(Value::String(e))),
                ));
            }
        };

        let plan = match self.plan_post(&parts.headers, &messages).await {
            Ok(plan) => plan,
            Err(rejection) => return self.reject(rejection),
        };
        if plan.initialized {
            tracing::info!(session_id = ?plan.new_session, "session initialized");
            if let (Some(session_id), Some(callback)) =
                (&plan.new_session, &self.inner.on_session_initialized)
            {
                callback(session_id);
            }
        }

        let auth_info = options
            .auth_info
            .or_else(|| parts.extensions.get::<AuthInfo>().cloned());
        match plan.handler {
            Some(handler) => {
                for ClassifiedMessage { message, .. } in messages {
                    handler.on_message(
                        message,
                        MessageContext {
                            transport: self.clone(),
                            auth_info: auth_info.clone(),
                            headers: parts.headers.clone(),
                        },
                    );
                }
            }
            None => {
                tracing::warn!(count = messages.len(), "no message handler set, messages dropped");
            }
        }

        match plan.route {
            PostRoute::Accepted => accepted_response(),
            PostRoute::Json(rx) => rx.await.unwrap_or_else(|_| {
                json_rpc_error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorData::transport_error("Service Unavailable: transport closed"),
                )
            }),
            PostRoute::Sse {
                rx,
                guard,
                session_id,
            } => sse_stream_response(
                UnboundedReceiverStream::new(rx),
                self.inner.config.sse_keep_alive,
                guard,
                session_id.as_ref(),
            ),
        }
    }

    /// Session checks and route registration for one POST, done under a
    /// single lock so a handler answering immediately finds its route.
    async fn plan_post(
        &self,
        headers: &HeaderMap,
        messages: &[ClassifiedMessage],
    ) -> Result<PostPlan, Rejection> {
        let mut state = self.inner.state.lock().await;
        let is_initialize = messages
            .iter()
            .any(|message| message.kind == MessageKind::Initialize);
        let mut new_session = None;
        if is_initialize {
            if state.session.initialized && state.session.session_id.is_some() {
                return Err(Rejection::new(
                    StatusCode::BAD_REQUEST,
                    ErrorData::invalid_request("Invalid Request: Server already initialized", None),
                ));
            }
            if messages.len() > 1 {
                return Err(Rejection::new(
                    StatusCode::BAD_REQUEST,
                    ErrorData::invalid_request(
                        "Invalid Request: Only one initialization request is allowed",
                        None,
                    ),
                ));
            }
            new_session = self
                .inner
                .session_id_generator
                .as_ref()
                .map(|generator| generator.generate());
            state.session.session_id = new_session.clone();
            state.session.initialized = true;
        } else {
            validate_session(self.is_stateful(), &state.session, headers)?;
            validate_protocol_version(headers)?;
        }

        let request_ids: Vec<RequestId> = messages
            .iter()
            .filter(|message| message.kind.expects_response())
            .filter_map(|message| message.message.request_id().cloned())
            .collect();
        let route = if request_ids.is_empty() {
            PostRoute::Accepted
        } else {
            let stream_id = stream_id();
            tracing::debug!(%stream_id, ?request_ids, "routing requests");
            for id in &request_ids {
                state.request_to_stream.insert(id.clone(), stream_id.clone());
            }
            state.stream_requests.insert(stream_id.clone(), request_ids);
            if self.inner.config.enable_json_response {
                let (tx, rx) = oneshot::channel();
                state.pending_json.insert(stream_id, tx);
                PostRoute::Json(rx)
            } else {
                let (tx, rx) = mpsc::unbounded_channel();
                let guard = self.register_stream(&mut state, stream_id, tx);
                PostRoute::Sse {
                    rx,
                    guard,
                    session_id: state.session.session_id.clone(),
                }
            }
        };
        Ok(PostPlan {
            route,
            handler: state.handler.clone(),
            new_session,
            initialized: is_initialize,
        })
    }

    async fn handle_get<B>(&self, request: Request<B>) -> BoxResponse {
        let headers = request.headers();
        if !accepts(headers, EVENT_STREAM_MIME_TYPE) {
            return self.reject(Rejection::new(
                StatusCode::NOT_ACCEPTABLE,
                ErrorData::transport_error("Not Acceptable: Client must accept text/event-stream"),
            ));
        }
        if let Err(rejection) = self.validate_existing_session(headers).await {
            return self.reject(rejection);
        }

        let last_event_id = headers
            .get(HEADER_LAST_EVENT_ID)
            .and_then(|value| value.to_str().ok())
            .map(EventId::from);
        if let (Some(_), Some(last_event_id)) = (&self.inner.event_store, last_event_id) {
            return match self.replay_events(&last_event_id).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(%last_event_id, "failed to replay events: {e}");
                    self.reject(Rejection::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorData::internal_error(
                            "Internal Error: failed to replay events",
                            Some(Value::String(e.to_string())),
                        ),
                    ))
                }
            };
        }

        let mut state = self.inner.state.lock().await;
        let stream_id = StreamId::from(STANDALONE_SSE_STREAM_ID);
        if state.streams.contains_key(&stream_id) {
            drop(state);
            return self.reject(Rejection::new(
                StatusCode::CONFLICT,
                ErrorData::transport_error("Conflict: Only one SSE stream is allowed per session"),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.register_stream(&mut state, stream_id, tx);
        let session_id = state.session.session_id.clone();
        drop(state);
        tracing::debug!(session_id = ?session_id, "opened standalone SSE stream");
        sse_stream_response(
            UnboundedReceiverStream::new(rx),
            self.inner.config.sse_keep_alive,
            guard,
            session_id.as_ref(),
        )
    }

    async fn handle_delete<B>(&self, request: Request<B>) -> BoxResponse {
        if let Err(rejection) = self.validate_existing_session(request.headers()).await {
            return self.reject(rejection);
        }
        self.close().await;
        empty_response(StatusCode::OK)
    }
}

fn accepts(headers: &HeaderMap, mime: &str) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains(mime))
}

async fn read_json<B>(body: B) -> Result<Value, String>
where
    B: Body,
    B::Error: Display,
{
    let bytes = body
        .collect()
        .await
        .map_err(|e| e.to_string())?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}
