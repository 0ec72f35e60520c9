#![allow(dead_code)]

use std::{convert::Infallible, time::Duration};

use bytes::Bytes;
use http::{Method, Request, header};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use mcp_streamable_http::{
    MessageContext, SendOptions,
    model::{JsonObject, JsonRpcMessage},
    transport::common::{http_header::HEADER_SESSION_ID, server_side_http::BoxResponse},
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const ACCEPT_BOTH: &str = "application/json, text/event-stream";
pub const ACCEPT_SSE: &str = "text/event-stream";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".to_string().into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn initialize_body(id: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0.0" }
        }
    })
}

pub fn request_body(id: i64, method: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method })
}

pub fn notification_body(method: &str) -> Value {
    json!({ "jsonrpc": "2.0", "method": method })
}

pub fn post(body: Value, session_id: Option<&str>) -> Request<Full<Bytes>> {
    post_with(body, session_id, ACCEPT_BOTH, "application/json")
}

pub fn post_with(
    body: Value,
    session_id: Option<&str>,
    accept: &str,
    content_type: &str,
) -> Request<Full<Bytes>> {
    post_raw(body.to_string(), session_id, accept, content_type)
}

pub fn post_raw(
    body: impl Into<Bytes>,
    session_id: Option<&str>,
    accept: &str,
    content_type: &str,
) -> Request<Full<Bytes>> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .header(header::HOST, "localhost")
        .header(header::ACCEPT, accept)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(session_id) = session_id {
        builder = builder.header(HEADER_SESSION_ID, session_id);
    }
    builder.body(Full::new(body.into())).unwrap()
}

pub fn get(session_id: Option<&str>, last_event_id: Option<&str>) -> Request<Full<Bytes>> {
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri("/mcp")
        .header(header::HOST, "localhost")
        .header(header::ACCEPT, ACCEPT_SSE);
    if let Some(session_id) = session_id {
        builder = builder.header(HEADER_SESSION_ID, session_id);
    }
    if let Some(last_event_id) = last_event_id {
        builder = builder.header("last-event-id", last_event_id);
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

pub fn delete(session_id: Option<&str>) -> Request<Full<Bytes>> {
    let mut builder = Request::builder()
        .method(Method::DELETE)
        .uri("/mcp")
        .header(header::HOST, "localhost");
    if let Some(session_id) = session_id {
        builder = builder.header(HEADER_SESSION_ID, session_id);
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

pub fn session_header(response: &BoxResponse) -> Option<String> {
    response
        .headers()
        .get(HEADER_SESSION_ID)
        .map(|value| value.to_str().unwrap().to_string())
}

pub fn content_type(response: &BoxResponse) -> Option<String> {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|value| value.to_str().unwrap().to_string())
}

pub async fn body_bytes(response: BoxResponse) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: BoxResponse) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Answers every request with `{"method": <method>}` from a spawned task.
pub fn echo_handler() -> impl Fn(JsonRpcMessage, MessageContext) + Send + Sync + 'static {
    |message: JsonRpcMessage, context: MessageContext| {
        let JsonRpcMessage::Request(request) = message else {
            return;
        };
        tokio::spawn(async move {
            let mut result = JsonObject::new();
            result.insert("method".to_string(), Value::String(request.method.clone()));
            context
                .transport
                .send(
                    JsonRpcMessage::response(request.id, result),
                    SendOptions::default(),
                )
                .await
                .expect("echo response should be routable");
        });
    }
}

pub type Received = (JsonRpcMessage, MessageContext);

/// Forwards every message to the returned receiver so the test decides when
/// and how to answer.
pub fn capture_handler() -> (
    impl Fn(JsonRpcMessage, MessageContext) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Received>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |message: JsonRpcMessage, context: MessageContext| {
        let _ = tx.send((message, context));
    };
    (handler, rx)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: Value,
}

/// Reads `event: message` blocks from an SSE response body, skipping
/// keep-alive comments.
pub struct SseReader {
    body: BoxBody<Bytes, Infallible>,
    buffer: String,
}

impl SseReader {
    pub fn new(response: BoxResponse) -> Self {
        Self {
            body: response.into_body(),
            buffer: String::new(),
        }
    }

    /// `None` once the server ended the stream.
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            if let Some(position) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..position + 2).collect();
                if block.starts_with(':') {
                    continue;
                }
                return Some(parse_event(&block));
            }
            let frame = self.body.frame().await?.ok()?;
            if let Ok(data) = frame.into_data() {
                self.buffer.push_str(std::str::from_utf8(&data).unwrap());
            }
        }
    }

    pub async fn expect_event(&mut self) -> SseEvent {
        tokio::time::timeout(Duration::from_secs(5), self.next_event())
            .await
            .expect("timed out waiting for an SSE event")
            .expect("stream ended before the next event")
    }

    pub async fn expect_end(&mut self) {
        let next = tokio::time::timeout(Duration::from_secs(5), self.next_event())
            .await
            .expect("timed out waiting for the stream to end");
        assert_eq!(next, None, "expected the stream to end");
    }
}

fn parse_event(block: &str) -> SseEvent {
    let mut event = None;
    let mut id = None;
    let mut data = String::new();
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event: ") {
            event = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("id: ") {
            id = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("data: ") {
            data.push_str(value);
        }
    }
    SseEvent {
        event,
        id,
        data: serde_json::from_str(&data).unwrap(),
    }
}

/// Lets spawned cleanup tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
