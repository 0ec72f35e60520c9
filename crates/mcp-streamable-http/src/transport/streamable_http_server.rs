//! Streamable HTTP Server Transport Module
//!
//! One [`StreamableHttpServerTransport`] serves one MCP endpoint. It accepts
//! JSON-RPC messages over `POST`, hands them to a
//! [`MessageHandler`](crate::handler::MessageHandler), and routes whatever the
//! handler sends back to the right place:
//!
//! - the SSE stream opened for the POST that carried the request,
//! - a single JSON body when [`StreamableHttpServerConfig::enable_json_response`] is set,
//! - the standalone stream opened by `GET` for server-initiated messages.
//!
//! `DELETE` ends the session. With an
//! [`EventStore`](crate::transport::EventStore) configured, every SSE event
//! gets an id and a client can resume a broken stream by sending
//! `Last-Event-ID`.
//!
//! # Examples
//!
//! ```ignore
//! use mcp_streamable_http::transport::StreamableHttpServerTransport;
//!
//! let transport = StreamableHttpServerTransport::builder()
//!     .stateful()
//!     .message_handler(|message, context: MessageContext| {
//!         tokio::spawn(async move { /* call context.transport.send(..) */ });
//!     })
//!     .build();
//! let router = axum::Router::new().nest_service("/mcp", transport);
//! ```

pub mod session;

mod server;
#[cfg(feature = "tower")]
#[cfg_attr(docsrs, doc(cfg(feature = "tower")))]
mod tower;

use std::time::Duration;

pub use server::{
    HandleRequestOptions, STANDALONE_SSE_STREAM_ID, SendOptions, StreamableHttpServerTransport,
    StreamableHttpServerTransportBuilder,
};
pub use session::{SessionId, SessionIdGenerator, UuidSessionIdGenerator};

use crate::transport::common::server_side_http::DEFAULT_AUTO_PING_INTERVAL;

/// Configuration for the streamable HTTP server
#[derive(Debug, Clone)]
pub struct StreamableHttpServerConfig {
    /// Answer POSTs with one JSON body instead of an SSE stream.
    pub enable_json_response: bool,
    /// The ping message duration for SSE connections.
    pub sse_keep_alive: Option<Duration>,
    /// Check `Host` and `Origin` against the lists below.
    pub enable_dns_rebinding_protection: bool,
    /// Accepted `Host` header values. `None` or empty accepts any host.
    pub allowed_hosts: Option<Vec<String>>,
    /// Accepted `Origin` header values. `None` or empty accepts any origin.
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for StreamableHttpServerConfig {
    fn default() -> Self {
        Self {
            enable_json_response: false,
            sse_keep_alive: Some(DEFAULT_AUTO_PING_INTERVAL),
            enable_dns_rebinding_protection: false,
            allowed_hosts: None,
            allowed_origins: None,
        }
    }
}
