//! # Transport
//!
//! The server side of the MCP streamable HTTP transport.
//!
//! | module | content |
//! |---|---|
//! | [`streamable_http_server`] | the transport, its config and session handling |
//! | [`event_store`] | the [`EventStore`] trait and an in-memory implementation |
//! | [`common`] | header names and HTTP/SSE response helpers |

pub mod common;
pub mod event_store;
pub mod streamable_http_server;

pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, ReplaySink};
pub use streamable_http_server::{
    HandleRequestOptions, SendOptions, StreamableHttpServerConfig, StreamableHttpServerTransport,
    StreamableHttpServerTransportBuilder,
};
