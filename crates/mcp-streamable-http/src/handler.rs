//! Receiving side of the transport.
//!
//! Every message accepted by a POST is handed to a [`MessageHandler`]
//! together with a [`MessageContext`]. The handler answers by calling
//! [`StreamableHttpServerTransport::send`] on the transport handle it finds in
//! the context, usually from a spawned task.

use http::HeaderMap;

use crate::{
    model::{JsonObject, JsonRpcMessage},
    transport::StreamableHttpServerTransport,
};

/// Credentials already verified by whatever sits in front of the transport.
///
/// Upstream middleware can insert it into the request extensions; the
/// transport forwards it to the handler untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthInfo {
    pub token: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Seconds since the unix epoch.
    pub expires_at: Option<u64>,
    pub extra: Option<JsonObject>,
}

#[derive(Debug, Clone)]
pub struct MessageContext {
    pub transport: StreamableHttpServerTransport,
    pub auth_info: Option<AuthInfo>,
    /// Headers of the HTTP request that carried the message.
    pub headers: HeaderMap,
}

pub trait MessageHandler: Send + Sync + 'static {
    /// Called synchronously, in batch order, before the POST returns.
    /// Long-running work should be spawned.
    fn on_message(&self, message: JsonRpcMessage, context: MessageContext);
}

impl<F> MessageHandler for F
where
    F: Fn(JsonRpcMessage, MessageContext) + Send + Sync + 'static,
{
    fn on_message(&self, message: JsonRpcMessage, context: MessageContext) {
        (self)(message, context)
    }
}
