use std::sync::Arc;

use mcp_streamable_http::{
    MessageContext, SendOptions,
    model::{ErrorData, JsonObject, JsonRpcMessage, JsonRpcRequest},
};
use serde_json::{Value, json};
use tokio::sync::Mutex;

/// A tiny MCP server with a shared counter and three tools.
#[derive(Clone, Default)]
pub struct Counter {
    counter: Arc<Mutex<i32>>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn increment(&self) -> i32 {
        let mut counter = self.counter.lock().await;
        *counter += 1;
        *counter
    }

    async fn decrement(&self) -> i32 {
        let mut counter = self.counter.lock().await;
        *counter -= 1;
        *counter
    }

    async fn get_value(&self) -> i32 {
        *self.counter.lock().await
    }

    fn server_info() -> Value {
        json!({
            "protocolVersion": "2025-06-18",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "counter", "version": env!("CARGO_PKG_VERSION") },
            "instructions": "This server provides a counter tool that can increment and decrement values. The counter starts at 0 and can be modified using the 'increment' and 'decrement' tools. Use 'get_value' to check the current count."
        })
    }

    fn list_tools() -> Value {
        let empty = json!({ "type": "object", "properties": {} });
        json!({
            "tools": [
                { "name": "increment", "description": "Increment the counter by 1", "inputSchema": empty },
                { "name": "decrement", "description": "Decrement the counter by 1", "inputSchema": empty },
                { "name": "get_value", "description": "Get the current counter value", "inputSchema": empty },
            ]
        })
    }

    async fn call_tool(&self, request: &JsonRpcRequest) -> Result<Value, ErrorData> {
        let name = request
            .params
            .as_ref()
            .and_then(|params| params.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| ErrorData::invalid_params("missing tool name", None))?;
        let value = match name {
            "increment" => self.increment().await,
            "decrement" => self.decrement().await,
            "get_value" => self.get_value().await,
            other => {
                return Err(ErrorData::invalid_params(
                    format!("unknown tool: {other}"),
                    None,
                ));
            }
        };
        Ok(json!({ "content": [{ "type": "text", "text": value.to_string() }] }))
    }

    async fn respond(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        let result = match request.method.as_str() {
            "initialize" => Ok(Self::server_info()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(Self::list_tools()),
            "tools/call" => self.call_tool(&request).await,
            method => Err(ErrorData::method_not_found(method)),
        };
        match result {
            Ok(Value::Object(result)) => JsonRpcMessage::response(request.id, result),
            Ok(_) => JsonRpcMessage::response(request.id, JsonObject::new()),
            Err(error) => JsonRpcMessage::error(Some(request.id), error),
        }
    }

    /// Message handler: answers every request from a spawned task.
    pub fn handle(&self, message: JsonRpcMessage, context: MessageContext) {
        let request = match message {
            JsonRpcMessage::Request(request) => request,
            JsonRpcMessage::Notification(notification) => {
                tracing::debug!(method = %notification.method, "notification received");
                return;
            }
            other => {
                tracing::debug!(?other, "ignoring client response");
                return;
            }
        };
        let counter = self.clone();
        tokio::spawn(async move {
            let is_call = request.method == "tools/call";
            let response = counter.respond(request).await;
            if let Err(e) = context
                .transport
                .send(response, SendOptions::default())
                .await
            {
                tracing::error!("failed to send response: {e}");
                return;
            }
            if is_call {
                // tell listeners on the standalone stream that something changed
                let notification = JsonRpcMessage::notification(
                    "notifications/message",
                    Some(json!({ "level": "info", "data": { "counter": counter.get_value().await } })),
                );
                if let Err(e) = context
                    .transport
                    .send(notification, SendOptions::default())
                    .await
                {
                    tracing::warn!("failed to send notification: {e}");
                }
            }
        });
    }
}
