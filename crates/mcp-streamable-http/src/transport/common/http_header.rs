pub const HEADER_SESSION_ID: &str = "mcp-session-id";
pub const HEADER_LAST_EVENT_ID: &str = "last-event-id";
pub const HEADER_MCP_PROTOCOL_VERSION: &str = "mcp-protocol-version";
pub const HEADER_X_ACCEL_BUFFERING: &str = "x-accel-buffering";
pub const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";
pub const JSON_MIME_TYPE: &str = "application/json";
/// Methods accepted by the streamable HTTP endpoint, as sent in `Allow`.
pub const ALLOWED_METHODS: &str = "GET, POST, DELETE";
