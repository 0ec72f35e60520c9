pub mod http_header;

pub mod server_side_http;
