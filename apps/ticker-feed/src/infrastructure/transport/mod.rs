//! Network Adapters
//!
//! Real implementations of the feed's transport and polling ports.

pub mod http;
pub mod websocket;

pub use http::HttpTickerSource;
pub use websocket::WebSocketTransport;
