//! HTTP/WebSocket ingress.

pub mod http;

pub use http::{AppState, HttpServer};
