//! HTTP/1.1 client-facing protocol layer for a reverse proxy.

pub mod config;
pub mod downstream;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
