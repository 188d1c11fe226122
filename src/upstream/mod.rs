//! Client-facing protocol bridge.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → parser.rs (tokenizer callbacks build exchanges at the queue back)
//!     → exchange forwards the request to its backend link
//!
//! BackendEvent for the queue front
//!     → bridge.rs (state table: parse, EOF, error, timeout)
//!     → framer.rs (HTTP/1.1 bytes appended to the client output)
//!     → queue.rs (front retired, client reads resumed)
//! ```
//!
//! # Design Decisions
//! - One task owns the bridge, so no state here is shared or locked
//! - Only the queue front consumes backend events; others buffer theirs
//! - Order violations panic instead of reordering responses

pub mod bridge;
pub mod framer;
pub mod parser;
pub mod queue;

pub use bridge::HttpUpstream;
pub use queue::PipelineQueue;

use crate::config::ProxyConfig;
use crate::downstream::ExchangeId;
use crate::http::tokenizer::TokenizerLimits;
use crate::http::ParseError;

/// Errors that end a client connection.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("malformed client request: {0}")]
    HttpParse(#[from] ParseError),

    #[error("backend response for {id} is corrupted after its headers were forwarded: {source}")]
    ResponseCorrupted {
        id: ExchangeId,
        #[source]
        source: ParseError,
    },
}

/// Per-connection settings taken from a config snapshot.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Sent as `Server` and shown on error pages.
    pub server_name: String,
    /// Listener port shown on error pages.
    pub port: u16,
    /// Parsed requests allowed in flight before client reads pause.
    pub max_pipeline_depth: usize,
    /// Buffered response bytes after which a waiting exchange's backend
    /// reads pause.
    pub max_buffered_response_bytes: usize,
    pub limits: TokenizerLimits,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            server_name: crate::config::schema::DEFAULT_SERVER_NAME.to_string(),
            port: 80,
            max_pipeline_depth: 1,
            max_buffered_response_bytes: 1024 * 1024,
            limits: TokenizerLimits::default(),
        }
    }
}

impl UpstreamSettings {
    pub fn from_config(config: &ProxyConfig, port: u16) -> Self {
        Self {
            server_name: config.server.name.clone(),
            port,
            max_pipeline_depth: config.limits.max_pipeline_depth.max(1),
            max_buffered_response_bytes: config.limits.max_buffered_response_bytes.max(1),
            limits: TokenizerLimits {
                max_header_bytes: config.limits.max_header_bytes,
                max_headers: config.limits.max_headers,
            },
        }
    }
}
