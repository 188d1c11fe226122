//! HTTP/1.1 protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → tokenizer.rs (incremental request tokenizer, structural callbacks)
//!     → [upstream bridge builds exchanges from the callbacks]
//!
//! backend bytes
//!     → response.rs (incremental response parser)
//!     → [upstream framer re-serializes for the client]
//!
//! body.rs     chunked codec and length rules shared by both directions
//! headers.rs  header lists and hop-by-hop rules
//! status.rs   reason phrases and generated error pages
//! server.rs   accept loop handing connections to the network driver
//! ```

pub mod body;
pub mod headers;
pub mod response;
pub mod server;
pub mod status;
pub mod tokenizer;

pub use headers::{Headers, X_REQUEST_ID};
pub use server::HttpServer;

/// Why a request or response byte stream could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed message head: {0}")]
    Head(httparse::Error),

    #[error("message head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("invalid or conflicting content-length")]
    InvalidContentLength,

    #[error("unsupported transfer-encoding: {0}")]
    UnsupportedTransferEncoding(String),

    #[error("invalid chunk size line")]
    InvalidChunkSize,

    #[error("chunk data not followed by CRLF")]
    InvalidChunkSuffix,

    #[error("malformed trailer section: {0}")]
    Trailers(httparse::Error),

    #[error("protocol upgrade is not supported")]
    UpgradeUnsupported,
}
