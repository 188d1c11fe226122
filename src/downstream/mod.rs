//! Backend side of an exchange.
//!
//! # Data Flow
//! ```text
//! tokenizer callbacks
//!     → exchange.rs (request head accumulated, forwarded on headers-complete)
//!     → link.rs (BackendLink carries request bytes to the backend driver)
//!
//! BackendEvent::Data
//!     → exchange.rs (buffered, parsed with http::response)
//!     → ResponseHandler (upstream framer writes the client response)
//! ```

pub mod exchange;
pub mod link;

pub use exchange::{Exchange, MessageState, ResponseHandler};
pub use link::{BackendConnector, BackendEvent, BackendLink, ExchangeId};
