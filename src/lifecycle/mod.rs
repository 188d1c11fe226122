//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → accept loop stops → connections finish in-flight exchanges
//!     → server waits for the connection tracker to drain (bounded)
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
