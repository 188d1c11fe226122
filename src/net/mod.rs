//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id, tracking, client byte buffers)
//!     → client.rs (drives the protocol bridge for the connection)
//!     → backend.rs (one backend TCP connection per exchange)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Backend tasks talk to the client task only through a channel

pub mod backend;
pub mod client;
pub mod connection;
pub mod listener;
