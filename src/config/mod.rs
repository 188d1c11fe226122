//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via ArcSwap with the accept loop
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads and validates the new config
//!     → server swaps the snapshot; new connections use it
//! ```
//!
//! # Design Decisions
//! - A connection keeps the snapshot it was accepted with
//! - All fields have defaults to allow minimal configs
//! - Listener address changes need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackendConfig, LimitsConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig,
    ServerConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
