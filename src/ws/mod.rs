//! Core WebSocket infrastructure.
//!
//! This module provides the pieces the chat connection manager is built from
//! that have nothing chat-specific in them.
//!
//! # Architecture
//!
//! - [`Transport`]: Opens a connection and hands back a [`Link`] (sink + stream of text frames)
//! - [`config::Config`]: Reconnect, timeout and channel sizing knobs
//! - [`config::LinearBackoff`]: Bounded `base_delay * n` retry schedule
//!
//! # Example
//!
//! ```ignore
//! let mut config = Config::default();
//! config.reconnect.max_attempts = 10;
//!
//! let client = chat::Client::with_transport(config, TungsteniteTransport, store, sessions);
//! ```

pub mod config;
pub mod error;
pub mod transport;

#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
#[cfg(feature = "ws")]
pub use transport::TungsteniteTransport;
pub use transport::{Link, Transport};
