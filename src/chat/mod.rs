//! Real-time chat connection manager.
//!
//! [`Client`] is the public handle. Behind it a single driver task owns the
//! connection state machine, the outbound queue and the reconnect policy, and
//! hands decoded inbound frames to a [`MessageStore`].
//!
//! ```text
//!            connect()                transport open + Validate sent
//! closed ─────────────────▶ connecting ─────────────────────────────▶ open
//!   ▲  ▲    error/timeout       │                                      │
//!   │  └────────────────────────┘ (retry after base_delay * n)         │
//!   │                      drop / transmit error (retry)               │
//!   ├──────────────────────────────────────────────────────────────────┤
//!   │                     disconnect()                                 │
//!   └──────────────── closing ◀────────────────────────────────────────┘
//! ```

pub mod client;
pub mod connection;
pub mod queue;
pub mod store;
pub mod types;

pub use client::Client;
pub use connection::{ClientEvent, ConnectionState};
pub use store::{BroadcastStore, MessageStore};
