//! WebSocket relay: connection lifecycle, subscriptions, presence, and
//! the event protocol over a durable store gateway.

pub mod connection;
pub mod presence;
pub mod relay;
pub mod server;
pub mod subscriptions;

pub use relay::Relay;
pub use server::{start, ServerConfig, ServerHandle};
