//! Thin realtime client over the Phoenix Channels v1 protocol.
//!
//! Subscribes to row-level `postgres_changes` on the platform's realtime
//! socket using `tokio-tungstenite`. Handles heartbeats, channel join/leave,
//! token refresh, and auto-reconnect with backoff.

mod client;
mod connection;
mod handler;
mod types;

pub use client::RealtimeClient;
pub use types::{ChangeBinding, ChannelConfig, PhoenixMessage, RealtimeConfig, RealtimeEvent};
