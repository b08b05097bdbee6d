//! Relay client: WebSocket transport, wire message (de)serialization, and
//! a multiplexed, reconnecting client used by both the rider and driver
//! processes to publish and subscribe to signed events.

pub mod client;
pub mod message;

pub use client::{EventHandler, PublishOutcome, RelayClient, RelayHandle, SubHandle};
pub use message::{parse_relay_message, ClientMessage, RelayMessage};
