//! netsoul-sdk: client core for the netsoul presence protocol.
//!
//! Handles the line codec, the MD5 challenge handshake, buddy presence
//! tracking and the keepalive heartbeat. Consumers get a [`client::ClientHandle`]
//! for commands and a stream of [`event::Event`]s.

pub mod auth;
pub mod client;
pub mod codec;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod message;
pub mod presence;
pub mod session;

pub use client::{
    ClientHandle, Command, ConnectConfig, LocationResolver, connect, connect_with_stream,
};
pub use error::Error;
pub use event::Event;
pub use message::PresenceState;
pub use session::{Phase, WatchList};
