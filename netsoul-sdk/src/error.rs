//! Error taxonomy for the netsoul client.
//!
//! Only [`ConfigError`] and [`TransportError`] at connect time are returned to
//! the caller directly. Everything that happens once the session runs is
//! reported through [`crate::event::Event`]s and logs.

use thiserror::Error;

/// A record that could not be understood.
///
/// Logged and ignored by the session; the connection stays up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty record")]
    Empty,

    #[error("`{verb}` record is missing field `{field}`")]
    MissingField {
        verb: String,
        field: &'static str,
    },

    #[error("invalid session id `{0}`")]
    InvalidId(String),

    #[error("malformed user header `{0}`")]
    MalformedHeader(String),

    #[error("unsupported record `{0}`")]
    Unsupported(String),
}

/// The server rejected our credentials (handshake step -1).
#[derive(Debug, Error, PartialEq, Eq)]
#[error("authentication rejected: {reason}")]
pub struct AuthenticationError {
    pub reason: String,
}

/// Socket-level failure, either while connecting or mid-session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection closed by peer")]
    Eof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Invalid connection settings, caught before any I/O happens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("login is missing")]
    MissingLogin,

    #[error("password is missing")]
    MissingPassword,

    #[error("server address `{0}` has no valid port")]
    InvalidPort(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeartbeatError {
    #[error("heartbeat is already running")]
    AlreadyRunning,
}

/// Umbrella error for callers that want a single type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),
}
