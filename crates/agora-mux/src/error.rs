//! Error types for transports, the multiplexer and protocol endpoints.

use agora_protocol::{AddressError, DialogueError, ValidationError};
use agora_types::{Address, AgoraError, ConnectionId, DecodeError, ProtocolId};
use std::time::Duration;
use thiserror::Error;

/// A transport-level failure of one connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection '{0}' is not connected")]
    NotConnected(ConnectionId),

    #[error("Connection '{0}' is already connected")]
    AlreadyConnected(ConnectionId),

    /// No peer with this address is reachable through the connection.
    #[error("Unknown recipient: {0}")]
    UnknownRecipient(Address),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Connection closed")]
    Closed,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Multiplexer failures.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("No connections registered")]
    NoConnections,

    #[error("Duplicate connection id: {0}")]
    DuplicateConnection(ConnectionId),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Multiplexer is not connected")]
    NotConnected,

    #[error("Connection '{id}' failed: {source}")]
    Connection {
        id: ConnectionId,
        #[source]
        source: ConnectionError,
    },

    #[error("Connection '{id}' timed out after {timeout:?}")]
    Timeout { id: ConnectionId, timeout: Duration },

    /// `put` could not enqueue within the configured timeout.
    #[error("Outbox full after {0:?}")]
    OutboxFull(Duration),

    #[error("No route for protocol {0}")]
    NoRoute(ProtocolId),

    #[error("Configuration error: {0}")]
    Config(#[from] AgoraError),
}

/// Failures at the boundary between the multiplexer and a protocol.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Envelope protocol {actual} does not match endpoint protocol {expected}")]
    WrongProtocol {
        expected: ProtocolId,
        actual: ProtocolId,
    },

    #[error("Failed to decode message: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid message: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Dialogue(#[from] DialogueError),

    #[error(transparent)]
    Mux(#[from] MuxError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("Message has no {0} address")]
    MissingAddress(&'static str),
}
