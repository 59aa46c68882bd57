//! The contract every transport satisfies.

use crate::error::ConnectionError;
use agora_types::{ConnectionId, Envelope, ProtocolId};
use async_trait::async_trait;
use futures::Stream;
use std::collections::BTreeSet;
use std::fmt;
use std::pin::Pin;
use std::sync::RwLock;

/// Inbound envelopes of one connection.
///
/// A receive failure is yielded as an error item; the stream ends when the
/// transport closes.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<Envelope, ConnectionError>> + Send>>;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Shared, lock-protected [`ConnectionState`] for transport implementations.
#[derive(Debug)]
pub struct StateCell(RwLock<ConnectionState>);

impl StateCell {
    pub fn new() -> Self {
        Self(RwLock::new(ConnectionState::Disconnected))
    }

    pub fn get(&self) -> ConnectionState {
        *self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, state: ConnectionState) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Move from `from` to `to`, returning false if the state was not `from`.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.0.write().unwrap_or_else(|e| e.into_inner());
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// A transport adapter owned by the multiplexer.
///
/// `connect` hands back the inbound stream; outbound envelopes go through
/// `send`. Implementations must be safe to `disconnect` more than once.
#[async_trait]
pub trait Connection: Send + Sync {
    fn connection_id(&self) -> &ConnectionId;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Protocols this connection carries, or `None` for all of them.
    fn restricted_to_protocols(&self) -> Option<&BTreeSet<ProtocolId>> {
        None
    }

    fn accepts_protocol(&self, protocol_id: &ProtocolId) -> bool {
        self.restricted_to_protocols()
            .map_or(true, |allowed| allowed.contains(protocol_id))
    }

    async fn connect(&self) -> Result<EnvelopeStream, ConnectionError>;

    async fn disconnect(&self) -> Result<(), ConnectionError>;

    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError>;
}
