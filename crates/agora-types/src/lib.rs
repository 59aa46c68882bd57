//! Core types for the Agora agent-communication substrate.
//!
//! This crate defines the data structures shared by the protocol layer and the
//! multiplexer: addresses, protocol identifiers, the transport [`Envelope`],
//! the low-level wire primitives and configuration. It contains no protocol
//! or transport logic.

pub mod address;
pub mod config;
pub mod envelope;
pub mod error;
pub mod wire;

pub use address::{Address, ConnectionId, ProtocolId};
pub use envelope::{Envelope, EnvelopeContext};
pub use error::{AgoraError, AgoraResult, DecodeError};
