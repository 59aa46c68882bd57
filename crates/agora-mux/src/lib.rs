//! Multiplexer and transports for Agora agents.
//!
//! A [`Multiplexer`] owns any number of [`Connection`]s and presents them as
//! one inbound and one outbound stream of envelopes. [`ProtocolEndpoint`]
//! sits on top of it for one protocol: it encodes and decodes at the
//! boundary and serializes access to the dialogue registry.

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod local;
pub mod multiplexer;
pub mod reporter;
pub mod tcp;

pub use connection::{Connection, ConnectionState, EnvelopeStream, StateCell};
pub use endpoint::{ProtocolEndpoint, Received};
pub use error::{ConnectionError, EndpointError, MuxError};
pub use local::{LocalConnection, LocalNode};
pub use multiplexer::Multiplexer;
pub use reporter::ErrorReporter;
pub use tcp::TcpConnection;
