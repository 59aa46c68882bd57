//! Shared error types for the Agora substrate.

use thiserror::Error;

/// Failure to decode bytes received from the wire.
///
/// Decoding errors are always recoverable: they concern a single envelope
/// or message and never the connection that carried it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended before a complete value was read.
    #[error("Truncated input: needed {needed} more byte(s)")]
    Truncated {
        /// How many bytes were still required.
        needed: usize,
    },

    /// A varint ran past 10 bytes.
    #[error("Varint overflow")]
    VarintOverflow,

    /// A string field was not valid UTF-8.
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A length prefix exceeded what the platform or buffer can hold.
    #[error("Length prefix too large: {0}")]
    LengthTooLarge(u64),

    /// A discriminant selected a variant the schema does not define.
    #[error("Unknown tag {tag} for {context}")]
    UnknownTag {
        /// What was being decoded (performative, union name, ...).
        context: &'static str,
        /// The tag that was read.
        tag: u64,
    },

    /// Bytes were left over after a complete value was decoded.
    #[error("Trailing bytes after value: {0}")]
    TrailingBytes(usize),

    /// A custom type rejected its payload.
    #[error("Invalid value: {0}")]
    Custom(String),
}

/// Top-level error type for the Agora types crate.
#[derive(Error, Debug)]
pub enum AgoraError {
    /// A protocol identifier did not match `author/name:version`.
    #[error("Invalid protocol id: {0}")]
    InvalidProtocolId(String),

    /// A connection identifier was empty or malformed.
    #[error("Invalid connection id: {0}")]
    InvalidConnectionId(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Decoding failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// An IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Result with AgoraError.
pub type AgoraResult<T> = Result<T, AgoraError>;
