//! Typed message protocols for Agora.
//!
//! A protocol is declared once with [`define_protocol!`], which produces its
//! performative enum, per-performative content type, content schema and wire
//! codec. On top of that this crate provides:
//!
//! - [`Message`], validated against the Light Protocol Rules on construction
//! - [`Dialogue`], the per-conversation state machine
//! - [`Dialogues`], the per-agent registry that decides whether a message
//!   continues a known conversation or legitimately opens a new one

pub mod codec;
pub mod consistency;
pub mod dialogue;
pub mod dialogues;
pub mod error;
pub mod macros;
pub mod message;
pub mod protocol;
pub mod protocols;
pub mod schema;

pub use codec::{CustomType, WireField};
pub use dialogue::{Dialogue, DialogueLabel, DialoguePolicy, DialogueRules, SetOnce};
pub use dialogues::{DialogueStats, Dialogues};
pub use error::{AddressError, DialogueError, ExtendError, SetOnceError, ValidationError};
pub use message::{DialogueReference, Message};
pub use protocol::{Content, Performative, Protocol};
pub use schema::{ContentSchema, FieldSpec, FieldType, PerformativeSpec};

/// Re-exports used by the generator macros.
#[doc(hidden)]
pub mod __private {
    pub use agora_types::wire;
    pub use agora_types::{DecodeError, ProtocolId};
    pub use bytes::BytesMut;
    pub use std::sync::OnceLock;
}
