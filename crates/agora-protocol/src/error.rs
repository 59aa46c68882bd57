//! Error types for messages, dialogues and the dialogue registry.

use crate::dialogue::DialogueLabel;
use thiserror::Error;

/// A Light Protocol Rule violation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The performative is not declared by the protocol schema.
    #[error("Performative '{0}' is not declared by the protocol")]
    UnknownPerformative(String),

    /// The message performative and its content disagree.
    #[error("Performative '{declared}' does not match content of '{content}'")]
    PerformativeMismatch { declared: String, content: String },

    #[error("Performative '{performative}' is missing field '{field}'")]
    MissingField {
        performative: String,
        field: String,
    },

    #[error("Performative '{performative}' does not declare field '{field}'")]
    UnexpectedField {
        performative: String,
        field: String,
    },

    #[error("Field '{field}' of '{performative}' should be {expected}, got {actual}")]
    WrongFieldType {
        performative: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Field '{field}' of '{performative}' appears more than once")]
    DuplicateField {
        performative: String,
        field: String,
    },

    /// Message id 1 must not reference anything.
    #[error("Opening message must have target 0, got {target}")]
    OpeningTarget { target: i64 },

    /// A non-opening message must reference a strictly earlier message.
    #[error("Message {message_id} must have target in 1..{message_id}, got {target}")]
    TargetOutOfRange { message_id: i64, target: i64 },
}

/// Reasons a dialogue refuses to append a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtendError {
    #[error("Invalid message: {0}")]
    Invalid(#[from] ValidationError),

    /// `sender` or `to` was never assigned.
    #[error("Message has no {0} address")]
    MissingAddress(&'static str),

    /// The message is not between this dialogue's two parties.
    #[error("Message from '{sender}' to '{to}' is not part of this dialogue")]
    WrongParty { sender: String, to: String },

    /// The dialogue reference does not match the label.
    #[error("Dialogue reference ({starter}, {responder}) does not match this dialogue")]
    ReferenceMismatch { starter: String, responder: String },

    /// An empty dialogue must start with message 1 targeting 0.
    #[error("Dialogue must open with message 1 targeting 0, got {message_id} -> {target}")]
    NotOpening { message_id: i64, target: i64 },

    #[error("Performative '{0}' cannot open a dialogue")]
    InvalidInitialPerformative(String),

    #[error("Expected message id {expected}, got {actual}")]
    OutOfSequence { expected: i64, actual: i64 },

    /// The target does not point at the latest message of the dialogue.
    #[error("Expected target {expected}, got {actual}")]
    TargetMismatch { expected: i64, actual: i64 },

    #[error("Performative '{reply}' is not a valid reply to '{target}'")]
    InvalidReply { target: String, reply: String },

    /// The last message was terminal.
    #[error("Dialogue already terminated")]
    Terminated,

    /// `reply` was called before anything was sent or received.
    #[error("Cannot reply in an empty dialogue")]
    Empty,

    /// Rejected by the protocol-specific policy.
    #[error("Rejected by protocol policy: {0}")]
    Policy(String),
}

/// Errors from the dialogue registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialogueError {
    /// The message matches no dialogue and is not a legal opener.
    #[error("Unidentified dialogue for reference ({starter}, {responder})")]
    Unidentified { starter: String, responder: String },

    /// The matching dialogue refused the message.
    #[error("Dialogue {label} rejected message: {source}")]
    Rejected {
        label: DialogueLabel,
        #[source]
        source: ExtendError,
    },

    #[error("Invalid message: {0}")]
    Invalid(#[from] ValidationError),

    /// A freshly allocated starter reference is already in use.
    #[error("Starter reference '{0}' is already in use")]
    DuplicateReference(String),

    #[error("No dialogue with label {0}")]
    UnknownDialogue(DialogueLabel),

    #[error("Message has no {0} address")]
    MissingAddress(&'static str),

    /// The message involves neither side as this agent.
    #[error("Message from '{sender}' to '{to}' does not involve '{agent}'")]
    Misaddressed {
        sender: String,
        to: String,
        agent: String,
    },
}

/// Misuse of a set-once field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetOnceError {
    #[error("'{0}' is not set")]
    NotSet(&'static str),

    #[error("'{0}' is already set")]
    AlreadySet(&'static str),
}

/// A dialogue label string that is not `starter_responder_opponent_starter`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid dialogue label: {0}")]
pub struct LabelParseError(pub String);

/// Attempt to reassign a message address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Message '{field}' address is already assigned")]
pub struct AddressError {
    pub field: &'static str,
}
