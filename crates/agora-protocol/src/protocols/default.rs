//! The default protocol: raw bytes, error reports and dialogue end.

use crate::codec::CustomType;
use crate::dialogue::{DialoguePolicy, DialogueRules};
use crate::message::Message;
use crate::{custom_field, define_protocol};
use agora_types::{wire, Address, DecodeError};
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fmt;

/// Why an agent refused an envelope or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCode {
    UnsupportedProtocol = 0,
    DecodingError = 1,
    InvalidMessage = 2,
    UnsupportedSkill = 3,
    InvalidDialogue = 4,
}

impl ErrorCode {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::UnsupportedProtocol),
            1 => Some(Self::DecodingError),
            2 => Some(Self::InvalidMessage),
            3 => Some(Self::UnsupportedSkill),
            4 => Some(Self::InvalidDialogue),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnsupportedProtocol => "unsupported_protocol",
            Self::DecodingError => "decoding_error",
            Self::InvalidMessage => "invalid_message",
            Self::UnsupportedSkill => "unsupported_skill",
            Self::InvalidDialogue => "invalid_dialogue",
        };
        f.write_str(s)
    }
}

impl CustomType for ErrorCode {
    const TYPE_NAME: &'static str = "ErrorCode";

    fn encode_custom(&self, buf: &mut BytesMut) {
        wire::put_varint(buf, *self as u64);
    }

    fn decode_custom(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let code = wire::get_varint(buf)?;
        Self::from_code(code).ok_or_else(|| DecodeError::Custom(format!("unknown error code {code}")))
    }
}

custom_field!(ErrorCode);

define_protocol! {
    /// `agora/default:1.0.0`.
    pub protocol DefaultProtocol {
        id: "agora/default:1.0.0",
        performative: DefaultPerformative,
        content: DefaultContent,
        messages {
            Bytes = 1 => "bytes" { content: Bytes },
            Error = 2 => "error" {
                error_code: ErrorCode,
                error_msg: String,
                error_data: BTreeMap<String, Bytes>,
            },
            End = 3 => "end" {},
        }
    }
}

pub type DefaultMessage = Message<DefaultProtocol>;

/// Both parties of a default dialogue play the same role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultRole {
    Agent,
}

/// Rules for the default protocol.
///
/// `bytes` and `error` may open a dialogue; `error` and `end` close it.
#[derive(Debug, Clone)]
pub struct DefaultDialoguePolicy {
    rules: DialogueRules<DefaultPerformative>,
}

impl DefaultDialoguePolicy {
    pub fn new() -> Self {
        Self {
            rules: DialogueRules::new(
                [DefaultPerformative::Bytes, DefaultPerformative::Error],
                [DefaultPerformative::Error, DefaultPerformative::End],
                [(
                    DefaultPerformative::Bytes,
                    vec![
                        DefaultPerformative::Bytes,
                        DefaultPerformative::Error,
                        DefaultPerformative::End,
                    ],
                )],
            ),
        }
    }
}

impl Default for DefaultDialoguePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DialoguePolicy for DefaultDialoguePolicy {
    type Protocol = DefaultProtocol;
    type Role = DefaultRole;
    type State = ();

    fn rules(&self) -> &DialogueRules<DefaultPerformative> {
        &self.rules
    }

    fn role_from_first_message(&self, _message: &DefaultMessage, _self_address: &Address) -> DefaultRole {
        DefaultRole::Agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DialogueReference;
    use crate::protocol::Protocol;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::UnsupportedProtocol as u64, 0);
        assert_eq!(ErrorCode::InvalidDialogue as u64, 4);
        assert_eq!(ErrorCode::from_code(1), Some(ErrorCode::DecodingError));
        assert_eq!(ErrorCode::from_code(5), None);
        assert_eq!(ErrorCode::InvalidMessage.to_string(), "invalid_message");
    }

    #[test]
    fn test_schema_shape() {
        let schema = DefaultProtocol::schema();
        assert_eq!(schema.performatives().len(), 3);
        let error = schema.performative_by_name("error").unwrap();
        let fields: Vec<String> = error
            .fields
            .iter()
            .map(|f| format!("{}: {}", f.name, f.field_type))
            .collect();
        assert_eq!(
            fields,
            vec![
                "error_code: ct:ErrorCode",
                "error_msg: pt:str",
                "error_data: pt:dict[pt:str, pt:bytes]",
            ]
        );
    }

    #[test]
    fn test_error_message_roundtrip() {
        let msg = DefaultMessage::from_content(
            DialogueReference::opening("abc"),
            1,
            0,
            DefaultContent::Error {
                error_code: ErrorCode::DecodingError,
                error_msg: "bad bytes".to_string(),
                error_data: BTreeMap::from([(
                    "envelope".to_string(),
                    Bytes::from_static(b"\x01\x02"),
                )]),
            },
        );
        assert!(msg.is_valid());
        assert_eq!(DefaultMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_unknown_error_code_fails_decoding() {
        let msg = DefaultMessage::from_content(
            DialogueReference::opening("abc"),
            1,
            0,
            DefaultContent::Error {
                error_code: ErrorCode::InvalidDialogue,
                error_msg: String::new(),
                error_data: BTreeMap::new(),
            },
        );
        let mut data = msg.encode().to_vec();
        // message id, target, "abc", "", performative tag, custom length, code
        let code_at = 1 + 1 + 4 + 1 + 1 + 1;
        assert_eq!(data[code_at], 4);
        data[code_at] = 9;
        assert!(matches!(
            DefaultMessage::decode(&data),
            Err(DecodeError::Custom(_))
        ));
    }
}
