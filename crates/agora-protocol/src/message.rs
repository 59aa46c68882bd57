//! Protocol messages and their binary form.

use crate::consistency;
use crate::error::{AddressError, ValidationError};
use crate::protocol::{Content, Performative, Protocol};
use agora_types::{wire, Address, DecodeError};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// The `(starter, responder)` token pair identifying a dialogue.
///
/// The responder half is empty until the counterparty assigns it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DialogueReference {
    pub starter: String,
    pub responder: String,
}

impl DialogueReference {
    pub fn new(starter: impl Into<String>, responder: impl Into<String>) -> Self {
        Self {
            starter: starter.into(),
            responder: responder.into(),
        }
    }

    /// A reference with only the starter half assigned.
    pub fn opening(starter: impl Into<String>) -> Self {
        Self::new(starter, String::new())
    }

    pub fn is_complete(&self) -> bool {
        !self.starter.is_empty() && !self.responder.is_empty()
    }
}

impl fmt::Display for DialogueReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.starter, self.responder)
    }
}

/// One message of protocol `P`.
///
/// Construction never fails: a message that breaks a Light Protocol Rule is
/// built, flagged invalid and logged. Check [`Message::is_valid`] before
/// dispatching it.
///
/// `to` and `sender` start unassigned and can each be assigned once.
#[derive(Debug, Clone)]
pub struct Message<P: Protocol> {
    dialogue_reference: DialogueReference,
    message_id: i64,
    target: i64,
    performative: P::Performative,
    content: P::Content,
    to: Option<Address>,
    sender: Option<Address>,
    validity: Result<(), ValidationError>,
}

impl<P: Protocol> Message<P> {
    pub fn new(
        dialogue_reference: DialogueReference,
        message_id: i64,
        target: i64,
        performative: P::Performative,
        content: P::Content,
    ) -> Self {
        let validity = consistency::check_parts::<P>(message_id, target, performative, &content);
        if let Err(ref e) = validity {
            warn!(
                protocol = %P::protocol_id(),
                performative = %performative,
                message_id,
                target,
                error = %e,
                "Constructed invalid message"
            );
        }
        Self {
            dialogue_reference,
            message_id,
            target,
            performative,
            content,
            to: None,
            sender: None,
            validity,
        }
    }

    /// Build a message whose performative is taken from its content.
    pub fn from_content(
        dialogue_reference: DialogueReference,
        message_id: i64,
        target: i64,
        content: P::Content,
    ) -> Self {
        let performative = content.performative();
        Self::new(dialogue_reference, message_id, target, performative, content)
    }

    pub fn dialogue_reference(&self) -> &DialogueReference {
        &self.dialogue_reference
    }

    pub fn message_id(&self) -> i64 {
        self.message_id
    }

    pub fn target(&self) -> i64 {
        self.target
    }

    pub fn performative(&self) -> P::Performative {
        self.performative
    }

    pub fn content(&self) -> &P::Content {
        &self.content
    }

    pub fn into_content(self) -> P::Content {
        self.content
    }

    pub fn is_valid(&self) -> bool {
        self.validity.is_ok()
    }

    pub fn validation_error(&self) -> Option<&ValidationError> {
        self.validity.as_ref().err()
    }

    pub fn to(&self) -> Option<&Address> {
        self.to.as_ref()
    }

    pub fn sender(&self) -> Option<&Address> {
        self.sender.as_ref()
    }

    pub fn set_to(&mut self, to: Address) -> Result<(), AddressError> {
        if self.to.is_some() {
            return Err(AddressError { field: "to" });
        }
        self.to = Some(to);
        Ok(())
    }

    pub fn set_sender(&mut self, sender: Address) -> Result<(), AddressError> {
        if self.sender.is_some() {
            return Err(AddressError { field: "sender" });
        }
        self.sender = Some(sender);
        Ok(())
    }

    /// Assign both addresses of a freshly built message.
    pub(crate) fn addressed(mut self, sender: Address, to: Address) -> Self {
        self.sender = Some(sender);
        self.to = Some(to);
        self
    }

    /// Encode to the per-protocol binary form.
    ///
    /// Addresses are not part of the encoding; they travel in the envelope.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        wire::put_i64(&mut buf, self.message_id);
        wire::put_i64(&mut buf, self.target);
        wire::put_str(&mut buf, &self.dialogue_reference.starter);
        wire::put_str(&mut buf, &self.dialogue_reference.responder);
        wire::put_varint(&mut buf, self.performative.tag());
        self.content.encode_body(&mut buf);
        buf.freeze()
    }

    /// Decode bytes produced by [`Message::encode`].
    ///
    /// Malformed input is a [`DecodeError`]. Well-formed input that breaks a
    /// Light Protocol Rule decodes into an invalid message.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = data;
        let message_id = wire::get_i64(&mut buf)?;
        let target = wire::get_i64(&mut buf)?;
        let starter = wire::get_str(&mut buf)?;
        let responder = wire::get_str(&mut buf)?;
        let tag = wire::get_varint(&mut buf)?;
        let performative = P::Performative::from_tag(tag).ok_or(DecodeError::UnknownTag {
            context: "performative",
            tag,
        })?;
        let content = P::Content::decode_body(performative, &mut buf)?;
        wire::ensure_empty(buf)?;
        Ok(Self::new(
            DialogueReference::new(starter, responder),
            message_id,
            target,
            performative,
            content,
        ))
    }
}

impl<P: Protocol> PartialEq for Message<P> {
    fn eq(&self, other: &Self) -> bool {
        self.dialogue_reference == other.dialogue_reference
            && self.message_id == other.message_id
            && self.target == other.target
            && self.performative == other.performative
            && self.content == other.content
    }
}

impl<P: Protocol> fmt::Display for Message<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} #{}->{} {}",
            P::protocol_id(),
            self.dialogue_reference,
            self.message_id,
            self.target,
            self.performative
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::default::{DefaultContent, DefaultMessage};

    fn bytes_message(id: i64, target: i64) -> DefaultMessage {
        Message::from_content(
            DialogueReference::new("abc", "def"),
            id,
            target,
            DefaultContent::Bytes {
                content: Bytes::from_static(b"hello"),
            },
        )
    }

    #[test]
    fn test_addresses_set_once() {
        let mut msg = bytes_message(1, 0);
        assert!(msg.to().is_none());
        msg.set_to(Address::from("bob")).unwrap();
        assert_eq!(
            msg.set_to(Address::from("eve")),
            Err(AddressError { field: "to" })
        );
        assert_eq!(msg.to().map(|a| a.as_str()), Some("bob"));

        msg.set_sender(Address::from("alice")).unwrap();
        assert!(msg.set_sender(Address::from("alice")).is_err());
    }

    #[test]
    fn test_equality_ignores_addresses() {
        let a = bytes_message(2, 1);
        let mut b = bytes_message(2, 1);
        b.set_sender(Address::from("alice")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, bytes_message(3, 2));
    }

    #[test]
    fn test_decode_keeps_invalid_message() {
        let msg = bytes_message(5, 5);
        assert!(!msg.is_valid());
        let decoded = DefaultMessage::decode(&msg.encode()).unwrap();
        assert!(!decoded.is_valid());
        assert_eq!(
            decoded.validation_error(),
            Some(&ValidationError::TargetOutOfRange {
                message_id: 5,
                target: 5
            })
        );
    }

    #[test]
    fn test_decode_unknown_performative() {
        let mut buf = BytesMut::new();
        wire::put_i64(&mut buf, 1);
        wire::put_i64(&mut buf, 0);
        wire::put_str(&mut buf, "abc");
        wire::put_str(&mut buf, "");
        wire::put_varint(&mut buf, 99);
        assert_eq!(
            DefaultMessage::decode(&buf).unwrap_err(),
            DecodeError::UnknownTag {
                context: "performative",
                tag: 99
            }
        );
    }

    #[test]
    fn test_display() {
        let msg = bytes_message(1, 0);
        assert_eq!(msg.to_string(), "agora/default:1.0.0 (abc, def) #1->0 bytes");
    }
}
