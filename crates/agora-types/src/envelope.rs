//! The transport unit moved by the multiplexer.

use crate::address::{Address, ConnectionId, ProtocolId};
use crate::error::DecodeError;
use crate::wire;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Routing hints attached to an envelope by the sending side.
///
/// Only `uri` travels on the wire. `connection_id` is a local routing
/// override consumed by the multiplexer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeContext {
    /// Send through this connection regardless of protocol routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
    /// Optional resource identifier for the receiving side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Destination, source, protocol and opaque encoded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: Address,
    pub sender: Address,
    pub protocol_id: ProtocolId,
    /// Wire-codec output for `protocol_id`.
    pub message: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EnvelopeContext>,
}

impl Envelope {
    pub fn new(
        to: Address,
        sender: Address,
        protocol_id: ProtocolId,
        message: impl Into<Bytes>,
    ) -> Self {
        Self {
            to,
            sender,
            protocol_id,
            message: message.into(),
            context: None,
        }
    }

    /// Pin this envelope to a specific connection.
    pub fn via(mut self, connection_id: ConnectionId) -> Self {
        self.context
            .get_or_insert_with(EnvelopeContext::default)
            .connection_id = Some(connection_id);
        self
    }

    /// The connection this envelope was pinned to, if any.
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.context.as_ref().and_then(|c| c.connection_id.as_ref())
    }

    /// Encode into the transport-agnostic binary form.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.message.len() + 64);
        wire::put_str(&mut buf, self.to.as_str());
        wire::put_str(&mut buf, self.sender.as_str());
        wire::put_str(&mut buf, &self.protocol_id.to_string());
        wire::put_bytes(&mut buf, &self.message);
        match self.context.as_ref().and_then(|c| c.uri.as_deref()) {
            Some(uri) => {
                buf.put_u8(1);
                wire::put_str(&mut buf, uri);
            }
            None => buf.put_u8(0),
        }
        buf.freeze()
    }

    /// Decode the binary form produced by [`Envelope::encode`].
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = data;
        let to = Address::new(wire::get_str(&mut buf)?);
        let sender = Address::new(wire::get_str(&mut buf)?);
        let protocol_id = wire::get_str(&mut buf)?
            .parse::<ProtocolId>()
            .map_err(|e| DecodeError::Custom(e.to_string()))?;
        let message = wire::get_bytes(&mut buf)?;
        let context = if wire::get_bool(&mut buf)? {
            Some(EnvelopeContext {
                connection_id: None,
                uri: Some(wire::get_str(&mut buf)?),
            })
        } else {
            None
        };
        wire::ensure_empty(buf)?;
        Ok(Self {
            to,
            sender,
            protocol_id,
            message,
            context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::new(
            Address::from("agent_b"),
            Address::from("agent_a"),
            ProtocolId::from_static("agora/default:1.0.0"),
            Bytes::from_static(b"\x02\x00payload"),
        )
    }

    #[test]
    fn test_envelope_roundtrip() {
        let env = sample();
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_envelope_uri_travels_connection_id_does_not() {
        let mut env = sample().via(ConnectionId::from("tcp"));
        env.context.as_mut().unwrap().uri = Some("agora://agent_b/inbox".to_string());
        let decoded = Envelope::decode(&env.encode()).unwrap();
        let ctx = decoded.context.unwrap();
        assert_eq!(ctx.uri.as_deref(), Some("agora://agent_b/inbox"));
        assert!(ctx.connection_id.is_none());
    }

    #[test]
    fn test_envelope_trailing_bytes_rejected() {
        let mut data = sample().encode().to_vec();
        data.push(0);
        assert_eq!(
            Envelope::decode(&data),
            Err(DecodeError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_envelope_truncated_rejected() {
        let data = sample().encode();
        let err = Envelope::decode(&data[..data.len() - 3]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_envelope_bad_protocol_id_rejected() {
        let mut buf = BytesMut::new();
        wire::put_str(&mut buf, "b");
        wire::put_str(&mut buf, "a");
        wire::put_str(&mut buf, "not-a-protocol");
        wire::put_bytes(&mut buf, b"");
        buf.put_u8(0);
        assert!(matches!(
            Envelope::decode(&buf),
            Err(DecodeError::Custom(_))
        ));
    }

    #[test]
    fn test_via_sets_connection() {
        let env = sample().via(ConnectionId::from("local"));
        assert_eq!(env.connection_id().map(|c| c.as_str()), Some("local"));
    }
}
