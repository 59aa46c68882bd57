//! The traits every generated protocol implements.

use crate::schema::{ContentSchema, FieldType};
use agora_types::{DecodeError, ProtocolId};
use bytes::BytesMut;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// The enumerated message kinds of one protocol.
pub trait Performative:
    Copy + Eq + Hash + Ord + Debug + Display + Send + Sync + 'static
{
    /// Every performative, in declaration order.
    const ALL: &'static [Self];

    /// Stable wire discriminant.
    fn tag(self) -> u64;

    fn from_tag(tag: u64) -> Option<Self>;

    fn name(self) -> &'static str;
}

/// The per-performative content of a message.
pub trait Content: Clone + Debug + PartialEq + Send + Sync + 'static {
    type Performative: Performative;

    /// The performative this content belongs to.
    fn performative(&self) -> Self::Performative;

    /// Name and declared type of every field actually present.
    fn fields(&self) -> Vec<(&'static str, FieldType)>;

    /// Encode the fields in declaration order.
    fn encode_body(&self, buf: &mut BytesMut);

    fn decode_body(
        performative: Self::Performative,
        buf: &mut &[u8],
    ) -> Result<Self, DecodeError>;
}

/// A versioned protocol: one identifier, one performative set, one schema.
pub trait Protocol: Debug + Clone + Send + Sync + 'static {
    type Performative: Performative;
    type Content: Content<Performative = Self::Performative>;

    fn protocol_id() -> &'static ProtocolId;

    fn schema() -> &'static ContentSchema;
}
