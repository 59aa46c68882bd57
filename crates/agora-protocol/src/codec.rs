//! Per-type wire strategies for content fields.
//!
//! Every content field type implements [`WireField`]. Primitives map directly
//! onto the wire primitives, optional values carry a presence byte, and
//! collections are a varint count followed by their entries. Unions and
//! custom types are generated by [`define_union!`](crate::define_union) and
//! [`custom_field!`](crate::custom_field).

use crate::schema::FieldType;
use agora_types::wire;
use agora_types::DecodeError;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// A value that can appear as a content field.
pub trait WireField: Sized {
    /// The declared schema type.
    fn field_type() -> FieldType;

    fn encode_field(&self, buf: &mut BytesMut);

    fn decode_field(buf: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Whether the field counts as present. Only absent optionals return false.
    fn is_present(&self) -> bool {
        true
    }
}

/// A protocol-specific type that supplies its own encoding.
///
/// Register it as a content field with [`custom_field!`](crate::custom_field).
/// On the wire the custom payload is length-prefixed, so a custom decoder
/// that under-reads is detected.
pub trait CustomType: Sized + Clone + Debug + PartialEq {
    /// Name used in the schema notation (`ct:<TYPE_NAME>`).
    const TYPE_NAME: &'static str;

    fn encode_custom(&self, buf: &mut BytesMut);

    fn decode_custom(buf: &mut &[u8]) -> Result<Self, DecodeError>;
}

impl WireField for bool {
    fn field_type() -> FieldType {
        FieldType::Bool
    }

    fn encode_field(&self, buf: &mut BytesMut) {
        wire::put_bool(buf, *self);
    }

    fn decode_field(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        wire::get_bool(buf)
    }
}

impl WireField for i64 {
    fn field_type() -> FieldType {
        FieldType::Int
    }

    fn encode_field(&self, buf: &mut BytesMut) {
        wire::put_i64(buf, *self);
    }

    fn decode_field(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        wire::get_i64(buf)
    }
}

impl WireField for f64 {
    fn field_type() -> FieldType {
        FieldType::Float
    }

    fn encode_field(&self, buf: &mut BytesMut) {
        wire::put_f64(buf, *self);
    }

    fn decode_field(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        wire::get_f64(buf)
    }
}

impl WireField for String {
    fn field_type() -> FieldType {
        FieldType::Str
    }

    fn encode_field(&self, buf: &mut BytesMut) {
        wire::put_str(buf, self);
    }

    fn decode_field(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        wire::get_str(buf)
    }
}

impl WireField for Bytes {
    fn field_type() -> FieldType {
        FieldType::Bytes
    }

    fn encode_field(&self, buf: &mut BytesMut) {
        wire::put_bytes(buf, self);
    }

    fn decode_field(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        wire::get_bytes(buf)
    }
}

impl<T: WireField> WireField for Option<T> {
    fn field_type() -> FieldType {
        FieldType::Optional(Box::new(T::field_type()))
    }

    fn encode_field(&self, buf: &mut BytesMut) {
        match self {
            Some(value) => {
                wire::put_bool(buf, true);
                value.encode_field(buf);
            }
            None => wire::put_bool(buf, false),
        }
    }

    fn decode_field(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        if wire::get_bool(buf)? {
            T::decode_field(buf).map(Some)
        } else {
            Ok(None)
        }
    }

    fn is_present(&self) -> bool {
        self.is_some()
    }
}

impl<T: WireField> WireField for Vec<T> {
    fn field_type() -> FieldType {
        FieldType::List(Box::new(T::field_type()))
    }

    fn encode_field(&self, buf: &mut BytesMut) {
        wire::put_varint(buf, self.len() as u64);
        for item in self {
            item.encode_field(buf);
        }
    }

    fn decode_field(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let count = wire::get_count(buf)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode_field(buf)?);
        }
        Ok(items)
    }
}

impl<T: WireField + Ord> WireField for BTreeSet<T> {
    fn field_type() -> FieldType {
        FieldType::Set(Box::new(T::field_type()))
    }

    fn encode_field(&self, buf: &mut BytesMut) {
        wire::put_varint(buf, self.len() as u64);
        for item in self {
            item.encode_field(buf);
        }
    }

    fn decode_field(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let count = wire::get_count(buf)?;
        let mut items = BTreeSet::new();
        for _ in 0..count {
            if !items.insert(T::decode_field(buf)?) {
                return Err(DecodeError::Custom("duplicate set element".to_string()));
            }
        }
        Ok(items)
    }
}

impl<K: WireField + Ord, V: WireField> WireField for BTreeMap<K, V> {
    fn field_type() -> FieldType {
        FieldType::Map(Box::new(K::field_type()), Box::new(V::field_type()))
    }

    fn encode_field(&self, buf: &mut BytesMut) {
        wire::put_varint(buf, self.len() as u64);
        for (key, value) in self {
            key.encode_field(buf);
            value.encode_field(buf);
        }
    }

    fn decode_field(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let count = wire::get_count(buf)?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = K::decode_field(buf)?;
            let value = V::decode_field(buf)?;
            if entries.insert(key, value).is_some() {
                return Err(DecodeError::Custom("duplicate map key".to_string()));
            }
        }
        Ok(entries)
    }
}
