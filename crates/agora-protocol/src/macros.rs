//! Generators that turn one protocol declaration into its performative enum,
//! content type, schema and codec.
//!
//! The schema is derived from the same field list that defines the content
//! variants, so the declared schema and the Rust types cannot disagree.

/// Declare a protocol.
///
/// ```ignore
/// define_protocol! {
///     /// Plain byte exchange.
///     pub protocol EchoProtocol {
///         id: "agora/echo:1.0.0",
///         performative: EchoPerformative,
///         content: EchoContent,
///         messages {
///             Ping = 1 => "ping" { payload: Bytes },
///             Pong = 2 => "pong" { payload: Bytes, note: Option<String> },
///         }
///     }
/// }
/// ```
///
/// Tags are the wire discriminants of the performatives and must be unique.
/// Fields are encoded in the order they are declared.
#[macro_export]
macro_rules! define_protocol {
    (
        $(#[$meta:meta])*
        $vis:vis protocol $name:ident {
            id: $id:literal,
            performative: $perf:ident,
            content: $content:ident,
            messages {
                $(
                    $(#[$vmeta:meta])*
                    $variant:ident = $tag:literal => $pname:literal {
                        $($field:ident : $fty:ty),* $(,)?
                    }
                ),+ $(,)?
            }
        }
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis enum $perf {
            $($variant),+
        }

        impl $crate::Performative for $perf {
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            fn tag(self) -> u64 {
                match self {
                    $(Self::$variant => $tag),+
                }
            }

            fn from_tag(tag: u64) -> Option<Self> {
                match tag {
                    $($tag => Some(Self::$variant),)+
                    _ => None,
                }
            }

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $pname),+
                }
            }
        }

        impl ::std::fmt::Display for $perf {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::Performative::name(*self))
            }
        }

        #[derive(Debug, Clone, PartialEq)]
        $vis enum $content {
            $(
                $(#[$vmeta])*
                $variant { $($field: $fty),* }
            ),+
        }

        impl $crate::Content for $content {
            type Performative = $perf;

            fn performative(&self) -> $perf {
                match self {
                    $(Self::$variant { .. } => $perf::$variant),+
                }
            }

            #[allow(unused_mut, unused_variables)]
            fn fields(&self) -> Vec<(&'static str, $crate::FieldType)> {
                let mut present = Vec::new();
                match self {
                    $(
                        Self::$variant { $($field),* } => {
                            $(
                                if $crate::WireField::is_present($field) {
                                    present.push((
                                        stringify!($field),
                                        <$fty as $crate::WireField>::field_type(),
                                    ));
                                }
                            )*
                        }
                    )+
                }
                present
            }

            #[allow(unused_variables)]
            fn encode_body(&self, buf: &mut $crate::__private::BytesMut) {
                match self {
                    $(
                        Self::$variant { $($field),* } => {
                            $($crate::WireField::encode_field($field, buf);)*
                        }
                    )+
                }
            }

            #[allow(unused_variables)]
            fn decode_body(
                performative: $perf,
                buf: &mut &[u8],
            ) -> Result<Self, $crate::__private::DecodeError> {
                match performative {
                    $(
                        $perf::$variant => {
                            $(let $field = <$fty as $crate::WireField>::decode_field(buf)?;)*
                            Ok(Self::$variant { $($field),* })
                        }
                    )+
                }
            }
        }

        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        $vis struct $name;

        impl $crate::Protocol for $name {
            type Performative = $perf;
            type Content = $content;

            fn protocol_id() -> &'static $crate::__private::ProtocolId {
                static ID: $crate::__private::OnceLock<$crate::__private::ProtocolId> =
                    $crate::__private::OnceLock::new();
                ID.get_or_init(|| $crate::__private::ProtocolId::from_static($id))
            }

            fn schema() -> &'static $crate::ContentSchema {
                static SCHEMA: $crate::__private::OnceLock<$crate::ContentSchema> =
                    $crate::__private::OnceLock::new();
                SCHEMA.get_or_init(|| {
                    $crate::ContentSchema::new(
                        <Self as $crate::Protocol>::protocol_id().clone(),
                        vec![$(
                            $crate::PerformativeSpec {
                                name: $pname,
                                tag: $tag,
                                fields: vec![$(
                                    $crate::FieldSpec {
                                        name: stringify!($field),
                                        field_type: <$fty as $crate::WireField>::field_type(),
                                    }
                                ),*],
                            }
                        ),+],
                    )
                })
            }
        }
    };
}

/// Declare a tagged union usable as a content field.
///
/// Each alternative carries an explicit wire tag. The decoder selects the
/// alternative by tag alone and rejects tags it does not know.
#[macro_export]
macro_rules! define_union {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $tag:literal => $variant:ident($ty:ty)
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant($ty)
            ),+
        }

        impl $crate::WireField for $name {
            fn field_type() -> $crate::FieldType {
                $crate::FieldType::Union(vec![
                    $(($tag, <$ty as $crate::WireField>::field_type())),+
                ])
            }

            fn encode_field(&self, buf: &mut $crate::__private::BytesMut) {
                match self {
                    $(
                        Self::$variant(value) => {
                            $crate::__private::wire::put_varint(buf, $tag);
                            $crate::WireField::encode_field(value, buf);
                        }
                    )+
                }
            }

            fn decode_field(buf: &mut &[u8]) -> Result<Self, $crate::__private::DecodeError> {
                match $crate::__private::wire::get_varint(buf)? {
                    $(
                        $tag => Ok(Self::$variant(
                            <$ty as $crate::WireField>::decode_field(buf)?,
                        )),
                    )+
                    other => Err($crate::__private::DecodeError::UnknownTag {
                        context: stringify!($name),
                        tag: other,
                    }),
                }
            }
        }
    };
}

/// Use a [`CustomType`](crate::CustomType) as a content field.
#[macro_export]
macro_rules! custom_field {
    ($ty:ty) => {
        impl $crate::WireField for $ty {
            fn field_type() -> $crate::FieldType {
                $crate::FieldType::Custom(<$ty as $crate::CustomType>::TYPE_NAME)
            }

            fn encode_field(&self, buf: &mut $crate::__private::BytesMut) {
                let mut payload = $crate::__private::BytesMut::new();
                $crate::CustomType::encode_custom(self, &mut payload);
                $crate::__private::wire::put_bytes(buf, &payload);
            }

            fn decode_field(buf: &mut &[u8]) -> Result<Self, $crate::__private::DecodeError> {
                let payload = $crate::__private::wire::get_bytes(buf)?;
                let mut input = &payload[..];
                let value = <$ty as $crate::CustomType>::decode_custom(&mut input)?;
                $crate::__private::wire::ensure_empty(input)?;
                Ok(value)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{Content, FieldType, Performative, Protocol, WireField};
    use bytes::{Bytes, BytesMut};

    crate::define_union! {
        enum Payload {
            1 => Words(Vec<String>),
            2 => Blobs(Vec<Bytes>),
        }
    }

    crate::define_protocol! {
        protocol EchoProtocol {
            id: "agora/echo:1.0.0",
            performative: EchoPerformative,
            content: EchoContent,
            messages {
                Ping = 1 => "ping" { payload: Payload },
                Pong = 2 => "pong" { note: Option<String>, count: i64 },
                Stop = 7 => "stop" {},
            }
        }
    }

    #[test]
    fn test_performative_tags_and_names() {
        assert_eq!(EchoPerformative::ALL.len(), 3);
        assert_eq!(EchoPerformative::Stop.tag(), 7);
        assert_eq!(EchoPerformative::from_tag(2), Some(EchoPerformative::Pong));
        assert_eq!(EchoPerformative::from_tag(3), None);
        assert_eq!(EchoPerformative::Ping.to_string(), "ping");
    }

    #[test]
    fn test_generated_schema() {
        let schema = EchoProtocol::schema();
        assert_eq!(schema.protocol_id().to_string(), "agora/echo:1.0.0");
        let pong = schema.performative(2).unwrap();
        assert_eq!(pong.name, "pong");
        assert_eq!(
            pong.field("note").unwrap().field_type,
            FieldType::Optional(Box::new(FieldType::Str))
        );
        assert!(schema.performative(7).unwrap().fields.is_empty());
        assert_eq!(
            schema.performative(1).unwrap().fields[0].field_type.to_string(),
            "pt:union[pt:list[pt:str], pt:list[pt:bytes]]"
        );
    }

    #[test]
    fn test_fields_report_present_only() {
        let content = EchoContent::Pong {
            note: None,
            count: 3,
        };
        let names: Vec<_> = content.fields().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["count"]);
        assert_eq!(content.performative(), EchoPerformative::Pong);
    }

    #[test]
    fn test_empty_union_alternatives_stay_distinct() {
        for value in [Payload::Words(vec![]), Payload::Blobs(vec![])] {
            let mut buf = BytesMut::new();
            value.encode_field(&mut buf);
            let mut input = &buf[..];
            assert_eq!(Payload::decode_field(&mut input).unwrap(), value);
        }
    }

    #[test]
    fn test_unknown_union_tag() {
        let data = [9u8, 0];
        let mut input = &data[..];
        let err = Payload::decode_field(&mut input).unwrap_err();
        assert_eq!(
            err,
            agora_types::DecodeError::UnknownTag {
                context: "Payload",
                tag: 9
            }
        );
    }

    #[test]
    fn test_body_roundtrip() {
        let content = EchoContent::Ping {
            payload: Payload::Blobs(vec![Bytes::from_static(b"x")]),
        };
        let mut buf = BytesMut::new();
        content.encode_body(&mut buf);
        let mut input = &buf[..];
        let decoded = EchoContent::decode_body(EchoPerformative::Ping, &mut input).unwrap();
        assert_eq!(decoded, content);
    }
}
