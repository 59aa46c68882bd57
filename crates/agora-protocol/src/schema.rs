//! Content schemas: the declared performatives of a protocol and the typed
//! fields each one carries.

use agora_types::ProtocolId;
use std::fmt;

/// Type of a single content field, rendered in `pt:`/`ct:` notation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Bytes,
    Str,
    /// A pluggable type with its own encoding, identified by name.
    Custom(&'static str),
    /// May be absent entirely.
    Optional(Box<FieldType>),
    Set(Box<FieldType>),
    List(Box<FieldType>),
    Map(Box<FieldType>, Box<FieldType>),
    /// Tagged alternatives, as `(wire tag, type)`.
    Union(Vec<(u64, FieldType)>),
}

impl FieldType {
    pub fn is_optional(&self) -> bool {
        matches!(self, FieldType::Optional(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Bool => f.write_str("pt:bool"),
            FieldType::Int => f.write_str("pt:int"),
            FieldType::Float => f.write_str("pt:float"),
            FieldType::Bytes => f.write_str("pt:bytes"),
            FieldType::Str => f.write_str("pt:str"),
            FieldType::Custom(name) => write!(f, "ct:{name}"),
            FieldType::Optional(inner) => write!(f, "pt:optional[{inner}]"),
            FieldType::Set(inner) => write!(f, "pt:set[{inner}]"),
            FieldType::List(inner) => write!(f, "pt:list[{inner}]"),
            FieldType::Map(k, v) => write!(f, "pt:dict[{k}, {v}]"),
            FieldType::Union(alternatives) => {
                f.write_str("pt:union[")?;
                for (i, (_, ty)) in alternatives.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{ty}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
}

/// One performative and its ordered content fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformativeSpec {
    pub name: &'static str,
    pub tag: u64,
    pub fields: Vec<FieldSpec>,
}

impl PerformativeSpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields that must be present on every message of this performative.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| !f.field_type.is_optional())
    }
}

/// The full content schema of one protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSchema {
    protocol_id: ProtocolId,
    performatives: Vec<PerformativeSpec>,
}

impl ContentSchema {
    pub fn new(protocol_id: ProtocolId, performatives: Vec<PerformativeSpec>) -> Self {
        Self {
            protocol_id,
            performatives,
        }
    }

    pub fn protocol_id(&self) -> &ProtocolId {
        &self.protocol_id
    }

    pub fn performatives(&self) -> &[PerformativeSpec] {
        &self.performatives
    }

    pub fn performative(&self, tag: u64) -> Option<&PerformativeSpec> {
        self.performatives.iter().find(|p| p.tag == tag)
    }

    pub fn performative_by_name(&self, name: &str) -> Option<&PerformativeSpec> {
        self.performatives.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for ContentSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.protocol_id)?;
        for performative in &self.performatives {
            writeln!(f, "  {}:", performative.name)?;
            for field in &performative.fields {
                writeln!(f, "    {}: {}", field.name, field.field_type)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_notation() {
        let ty = FieldType::Map(Box::new(FieldType::Str), Box::new(FieldType::Bytes));
        assert_eq!(ty.to_string(), "pt:dict[pt:str, pt:bytes]");

        let ty = FieldType::Optional(Box::new(FieldType::List(Box::new(FieldType::Int))));
        assert_eq!(ty.to_string(), "pt:optional[pt:list[pt:int]]");
        assert!(ty.is_optional());

        let ty = FieldType::Union(vec![(1, FieldType::Custom("Query")), (2, FieldType::Str)]);
        assert_eq!(ty.to_string(), "pt:union[ct:Query, pt:str]");
    }

    #[test]
    fn test_required_fields_skip_optional() {
        let spec = PerformativeSpec {
            name: "inform",
            tag: 1,
            fields: vec![
                FieldSpec {
                    name: "info",
                    field_type: FieldType::Optional(Box::new(FieldType::Str)),
                },
                FieldSpec {
                    name: "data",
                    field_type: FieldType::Bytes,
                },
            ],
        };
        let required: Vec<_> = spec.required_fields().map(|f| f.name).collect();
        assert_eq!(required, vec!["data"]);
        assert!(spec.field("info").is_some());
        assert!(spec.field("missing").is_none());
    }
}
