//! Agent addresses, protocol identifiers and connection identifiers.

use crate::error::AgoraError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The address of an agent on the network.
///
/// Addresses are opaque to the core; transports decide how to resolve them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create an address from any string-like value.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a connection registered with a multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl FromStr for ConnectionId {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(AgoraError::InvalidConnectionId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

/// Versioned protocol identifier of the form `author/name:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolId {
    author: String,
    name: String,
    version: String,
}

impl ProtocolId {
    /// Build an identifier from its parts, validating each one.
    pub fn new(
        author: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, AgoraError> {
        let id = Self {
            author: author.into(),
            name: name.into(),
            version: version.into(),
        };
        id.validate()?;
        Ok(id)
    }

    /// Parse an identifier embedded in source code.
    ///
    /// Panics if the literal is malformed; only use this with string literals.
    pub fn from_static(s: &'static str) -> Self {
        s.parse()
            .unwrap_or_else(|e| panic!("invalid protocol id literal '{s}': {e}"))
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn validate(&self) -> Result<(), AgoraError> {
        let part_ok = |p: &str| {
            !p.is_empty()
                && p.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        let version_ok = !self.version.is_empty()
            && self
                .version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '+');
        if part_ok(&self.author) && part_ok(&self.name) && version_ok {
            Ok(())
        } else {
            Err(AgoraError::InvalidProtocolId(self.to_string()))
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.author, self.name, self.version)
    }
}

impl FromStr for ProtocolId {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AgoraError::InvalidProtocolId(s.to_string());
        let (author, rest) = s.split_once('/').ok_or_else(invalid)?;
        let (name, version) = rest.split_once(':').ok_or_else(invalid)?;
        Self::new(author, name, version).map_err(|_| invalid())
    }
}

impl TryFrom<String> for ProtocolId {
    type Error = AgoraError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProtocolId> for String {
    fn from(id: ProtocolId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_id_parse_and_display() {
        let id: ProtocolId = "agora/default:1.0.0".parse().unwrap();
        assert_eq!(id.author(), "agora");
        assert_eq!(id.name(), "default");
        assert_eq!(id.version(), "1.0.0");
        assert_eq!(id.to_string(), "agora/default:1.0.0");
    }

    #[test]
    fn test_protocol_id_rejects_malformed() {
        assert!("agora".parse::<ProtocolId>().is_err());
        assert!("agora/default".parse::<ProtocolId>().is_err());
        assert!("/default:1.0.0".parse::<ProtocolId>().is_err());
        assert!("agora/de fault:1.0.0".parse::<ProtocolId>().is_err());
        assert!("agora/default:".parse::<ProtocolId>().is_err());
    }

    #[test]
    fn test_protocol_id_serde_as_string() {
        let id = ProtocolId::from_static("fetch/fipa:0.4.0");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"fetch/fipa:0.4.0\"");
        let back: ProtocolId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ProtocolId>("\"nope\"").is_err());
    }

    #[test]
    fn test_connection_id_rejects_blank() {
        assert!("  ".parse::<ConnectionId>().is_err());
        assert_eq!("local".parse::<ConnectionId>().unwrap().as_str(), "local");
    }

    #[test]
    fn test_address_display() {
        let a = Address::from("agent_a");
        assert_eq!(a.to_string(), "agent_a");
        assert!(!a.is_empty());
        assert!(Address::new("").is_empty());
    }
}
