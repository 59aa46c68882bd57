//! Node configuration loaded from `~/.agora/config.toml` with defaults.

use crate::address::{Address, ConnectionId, ProtocolId};
use crate::error::AgoraError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level configuration for one agent node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This agent's address.
    pub address: String,
    /// Multiplexer tuning and routing.
    pub multiplexer: MultiplexerConfig,
    /// Optional TCP transport.
    pub tcp: Option<TcpConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: "agora-node".to_string(),
            multiplexer: MultiplexerConfig::default(),
            tcp: None,
        }
    }
}

impl NodeConfig {
    pub fn address(&self) -> Address {
        Address::new(self.address.clone())
    }
}

/// Multiplexer queue sizes, timeouts and routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// Capacity of the shared inbound queue.
    pub inbox_capacity: usize,
    /// Capacity of the outbound queue drained by the send loop.
    pub outbox_capacity: usize,
    /// How long `put` may wait for outbox space before failing.
    pub put_timeout_ms: u64,
    pub connect_timeout_secs: u64,
    pub disconnect_timeout_secs: u64,
    /// Connection used when no other route matches.
    pub default_connection: Option<String>,
    /// Protocol id -> connection id.
    pub default_routing: BTreeMap<String, String>,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 1024,
            outbox_capacity: 1024,
            put_timeout_ms: 5000,
            connect_timeout_secs: 60,
            disconnect_timeout_secs: 60,
            default_connection: None,
            default_routing: BTreeMap::new(),
        }
    }
}

impl MultiplexerConfig {
    pub fn put_timeout(&self) -> Duration {
        Duration::from_millis(self.put_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }

    /// Parse the routing table into typed identifiers.
    pub fn resolve_routing(&self) -> Result<BTreeMap<ProtocolId, ConnectionId>, AgoraError> {
        self.default_routing
            .iter()
            .map(|(protocol, connection)| {
                let protocol = protocol.parse::<ProtocolId>()?;
                let connection = connection.parse::<ConnectionId>()?;
                Ok((protocol, connection))
            })
            .collect()
    }

    pub fn resolve_default_connection(&self) -> Result<Option<ConnectionId>, AgoraError> {
        self.default_connection
            .as_deref()
            .map(str::parse::<ConnectionId>)
            .transpose()
    }
}

/// Which side of a TCP link this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpMode {
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConfig {
    pub mode: TcpMode,
    /// Listen address (server) or remote address (client).
    pub address: SocketAddr,
}

/// Load node configuration from a TOML file, with defaults.
pub fn load_config(path: Option<&Path>) -> NodeConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<NodeConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    NodeConfig::default()
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    agora_home().join("config.toml")
}

/// Get the default Agora home directory.
pub fn agora_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".agora")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/agora/config.toml")));
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.multiplexer.inbox_capacity, 1024);
        assert_eq!(config.multiplexer.connect_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_config_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
address = "agent_a"

[multiplexer]
put_timeout_ms = 250
default_connection = "local"

[multiplexer.default_routing]
"agora/default:1.0.0" = "tcp"

[tcp]
mode = "client"
address = "127.0.0.1:9400"
"#
        )
        .unwrap();

        let config = load_config(Some(file.path()));
        assert_eq!(config.address().as_str(), "agent_a");
        assert_eq!(config.multiplexer.put_timeout(), Duration::from_millis(250));
        assert_eq!(config.multiplexer.outbox_capacity, 1024);
        let tcp = config.tcp.unwrap();
        assert_eq!(tcp.mode, TcpMode::Client);
        assert_eq!(tcp.address.port(), 9400);

        let routing = config.multiplexer.resolve_routing().unwrap();
        let id = ProtocolId::from_static("agora/default:1.0.0");
        assert_eq!(routing.get(&id).map(|c| c.as_str()), Some("tcp"));
        assert_eq!(
            config
                .multiplexer
                .resolve_default_connection()
                .unwrap()
                .map(|c| c.to_string()),
            Some("local".to_string())
        );
    }

    #[test]
    fn test_load_config_invalid_toml_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is = = not toml").unwrap();
        assert_eq!(load_config(Some(file.path())), NodeConfig::default());
    }

    #[test]
    fn test_resolve_routing_rejects_bad_protocol() {
        let mut config = MultiplexerConfig::default();
        config
            .default_routing
            .insert("bogus".to_string(), "local".to_string());
        assert!(matches!(
            config.resolve_routing(),
            Err(AgoraError::InvalidProtocolId(_))
        ));
    }
}
