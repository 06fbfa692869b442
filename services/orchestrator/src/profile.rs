//! Proxy profiles and their protocol payloads.
//!
//! A profile is immutable once it has been resolved into a topology. The
//! orchestrator only reads the handful of fields it needs to pick a backend
//! and build argument lists; everything else is the config builder's business.

use std::fmt;

use hopchain_id::ProfileId;
use serde::{Deserialize, Serialize};

/// A user-defined outbound proxy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyProfile {
    pub id: ProfileId,

    #[serde(default)]
    pub name: String,

    pub protocol: ProtocolConfig,
}

impl ProxyProfile {
    pub fn new(protocol: ProtocolConfig) -> Self {
        Self {
            id: ProfileId::new(),
            name: String::new(),
            protocol,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind(&self) -> ProtocolKind {
        self.protocol.kind()
    }
}

/// Server address shared by most protocol payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub server_address: String,
    pub server_port: u16,
}

impl ServerEndpoint {
    pub fn new(server_address: impl Into<String>, server_port: u16) -> Self {
        Self {
            server_address: server_address.into(),
            server_port,
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.server_address.contains(':') && !self.server_address.starts_with('[') {
            format!("[{}]:{}", self.server_address, self.server_port)
        } else {
            format!("{}:{}", self.server_address, self.server_port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocksConfig {
    #[serde(flatten)]
    pub server: ServerEndpoint,

    /// 4, 4 (for 4a) or 5.
    #[serde(default = "default_socks_version")]
    pub version: u8,
}

fn default_socks_version() -> u8 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingTunnelConfig {
    /// ICMP tunnel server; no port.
    pub server_address: String,

    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrookConfig {
    #[serde(flatten)]
    pub server: ServerEndpoint,

    /// `""` (plain), `"ws"` or `"wss"`.
    #[serde(default)]
    pub protocol: String,

    #[serde(default)]
    pub ws_path: String,

    #[serde(default)]
    pub password: String,
}

impl BrookConfig {
    /// Server argument passed to the brook client.
    pub fn server_uri(&self) -> String {
        let authority = self.server.authority();
        let scheme = match self.protocol.as_str() {
            "ws" => "ws",
            "wss" => "wss",
            _ => return authority,
        };

        let path = self.ws_path.trim();
        if path.is_empty() {
            format!("{scheme}://{authority}")
        } else if path.starts_with('/') {
            format!("{scheme}://{authority}{path}")
        } else {
            format!("{scheme}://{authority}/{path}")
        }
    }
}

/// A raw configuration for another engine, tagged with that engine's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomConfig {
    /// Engine name, e.g. `"trojan-go"`.
    pub engine: String,
    pub content: String,
}

/// Protocol-typed payload; exactly one variant per profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolConfig {
    Vmess(ServerEndpoint),
    Vless(ServerEndpoint),
    Http(ServerEndpoint),
    Socks(SocksConfig),
    Shadowsocks(ServerEndpoint),
    #[serde(rename = "shadowsocksr")]
    ShadowsocksR(ServerEndpoint),
    Snell(ServerEndpoint),
    Trojan(ServerEndpoint),
    #[serde(rename = "trojan-go")]
    TrojanGo(ServerEndpoint),
    Naive(ServerEndpoint),
    #[serde(rename = "pingtunnel")]
    PingTunnel(PingTunnelConfig),
    #[serde(rename = "relaybaton")]
    RelayBaton(ServerEndpoint),
    Brook(BrookConfig),
    Hysteria(ServerEndpoint),
    Custom(CustomConfig),
    /// Any tag this build does not know about.
    #[serde(other)]
    Unknown,
}

impl ProtocolConfig {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            ProtocolConfig::Vmess(_) => ProtocolKind::Vmess,
            ProtocolConfig::Vless(_) => ProtocolKind::Vless,
            ProtocolConfig::Http(_) => ProtocolKind::Http,
            ProtocolConfig::Socks(_) => ProtocolKind::Socks,
            ProtocolConfig::Shadowsocks(_) => ProtocolKind::Shadowsocks,
            ProtocolConfig::ShadowsocksR(_) => ProtocolKind::ShadowsocksR,
            ProtocolConfig::Snell(_) => ProtocolKind::Snell,
            ProtocolConfig::Trojan(_) => ProtocolKind::Trojan,
            ProtocolConfig::TrojanGo(_) => ProtocolKind::TrojanGo,
            ProtocolConfig::Naive(_) => ProtocolKind::Naive,
            ProtocolConfig::PingTunnel(_) => ProtocolKind::PingTunnel,
            ProtocolConfig::RelayBaton(_) => ProtocolKind::RelayBaton,
            ProtocolConfig::Brook(_) => ProtocolKind::Brook,
            ProtocolConfig::Hysteria(_) => ProtocolKind::Hysteria,
            ProtocolConfig::Custom(_) => ProtocolKind::Custom,
            ProtocolConfig::Unknown => ProtocolKind::Unknown,
        }
    }
}

/// Protocol discriminant used for backend dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    Vmess,
    Vless,
    Http,
    Socks,
    Shadowsocks,
    ShadowsocksR,
    Snell,
    Trojan,
    TrojanGo,
    Naive,
    PingTunnel,
    RelayBaton,
    Brook,
    Hysteria,
    Custom,
    Unknown,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Vmess => "vmess",
            ProtocolKind::Vless => "vless",
            ProtocolKind::Http => "http",
            ProtocolKind::Socks => "socks",
            ProtocolKind::Shadowsocks => "shadowsocks",
            ProtocolKind::ShadowsocksR => "shadowsocksr",
            ProtocolKind::Snell => "snell",
            ProtocolKind::Trojan => "trojan",
            ProtocolKind::TrojanGo => "trojan-go",
            ProtocolKind::Naive => "naive",
            ProtocolKind::PingTunnel => "pingtunnel",
            ProtocolKind::RelayBaton => "relaybaton",
            ProtocolKind::Brook => "brook",
            ProtocolKind::Hysteria => "hysteria",
            ProtocolKind::Custom => "custom",
            ProtocolKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brook(protocol: &str, path: &str) -> BrookConfig {
        BrookConfig {
            server: ServerEndpoint::new("example.com", 9999),
            protocol: protocol.to_string(),
            ws_path: path.to_string(),
            password: String::new(),
        }
    }

    #[test]
    fn test_authority_brackets_ipv6() {
        assert_eq!(ServerEndpoint::new("::1", 443).authority(), "[::1]:443");
        assert_eq!(ServerEndpoint::new("[::1]", 443).authority(), "[::1]:443");
        assert_eq!(ServerEndpoint::new("1.2.3.4", 80).authority(), "1.2.3.4:80");
    }

    #[test]
    fn test_brook_server_uri() {
        assert_eq!(brook("", "").server_uri(), "example.com:9999");
        assert_eq!(brook("ws", "").server_uri(), "ws://example.com:9999");
        assert_eq!(brook("wss", "tunnel").server_uri(), "wss://example.com:9999/tunnel");
        assert_eq!(brook("ws", "/a/b").server_uri(), "ws://example.com:9999/a/b");
    }

    #[test]
    fn test_deserialize_tagged_profile() {
        let json = serde_json::json!({
            "id": ProfileId::new().to_string(),
            "name": "edge",
            "protocol": {
                "type": "trojan-go",
                "server_address": "edge.example.com",
                "server_port": 443
            }
        });
        let profile: ProxyProfile = serde_json::from_value(json).unwrap();
        assert_eq!(profile.kind(), ProtocolKind::TrojanGo);
        assert_eq!(profile.name, "edge");
    }

    #[test]
    fn test_unknown_protocol_tag() {
        let json = serde_json::json!({
            "id": ProfileId::new().to_string(),
            "protocol": { "type": "wireguard", "peer": "x" }
        });
        let profile: ProxyProfile = serde_json::from_value(json).unwrap();
        assert_eq!(profile.kind(), ProtocolKind::Unknown);
    }

    #[test]
    fn test_socks_version_defaults_to_5() {
        let json = serde_json::json!({
            "type": "socks",
            "server_address": "10.0.0.1",
            "server_port": 1080
        });
        let protocol: ProtocolConfig = serde_json::from_value(json).unwrap();
        match protocol {
            ProtocolConfig::Socks(socks) => assert_eq!(socks.version, 5),
            other => panic!("unexpected protocol {other:?}"),
        }
    }
}
