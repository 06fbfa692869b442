//! Configuration for the orchestrator.
//!
//! `OrchestratorSettings` is the snapshot handed to an orchestrator at
//! construction; nothing mid-algorithm reads global state. `Config` is the
//! binary's environment-derived superset.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};

/// Loopback address every hop binds to.
pub const LOCALHOST: &str = "127.0.0.1";

/// Which implementation handles shadowsocks hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowsocksProvider {
    /// Outbound inside the proxy core.
    Core,
    /// Bundled `ss-local` subprocess.
    #[default]
    Rust,
    /// In-process adapter.
    Clash,
}

impl FromStr for ShadowsocksProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "core" => Ok(Self::Core),
            "rust" => Ok(Self::Rust),
            "clash" => Ok(Self::Clash),
            other => bail!("unknown shadowsocks provider: {other}"),
        }
    }
}

/// Which implementation handles plain trojan hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrojanProvider {
    #[default]
    Core,
    Trojan,
    TrojanGo,
}

impl FromStr for TrojanProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "core" => Ok(Self::Core),
            "trojan" => Ok(Self::Trojan),
            "trojan-go" => Ok(Self::TrojanGo),
            other => bail!("unknown trojan provider: {other}"),
        }
    }
}

/// Retry policy for the companion page forwarder.
#[derive(Debug, Clone)]
pub struct ForwarderRetry {
    /// Fixed delay between a failed load and the reload.
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ForwarderRetry {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

/// Immutable feature-flag snapshot for one orchestration run.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Request multiplexing on hops whose framing is not already nested.
    pub enable_mux: bool,

    /// Verbose logging for backend subprocesses.
    pub enable_log: bool,

    pub shadowsocks_provider: ShadowsocksProvider,
    pub trojan_provider: TrojanProvider,

    /// Private directory for ephemeral config and certificate files.
    pub scratch_dir: PathBuf,

    /// Directory holding executables shipped with the application.
    pub bundled_dir: PathBuf,

    /// Command prefix for helpers that need raw sockets (e.g. `["sudo", "-n"]`).
    pub privilege_wrapper: Vec<String>,

    pub forwarder_retry: ForwarderRetry,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            enable_mux: false,
            enable_log: false,
            shadowsocks_provider: ShadowsocksProvider::default(),
            trojan_provider: TrojanProvider::default(),
            scratch_dir: std::env::temp_dir().join("hopchain"),
            bundled_dir: PathBuf::from("/usr/lib/hopchain"),
            privilege_wrapper: Vec::new(),
            forwarder_retry: ForwarderRetry::default(),
        }
    }
}

/// Binary configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: OrchestratorSettings,

    /// Searched before `PATH` when resolving plugins.
    pub plugin_dirs: Vec<PathBuf>,

    /// Proxy core executable.
    pub core_binary: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = OrchestratorSettings::default();

        let scratch_dir = std::env::var("HOPCHAIN_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.scratch_dir);

        let bundled_dir = std::env::var("HOPCHAIN_BUNDLED_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.bundled_dir);

        let plugin_dirs = std::env::var("HOPCHAIN_PLUGIN_DIRS")
            .map(|dirs| std::env::split_paths(&dirs).collect())
            .unwrap_or_default();

        let core_binary = std::env::var("HOPCHAIN_CORE_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("v2ray"));

        let enable_mux = env_flag("HOPCHAIN_ENABLE_MUX");
        let enable_log = env_flag("HOPCHAIN_ENABLE_LOG");

        let shadowsocks_provider = match std::env::var("HOPCHAIN_SHADOWSOCKS_PROVIDER") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.shadowsocks_provider,
        };

        let trojan_provider = match std::env::var("HOPCHAIN_TROJAN_PROVIDER") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.trojan_provider,
        };

        let privilege_wrapper = std::env::var("HOPCHAIN_PRIVILEGE_WRAPPER")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let log_level = std::env::var("HOPCHAIN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            settings: OrchestratorSettings {
                enable_mux,
                enable_log,
                shadowsocks_provider,
                trojan_provider,
                scratch_dir,
                bundled_dir,
                privilege_wrapper,
                forwarder_retry: defaults.forwarder_retry,
            },
            plugin_dirs,
            core_binary,
            log_level,
        })
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
