//! Backend registry.
//!
//! The one place that maps a protocol to the mechanism implementing its hop:
//! the proxy core itself, an external helper process, or an in-process
//! adapter. Adding a protocol means adding a row here.

use std::path::{Path, PathBuf};

use crate::adapter::AdapterKind;
use crate::config::{OrchestratorSettings, ShadowsocksProvider, TrojanProvider, LOCALHOST};
use crate::error::{OrchestratorError, Result};
use crate::plugin::PluginId;
use crate::profile::{ProtocolConfig, ProxyProfile};
use crate::topology::Hop;

/// Bundled shadowsocks client.
pub const SS_LOCAL: &str = "ss-local";

/// How a hop is implemented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStrategy {
    /// Consumed by the proxy core as part of its aggregate config.
    CoreManaged,
    /// A helper subprocess bound to the hop's port.
    ExternalProcess(ProcessSpec),
    /// An in-process protocol bridge.
    Adapter(AdapterKind),
}

impl BackendStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            BackendStrategy::CoreManaged => "core",
            BackendStrategy::ExternalProcess(_) => "process",
            BackendStrategy::Adapter(_) => "adapter",
        }
    }
}

/// Where a helper executable comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySource {
    /// Shipped with the application under the bundled directory.
    Bundled(&'static str),
    /// Installed plugin package.
    Plugin(PluginId),
}

/// File naming and syntax of a backend's config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigFormat {
    pub prefix: &'static str,
    pub extension: &'static str,
}

impl ConfigFormat {
    const fn json(prefix: &'static str) -> Self {
        Self {
            prefix,
            extension: "json",
        }
    }
}

/// Argument-list conventions, one per helper family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
    ShadowsocksLocal,
    Trojan,
    TrojanGo,
    Naive,
    PingTunnel,
    RelayBaton,
    Brook,
    Hysteria,
}

/// Everything needed to build and launch one external process hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSpec {
    pub launcher: Launcher,
    pub binary: BinarySource,
    /// `None` for helpers configured entirely through flags.
    pub config: Option<ConfigFormat>,
}

impl ProcessSpec {
    fn plugin(launcher: Launcher, id: PluginId, config: Option<ConfigFormat>) -> Self {
        Self {
            launcher,
            binary: BinarySource::Plugin(id),
            config,
        }
    }
}

/// Classify a hop. Pure and total over [`ProtocolConfig`]; unknown protocols
/// and illegal chain positions are errors, never skipped.
pub fn classify(hop: &Hop, settings: &OrchestratorSettings) -> Result<BackendStrategy> {
    let strategy = match &hop.profile.protocol {
        ProtocolConfig::Vmess(_) | ProtocolConfig::Vless(_) | ProtocolConfig::Http(_) => {
            BackendStrategy::CoreManaged
        }
        ProtocolConfig::Socks(socks) => match socks.version {
            5 => BackendStrategy::CoreManaged,
            4 => BackendStrategy::Adapter(AdapterKind::Socks4To5),
            other => {
                return Err(OrchestratorError::configuration(
                    hop.port,
                    format!("unsupported socks version {other} in {}", describe(&hop.profile)),
                ))
            }
        },
        ProtocolConfig::Shadowsocks(_) => match settings.shadowsocks_provider {
            ShadowsocksProvider::Core => BackendStrategy::CoreManaged,
            ShadowsocksProvider::Clash => BackendStrategy::Adapter(AdapterKind::ShadowsocksClash),
            ShadowsocksProvider::Rust => BackendStrategy::ExternalProcess(ProcessSpec {
                launcher: Launcher::ShadowsocksLocal,
                binary: BinarySource::Bundled(SS_LOCAL),
                config: Some(ConfigFormat::json("shadowsocks")),
            }),
        },
        ProtocolConfig::ShadowsocksR(_) => BackendStrategy::Adapter(AdapterKind::ShadowsocksR),
        ProtocolConfig::Snell(_) => BackendStrategy::Adapter(AdapterKind::Snell),
        ProtocolConfig::Trojan(_) => match settings.trojan_provider {
            TrojanProvider::Core => BackendStrategy::CoreManaged,
            TrojanProvider::Trojan => BackendStrategy::ExternalProcess(ProcessSpec::plugin(
                Launcher::Trojan,
                PluginId::Trojan,
                Some(ConfigFormat::json("trojan")),
            )),
            TrojanProvider::TrojanGo => BackendStrategy::ExternalProcess(ProcessSpec::plugin(
                Launcher::Trojan,
                PluginId::TrojanGo,
                Some(ConfigFormat::json("trojan")),
            )),
        },
        ProtocolConfig::TrojanGo(_) => BackendStrategy::ExternalProcess(trojan_go()),
        ProtocolConfig::Custom(custom) => match custom.engine.as_str() {
            "trojan-go" => BackendStrategy::ExternalProcess(trojan_go()),
            _ => BackendStrategy::Adapter(AdapterKind::ExternalCore),
        },
        ProtocolConfig::Naive(_) => BackendStrategy::ExternalProcess(ProcessSpec::plugin(
            Launcher::Naive,
            PluginId::Naive,
            Some(ConfigFormat::json("naive")),
        )),
        ProtocolConfig::PingTunnel(_) => {
            if hop.need_chain {
                return Err(OrchestratorError::configuration(
                    hop.port,
                    format!(
                        "{} is incompatible with chain: pingtunnel may only be the last hop",
                        describe(&hop.profile)
                    ),
                ));
            }
            BackendStrategy::ExternalProcess(ProcessSpec::plugin(
                Launcher::PingTunnel,
                PluginId::PingTunnel,
                None,
            ))
        }
        ProtocolConfig::RelayBaton(_) => BackendStrategy::ExternalProcess(ProcessSpec::plugin(
            Launcher::RelayBaton,
            PluginId::RelayBaton,
            Some(ConfigFormat {
                prefix: "rb",
                extension: "toml",
            }),
        )),
        ProtocolConfig::Brook(_) => BackendStrategy::ExternalProcess(ProcessSpec::plugin(
            Launcher::Brook,
            PluginId::Brook,
            None,
        )),
        ProtocolConfig::Hysteria(_) => BackendStrategy::ExternalProcess(ProcessSpec::plugin(
            Launcher::Hysteria,
            PluginId::Hysteria,
            Some(ConfigFormat::json("hysteria")),
        )),
        ProtocolConfig::Unknown => {
            return Err(OrchestratorError::configuration(
                hop.port,
                format!("unsupported protocol in {}", describe(&hop.profile)),
            ))
        }
    };

    Ok(strategy)
}

fn trojan_go() -> ProcessSpec {
    ProcessSpec::plugin(
        Launcher::TrojanGo,
        PluginId::TrojanGo,
        Some(ConfigFormat::json("trojan_go")),
    )
}

fn describe(profile: &ProxyProfile) -> String {
    if profile.name.is_empty() {
        format!("{} profile {}", profile.kind(), profile.id)
    } else {
        format!("{} profile {} ({})", profile.kind(), profile.id, profile.name)
    }
}

/// Inputs to an argument template.
#[derive(Debug, Clone, Copy)]
pub struct LaunchContext<'a> {
    pub hop: &'a Hop,
    pub binary: &'a Path,
    pub config_path: Option<&'a Path>,
    pub settings: &'a OrchestratorSettings,
}

impl Launcher {
    /// Build the full argument list, binary first.
    pub fn command(&self, ctx: LaunchContext<'_>) -> Result<Vec<String>> {
        let binary = path_arg(ctx.binary);
        let listen = format!("{LOCALHOST}:{}", ctx.hop.port);

        let args = match self {
            Launcher::ShadowsocksLocal => {
                let mut args = vec![
                    binary,
                    "-c".into(),
                    config_arg(self, ctx)?,
                    "--log-without-time".into(),
                ];
                if ctx.settings.enable_log {
                    args.push("-v".into());
                }
                args
            }
            Launcher::Trojan => vec![binary, "--config".into(), config_arg(self, ctx)?],
            Launcher::TrojanGo => vec![binary, "-config".into(), config_arg(self, ctx)?],
            Launcher::Naive => vec![binary, config_arg(self, ctx)?],
            Launcher::RelayBaton => vec![
                binary,
                "client".into(),
                "--config".into(),
                config_arg(self, ctx)?,
            ],
            Launcher::Hysteria => vec![
                binary,
                "--no-check".into(),
                "--config".into(),
                config_arg(self, ctx)?,
                "--log-level".into(),
                if ctx.settings.enable_log { "trace" } else { "warn" }.into(),
                "client".into(),
            ],
            Launcher::PingTunnel => {
                let ProtocolConfig::PingTunnel(bean) = &ctx.hop.profile.protocol else {
                    return Err(mismatch(self, ctx.hop));
                };
                let mut args = ctx.settings.privilege_wrapper.clone();
                args.extend([
                    binary,
                    "-type".into(),
                    "client".into(),
                    "-sock5".into(),
                    "1".into(),
                    "-l".into(),
                    listen,
                    "-s".into(),
                    bean.server_address.clone(),
                ]);
                if !bean.key.trim().is_empty() && bean.key != "1" {
                    args.push("-key".into());
                    args.push(bean.key.clone());
                }
                args
            }
            Launcher::Brook => {
                let ProtocolConfig::Brook(bean) = &ctx.hop.profile.protocol else {
                    return Err(mismatch(self, ctx.hop));
                };
                let (mode, server_flag) = match bean.protocol.as_str() {
                    "ws" => ("wsclient", "--wsserver"),
                    "wss" => ("wssclient", "--wssserver"),
                    _ => ("client", "--server"),
                };
                let mut args = vec![binary, mode.into(), server_flag.into(), bean.server_uri()];
                if !bean.password.trim().is_empty() {
                    args.push("--password".into());
                    args.push(bean.password.clone());
                }
                args.push("--socks5".into());
                args.push(listen);
                args
            }
        };

        Ok(args)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn config_arg(launcher: &Launcher, ctx: LaunchContext<'_>) -> Result<String> {
    ctx.config_path.map(path_arg).ok_or_else(|| OrchestratorError::Spawn {
        port: ctx.hop.port,
        message: format!("{launcher:?} requires a config file but none was written"),
    })
}

fn mismatch(launcher: &Launcher, hop: &Hop) -> OrchestratorError {
    OrchestratorError::configuration(
        hop.port,
        format!("{launcher:?} launcher cannot drive a {} hop", hop.profile.kind()),
    )
}

/// Resolve where a bundled executable lives.
pub fn bundled_path(settings: &OrchestratorSettings, name: &str) -> PathBuf {
    settings.bundled_dir.join(name)
}
