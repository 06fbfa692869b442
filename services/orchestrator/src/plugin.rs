//! External plugin binaries.
//!
//! Resolution is memoized per run by [`PluginCache`]: a name is looked up at
//! most once, and a failed lookup aborts startup.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::error::OrchestratorError;

/// Known plugin packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginId {
    Trojan,
    TrojanGo,
    Naive,
    PingTunnel,
    RelayBaton,
    Brook,
    Hysteria,
}

impl PluginId {
    /// Plugin package name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginId::Trojan => "trojan-plugin",
            PluginId::TrojanGo => "trojan-go-plugin",
            PluginId::Naive => "naive-plugin",
            PluginId::PingTunnel => "pingtunnel-plugin",
            PluginId::RelayBaton => "relaybaton-plugin",
            PluginId::Brook => "brook-plugin",
            PluginId::Hysteria => "hysteria-plugin",
        }
    }

    /// File name of the executable the package installs.
    pub fn executable(&self) -> &'static str {
        match self {
            PluginId::Trojan => "trojan",
            PluginId::TrojanGo => "trojan-go",
            PluginId::Naive => "naive",
            PluginId::PingTunnel => "pingtunnel",
            PluginId::RelayBaton => "relaybaton",
            PluginId::Brook => "brook",
            PluginId::Hysteria => "hysteria",
        }
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plugin resolved to an executable on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlugin {
    pub id: PluginId,
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin {0} not found")]
    NotFound(PluginId),

    #[error("plugin {id} at {path} is not executable")]
    NotExecutable { id: PluginId, path: PathBuf },
}

/// Looks up plugin executables by name.
pub trait PluginResolver: Send + Sync {
    fn resolve(&self, id: PluginId) -> Result<ResolvedPlugin, PluginError>;
}

/// Searches configured directories, then `PATH`.
#[derive(Debug, Clone, Default)]
pub struct DirectoryResolver {
    search_dirs: Vec<PathBuf>,
    use_path_env: bool,
}

impl DirectoryResolver {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            use_path_env: true,
        }
    }

    /// Only look in the configured directories.
    pub fn without_path_env(mut self) -> Self {
        self.use_path_env = false;
        self
    }

    fn candidates(&self, id: PluginId) -> Vec<PathBuf> {
        let mut dirs = self.search_dirs.clone();
        if self.use_path_env {
            if let Some(path) = std::env::var_os("PATH") {
                dirs.extend(std::env::split_paths(&path));
            }
        }
        dirs.into_iter().map(|dir| dir.join(id.executable())).collect()
    }
}

impl PluginResolver for DirectoryResolver {
    fn resolve(&self, id: PluginId) -> Result<ResolvedPlugin, PluginError> {
        let mut not_executable = None;

        for candidate in self.candidates(id) {
            if !candidate.is_file() {
                continue;
            }
            if is_executable(&candidate) {
                return Ok(ResolvedPlugin {
                    id,
                    path: candidate,
                });
            }
            not_executable.get_or_insert(candidate);
        }

        match not_executable {
            Some(path) => Err(PluginError::NotExecutable { id, path }),
            None => Err(PluginError::NotFound(id)),
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Per-run memo of resolved plugins.
#[derive(Debug, Default)]
pub struct PluginCache {
    resolved: HashMap<PluginId, ResolvedPlugin>,
}

impl PluginCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `id`, consulting the resolver only on first use.
    pub fn resolve(
        &mut self,
        resolver: &dyn PluginResolver,
        id: PluginId,
    ) -> Result<&ResolvedPlugin, OrchestratorError> {
        if !self.resolved.contains_key(&id) {
            let plugin = resolver
                .resolve(id)
                .map_err(|e| OrchestratorError::PluginResolution {
                    plugin: id.to_string(),
                    message: e.to_string(),
                })?;
            info!(plugin = %id, path = %plugin.path.display(), "Resolved plugin");
            self.resolved.insert(id, plugin);
        } else {
            debug!(plugin = %id, "Plugin resolution cache hit");
        }

        self.resolved
            .get(&id)
            .ok_or_else(|| OrchestratorError::PluginResolution {
                plugin: id.to_string(),
                message: "resolution cache lost entry".to_string(),
            })
    }

    pub fn get(&self, id: PluginId) -> Option<&ResolvedPlugin> {
        self.resolved.get(&id)
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub fn clear(&mut self) {
        self.resolved.clear();
    }
}
