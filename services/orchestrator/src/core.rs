//! Proxy core.
//!
//! The core consumes the aggregate configuration as a single unit and serves
//! every core-managed hop. Its lifecycle is load, start, close.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};
use hopchain_id::{ProfileId, RunId};
use tracing::{debug, info, warn};

/// Proxy core lifecycle.
pub trait ProxyCore: Send {
    fn load_config(&mut self, config: &str) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Stop and release the core. Never fails observably.
    fn close(&mut self);
}

/// Runs the core as an external executable: `<binary> run -c <config>`.
#[derive(Debug)]
pub struct ProcessCore {
    binary: PathBuf,
    config_path: PathBuf,
    loaded: bool,
    child: Option<Child>,
}

impl ProcessCore {
    /// `config_path` is owned by the core and removed on close.
    pub fn new(binary: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
            loaded: false,
            child: None,
        }
    }

    /// Core whose config lives in `scratch_dir` under a per-run name, so an
    /// overlapping teardown of an earlier run of the same profile never
    /// removes this run's file.
    pub fn in_scratch(
        binary: impl Into<PathBuf>,
        scratch_dir: &Path,
        profile: ProfileId,
    ) -> Self {
        let name = format!("core_{}_{}.json", profile, RunId::new().token());
        Self::new(binary, scratch_dir.join(name))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

impl ProxyCore for ProcessCore {
    fn load_config(&mut self, config: &str) -> Result<()> {
        serde_json::from_str::<serde_json::Value>(config)
            .context("core config is not valid JSON")?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.config_path, config)
            .with_context(|| format!("failed to write {}", self.config_path.display()))?;

        self.loaded = true;
        debug!(path = %self.config_path.display(), "Core config loaded");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if !self.loaded {
            bail!("core started before a config was loaded");
        }
        if self.child.is_some() {
            bail!("core already running");
        }

        let child = Command::new(&self.binary)
            .arg("run")
            .arg("-c")
            .arg(&self.config_path)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn core {}", self.binary.display()))?;

        info!(binary = %self.binary.display(), pid = child.id(), "Proxy core started");
        self.child = Some(child);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!(error = %e, "Core already exited");
            }
            if let Err(e) = child.wait() {
                debug!(error = %e, "Failed to reap core process");
            }
            info!("Proxy core stopped");
        }

        if self.loaded {
            if let Err(e) = fs::remove_file(&self.config_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        path = %self.config_path.display(),
                        error = %e,
                        "Failed to remove core config"
                    );
                }
            }
            self.loaded = false;
        }
    }
}

impl Drop for ProcessCore {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = ProcessCore::new("v2ray", dir.path().join("core.json"));
        assert!(core.load_config("not json").is_err());
        assert!(core.start().is_err());
    }

    #[test]
    fn test_close_removes_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.json");
        let mut core = ProcessCore::new("/nonexistent/v2ray", &path);

        core.load_config(r#"{"outbounds":[]}"#).unwrap();
        assert!(path.exists());

        assert!(core.start().is_err());
        assert!(!core.is_running());

        core.close();
        assert!(!path.exists());
        core.close();
    }

    #[test]
    fn test_overlapping_runs_keep_their_own_config() {
        let dir = tempfile::tempdir().unwrap();
        let profile = ProfileId::new();
        let mut old = ProcessCore::in_scratch("v2ray", dir.path(), profile);
        let mut new = ProcessCore::in_scratch("v2ray", dir.path(), profile);
        assert_ne!(old.config_path(), new.config_path());

        old.load_config("{}").unwrap();
        new.load_config("{}").unwrap();

        // Restart order: the new run is up before the old one is torn down.
        old.close();
        assert!(!old.config_path().exists());
        assert!(new.config_path().exists());

        new.close();
        assert!(!new.config_path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_start_and_close_process() {
        let dir = tempfile::tempdir().unwrap();
        // `true` ignores its arguments.
        let mut core = ProcessCore::new("true", dir.path().join("core.json"));
        core.load_config("{}").unwrap();
        core.start().unwrap();
        assert!(core.is_running());
        assert!(core.start().is_err());
        core.close();
        assert!(!core.is_running());
    }
}
