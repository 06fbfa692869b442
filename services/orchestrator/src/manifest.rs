//! Build manifests.
//!
//! A manifest is the output of an upstream config build, rendered ahead of
//! time: the aggregate core config, the chain/balancer index, and each hop's
//! native config keyed by port. `ManifestBuilder` replays it through the
//! [`ConfigBuilder`] facade.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::ArtifactTracker;
use crate::builder::{ConfigBuilder, CoreBuild, HopBuild, HopRequest};
use crate::profile::ProxyProfile;

/// A file the hop config references, written at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryFile {
    /// Name prefix for the scratch file.
    pub prefix: String,
    pub extension: String,
    pub content: String,
    /// Token in the hop config replaced by the written file's path.
    pub placeholder: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopEntry {
    pub config: String,

    #[serde(default)]
    pub auxiliary: Vec<AuxiliaryFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub profile: ProxyProfile,
    pub core: CoreBuild,

    #[serde(default)]
    pub hops: BTreeMap<u16, HopEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse manifest {}", path.display()))
    }
}

/// Config builder replaying a [`Manifest`].
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    manifest: Manifest,
}

impl ManifestBuilder {
    pub fn new(manifest: Manifest) -> Self {
        Self { manifest }
    }

    pub fn profile(&self) -> &ProxyProfile {
        &self.manifest.profile
    }
}

impl ConfigBuilder for ManifestBuilder {
    fn build_core(&self, profile: &ProxyProfile) -> Result<CoreBuild> {
        if profile.id != self.manifest.profile.id {
            return Err(anyhow!(
                "manifest was built for {}, not {}",
                self.manifest.profile.id,
                profile.id
            ));
        }
        Ok(self.manifest.core.clone())
    }

    fn build_hop(
        &self,
        request: HopRequest<'_>,
        scratch: &mut ArtifactTracker,
    ) -> Result<HopBuild> {
        let port = request.hop.port;
        let entry = self
            .manifest
            .hops
            .get(&port)
            .ok_or_else(|| {
                anyhow!(
                    "manifest has no {} config for port {port}",
                    request.format.prefix
                )
            })?;

        let mut config = entry.config.clone();
        let mut auxiliary = Vec::with_capacity(entry.auxiliary.len());

        for file in &entry.auxiliary {
            let path = scratch
                .write(&file.prefix, &file.extension, &file.content)
                .with_context(|| format!("failed to write {} for port {port}", file.prefix))?;
            config = config.replace(&file.placeholder, &path.to_string_lossy());
            debug!(port, path = %path.display(), "Wrote auxiliary file");
            auxiliary.push(path);
        }

        Ok(HopBuild { config, auxiliary })
    }
}
