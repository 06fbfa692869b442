//! Config builder facade.
//!
//! Builders are pure translations from a profile to a backend's native config
//! text. The orchestrator consumes them once per run for the aggregate core
//! config and once per external-process hop.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactTracker;
use crate::profile::ProxyProfile;
use crate::registry::ConfigFormat;
use crate::topology::{ChainGroup, Hop};

/// Aggregate build for the proxy core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreBuild {
    /// Serialized core configuration.
    pub config: String,

    /// Resolved chain/balancer index with pre-assigned local ports.
    pub groups: Vec<ChainGroup>,

    /// The core needs the companion page forwarder.
    #[serde(default)]
    pub require_ws: bool,

    #[serde(default)]
    pub ws_port: u16,
}

/// Per-hop build request.
#[derive(Debug, Clone, Copy)]
pub struct HopRequest<'a> {
    pub hop: &'a Hop,
    pub format: ConfigFormat,
}

/// Per-hop build output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HopBuild {
    pub config: String,

    /// Extra files the config references. Also tracked by the orchestrator.
    pub auxiliary: Vec<PathBuf>,
}

impl HopBuild {
    pub fn new(config: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            auxiliary: Vec::new(),
        }
    }
}

/// Translates profiles into backend configuration.
pub trait ConfigBuilder: Send + Sync {
    /// Build the aggregate core config and topology for the root profile.
    fn build_core(&self, profile: &ProxyProfile) -> Result<CoreBuild>;

    /// Build one hop's config. Auxiliary files must be allocated through
    /// `scratch` so they are tracked even if the build later fails.
    fn build_hop(&self, request: HopRequest<'_>, scratch: &mut ArtifactTracker) -> Result<HopBuild>;
}
