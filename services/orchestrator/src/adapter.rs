//! In-process protocol adapters.
//!
//! Adapters bridge protocols the proxy core cannot consume directly. Each one
//! owns its own start/stop lifecycle; the orchestrator only constructs,
//! launches and stops them.

use std::collections::HashMap;
use std::fmt;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::profile::ProxyProfile;

/// Protocol bridges the orchestrator knows how to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Shadowsocks through the clash engine.
    ShadowsocksClash,
    ShadowsocksR,
    Snell,
    /// SOCKS4/4a upstream exposed as a local SOCKS5 endpoint.
    Socks4To5,
    /// A second core instance running a user-supplied config.
    ExternalCore,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterKind::ShadowsocksClash => "shadowsocks-clash",
            AdapterKind::ShadowsocksR => "shadowsocksr",
            AdapterKind::Snell => "snell",
            AdapterKind::Socks4To5 => "socks4-to-5",
            AdapterKind::ExternalCore => "external-core",
        };
        f.write_str(name)
    }
}

/// Lifecycle of an adapter instance.
#[async_trait]
pub trait Adapter: Send {
    /// Start serving on the hop's port.
    async fn launch(&mut self) -> Result<()>;

    /// Stop and release everything. Must not fail observably and must be
    /// safe to call on an adapter whose launch failed.
    async fn stop(&mut self);
}

/// Constructs adapters for hops.
pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        kind: AdapterKind,
        profile: &ProxyProfile,
        port: u16,
    ) -> Result<Box<dyn Adapter>>;
}

type Constructor = Box<dyn Fn(&ProxyProfile, u16) -> Result<Box<dyn Adapter>> + Send + Sync>;

/// Factory backed by a table of constructors.
#[derive(Default)]
pub struct AdapterRegistry {
    constructors: HashMap<AdapterKind, Constructor>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(mut self, kind: AdapterKind, constructor: F) -> Self
    where
        F: Fn(&ProxyProfile, u16) -> Result<Box<dyn Adapter>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Box::new(constructor));
        self
    }

    pub fn supports(&self, kind: AdapterKind) -> bool {
        self.constructors.contains_key(&kind)
    }
}

impl AdapterFactory for AdapterRegistry {
    fn create(
        &self,
        kind: AdapterKind,
        profile: &ProxyProfile,
        port: u16,
    ) -> Result<Box<dyn Adapter>> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| anyhow!("no {kind} adapter is available in this build"))?;
        constructor(profile, port)
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
