//! Test doubles for the orchestrator's collaborators.
//!
//! Every double writes what happened to it into a shared record so tests
//! can assert on launches, teardown calls and leaks after the orchestrator
//! has consumed the double itself.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use hopchain_orchestrator::adapter::{Adapter, AdapterKind, AdapterRegistry};
use hopchain_orchestrator::artifact::ArtifactTracker;
use hopchain_orchestrator::builder::{ConfigBuilder, CoreBuild, HopBuild, HopRequest};
use hopchain_orchestrator::config::OrchestratorSettings;
use hopchain_orchestrator::core::ProxyCore;
use hopchain_orchestrator::forwarder::PageHost;
use hopchain_orchestrator::plugin::{PluginError, PluginId, PluginResolver, ResolvedPlugin};
use hopchain_orchestrator::process::{ProcessHandle, ProcessSupervisor};
use hopchain_orchestrator::profile::{ProtocolConfig, ProxyProfile, ServerEndpoint};
use hopchain_orchestrator::topology::{ChainEntry, ChainGroup};
use hopchain_orchestrator::{Collaborators, Orchestrator};

pub fn endpoint() -> ServerEndpoint {
    ServerEndpoint::new("proxy.example.com", 443)
}

pub fn entry(port: u16, protocol: ProtocolConfig) -> ChainEntry {
    ChainEntry {
        port,
        profile: ProxyProfile::new(protocol),
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Records submissions; optionally fails the k-th one (1-based).
#[derive(Default)]
pub struct RecordingSupervisor {
    fail_at: Option<usize>,
    submitted: Mutex<Vec<Vec<String>>>,
    terminated: AtomicUsize,
}

impl RecordingSupervisor {
    pub fn failing_at(k: usize) -> Self {
        Self {
            fail_at: Some(k),
            ..Self::default()
        }
    }

    pub fn submitted(&self) -> Vec<Vec<String>> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Processes submitted and not yet terminated.
    pub fn live(&self) -> usize {
        if self.terminate_calls() > 0 {
            0
        } else {
            self.submitted.lock().unwrap().len()
        }
    }
}

#[async_trait]
impl ProcessSupervisor for RecordingSupervisor {
    async fn submit(&self, argv: Vec<String>) -> Result<ProcessHandle> {
        let mut submitted = self.submitted.lock().unwrap();
        let attempt = submitted.len() + 1;
        if self.fail_at == Some(attempt) {
            bail!("failed to spawn {}: No such file or directory", argv[0]);
        }

        let program = argv[0].clone();
        submitted.push(argv);
        Ok(ProcessHandle {
            id: attempt as u64,
            pid: None,
            program,
        })
    }

    async fn terminate_all(&self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Plugin resolver
// =============================================================================

#[derive(Default)]
pub struct CountingResolver {
    missing: Vec<PluginId>,
    calls: AtomicUsize,
}

impl CountingResolver {
    pub fn missing(ids: Vec<PluginId>) -> Self {
        Self {
            missing: ids,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PluginResolver for CountingResolver {
    fn resolve(&self, id: PluginId) -> Result<ResolvedPlugin, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.missing.contains(&id) {
            return Err(PluginError::NotFound(id));
        }
        Ok(ResolvedPlugin {
            id,
            path: PathBuf::from("/opt/plugins").join(id.executable()),
        })
    }
}

// =============================================================================
// Config builder
// =============================================================================

/// Builds trivial JSON configs; hysteria hops also get a CA file.
pub struct StubBuilder {
    core: CoreBuild,
    fail_port: Option<u16>,
    requests: Mutex<Vec<(u16, bool)>>,
}

impl StubBuilder {
    pub fn new(groups: Vec<ChainGroup>) -> Self {
        Self {
            core: CoreBuild {
                config: r#"{"outbounds":[]}"#.to_string(),
                groups,
                require_ws: false,
                ws_port: 0,
            },
            fail_port: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, port: u16) -> Self {
        self.fail_port = Some(port);
        self
    }

    pub fn requiring_ws(mut self, ws_port: u16) -> Self {
        self.core.require_ws = true;
        self.core.ws_port = ws_port;
        self
    }

    /// `(port, mux)` of every hop build, in call order.
    pub fn requests(&self) -> Vec<(u16, bool)> {
        self.requests.lock().unwrap().clone()
    }
}

impl ConfigBuilder for StubBuilder {
    fn build_core(&self, _profile: &ProxyProfile) -> Result<CoreBuild> {
        Ok(self.core.clone())
    }

    fn build_hop(
        &self,
        request: HopRequest<'_>,
        scratch: &mut ArtifactTracker,
    ) -> Result<HopBuild> {
        let port = request.hop.port;
        self.requests.lock().unwrap().push((port, request.hop.mux));

        if let ProtocolConfig::Hysteria(_) = request.hop.profile.protocol {
            let ca = scratch.write("ca", "pem", "-----BEGIN CERTIFICATE-----\n")?;
            return Ok(HopBuild {
                config: format!(r#"{{"ca":"{}"}}"#, ca.display()),
                auxiliary: vec![ca],
            });
        }

        if self.fail_port == Some(port) {
            bail!("cannot render {} config", request.format.prefix);
        }

        Ok(HopBuild::new(format!(r#"{{"listen":"127.0.0.1:{port}"}}"#)))
    }
}

// =============================================================================
// Proxy core
// =============================================================================

#[derive(Default)]
pub struct CoreRecord {
    pub loads: AtomicUsize,
    pub starts: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_start: AtomicBool,
}

pub struct MockCore {
    record: Arc<CoreRecord>,
}

impl ProxyCore for MockCore {
    fn load_config(&mut self, config: &str) -> Result<()> {
        serde_json::from_str::<serde_json::Value>(config)?;
        self.record.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.record.fail_start.load(Ordering::SeqCst) {
            bail!("address already in use");
        }
        self.record.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.record.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Adapters
// =============================================================================

#[derive(Default)]
pub struct AdapterRecord {
    pub launched: Mutex<Vec<u16>>,
    pub stopped: Mutex<Vec<u16>>,
    pub fail_port: Mutex<Option<u16>>,
}

impl AdapterRecord {
    pub fn launched(&self) -> Vec<u16> {
        self.launched.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<u16> {
        let mut stopped = self.stopped.lock().unwrap().clone();
        stopped.sort_unstable();
        stopped
    }
}

struct MockAdapter {
    port: u16,
    record: Arc<AdapterRecord>,
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn launch(&mut self) -> Result<()> {
        if *self.record.fail_port.lock().unwrap() == Some(self.port) {
            bail!("bind 127.0.0.1:{}: address in use", self.port);
        }
        self.record.launched.lock().unwrap().push(self.port);
        Ok(())
    }

    async fn stop(&mut self) {
        self.record.stopped.lock().unwrap().push(self.port);
    }
}

fn adapter_registry(record: &Arc<AdapterRecord>) -> AdapterRegistry {
    [
        AdapterKind::ShadowsocksClash,
        AdapterKind::ShadowsocksR,
        AdapterKind::Snell,
        AdapterKind::Socks4To5,
        AdapterKind::ExternalCore,
    ]
    .into_iter()
    .fold(AdapterRegistry::new(), |registry, kind| {
        let record = Arc::clone(record);
        registry.register(kind, move |_profile, port| {
            Ok(Box::new(MockAdapter {
                port,
                record: Arc::clone(&record),
            }) as Box<dyn Adapter>)
        })
    })
}

// =============================================================================
// Page host
// =============================================================================

#[derive(Default)]
pub struct RecordingHost {
    pub loads: AtomicUsize,
    pub closes: AtomicUsize,
}

#[async_trait]
impl PageHost for RecordingHost {
    async fn load(&self, _url: &str) -> Result<String> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok("forwarder".to_string())
    }

    async fn blank(&self) {}

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub scratch: TempDir,
    pub settings: OrchestratorSettings,
    pub supervisor: Arc<RecordingSupervisor>,
    pub resolver: Arc<CountingResolver>,
    pub builder: Arc<StubBuilder>,
    pub core: Arc<CoreRecord>,
    pub adapters: Arc<AdapterRecord>,
    pub page_host: Option<Arc<RecordingHost>>,
}

impl Harness {
    pub fn new(groups: Vec<ChainGroup>) -> Self {
        Self::with_builder(StubBuilder::new(groups))
    }

    pub fn with_builder(builder: StubBuilder) -> Self {
        let scratch = TempDir::new().unwrap();
        let settings = OrchestratorSettings {
            scratch_dir: scratch.path().join("scratch"),
            bundled_dir: PathBuf::from("/opt/bundled"),
            ..OrchestratorSettings::default()
        };

        Self {
            scratch,
            settings,
            supervisor: Arc::new(RecordingSupervisor::default()),
            resolver: Arc::new(CountingResolver::default()),
            builder: Arc::new(builder),
            core: Arc::new(CoreRecord::default()),
            adapters: Arc::new(AdapterRecord::default()),
            page_host: None,
        }
    }

    pub fn supervisor(mut self, supervisor: RecordingSupervisor) -> Self {
        self.supervisor = Arc::new(supervisor);
        self
    }

    pub fn resolver(mut self, resolver: CountingResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn mux(mut self, enabled: bool) -> Self {
        self.settings.enable_mux = enabled;
        self
    }

    pub fn page_host(mut self) -> Self {
        self.page_host = Some(Arc::new(RecordingHost::default()));
        self
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let page_host: Option<Arc<dyn PageHost>> = match &self.page_host {
            Some(host) => Some(host.clone()),
            None => None,
        };

        Orchestrator::new(
            ProxyProfile::new(ProtocolConfig::Vmess(endpoint())).with_name("root"),
            self.settings.clone(),
            Collaborators {
                builder: self.builder.clone(),
                core: Box::new(MockCore {
                    record: Arc::clone(&self.core),
                }),
                supervisor: self.supervisor.clone(),
                plugins: self.resolver.clone(),
                adapters: Arc::new(adapter_registry(&self.adapters)),
                page_host,
            },
        )
    }

    /// Files left under the scratch directory.
    pub fn scratch_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.settings.scratch_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}
