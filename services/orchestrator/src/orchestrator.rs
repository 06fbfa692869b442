//! Instance orchestrator.
//!
//! Owns one running profile from `init` to `destroy`:
//!
//! ```text
//! Uninitialized ─init─▶ ConfigBuilt ─▶ BackendsClassified ─launch─▶ Launching ─▶ Running
//!        │                   │                  │                       │
//!        └───────────────────┴──────────────────┴───────────────────────┴──▶ Failed
//! ```
//!
//! `init` builds every hop's configuration and resolves every plugin without
//! spawning anything, so a late build failure never leaves earlier hops
//! running unsupervised. `launch` then starts backends in the same traversal
//! order and finally the proxy core. Any fatal error tears down everything
//! constructed so far before it is returned.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hopchain_id::RunId;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::adapter::{Adapter, AdapterFactory};
use crate::artifact::ArtifactTracker;
use crate::builder::{ConfigBuilder, CoreBuild, HopRequest};
use crate::config::OrchestratorSettings;
use crate::core::ProxyCore;
use crate::error::{OrchestratorError, Result};
use crate::forwarder::{ForwarderBridge, PageHost};
use crate::plugin::{PluginCache, PluginResolver};
use crate::process::{ProcessHandle, ProcessSupervisor};
use crate::profile::ProxyProfile;
use crate::registry::{self, BackendStrategy, BinarySource, LaunchContext, ProcessSpec};
use crate::topology::{self, Hop};

/// Lifecycle phase of an orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    ConfigBuilt,
    BackendsClassified,
    Launching,
    Running,
    Failed(String),
    Destroyed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Uninitialized => f.write_str("uninitialized"),
            Phase::ConfigBuilt => f.write_str("config_built"),
            Phase::BackendsClassified => f.write_str("backends_classified"),
            Phase::Launching => f.write_str("launching"),
            Phase::Running => f.write_str("running"),
            Phase::Failed(reason) => write!(f, "failed ({reason})"),
            Phase::Destroyed => f.write_str("destroyed"),
        }
    }
}

/// The concrete mechanism behind one hop.
pub enum BackendHandle {
    /// Served by the proxy core; nothing to track.
    CoreManaged,
    ExternalProcess {
        process: ProcessHandle,
        /// Scratch files written for this process.
        artifacts: Vec<PathBuf>,
    },
    AdapterInstance(Box<dyn Adapter>),
}

/// Discriminant of a [`BackendHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    CoreManaged,
    ExternalProcess,
    AdapterInstance,
}

impl BackendHandle {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendHandle::CoreManaged => BackendKind::CoreManaged,
            BackendHandle::ExternalProcess { .. } => BackendKind::ExternalProcess,
            BackendHandle::AdapterInstance(_) => BackendKind::AdapterInstance,
        }
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendHandle::CoreManaged => f.write_str("CoreManaged"),
            BackendHandle::ExternalProcess { process, artifacts } => f
                .debug_struct("ExternalProcess")
                .field("process", process)
                .field("artifacts", artifacts)
                .finish(),
            BackendHandle::AdapterInstance(_) => f.write_str("AdapterInstance"),
        }
    }
}

/// A hop after the build pass: classified, configured, binary resolved.
#[derive(Debug, Clone)]
struct HopPlan {
    hop: Hop,
    strategy: BackendStrategy,
    config: Option<String>,
    auxiliary: Vec<PathBuf>,
    binary: Option<PathBuf>,
}

/// External collaborators of one run.
pub struct Collaborators {
    pub builder: Arc<dyn ConfigBuilder>,
    pub core: Box<dyn ProxyCore>,
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub plugins: Arc<dyn PluginResolver>,
    pub adapters: Arc<dyn AdapterFactory>,
    /// Host for the companion page forwarder, if this build has one.
    pub page_host: Option<Arc<dyn PageHost>>,
}

struct RunState {
    phase: Phase,
    core: Box<dyn ProxyCore>,
    core_loaded: bool,
    core_build: Option<CoreBuild>,
    hops: Vec<Hop>,
    plans: HashMap<u16, HopPlan>,
    handles: HashMap<u16, BackendHandle>,
    artifacts: ArtifactTracker,
    plugins: PluginCache,
    forwarder: Option<ForwarderBridge>,
}

/// Orchestrates the backends of one running profile.
pub struct Orchestrator {
    run_id: RunId,
    profile: ProxyProfile,
    settings: OrchestratorSettings,

    builder: Arc<dyn ConfigBuilder>,
    supervisor: Arc<dyn ProcessSupervisor>,
    plugins: Arc<dyn PluginResolver>,
    adapters: Arc<dyn AdapterFactory>,
    page_host: Option<Arc<dyn PageHost>>,

    state: Mutex<RunState>,

    /// Set exactly once, by whichever caller wins the teardown.
    closed: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        profile: ProxyProfile,
        settings: OrchestratorSettings,
        collaborators: Collaborators,
    ) -> Self {
        let run_id = RunId::new();
        let artifacts = ArtifactTracker::new(settings.scratch_dir.clone(), run_id);

        Self {
            run_id,
            profile,
            settings,
            builder: collaborators.builder,
            supervisor: collaborators.supervisor,
            plugins: collaborators.plugins,
            adapters: collaborators.adapters,
            page_host: collaborators.page_host,
            state: Mutex::new(RunState {
                phase: Phase::Uninitialized,
                core: collaborators.core,
                core_loaded: false,
                core_build: None,
                hops: Vec::new(),
                plans: HashMap::new(),
                handles: HashMap::new(),
                artifacts,
                plugins: PluginCache::new(),
                forwarder: None,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase.clone()
    }

    /// Ports configured by `init`, in ascending order.
    pub async fn configured_ports(&self) -> Vec<u16> {
        let state = self.state.lock().await;
        let mut ports: Vec<u16> = state.plans.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Ports with a live backend handle, in ascending order.
    pub async fn ports(&self) -> Vec<u16> {
        let state = self.state.lock().await;
        let mut ports: Vec<u16> = state.handles.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    pub async fn handle_kind(&self, port: u16) -> Option<BackendKind> {
        self.state.lock().await.handles.get(&port).map(BackendHandle::kind)
    }

    pub async fn artifact_count(&self) -> usize {
        self.state.lock().await.artifacts.len()
    }

    /// Build pass: classify every hop, build its config, resolve its binary,
    /// and load the aggregate config into the core. Spawns nothing.
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.expect_phase(&state, Phase::Uninitialized, "uninitialized")?;

        info!(
            run_id = %self.run_id,
            profile_id = %self.profile.id,
            "Initializing orchestration run"
        );

        match self.build_all(&mut state) {
            Ok(()) => {
                info!(
                    run_id = %self.run_id,
                    hops = state.hops.len(),
                    plugins = state.plugins.len(),
                    artifacts = state.artifacts.len(),
                    "Backends classified"
                );
                Ok(())
            }
            Err(e) => Err(self.fail(&mut state, e).await),
        }
    }

    /// Launch pass: start every backend in traversal order, then the core.
    pub async fn launch(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.expect_phase(&state, Phase::BackendsClassified, "backends_classified")?;

        state.phase = Phase::Launching;
        match self.launch_all(&mut state).await {
            Ok(()) => {
                state.phase = Phase::Running;
                info!(
                    run_id = %self.run_id,
                    backends = state.handles.len(),
                    "Orchestration run is running"
                );
                Ok(())
            }
            Err(e) => Err(self.fail(&mut state, e).await),
        }
    }

    /// Tear down everything this run owns. Idempotent; safe from any task.
    pub async fn destroy(&self) {
        if self.is_closed() {
            debug!(run_id = %self.run_id, "Already destroyed");
            return;
        }

        let mut state = self.state.lock().await;
        self.teardown(&mut state).await;
    }

    fn expect_phase(&self, state: &RunState, expected: Phase, name: &'static str) -> Result<()> {
        if self.is_closed() || state.phase != expected {
            let actual = if self.is_closed() && !matches!(state.phase, Phase::Failed(_)) {
                Phase::Destroyed.to_string()
            } else {
                state.phase.to_string()
            };
            return Err(OrchestratorError::InvalidState {
                expected: name,
                actual,
            });
        }
        Ok(())
    }

    fn build_all(&self, state: &mut RunState) -> Result<()> {
        let build = self
            .builder
            .build_core(&self.profile)
            .map_err(|e| OrchestratorError::build(None, e))?;
        state.phase = Phase::ConfigBuilt;

        let hops = topology::walk(&build.groups, self.settings.enable_mux)?;

        for hop in &hops {
            let strategy = registry::classify(hop, &self.settings)?;
            let mut plan = HopPlan {
                hop: hop.clone(),
                strategy: strategy.clone(),
                config: None,
                auxiliary: Vec::new(),
                binary: None,
            };

            if let BackendStrategy::ExternalProcess(spec) = &strategy {
                if let Some(format) = spec.config {
                    let built = self
                        .builder
                        .build_hop(HopRequest { hop, format }, &mut state.artifacts)
                        .map_err(|e| OrchestratorError::build(hop.port, e))?;
                    for path in &built.auxiliary {
                        state.artifacts.register(path.clone());
                    }
                    plan.config = Some(built.config);
                    plan.auxiliary = built.auxiliary;
                }

                plan.binary = Some(match spec.binary {
                    BinarySource::Bundled(name) => registry::bundled_path(&self.settings, name),
                    BinarySource::Plugin(id) => state
                        .plugins
                        .resolve(self.plugins.as_ref(), id)?
                        .path
                        .clone(),
                });
            }

            debug!(
                port = hop.port,
                protocol = %hop.profile.kind(),
                backend = strategy.label(),
                need_chain = hop.need_chain,
                mux = hop.mux,
                "Hop configured"
            );
            state.plans.insert(hop.port, plan);
        }

        state.hops = hops;
        state.phase = Phase::BackendsClassified;

        state
            .core
            .load_config(&build.config)
            .map_err(|e| OrchestratorError::Core(format!("failed to load config: {e:#}")))?;
        state.core_loaded = true;
        state.core_build = Some(build);

        Ok(())
    }

    async fn launch_all(&self, state: &mut RunState) -> Result<()> {
        let hops = state.hops.clone();

        for hop in &hops {
            let plan = state.plans.get(&hop.port).cloned().ok_or_else(|| {
                OrchestratorError::configuration(hop.port, "hop was not configured during init")
            })?;

            match &plan.strategy {
                BackendStrategy::CoreManaged => {
                    state.handles.insert(hop.port, BackendHandle::CoreManaged);
                }
                BackendStrategy::ExternalProcess(spec) => {
                    let handle = self.launch_process(state, &plan, spec).await?;
                    state.handles.insert(hop.port, handle);
                }
                BackendStrategy::Adapter(kind) => {
                    let adapter = self
                        .adapters
                        .create(*kind, &hop.profile, hop.port)
                        .map_err(|e| OrchestratorError::AdapterLaunch {
                            port: hop.port,
                            message: format!("{kind}: {e:#}"),
                        })?;

                    // Tracked before launch so a failed launch is still stopped.
                    let handle = state
                        .handles
                        .entry(hop.port)
                        .or_insert(BackendHandle::AdapterInstance(adapter));
                    if let BackendHandle::AdapterInstance(adapter) = handle {
                        adapter
                            .launch()
                            .await
                            .map_err(|e| OrchestratorError::AdapterLaunch {
                                port: hop.port,
                                message: format!("{kind}: {e:#}"),
                            })?;
                    }
                    info!(port = hop.port, adapter = %kind, "Adapter launched");
                }
            }
        }

        state
            .core
            .start()
            .map_err(|e| OrchestratorError::Core(format!("failed to start: {e:#}")))?;

        if let Some(build) = state.core_build.as_ref().filter(|b| b.require_ws) {
            match &self.page_host {
                Some(host) => {
                    state.forwarder = Some(ForwarderBridge::start(
                        Arc::clone(host),
                        build.ws_port,
                        self.settings.forwarder_retry.clone(),
                    ));
                }
                None => warn!(
                    ws_port = build.ws_port,
                    "Core requires the page forwarder but no page host is configured"
                ),
            }
        }

        Ok(())
    }

    async fn launch_process(
        &self,
        state: &mut RunState,
        plan: &HopPlan,
        spec: &ProcessSpec,
    ) -> Result<BackendHandle> {
        let port = plan.hop.port;
        let mut artifacts = plan.auxiliary.clone();

        let config_path = match (spec.config, plan.config.as_deref()) {
            (Some(format), Some(config)) => {
                let path = state
                    .artifacts
                    .write(format.prefix, format.extension, config)
                    .map_err(|e| OrchestratorError::Spawn {
                        port,
                        message: format!("failed to write config file: {e}"),
                    })?;
                artifacts.push(path.clone());
                Some(path)
            }
            (Some(_), None) => {
                return Err(OrchestratorError::configuration(
                    port,
                    "no config was built for this hop",
                ))
            }
            (None, _) => None,
        };

        let binary = plan.binary.as_deref().ok_or_else(|| {
            OrchestratorError::configuration(port, "no binary was resolved for this hop")
        })?;

        let argv = spec.launcher.command(LaunchContext {
            hop: &plan.hop,
            binary,
            config_path: config_path.as_deref(),
            settings: &self.settings,
        })?;

        let process = self
            .supervisor
            .submit(argv)
            .await
            .map_err(|e| OrchestratorError::Spawn {
                port,
                message: format!("{e:#}"),
            })?;

        debug!(port, id = process.id, pid = ?process.pid, "Backend process submitted");
        Ok(BackendHandle::ExternalProcess { process, artifacts })
    }

    /// Record the failure, unwind, then hand the error back.
    async fn fail(&self, state: &mut RunState, err: OrchestratorError) -> OrchestratorError {
        error!(
            run_id = %self.run_id,
            reason_code = err.reason_code(),
            port = ?err.port(),
            error = %err,
            "Orchestration failed, unwinding"
        );
        state.phase = Phase::Failed(err.to_string());
        self.teardown(state).await;
        err
    }

    /// Best-effort teardown. Each step runs regardless of the others.
    async fn teardown(&self, state: &mut RunState) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(run_id = %self.run_id, phase = %state.phase, "Tearing down orchestration run");

        let mut adapters = 0;
        for handle in state.handles.values_mut() {
            if let BackendHandle::AdapterInstance(adapter) = handle {
                adapter.stop().await;
                adapters += 1;
            }
        }

        let removed = state.artifacts.purge();

        if let Some(forwarder) = state.forwarder.take() {
            forwarder.stop().await;
        }

        self.supervisor.terminate_all().await;

        if state.core_loaded {
            state.core.close();
            state.core_loaded = false;
        }

        state.handles.clear();
        state.plans.clear();
        state.plugins.clear();
        if !matches!(state.phase, Phase::Failed(_)) {
            state.phase = Phase::Destroyed;
        }

        info!(run_id = %self.run_id, adapters, artifacts_removed = removed, "Teardown complete");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!(run_id = %self.run_id, "Orchestrator dropped without destroy");
        }
    }
}
