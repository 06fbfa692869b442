//! hopchain
//!
//! Brings up a multi-hop proxy profile from a pre-built manifest, keeps its
//! backends supervised until interrupted, then tears everything down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hopchain_orchestrator::adapter::AdapterRegistry;
use hopchain_orchestrator::config::Config;
use hopchain_orchestrator::core::ProcessCore;
use hopchain_orchestrator::manifest::{Manifest, ManifestBuilder};
use hopchain_orchestrator::plugin::DirectoryResolver;
use hopchain_orchestrator::process::GuardedProcessPool;
use hopchain_orchestrator::{Collaborators, Orchestrator};

#[derive(Debug, Parser)]
#[command(name = "hopchain", version, about = "Run a multi-hop proxy profile")]
struct Cli {
    /// Pre-built profile manifest (JSON).
    #[arg(long)]
    manifest: PathBuf,

    /// Enable request multiplexing (overrides HOPCHAIN_ENABLE_MUX).
    #[arg(long)]
    mux: bool,

    /// Verbose logging for backend processes (overrides HOPCHAIN_ENABLE_LOG).
    #[arg(long)]
    verbose_backends: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting hopchain");

    if cli.mux {
        config.settings.enable_mux = true;
    }
    if cli.verbose_backends {
        config.settings.enable_log = true;
    }
    info!(
        scratch_dir = %config.settings.scratch_dir.display(),
        bundled_dir = %config.settings.bundled_dir.display(),
        core_binary = %config.core_binary.display(),
        enable_mux = config.settings.enable_mux,
        "Configuration loaded"
    );

    let manifest = Manifest::load(&cli.manifest)?;
    let builder = ManifestBuilder::new(manifest);
    let profile = builder.profile().clone();

    let core = ProcessCore::in_scratch(
        &config.core_binary,
        &config.settings.scratch_dir,
        profile.id,
    );
    info!(path = %core.config_path().display(), "Core config path allocated");

    let orchestrator = Orchestrator::new(
        profile,
        config.settings.clone(),
        Collaborators {
            builder: Arc::new(builder),
            core: Box::new(core),
            supervisor: Arc::new(GuardedProcessPool::default()),
            plugins: Arc::new(DirectoryResolver::new(config.plugin_dirs.clone())),
            adapters: Arc::new(AdapterRegistry::new()),
            page_host: None,
        },
    );

    if let Err(e) = orchestrator.init().await {
        error!(reason_code = e.reason_code(), error = %e, "Failed to initialize");
        return Err(e.into());
    }
    if let Err(e) = orchestrator.launch().await {
        error!(reason_code = e.reason_code(), error = %e, "Failed to launch");
        return Err(e.into());
    }

    info!(
        run_id = %orchestrator.run_id(),
        ports = ?orchestrator.ports().await,
        "Profile is running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    orchestrator.destroy().await;

    info!("hopchain stopped");
    Ok(())
}
