//! Error taxonomy for the orchestrator.
//!
//! Every variant is fatal to startup. By the time one reaches the caller of
//! `init` or `launch`, everything the failed attempt constructed has already
//! been released.

use thiserror::Error;

/// Orchestrator errors with stable reason codes.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Unsupported protocol, duplicate port, or an incompatible chain position.
    #[error("configuration error{}: {message}", port_suffix(.port))]
    Configuration { port: Option<u16>, message: String },

    /// A named external plugin binary is unavailable.
    #[error("plugin {plugin} unavailable: {message}")]
    PluginResolution { plugin: String, message: String },

    /// The config builder failed for a hop (or for the aggregate core config).
    #[error("config build failed{}: {message}", port_suffix(.port))]
    Build { port: Option<u16>, message: String },

    /// The process supervisor rejected or failed a launch.
    #[error("failed to spawn backend for port {port}: {message}")]
    Spawn { port: u16, message: String },

    /// An in-process adapter failed to launch.
    #[error("adapter launch failed for port {port}: {message}")]
    AdapterLaunch { port: u16, message: String },

    /// The proxy core rejected its configuration or failed to start.
    #[error("proxy core error: {0}")]
    Core(String),

    /// A lifecycle method was called in the wrong phase.
    #[error("invalid lifecycle transition: expected {expected}, orchestrator is {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },
}

fn port_suffix(port: &Option<u16>) -> String {
    match port {
        Some(port) => format!(" (port {port})"),
        None => String::new(),
    }
}

impl OrchestratorError {
    pub(crate) fn configuration(port: impl Into<Option<u16>>, message: impl Into<String>) -> Self {
        Self::Configuration {
            port: port.into(),
            message: message.into(),
        }
    }

    pub(crate) fn build(port: impl Into<Option<u16>>, err: impl std::fmt::Display) -> Self {
        Self::Build {
            port: port.into(),
            message: format!("{err:#}"),
        }
    }

    /// Standardized reason code for logs and status reporting.
    pub fn reason_code(&self) -> &'static str {
        match self {
            OrchestratorError::Configuration { .. } => "configuration_error",
            OrchestratorError::PluginResolution { .. } => "plugin_resolution_error",
            OrchestratorError::Build { .. } => "build_error",
            OrchestratorError::Spawn { .. } => "spawn_error",
            OrchestratorError::AdapterLaunch { .. } => "adapter_launch_error",
            OrchestratorError::Core(_) => "core_error",
            OrchestratorError::InvalidState { .. } => "invalid_state",
        }
    }

    /// The hop port this error is attributed to, if any.
    pub fn port(&self) -> Option<u16> {
        match self {
            OrchestratorError::Configuration { port, .. }
            | OrchestratorError::Build { port, .. } => {
                *port
            }
            OrchestratorError::Spawn { port, .. }
            | OrchestratorError::AdapterLaunch { port, .. } => {
                Some(*port)
            }
            _ => None,
        }
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
