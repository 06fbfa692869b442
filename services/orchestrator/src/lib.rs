//! hopchain orchestrator library
//!
//! Brings up every backend a multi-hop proxy profile needs and tears all of
//! them down again as a unit. A profile expands into an ordered set of hops;
//! each hop is served by the shared proxy core, by a supervised external
//! process, or by an in-process protocol adapter.
//!
//! ## Lifecycle
//!
//! ```text
//! Orchestrator::init     build + classify + resolve plugins, no spawns
//! Orchestrator::launch   spawn backends in traversal order, start core
//! Orchestrator::destroy  idempotent best-effort teardown
//! ```
//!
//! ## Modules
//!
//! - `topology`: chain/balancer traversal and per-hop flags
//! - `registry`: protocol to backend strategy table and launch templates
//! - `orchestrator`: the state machine tying everything together
//! - `process`, `core`, `adapter`, `forwarder`: backend collaborators
//! - `builder`, `manifest`: configuration builders

pub mod adapter;
pub mod artifact;
pub mod builder;
pub mod config;
pub mod core;
pub mod error;
pub mod forwarder;
pub mod manifest;
pub mod orchestrator;
pub mod plugin;
pub mod process;
pub mod profile;
pub mod registry;
pub mod topology;

pub use error::{OrchestratorError, Result};
pub use orchestrator::{BackendHandle, BackendKind, Collaborators, Orchestrator, Phase};
