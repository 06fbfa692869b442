//! Topology walker.
//!
//! Flattens the resolved chain/balancer index into an ordered list of hops.
//! The order is deterministic: ports are the join key between the build pass
//! and the launch pass, so both passes must see the same sequence.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::profile::ProxyProfile;

/// One entry of a chain or balancer group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub port: u16,
    pub profile: ProxyProfile,
}

/// A chain (each hop forwards to the next) or a balancer group (siblings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainGroup {
    #[serde(default)]
    pub balancer: bool,
    pub entries: Vec<ChainEntry>,
}

impl ChainGroup {
    pub fn chain(entries: Vec<ChainEntry>) -> Self {
        Self {
            balancer: false,
            entries,
        }
    }

    pub fn balancer(entries: Vec<ChainEntry>) -> Self {
        Self {
            balancer: true,
            entries,
        }
    }
}

/// A hop annotated with its position in the topology.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub port: u16,
    pub profile: ProxyProfile,

    /// Forwards to a next hop; false for chain tails and balancer members.
    pub need_chain: bool,

    /// Multiplexing should be requested from this hop's backend.
    pub mux: bool,

    /// Index of the owning group within the topology.
    pub group: usize,

    /// Index within the owning group.
    pub index: usize,
}

/// Walk the topology in order, annotating every entry.
///
/// Multiplexing is only requested where framing is not already nested:
/// balancer members and chain tails. Interior links of a multi-hop chain
/// never get it.
pub fn walk(groups: &[ChainGroup], enable_mux: bool) -> Result<Vec<Hop>> {
    let mut seen = HashSet::new();
    let mut hops = Vec::new();

    for (group, chain) in groups.iter().enumerate() {
        let len = chain.entries.len();
        for (index, entry) in chain.entries.iter().enumerate() {
            if !seen.insert(entry.port) {
                return Err(OrchestratorError::configuration(
                    entry.port,
                    "port is assigned to more than one hop",
                ));
            }

            let need_chain = !chain.balancer && index + 1 != len;
            let mux = enable_mux && (chain.balancer || !need_chain);

            hops.push(Hop {
                port: entry.port,
                profile: entry.profile.clone(),
                need_chain,
                mux,
                group,
                index,
            });
        }
    }

    Ok(hops)
}
