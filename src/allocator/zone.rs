//! Per-zone bookkeeping for the deterministic allocator.
//!
//! A `PrefixZone` groups the nodes closest to one POP site. It tracks the
//! prefix spaces (counts of node prefixes, each a power of two) granted to
//! the zone, the concrete zone prefixes backing those spaces, and which node
//! owns each node prefix carved out of them.

use std::collections::{BTreeMap, BTreeSet};

use log::{error, warn};

use crate::config::AllocParams;
use crate::error::{AllocError, Result};
use crate::ip::{network_to_string, nth_prefix, parse_network, prefix_space, CidrNetwork};
use crate::topology::Zone;

/// A group of nodes sharing a POP site's summary prefixes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixZone {
    /// Minimum number of node prefixes to provision for; None means size()
    allocation_size_override: Option<usize>,
    nodes: BTreeSet<String>,
    /// Distinct powers of two
    allocated_prefix_spaces: BTreeSet<u128>,
    allocated_zone_prefixes: BTreeSet<CidrNetwork>,
    allocated_node_prefixes: BTreeMap<CidrNetwork, String>,
}

impl PrefixZone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a zone's nodes, zone prefixes and prefix spaces from its
    /// persisted snapshot. Node prefixes are assigned separately.
    pub fn from_snapshot(zone: &Zone, params: &AllocParams) -> Result<Self> {
        let mut prefix_zone = Self {
            nodes: zone.node_names.clone(),
            ..Default::default()
        };

        for prefix in &zone.zone_prefixes {
            let network = parse_network(prefix).map_err(|e| {
                AllocError::InvalidPrefixAssignment(format!("Invalid zone prefix '{}': {}", prefix, e))
            })?;
            let space = params.prefix_space_of(&network).ok_or_else(|| {
                AllocError::InvalidPrefixAssignment(format!(
                    "Zone prefix {} is longer than allocPrefixLen ({})",
                    prefix, params.alloc_prefix_len
                ))
            })?;
            prefix_zone.allocated_zone_prefixes.insert(network);
            prefix_zone.add_to_prefix_space(space);
        }
        Ok(prefix_zone)
    }

    /// Persisted form of this zone
    pub fn to_snapshot(&self) -> Zone {
        Zone {
            node_names: self.nodes.clone(),
            zone_prefixes: self.zone_prefix_strings(),
        }
    }

    /// How many more node prefixes this zone still needs; zero or negative
    /// when the zone is adequately provisioned
    pub fn remaining(&self) -> i128 {
        let wanted = i128::try_from(self.allocation_size()).unwrap_or(i128::MAX);
        let granted = i128::try_from(self.max_size()).unwrap_or(i128::MAX);
        wanted - granted
    }

    /// Number of node prefixes this zone can hand out
    pub fn max_size(&self) -> u128 {
        self.allocated_prefix_spaces
            .iter()
            .fold(0u128, |total, space| total.saturating_add(*space))
    }

    /// Number of nodes in this zone
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Whether every node prefix the zone's spaces can hold is already used
    pub fn is_full(&self) -> bool {
        self.size() as u128 >= self.max_size()
    }

    pub fn allocation_size(&self) -> usize {
        self.allocation_size_override.unwrap_or_else(|| self.size())
    }

    pub fn set_allocation_size_override(&mut self, size: usize) {
        self.allocation_size_override = Some(size);
    }

    pub fn allocated_prefix_spaces(&self) -> &BTreeSet<u128> {
        &self.allocated_prefix_spaces
    }

    pub fn zone_prefixes(&self) -> &BTreeSet<CidrNetwork> {
        &self.allocated_zone_prefixes
    }

    pub fn zone_prefix_strings(&self) -> BTreeSet<String> {
        self.allocated_zone_prefixes.iter().map(network_to_string).collect()
    }

    pub fn nodes(&self) -> &BTreeSet<String> {
        &self.nodes
    }

    pub fn allocated_node_prefixes(&self) -> &BTreeMap<CidrNetwork, String> {
        &self.allocated_node_prefixes
    }

    /// Returns false if the node was already in the zone
    pub fn add_node(&mut self, node_name: &str) -> bool {
        self.nodes.insert(node_name.to_string())
    }

    /// Add a prefix space, consolidating equal blocks: adding 64 when 64 is
    /// already present leaves a single 128 instead.
    pub fn add_to_prefix_space(&mut self, mut space: u128) {
        while self.allocated_prefix_spaces.remove(&space) {
            space = space.saturating_mul(2);
        }
        self.allocated_prefix_spaces.insert(space);
    }

    pub fn clear_prefix_spaces(&mut self) {
        self.allocated_prefix_spaces.clear();
    }

    /// Returns false if the prefix was already a zone prefix
    pub fn add_zone_prefix(&mut self, zone_prefix: CidrNetwork) -> bool {
        self.allocated_zone_prefixes.insert(zone_prefix)
    }

    /// First node prefix not yet handed out, scanning zone prefixes in order
    /// and the `/alloc_prefix_len` subnets of each by index
    pub fn next_unallocated_prefix(&self, alloc_prefix_len: u8) -> Option<CidrNetwork> {
        self.allocated_zone_prefixes.iter().find_map(|zone_prefix| {
            let count = prefix_space(zone_prefix.prefix_len(), alloc_prefix_len)?;
            (0..count)
                .filter_map(|index| nth_prefix(zone_prefix, alloc_prefix_len, index))
                .find(|prefix| !self.allocated_node_prefixes.contains_key(prefix))
        })
    }

    /// Record `prefix` as owned by `node_name`, overwriting any owner
    pub fn assign_node_prefix(&mut self, node_name: &str, prefix: CidrNetwork) {
        self.allocated_node_prefixes.insert(prefix, node_name.to_string());
    }

    /// Remove a node and its prefix. Returns false (after logging) if either
    /// was missing.
    pub fn del_node(&mut self, node_name: &str, prefix: Option<&CidrNetwork>) -> bool {
        let node_removed = self.nodes.remove(node_name);
        if !node_removed {
            error!("Node {} not in zone nodes", node_name);
        }

        let prefix_removed = match prefix {
            Some(prefix) => {
                let removed = self.allocated_node_prefixes.remove(prefix).is_some();
                if !removed {
                    error!("Prefix {} not in zone node prefixes", network_to_string(prefix));
                }
                removed
            }
            None => {
                // Fall back to whatever prefix the ledger has for this node
                let owned: Vec<CidrNetwork> = self
                    .allocated_node_prefixes
                    .iter()
                    .filter(|(_, owner)| owner.as_str() == node_name)
                    .map(|(prefix, _)| *prefix)
                    .collect();
                for prefix in &owned {
                    self.allocated_node_prefixes.remove(prefix);
                }
                !owned.is_empty()
            }
        };

        node_removed && prefix_removed
    }

    /// Move a node's membership and prefix ownership to a new name. Returns
    /// false (after logging) if the old name is not in the zone.
    pub fn edit_node_name(&mut self, old_name: &str, new_name: &str) -> bool {
        if !self.nodes.remove(old_name) {
            error!("Node {} not in zone nodes", old_name);
            return false;
        }
        self.nodes.insert(new_name.to_string());

        let mut found = false;
        for owner in self.allocated_node_prefixes.values_mut() {
            if owner == old_name {
                *owner = new_name.to_string();
                found = true;
            }
        }
        if !found {
            warn!("No node prefix found for renamed node {}", old_name);
        }
        true
    }
}
