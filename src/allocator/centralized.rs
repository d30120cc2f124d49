//! Flat prefix allocation over the whole seed prefix.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, error, info, warn};

use super::{pop_site_names, PrefixAllocator};
use crate::config::{AllocParams, PrefixAllocParams};
use crate::error::{AllocError, Result};
use crate::ip::{in_subnet, network_to_string, nth_prefix, parse_network, CidrNetwork};
use crate::node_config::NodeConfigStore;
use crate::topology::{Link, Node, Site, TopologyStore};

/// Assigns node prefixes by scanning the seed prefix's subnets in index
/// order. Every POP node advertises the whole seed prefix.
#[derive(Debug, Clone)]
pub struct CentralizedPrefixAllocator {
    params: AllocParams,
    prefix_to_node: BTreeMap<CidrNetwork, String>,
    /// Sites with POP nodes as of the last summary route write
    pop_sites: BTreeSet<String>,
}

impl CentralizedPrefixAllocator {
    /// Validate `params`, keep every valid prefix already on the topology's
    /// nodes and allocate prefixes for the rest
    pub fn new(
        params: &PrefixAllocParams,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<Self> {
        let mut allocator = Self {
            params: params.parse()?,
            prefix_to_node: BTreeMap::new(),
            pop_sites: BTreeSet::new(),
        };
        allocator.populate_prefixes(topology)?;
        allocator.set_summary_route(topology, config);
        Ok(allocator)
    }

    fn populate_prefixes(&mut self, topology: &mut dyn TopologyStore) -> Result<()> {
        self.prefix_to_node.clear();

        // Keep existing prefixes first so new ones never collide with them
        let mut unassigned = Vec::new();
        for node in topology.all_nodes() {
            match self.validate_existing_prefix(&node)? {
                Some(prefix) => {
                    self.prefix_to_node.insert(prefix, node.name);
                }
                None => unassigned.push(node.name),
            }
        }

        for node_name in unassigned {
            let prefix = self.next_unallocated_prefix()?;
            self.assign_prefix_to_node(&node_name, prefix, topology);
        }
        Ok(())
    }

    /// Check a node's current prefix.
    ///
    /// Returns the prefix to keep, or None when the node needs a fresh one:
    /// either it has no prefix or its prefix lies outside the seed prefix.
    fn validate_existing_prefix(&self, node: &Node) -> Result<Option<CidrNetwork>> {
        let Some(prefix_str) = node.prefix() else {
            return Ok(None);
        };

        let prefix = parse_network(prefix_str).map_err(|e| {
            let message = format!("Invalid prefix ({}) for {}, err: {}", prefix_str, node.name, e);
            error!("{}", message);
            AllocError::InvalidPrefixAssignment(message)
        })?;

        if !in_subnet(&prefix, &self.params.seed_prefix) {
            error!(
                "Invalid prefix ({}) for {} (not in subnet of network prefix {}). Allocating a different prefix for this node...",
                prefix_str,
                node.name,
                self.params.seed_prefix_string()
            );
            return Ok(None);
        }

        if prefix.prefix_len() != self.params.alloc_prefix_len {
            let message = format!(
                "Invalid prefix ({}) for {} (length is not allocPrefixLen ({}))",
                prefix_str, node.name, self.params.alloc_prefix_len
            );
            error!("{}", message);
            return Err(AllocError::InvalidPrefixAssignment(message));
        }

        if let Some(owner) = self.prefix_to_node.get(&prefix) {
            if *owner != node.name {
                let message = format!(
                    "Invalid prefix ({}) for {} (prefix already allocated to node {})",
                    prefix_str, node.name, owner
                );
                error!("{}", message);
                return Err(AllocError::InvalidPrefixAssignment(message));
            }
        }

        Ok(Some(prefix))
    }

    /// Lowest-index `/allocPrefixLen` subnet of the seed not in the ledger
    fn next_unallocated_prefix(&self) -> Result<CidrNetwork> {
        let seed_prefix = &self.params.seed_prefix;
        let alloc_prefix_len = self.params.alloc_prefix_len;

        (0..self.params.prefix_space())
            .filter_map(|index| nth_prefix(seed_prefix, alloc_prefix_len, index))
            .find(|prefix| !self.prefix_to_node.contains_key(prefix))
            .ok_or_else(|| {
                AllocError::ExhaustedSpace(format!(
                    "No available prefixes in {}",
                    self.params.seed_prefix_string()
                ))
            })
    }

    /// Prefix the ledger holds for `node_name`
    fn prefix_of(&self, node_name: &str) -> Option<CidrNetwork> {
        self.prefix_to_node
            .iter()
            .find(|(_, owner)| *owner == node_name)
            .map(|(prefix, _)| *prefix)
    }

    fn assign_prefix_to_node(&mut self, node_name: &str, prefix: CidrNetwork, topology: &mut dyn TopologyStore) {
        debug!("Assigned node {} prefix {}", node_name, network_to_string(&prefix));
        self.prefix_to_node.insert(prefix, node_name.to_string());
        topology.set_node_prefix(node_name, Some(&prefix));
    }

    /// Advertise the seed prefix from every POP node
    fn set_summary_route(&mut self, topology: &dyn TopologyStore, config: &mut dyn NodeConfigStore) {
        let seed_prefix = self.params.seed_prefix_string();
        for node in topology.all_nodes().into_iter().filter(|node| node.pop_node) {
            if let Err(e) = config.set_auto_node_specific_network_prefixes(&node.name, Some(&seed_prefix)) {
                error!(
                    "Unable to write network prefix {} to node {} config: {}",
                    seed_prefix, node.name, e
                );
            }
        }
        self.pop_sites = pop_site_names(topology);
    }
}

impl PrefixAllocator for CentralizedPrefixAllocator {
    fn alloc_params(&self) -> &AllocParams {
        &self.params
    }

    fn allocated_prefixes(&self) -> BTreeMap<CidrNetwork, String> {
        self.prefix_to_node.clone()
    }

    fn zone_prefixes(&self) -> BTreeMap<String, BTreeSet<String>> {
        let seed_prefix = self.params.seed_prefix_string();
        self.pop_sites
            .iter()
            .map(|site| (site.clone(), BTreeSet::from([seed_prefix.clone()])))
            .collect()
    }

    fn add_node(
        &mut self,
        node: &mut Node,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()> {
        if let Some(prefix) = self.prefix_of(&node.name) {
            debug!("Node {} already has prefix {}", node.name, network_to_string(&prefix));
            topology.set_node_prefix(&node.name, Some(&prefix));
            node.prefix = Some(network_to_string(&prefix));
            return Ok(());
        }

        let prefix = match self.validate_existing_prefix(node)? {
            Some(prefix) => prefix,
            None => self.next_unallocated_prefix()?,
        };
        self.assign_prefix_to_node(&node.name, prefix, topology);
        node.prefix = Some(network_to_string(&prefix));
        self.set_summary_route(topology, config);
        Ok(())
    }

    fn del_node(
        &mut self,
        node: &Node,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()> {
        if node.pop_node {
            if let Err(e) = config.set_auto_node_specific_network_prefixes(&node.name, None) {
                error!("Unable to clear network prefix of node {} config: {}", node.name, e);
            }
        }

        if let Some(prefix_str) = node.prefix() {
            let owned = parse_network(prefix_str)
                .ok()
                .filter(|prefix| self.prefix_to_node.get(prefix) == Some(&node.name));
            match owned {
                Some(prefix) => {
                    self.prefix_to_node.remove(&prefix);
                }
                None => warn!(
                    "Node `{}` with prefix `{}` does not exist in the allocated prefixes",
                    node.name, prefix_str
                ),
            }
        }

        self.set_summary_route(topology, config);
        Ok(())
    }

    fn edit_node(&mut self, old_node: &Node, new_node: &Node, topology: &mut dyn TopologyStore) -> Result<()> {
        let has_new_name = !new_node.name.is_empty() && new_node.name != old_node.name;
        if has_new_name {
            for owner in self.prefix_to_node.values_mut() {
                if *owner == old_node.name {
                    *owner = new_node.name.clone();
                }
            }
        }
        self.pop_sites = pop_site_names(topology);
        Ok(())
    }

    fn add_link(
        &mut self,
        _link: &Link,
        _topology: &mut dyn TopologyStore,
        _config: &mut dyn NodeConfigStore,
    ) -> Result<()> {
        Ok(())
    }

    fn edit_site(&mut self, old_name: &str, new_site: &Site, _topology: &mut dyn TopologyStore) -> Result<()> {
        if !new_site.name.is_empty() && self.pop_sites.remove(old_name) {
            self.pop_sites.insert(new_site.name.clone());
        }
        Ok(())
    }

    fn allocate(&mut self, topology: &mut dyn TopologyStore, config: &mut dyn NodeConfigStore) -> Result<()> {
        info!("Allocating prefixes for all nodes in {}", self.params.seed_prefix_string());
        self.prefix_to_node.clear();
        for node in topology.all_nodes() {
            let prefix = self.next_unallocated_prefix()?;
            self.assign_prefix_to_node(&node.name, prefix, topology);
        }
        self.set_summary_route(topology, config);
        Ok(())
    }

    fn update_prefix_alloc_params(
        &mut self,
        params: &PrefixAllocParams,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()> {
        self.params = params.parse()?;
        self.allocate(topology, config)
    }
}
