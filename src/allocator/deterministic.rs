//! Zone-based prefix allocation.
//!
//! Every node joins the zone of its nearest POP site. The seed prefix is
//! split among zones in power-of-two blocks sized for each zone plus some
//! headroom, so a zone can advertise a handful of summary prefixes instead
//! of one route per node. Zones are persisted to the topology and restored
//! on startup when they still describe the network correctly.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, error, info, warn};

use super::partition::{partition_prefix_space, PrefixZones};
use super::zone::PrefixZone;
use super::{pop_site_names, PrefixAllocator};
use crate::config::{AllocParams, PrefixAllocParams, DEFAULT_ZONE_HEADROOM};
use crate::error::{AllocError, Result};
use crate::ip::{in_subnet, network_to_string, nth_prefix, parse_network, CidrNetwork, PrefixTrie};
use crate::node_config::NodeConfigStore;
use crate::topology::site_graph::{closest_site, node_distances};
use crate::topology::{Link, Node, Site, TopologyStore, Zone};

/// Allocates node prefixes out of per-POP-site zones
#[derive(Debug, Clone)]
pub struct DeterministicPrefixAllocator {
    params: AllocParams,
    /// Spare node prefixes reserved for each zone on a full allocation
    zone_headroom: usize,
    zones: PrefixZones,
    node_to_zone: BTreeMap<String, String>,
}

impl DeterministicPrefixAllocator {
    /// Create an allocator with the default zone headroom
    pub fn new(
        params: &PrefixAllocParams,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<Self> {
        Self::with_headroom(params, DEFAULT_ZONE_HEADROOM, topology, config)
    }

    /// Create an allocator, restoring the zones saved in the topology if they
    /// are still valid and allocating from scratch otherwise
    pub fn with_headroom(
        params: &PrefixAllocParams,
        zone_headroom: usize,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<Self> {
        let mut allocator = Self {
            params: params.parse()?,
            zone_headroom,
            zones: PrefixZones::new(),
            node_to_zone: BTreeMap::new(),
        };

        match topology.prefix_alloc_zones() {
            Some(saved_zones) => match allocator.populate_zones_and_prefixes(&saved_zones, topology, config) {
                Ok(()) => info!("Found zones in topology, skipping allocation..."),
                Err(e) => {
                    info!(
                        "Deterministic prefix allocation is invalid ({}), re-allocating from scratch...",
                        e
                    );
                    allocator.allocate(topology, config)?;
                }
            },
            None => {
                info!("No zones found in topology, allocating prefixes for network...");
                allocator.allocate(topology, config)?;
            }
        }
        Ok(allocator)
    }

    /// Current zones keyed by POP site name
    pub fn zones(&self) -> &PrefixZones {
        &self.zones
    }

    /// The zone a node belongs to, if any
    pub fn zone_of(&self, node_name: &str) -> Option<&str> {
        self.node_to_zone.get(node_name).map(String::as_str)
    }

    // Restore

    fn populate_zones_and_prefixes(
        &mut self,
        saved_zones: &BTreeMap<String, Zone>,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()> {
        let pop_sites = pop_site_names(topology);
        let mut zones = PrefixZones::new();
        let mut node_to_zone = BTreeMap::new();
        let mut node_prefixes: BTreeMap<CidrNetwork, String> = BTreeMap::new();

        for (site_name, saved_zone) in saved_zones {
            if topology.site(site_name).is_none() {
                return Err(AllocError::UnknownEntity(format!("Site {} does not exist", site_name)));
            }
            if !pop_sites.contains(site_name) {
                warn!("Zone site name {} is not a pop site.", site_name);
            }

            let mut zone = PrefixZone::from_snapshot(saved_zone, &self.params)?;
            self.validate_zone(site_name, &zone, &zones)?;

            for node_name in &saved_zone.node_names {
                let node = topology
                    .node(node_name)
                    .ok_or_else(|| AllocError::UnknownEntity(format!("Invalid nodeName: {}", node_name)))?;
                if let Some(other) = node_to_zone.get(node_name) {
                    return Err(AllocError::InvalidPrefixAssignment(format!(
                        "Node {} is in both zone {} and zone {}",
                        node_name, other, site_name
                    )));
                }

                let prefix = self.validate_node_prefix(&node, &zone, &node_prefixes)?;
                zone.assign_node_prefix(node_name, prefix);
                node_prefixes.insert(prefix, node_name.clone());
                node_to_zone.insert(node_name.clone(), site_name.clone());
            }
            zones.insert(site_name.clone(), zone);
        }

        for node in topology.all_nodes().into_iter().filter(|node| node.pop_node) {
            if !node_to_zone.contains_key(&node.name) {
                return Err(AllocError::InvalidPrefixAssignment(format!(
                    "POP node {} is not in a zone",
                    node.name
                )));
            }
        }

        self.zones = zones;
        self.node_to_zone = node_to_zone;

        // Nodes added while the snapshot was not being kept up to date
        for mut node in topology.all_nodes() {
            if !self.node_to_zone.contains_key(&node.name) {
                info!("Node {} is missing from the saved zones, adding it", node.name);
                self.add_node(&mut node, topology, config)?;
            }
        }

        // Config may be stale if pop_node flags changed while we were down
        self.write_to_config(topology, config);
        Ok(())
    }

    /// Check a restored zone's prefixes against the seed, its node count and
    /// the zones restored before it
    fn validate_zone(&self, zone_name: &str, zone: &PrefixZone, restored: &PrefixZones) -> Result<()> {
        let seed_prefix = &self.params.seed_prefix;
        for zone_prefix in zone.zone_prefixes() {
            if !in_subnet(zone_prefix, seed_prefix) {
                return Err(AllocError::InvalidPrefixAssignment(format!(
                    "Invalid prefix ({}) in zone {} (not in subnet of network prefix {})",
                    network_to_string(zone_prefix),
                    zone_name,
                    self.params.seed_prefix_string()
                )));
            }

            let overlapping = restored.iter().find(|(_, other)| {
                other
                    .zone_prefixes()
                    .iter()
                    .any(|prefix| in_subnet(prefix, zone_prefix) || in_subnet(zone_prefix, prefix))
            });
            if let Some((other_name, _)) = overlapping {
                return Err(AllocError::InvalidPrefixAssignment(format!(
                    "Prefix ({}) in zone {} overlaps zone {}",
                    network_to_string(zone_prefix),
                    zone_name,
                    other_name
                )));
            }
        }

        if (zone.size() as u128) > zone.max_size() {
            return Err(AllocError::InvalidPrefixAssignment(format!(
                "Zone {} has more nodes ({}) than available prefix space ({})",
                zone_name,
                zone.size(),
                zone.max_size()
            )));
        }
        Ok(())
    }

    /// Check that a restored node's prefix fits its zone and is unused
    fn validate_node_prefix(
        &self,
        node: &Node,
        zone: &PrefixZone,
        assigned: &BTreeMap<CidrNetwork, String>,
    ) -> Result<CidrNetwork> {
        let prefix_str = node
            .prefix()
            .ok_or_else(|| AllocError::InvalidPrefixAssignment(format!("Node {} has no prefix", node.name)))?;

        let prefix = parse_network(prefix_str).map_err(|e| {
            AllocError::InvalidPrefixAssignment(format!("Invalid prefix ({}) for {}, err: {}", prefix_str, node.name, e))
        })?;

        if !zone.zone_prefixes().iter().any(|zone_prefix| in_subnet(&prefix, zone_prefix)) {
            return Err(AllocError::InvalidPrefixAssignment(format!(
                "Invalid prefix ({}) for {} (not in subnet of any zone prefixes: {})",
                prefix_str,
                node.name,
                zone.zone_prefix_strings().into_iter().collect::<Vec<_>>().join(",")
            )));
        }

        if prefix.prefix_len() != self.params.alloc_prefix_len {
            return Err(AllocError::InvalidPrefixAssignment(format!(
                "Invalid prefix ({}) for {} (length is not allocPrefixLen ({}))",
                prefix_str, node.name, self.params.alloc_prefix_len
            )));
        }

        if let Some(owner) = assigned.get(&prefix) {
            if *owner != node.name {
                return Err(AllocError::InvalidPrefixAssignment(format!(
                    "Invalid prefix ({}) for {} (prefix already allocated to node {})",
                    prefix_str, node.name, owner
                )));
            }
        }
        Ok(prefix)
    }

    // Full allocation

    /// Nearest POP site of every node that can reach one. Equidistant POP
    /// sites resolve to the smallest site name.
    fn group_nodes_to_pop_sites(topology: &dyn TopologyStore) -> BTreeMap<String, String> {
        let pop_sites = pop_site_names(topology);
        if pop_sites.is_empty() {
            warn!("There are no POP sites in the topology.");
            return BTreeMap::new();
        }

        // node name -> (hop count, POP site name)
        let mut closest: BTreeMap<String, (usize, String)> = BTreeMap::new();
        for pop_site in &pop_sites {
            for (node_name, hops) in node_distances(topology, pop_site) {
                match closest.get(&node_name) {
                    Some((best, _)) if *best <= hops => {}
                    _ => {
                        closest.insert(node_name, (hops, pop_site.clone()));
                    }
                }
            }
        }

        closest
            .into_iter()
            .map(|(node_name, (_, pop_site))| (node_name, pop_site))
            .collect()
    }

    /// Split the seed among the zones and give each zone concrete prefixes
    fn allocate_zone_prefixes(&mut self, topology: &mut dyn TopologyStore) -> Result<()> {
        let network_prefix_space = self.params.prefix_space();
        let seed_prefix = self.params.seed_prefix;

        for zone in self.zones.values_mut() {
            zone.clear_prefix_spaces();
        }
        self.zones = partition_prefix_space(&self.zones, network_prefix_space).ok_or_else(|| {
            error!("Unable to allocate enough prefix space to all zones!");
            AllocError::ExhaustedSpace(format!(
                "Zones need more than the {} prefixes in {}",
                network_prefix_space,
                self.params.seed_prefix_string()
            ))
        })?;

        // Prefix space -> prefix length: with allocPrefixLen 64, a space of
        // 32 is a /59
        let mut lengths_to_zones: BTreeMap<u8, Vec<String>> = BTreeMap::new();
        for (zone_name, zone) in &self.zones {
            for space in zone.allocated_prefix_spaces() {
                let ratio = network_prefix_space / space;
                let prefix_len = seed_prefix.prefix_len() + ratio.trailing_zeros() as u8;
                lengths_to_zones.entry(prefix_len).or_default().push(zone_name.clone());
            }
        }

        // Shortest first, or the trie can wedge itself
        let mut trie = PrefixTrie::new(seed_prefix.prefix_len());
        for (prefix_len, zone_names) in lengths_to_zones {
            for zone_name in zone_names {
                let zone_prefix = trie
                    .claim(prefix_len)
                    .and_then(|offset| nth_prefix(&seed_prefix, prefix_len, offset))
                    .ok_or_else(|| {
                        AllocError::ExhaustedSpace(format!(
                            "Unable to find an available /{} zone prefix for zone {}",
                            prefix_len, zone_name
                        ))
                    })?;
                debug!("Allocated {} to zone {}", network_to_string(&zone_prefix), zone_name);
                if let Some(zone) = self.zones.get_mut(&zone_name) {
                    zone.add_zone_prefix(zone_prefix);
                }
            }
        }

        self.set_topology_zones(topology);
        Ok(())
    }

    /// Give every zone member a node prefix from its zone
    fn allocate_node_prefixes(&mut self, topology: &mut dyn TopologyStore) -> Result<()> {
        let alloc_prefix_len = self.params.alloc_prefix_len;
        for zone in self.zones.values_mut() {
            let node_names: Vec<String> = zone.nodes().iter().cloned().collect();
            for node_name in node_names {
                let prefix = zone.next_unallocated_prefix(alloc_prefix_len).ok_or_else(|| {
                    AllocError::ExhaustedSpace(format!("No available prefixes to assign to {}", node_name))
                })?;
                zone.assign_node_prefix(&node_name, prefix);
                topology.set_node_prefix(&node_name, Some(&prefix));
                debug!("Assigned node {} prefix {}", node_name, network_to_string(&prefix));
            }
        }
        Ok(())
    }

    // Persistence

    /// Advertise each zone's prefixes, plus the seed, from its POP nodes and
    /// clear the override on every other node
    fn write_to_config(&self, topology: &dyn TopologyStore, config: &mut dyn NodeConfigStore) {
        let seed_prefix = self.params.seed_prefix_string();
        for node in topology.all_nodes() {
            if !node.pop_node {
                if let Err(e) = config.set_auto_node_specific_network_prefixes(&node.name, None) {
                    error!("Couldn't clear auto node specific network prefixes for node {}: {}", node.name, e);
                }
                continue;
            }

            let Some(zone) = self.node_to_zone.get(&node.name).and_then(|name| self.zones.get(name)) else {
                error!("POP node {} is not in a zone", node.name);
                continue;
            };

            let mut prefixes = zone.zone_prefix_strings();
            prefixes.insert(seed_prefix.clone());
            let prefixes = prefixes.into_iter().collect::<Vec<_>>().join(",");
            if let Err(e) = config.set_auto_node_specific_network_prefixes(&node.name, Some(&prefixes)) {
                error!(
                    "Couldn't write auto node specific network prefixes for popNode {}: {}",
                    node.name, e
                );
            }
        }
    }

    fn set_topology_zones(&self, topology: &mut dyn TopologyStore) {
        let zones = self
            .zones
            .iter()
            .map(|(name, zone)| (name.clone(), zone.to_snapshot()))
            .collect();
        topology.set_prefix_zones(zones);
    }

    fn find_closest_zone(&self, site_name: &str, topology: &dyn TopologyStore) -> Option<String> {
        closest_site(topology, site_name, |site| self.zones.contains_key(site))
    }
}

impl PrefixAllocator for DeterministicPrefixAllocator {
    fn alloc_params(&self) -> &AllocParams {
        &self.params
    }

    fn allocated_prefixes(&self) -> BTreeMap<CidrNetwork, String> {
        self.zones
            .values()
            .flat_map(|zone| zone.allocated_node_prefixes().clone())
            .collect()
    }

    fn zone_prefixes(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.zones
            .iter()
            .map(|(name, zone)| (name.clone(), zone.zone_prefix_strings()))
            .collect()
    }

    fn add_node(
        &mut self,
        node: &mut Node,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()> {
        if node.pop_node && !self.zones.contains_key(&node.site_name) {
            info!(
                "Added new pop node {} at site {}, reallocating all prefixes...",
                node.name, node.site_name
            );
            self.allocate(topology, config)?;
            node.prefix = topology.node(&node.name).and_then(|n| n.prefix);
            return Ok(());
        }

        if self.node_to_zone.contains_key(&node.name) {
            debug!("Node {} already has a zone", node.name);
            return Ok(());
        }

        let Some(zone_name) = self.find_closest_zone(&node.site_name, topology) else {
            error!(
                "Could not find an existing zone that {} belongs to. This node will be allocated a prefix when a link is added to it.",
                node.name
            );
            return Ok(());
        };

        let alloc_prefix_len = self.params.alloc_prefix_len;
        let zone = self
            .zones
            .get_mut(&zone_name)
            .ok_or_else(|| AllocError::UnknownEntity(format!("Zone {} does not exist", zone_name)))?;
        let next_prefix = if zone.is_full() {
            None
        } else {
            zone.next_unallocated_prefix(alloc_prefix_len)
        };
        let prefix = next_prefix.ok_or_else(|| {
            AllocError::ExhaustedSpace(format!(
                "No available prefixes available in zone {} to assign to node {}",
                zone_name, node.name
            ))
        })?;

        zone.add_node(&node.name);
        zone.assign_node_prefix(&node.name, prefix);
        self.node_to_zone.insert(node.name.clone(), zone_name.clone());
        topology.set_node_prefix(&node.name, Some(&prefix));
        node.prefix = Some(network_to_string(&prefix));
        debug!(
            "Assigned node {} in zone {} prefix {}",
            node.name,
            zone_name,
            network_to_string(&prefix)
        );

        self.set_topology_zones(topology);
        self.write_to_config(topology, config);
        Ok(())
    }

    fn del_node(
        &mut self,
        node: &Node,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()> {
        if node.pop_node && self.zones.contains_key(&node.site_name) {
            if let Err(e) = config.set_auto_node_specific_network_prefixes(&node.name, None) {
                error!("Couldn't clear auto node specific network prefixes for node {}: {}", node.name, e);
            }

            let site_has_other_pop_nodes = topology
                .node_names_by_site(&node.site_name)
                .unwrap_or_default()
                .iter()
                .filter(|name| **name != node.name)
                .filter_map(|name| topology.node(name))
                .any(|site_node| site_node.pop_node);
            if !site_has_other_pop_nodes {
                info!(
                    "Deleted last pop node at site {}, reallocating all prefixes...",
                    node.site_name
                );
                return self.allocate(topology, config);
            }
        }

        let Some(zone_name) = self.node_to_zone.remove(&node.name) else {
            error!("Node {} is not in a zone", node.name);
            return Ok(());
        };

        if let Some(zone) = self.zones.get_mut(&zone_name) {
            let prefix = node.prefix().and_then(|prefix| parse_network(prefix).ok());
            if zone.del_node(&node.name, prefix.as_ref()) {
                info!("Deleted prefix for node: {} prefix: {:?}", node.name, node.prefix());
            } else {
                error!("Error deleting prefix for node {}", node.name);
            }
        }
        self.set_topology_zones(topology);
        Ok(())
    }

    fn edit_node(&mut self, old_node: &Node, new_node: &Node, topology: &mut dyn TopologyStore) -> Result<()> {
        let Some(zone_name) = self.node_to_zone.get(&old_node.name).cloned() else {
            error!("Node {} is not in a zone", old_node.name);
            return Ok(());
        };

        let has_new_name = !new_node.name.is_empty() && new_node.name != old_node.name;
        if has_new_name {
            if let Some(zone) = self.zones.get_mut(&zone_name) {
                zone.edit_node_name(&old_node.name, &new_node.name);
            }
            self.node_to_zone.remove(&old_node.name);
            self.node_to_zone.insert(new_node.name.clone(), zone_name);
            self.set_topology_zones(topology);
        }

        let pop_node_changed = old_node.site_name == new_node.site_name && old_node.pop_node != new_node.pop_node;
        if pop_node_changed {
            error!(
                "Changing pop_node status is currently unsupported with Deterministic Prefix Allocation enabled. \
                 Please delete and re-add the node or trigger a prefix reallocation."
            );
        }
        Ok(())
    }

    fn add_link(
        &mut self,
        link: &Link,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()> {
        for endpoint in [&link.a_node_name, &link.z_node_name] {
            if self.node_to_zone.contains_key(endpoint) {
                continue;
            }
            let mut node = topology.node(endpoint).ok_or_else(|| {
                AllocError::UnknownEntity(format!("Node {} of link {} does not exist", endpoint, link.name))
            })?;
            self.add_node(&mut node, topology, config)?;
        }
        Ok(())
    }

    fn edit_site(&mut self, old_name: &str, new_site: &Site, topology: &mut dyn TopologyStore) -> Result<()> {
        if new_site.name.is_empty() || new_site.name == old_name {
            return Ok(());
        }
        debug!("Changing site with name {} to {}", old_name, new_site.name);

        if let Some(zone) = self.zones.remove(old_name) {
            self.zones.insert(new_site.name.clone(), zone);
        }
        for zone_name in self.node_to_zone.values_mut() {
            if zone_name == old_name {
                *zone_name = new_site.name.clone();
            }
        }

        self.set_topology_zones(topology);
        Ok(())
    }

    fn allocate(&mut self, topology: &mut dyn TopologyStore, config: &mut dyn NodeConfigStore) -> Result<()> {
        let node_to_pop_site = Self::group_nodes_to_pop_sites(topology);

        self.zones.clear();
        self.node_to_zone.clear();
        for (node_name, pop_site) in node_to_pop_site {
            self.zones.entry(pop_site.clone()).or_default().add_node(&node_name);
            self.node_to_zone.insert(node_name, pop_site);
        }

        for (site_name, zone) in self.zones.iter_mut() {
            let allocation_size = zone.size().saturating_add(self.zone_headroom);
            zone.set_allocation_size_override(allocation_size);
            debug!(
                "POP SITE `{}` has `{}` nodes with allocation size: `{}`",
                site_name,
                zone.size(),
                allocation_size
            );
        }

        // Unreachable nodes keep no prefix so nothing can collide with them
        for node in topology.all_nodes() {
            if !self.node_to_zone.contains_key(&node.name) && node.prefix().is_some() {
                warn!("Node {} cannot reach a POP site, clearing its prefix", node.name);
                topology.set_node_prefix(&node.name, None);
            }
        }

        if self.zones.is_empty() {
            self.set_topology_zones(topology);
        } else {
            self.allocate_zone_prefixes(topology)?;
            self.allocate_node_prefixes(topology)?;
        }

        self.write_to_config(topology, config);
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
