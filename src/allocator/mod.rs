//! Prefix allocators.
//!
//! Two strategies share the `PrefixAllocator` trait:
//!
//! - `CentralizedPrefixAllocator` hands out node prefixes by a flat linear
//!   scan of the seed prefix, and advertises the whole seed from every POP.
//! - `DeterministicPrefixAllocator` groups nodes into zones around POP sites,
//!   gives each zone power-of-two blocks of the seed, and advertises each
//!   zone's blocks from its POP nodes.
//!
//! Allocators keep their own ledgers and never hold on to the topology or
//! node config stores; both are passed to every call that needs them.

pub mod centralized;
pub mod deterministic;
pub mod partition;
pub mod zone;

use std::collections::{BTreeMap, BTreeSet};

use log::info;

use crate::config::{AllocParams, AllocatorConfig, AllocatorKind, PrefixAllocParams};
use crate::error::Result;
use crate::ip::CidrNetwork;
use crate::node_config::NodeConfigStore;
use crate::topology::{Link, Node, Site, TopologyStore};

// Re-export key types for easier access
pub use centralized::CentralizedPrefixAllocator;
pub use deterministic::DeterministicPrefixAllocator;
pub use zone::PrefixZone;

/// Operations every prefix allocation strategy supports.
///
/// The incremental hooks are called after the matching topology change has
/// been applied to the store: `add_node` once the node exists, `del_node`
/// once it is gone, `edit_node` and `edit_site` once the rename is done.
pub trait PrefixAllocator {
    /// Validated parameters in use
    fn alloc_params(&self) -> &AllocParams;

    /// Every allocated node prefix and the node that owns it
    fn allocated_prefixes(&self) -> BTreeMap<CidrNetwork, String>;

    /// Summary prefixes advertised per POP site
    fn zone_prefixes(&self) -> BTreeMap<String, BTreeSet<String>> {
        BTreeMap::new()
    }

    /// Give a newly added node a prefix. On success `node.prefix` holds the
    /// assigned prefix, if one was assigned.
    fn add_node(
        &mut self,
        node: &mut Node,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()>;

    /// Release a deleted node's prefix
    fn del_node(
        &mut self,
        node: &Node,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()>;

    /// Follow a node rename
    fn edit_node(&mut self, old_node: &Node, new_node: &Node, topology: &mut dyn TopologyStore) -> Result<()>;

    /// Make sure both endpoints of a new link have prefixes
    fn add_link(
        &mut self,
        link: &Link,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()>;

    /// Follow a site rename
    fn edit_site(&mut self, old_name: &str, new_site: &Site, topology: &mut dyn TopologyStore) -> Result<()>;

    /// Reallocate every prefix in the network from scratch
    fn allocate(&mut self, topology: &mut dyn TopologyStore, config: &mut dyn NodeConfigStore) -> Result<()>;

    /// Validate and switch to new parameters, then reallocate
    fn update_prefix_alloc_params(
        &mut self,
        params: &PrefixAllocParams,
        topology: &mut dyn TopologyStore,
        config: &mut dyn NodeConfigStore,
    ) -> Result<()>;
}

/// Build the allocator selected by `config`, allocating or restoring
/// prefixes for the current topology
pub fn create_allocator(
    config: &AllocatorConfig,
    topology: &mut dyn TopologyStore,
    node_config: &mut dyn NodeConfigStore,
) -> Result<Box<dyn PrefixAllocator>> {
    info!("Creating {:?} prefix allocator", config.allocator);
    let allocator: Box<dyn PrefixAllocator> = match config.allocator {
        AllocatorKind::Centralized => Box::new(CentralizedPrefixAllocator::new(
            &config.prefix_alloc_params,
            topology,
            node_config,
        )?),
        AllocatorKind::Deterministic => Box::new(DeterministicPrefixAllocator::with_headroom(
            &config.prefix_alloc_params,
            config.zone_headroom,
            topology,
            node_config,
        )?),
    };
    Ok(allocator)
}

/// Names of every site hosting at least one POP node
pub(crate) fn pop_site_names(topology: &dyn TopologyStore) -> BTreeSet<String> {
    topology
        .all_nodes()
        .into_iter()
        .filter(|node| node.pop_node)
        .map(|node| node.site_name)
        .collect()
}
