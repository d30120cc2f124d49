//! Breadth-first search over the site adjacency graph.
//!
//! Two sites are adjacent when any link connects a node at one to a node at
//! the other. Hop counts are measured in sites, so all nodes at a site share
//! the same distance.

use std::collections::{BTreeMap, BTreeSet};

use super::store::TopologyStore;

/// Sites one hop away from `site_name`
pub fn adjacent_sites(topology: &dyn TopologyStore, site_name: &str) -> BTreeSet<String> {
    let mut adjacent = BTreeSet::new();
    let Some(node_names) = topology.node_names_by_site(site_name) else {
        return adjacent;
    };

    for node_name in &node_names {
        for link in topology.links_by_node(node_name) {
            if let Some(nbr) = topology.neighbor_node(node_name, &link.name) {
                if nbr.site_name != site_name {
                    adjacent.insert(nbr.site_name);
                }
            }
        }
    }
    adjacent
}

/// Hop count from `start_site` to every reachable site (including itself)
pub fn site_distances(topology: &dyn TopologyStore, start_site: &str) -> BTreeMap<String, usize> {
    let mut distances = BTreeMap::new();
    distances.insert(start_site.to_string(), 0);

    let mut frontier = vec![start_site.to_string()];
    let mut hops = 0;
    while !frontier.is_empty() {
        hops += 1;
        let mut next = Vec::new();
        for site in &frontier {
            for nbr in adjacent_sites(topology, site) {
                if !distances.contains_key(&nbr) {
                    distances.insert(nbr.clone(), hops);
                    next.push(nbr);
                }
            }
        }
        frontier = next;
    }
    distances
}

/// Hop count from `start_site` to every node reachable from it
pub fn node_distances(topology: &dyn TopologyStore, start_site: &str) -> BTreeMap<String, usize> {
    let mut distances = BTreeMap::new();
    for (site, hops) in site_distances(topology, start_site) {
        if let Some(node_names) = topology.node_names_by_site(&site) {
            for node_name in node_names {
                distances.insert(node_name, hops);
            }
        }
    }
    distances
}

/// The nearest site (by hop count) satisfying `is_target`, searching outward
/// from `start_site`. Equidistant matches resolve to the smallest name.
pub fn closest_site<F>(topology: &dyn TopologyStore, start_site: &str, is_target: F) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    let mut visited = BTreeSet::new();
    visited.insert(start_site.to_string());

    let mut frontier: BTreeSet<String> = visited.clone();
    while !frontier.is_empty() {
        if let Some(found) = frontier.iter().find(|site| is_target(site)) {
            return Some(found.clone());
        }

        let mut next = BTreeSet::new();
        for site in &frontier {
            for nbr in adjacent_sites(topology, site) {
                if visited.insert(nbr.clone()) {
                    next.insert(nbr);
                }
            }
        }
        frontier = next;
    }
    None
}
