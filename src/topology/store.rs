//! Topology store interface and an in-memory implementation.
//!
//! Allocators never own topology data. They read it through the
//! `TopologyStore` trait and write back only node prefixes and the prefix
//! zone snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::types::{Link, Node, Site, Zone};
use crate::ip::{network_to_string, CidrNetwork};

/// Read/write access to the network topology needed by the allocators
pub trait TopologyStore {
    /// All nodes, ordered by name
    fn all_nodes(&self) -> Vec<Node>;

    /// All links, ordered by name
    fn all_links(&self) -> Vec<Link>;

    fn node(&self, name: &str) -> Option<Node>;

    fn site(&self, name: &str) -> Option<Site>;

    /// Names of the nodes at a site, or None if no node lives there
    fn node_names_by_site(&self, site_name: &str) -> Option<BTreeSet<String>>;

    /// Links with `node_name` as an endpoint
    fn links_by_node(&self, node_name: &str) -> Vec<Link>;

    /// The node on the other end of `link_name` from `node_name`
    fn neighbor_node(&self, node_name: &str, link_name: &str) -> Option<Node>;

    /// Commit a node's allocated prefix (None clears it)
    fn set_node_prefix(&mut self, node_name: &str, prefix: Option<&CidrNetwork>);

    /// Persist the deterministic allocator's zone snapshot
    fn set_prefix_zones(&mut self, zones: BTreeMap<String, Zone>);

    /// Saved zone snapshot, if one was ever written
    fn prefix_alloc_zones(&self) -> Option<BTreeMap<String, Zone>>;
}

/// On-disk layout of a topology file
#[derive(Debug, Default, Serialize, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    sites: Vec<Site>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prefix_alloc_zones: Option<BTreeMap<String, Zone>>,
}

/// Name-keyed in-memory topology
#[derive(Debug, Clone, Default)]
pub struct MeshTopology {
    pub name: String,
    nodes: BTreeMap<String, Node>,
    links: BTreeMap<String, Link>,
    sites: BTreeMap<String, Site>,
    prefix_alloc_zones: Option<BTreeMap<String, Zone>>,
}

impl MeshTopology {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Build a topology from sites, nodes and links, validating references
    pub fn from_parts(name: &str, sites: Vec<Site>, nodes: Vec<Node>, links: Vec<Link>) -> Result<Self> {
        let mut topology = Self::new(name);
        for site in sites {
            topology.add_site(site).map_err(|e| eyre!(e))?;
        }
        for node in nodes {
            topology.add_node(node).map_err(|e| eyre!(e))?;
        }
        for link in links {
            topology.add_link(link).map_err(|e| eyre!(e))?;
        }
        Ok(topology)
    }

    /// Parse a topology from its JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        let file: TopologyFile = serde_json::from_str(json).wrap_err("Failed to parse topology JSON")?;
        let mut topology = Self::from_parts(&file.name, file.sites, file.nodes, file.links)?;
        topology.prefix_alloc_zones = file.prefix_alloc_zones;
        Ok(topology)
    }

    /// Serialize the topology, including any zone snapshot, to JSON
    pub fn to_json(&self) -> Result<String> {
        let file = TopologyFile {
            name: self.name.clone(),
            nodes: self.nodes.values().cloned().collect(),
            links: self.links.values().cloned().collect(),
            sites: self.sites.values().cloned().collect(),
            prefix_alloc_zones: self.prefix_alloc_zones.clone(),
        };
        serde_json::to_string_pretty(&file).wrap_err("Failed to serialize topology")
    }

    /// Load a topology file from disk
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading topology from: {:?}", path);
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read topology file '{}'", path.display()))?;
        Self::from_json(&content)
    }

    /// Write the topology to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        fs::write(path, json).wrap_err_with(|| format!("Failed to write topology file '{}'", path.display()))
    }

    pub fn add_site(&mut self, site: Site) -> std::result::Result<(), String> {
        if self.sites.contains_key(&site.name) {
            return Err(format!("Site {} already exists", site.name));
        }
        self.sites.insert(site.name.clone(), site);
        Ok(())
    }

    pub fn add_node(&mut self, node: Node) -> std::result::Result<(), String> {
        if self.nodes.contains_key(&node.name) {
            return Err(format!("Node {} already exists", node.name));
        }
        if !self.sites.contains_key(&node.site_name) {
            return Err(format!("Site {} does not exist for node {}", node.site_name, node.name));
        }
        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    pub fn add_link(&mut self, link: Link) -> std::result::Result<(), String> {
        for endpoint in [&link.a_node_name, &link.z_node_name] {
            if !self.nodes.contains_key(endpoint) {
                return Err(format!("Link {} references unknown node {}", link.name, endpoint));
            }
        }
        if link.a_node_name == link.z_node_name {
            return Err(format!("Link {} connects node {} to itself", link.name, link.a_node_name));
        }
        if self.links.contains_key(&link.name) {
            return Err(format!("Link {} already exists", link.name));
        }
        self.links.insert(link.name.clone(), link);
        Ok(())
    }

    /// Remove a node and every link attached to it
    pub fn del_node(&mut self, name: &str) -> std::result::Result<Node, String> {
        let node = self.nodes.remove(name).ok_or_else(|| format!("Node {} does not exist", name))?;
        self.links.retain(|_, link| link.other_end(name).is_none());
        Ok(node)
    }

    pub fn del_link(&mut self, node_a: &str, node_z: &str) -> std::result::Result<Link, String> {
        let name = Link::between(node_a, node_z).name;
        self.links.remove(&name).ok_or_else(|| format!("Link {} does not exist", name))
    }

    /// Remove an empty site
    pub fn del_site(&mut self, name: &str) -> std::result::Result<Site, String> {
        if self.nodes.values().any(|node| node.site_name == name) {
            return Err(format!("Site {} still has nodes", name));
        }
        self.sites.remove(name).ok_or_else(|| format!("Site {} does not exist", name))
    }

    /// Rename a node, rewriting the links that reference it
    pub fn rename_node(&mut self, old_name: &str, new_name: &str) -> std::result::Result<(), String> {
        if self.nodes.contains_key(new_name) {
            return Err(format!("Node {} already exists", new_name));
        }
        let mut node = self.nodes.remove(old_name).ok_or_else(|| format!("Node {} does not exist", old_name))?;
        node.name = new_name.to_string();
        self.nodes.insert(new_name.to_string(), node);

        let renamed: Vec<Link> = self
            .links
            .values()
            .filter_map(|link| {
                let other = link.other_end(old_name)?;
                Some(Link::between(new_name, other))
            })
            .collect();
        self.links.retain(|_, link| link.other_end(old_name).is_none());
        for link in renamed {
            self.links.insert(link.name.clone(), link);
        }
        Ok(())
    }

    /// Rename a site, moving its nodes along with it
    pub fn rename_site(&mut self, old_name: &str, new_name: &str) -> std::result::Result<(), String> {
        if self.sites.contains_key(new_name) {
            return Err(format!("Site {} already exists", new_name));
        }
        let mut site = self.sites.remove(old_name).ok_or_else(|| format!("Site {} does not exist", old_name))?;
        site.name = new_name.to_string();
        self.sites.insert(new_name.to_string(), site);
        for node in self.nodes.values_mut().filter(|node| node.site_name == old_name) {
            node.site_name = new_name.to_string();
        }
        Ok(())
    }
}

impl TopologyStore for MeshTopology {
    fn all_nodes(&self) -> Vec<Node> {
        self.nodes.values().cloned().collect()
    }

    fn all_links(&self) -> Vec<Link> {
        self.links.values().cloned().collect()
    }

    fn node(&self, name: &str) -> Option<Node> {
        self.nodes.get(name).cloned()
    }

    fn site(&self, name: &str) -> Option<Site> {
        self.sites.get(name).cloned()
    }

    fn node_names_by_site(&self, site_name: &str) -> Option<BTreeSet<String>> {
        let names: BTreeSet<String> = self
            .nodes
            .values()
            .filter(|node| node.site_name == site_name)
            .map(|node| node.name.clone())
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(names)
        }
    }

    fn links_by_node(&self, node_name: &str) -> Vec<Link> {
        self.links
            .values()
            .filter(|link| link.other_end(node_name).is_some())
            .cloned()
            .collect()
    }

    fn neighbor_node(&self, node_name: &str, link_name: &str) -> Option<Node> {
        let link = self.links.get(link_name)?;
        let other = link.other_end(node_name)?;
        self.nodes.get(other).cloned()
    }

    fn set_node_prefix(&mut self, node_name: &str, prefix: Option<&CidrNetwork>) {
        match self.nodes.get_mut(node_name) {
            Some(node) => {
                node.prefix = prefix.map(network_to_string);
                debug!("Set prefix of node {} to {:?}", node_name, node.prefix);
            }
            None => warn!("Cannot set prefix of unknown node {}", node_name),
        }
    }

    fn set_prefix_zones(&mut self, zones: BTreeMap<String, Zone>) {
        self.prefix_alloc_zones = Some(zones);
    }

    fn prefix_alloc_zones(&self) -> Option<BTreeMap<String, Zone>> {
        self.prefix_alloc_zones.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::parse_network;

    fn sample() -> MeshTopology {
        MeshTopology::from_parts(
            "test",
            vec![Site::new("A"), Site::new("B")],
            vec![
                Node::new("node-1", "A", true),
                Node::new("node-2", "A", false),
                Node::new("node-3", "B", false),
            ],
            vec![Link::between("node-2", "node-3")],
        )
        .unwrap()
    }

    #[test]
    fn test_site_and_neighbor_lookups() {
        let topology = sample();
        let names = topology.node_names_by_site("A").unwrap();
        assert_eq!(names.len(), 2);
        assert!(topology.node_names_by_site("missing").is_none());

        let links = topology.links_by_node("node-3");
        assert_eq!(links.len(), 1);
        let nbr = topology.neighbor_node("node-3", &links[0].name).unwrap();
        assert_eq!(nbr.name, "node-2");
        assert!(topology.neighbor_node("node-1", &links[0].name).is_none());
    }

    #[test]
    fn test_reject_dangling_references() {
        let mut topology = sample();
        assert!(topology.add_node(Node::new("node-9", "Z", false)).is_err());
        assert!(topology.add_link(Link::between("node-1", "node-9")).is_err());
        assert!(topology.del_site("A").is_err());
    }

    #[test]
    fn test_rename_node_rewrites_links() {
        let mut topology = sample();
        topology.rename_node("node-2", "new-node-2").unwrap();
        assert!(topology.node("node-2").is_none());
        let links = topology.links_by_node("new-node-2");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].other_end("new-node-2"), Some("node-3"));
        assert!(topology.links_by_node("node-2").is_empty());
    }

    #[test]
    fn test_rename_site_moves_nodes() {
        let mut topology = sample();
        topology.rename_site("B", "new-B").unwrap();
        assert!(topology.site("B").is_none());
        assert_eq!(topology.node("node-3").unwrap().site_name, "new-B");
    }

    #[test]
    fn test_del_node_removes_links() {
        let mut topology = sample();
        topology.del_node("node-3").unwrap();
        assert!(topology.all_links().is_empty());
        assert!(topology.del_site("B").is_ok());
    }

    #[test]
    fn test_json_round_trip_keeps_prefixes_and_zones() {
        let mut topology = sample();
        let prefix = parse_network("face:b00c::/64").unwrap();
        topology.set_node_prefix("node-1", Some(&prefix));
        let mut zones = BTreeMap::new();
        zones.insert("A".to_string(), Zone::default());
        topology.set_prefix_zones(zones);

        let json = topology.to_json().unwrap();
        let restored = MeshTopology::from_json(&json).unwrap();
        assert_eq!(restored.node("node-1").unwrap().prefix(), Some("face:b00c::/64"));
        assert_eq!(restored.all_links(), topology.all_links());
        assert!(restored.prefix_alloc_zones().unwrap().contains_key("A"));
    }
}
