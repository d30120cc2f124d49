//! Topology type definitions.
//!
//! These are the records the topology store hands to the allocators. Nodes,
//! links and sites are referenced by name everywhere, so renames only need
//! to touch the keyed maps that hold them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A mesh node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub site_name: String,
    /// Gateway flag; POP nodes root a prefix zone
    #[serde(default)]
    pub pop_node: bool,
    /// Allocated prefix, e.g. `face:b00c:0:1::/64`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Node {
    pub fn new(name: &str, site_name: &str, pop_node: bool) -> Self {
        Self {
            name: name.to_string(),
            site_name: site_name.to_string(),
            pop_node,
            prefix: None,
        }
    }

    /// Builder-style helper to attach an existing prefix
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    /// The prefix string, treating an empty string as unset
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref().filter(|p| !p.is_empty())
    }
}

/// A wireless link between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub a_node_name: String,
    pub z_node_name: String,
}

impl Link {
    /// Create a link with the conventional `link-<a>-<z>` name, endpoints
    /// ordered so the same pair always yields the same name
    pub fn between(node_a: &str, node_z: &str) -> Self {
        let (a, z) = if node_a <= node_z {
            (node_a, node_z)
        } else {
            (node_z, node_a)
        };
        Self {
            name: format!("link-{}-{}", a, z),
            a_node_name: a.to_string(),
            z_node_name: z.to_string(),
        }
    }

    /// The endpoint opposite `node_name`, if `node_name` is an endpoint
    pub fn other_end(&self, node_name: &str) -> Option<&str> {
        if self.a_node_name == node_name {
            Some(&self.z_node_name)
        } else if self.z_node_name == node_name {
            Some(&self.a_node_name)
        } else {
            None
        }
    }
}

/// A physical site hosting one or more nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
}

impl Site {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Persisted snapshot of a prefix zone, keyed by its POP site name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    #[serde(default)]
    pub node_names: BTreeSet<String>,
    #[serde(default)]
    pub zone_prefixes: BTreeSet<String>,
}
