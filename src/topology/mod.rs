//! Network topology module.
//!
//! This module contains the topology records the allocators consume, the
//! `TopologyStore` trait they consume them through, an in-memory store, and
//! the site-graph searches used to group nodes under gateway sites.

pub mod site_graph;
pub mod store;
pub mod types;

// Re-export key types for easier access
pub use store::{MeshTopology, TopologyStore};
pub use types::{Link, Node, Site, Zone};
