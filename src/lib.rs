//! # MeshPrefix - IPv6 prefix allocation for wireless mesh controllers
//!
//! This library assigns unique, non-overlapping IPv6 prefixes to every node
//! of a mesh network and keeps them valid as nodes, links and sites come and
//! go.
//!
//! ## Overview
//!
//! A controller owns one allocator and calls it on every topology change.
//! The allocator updates its own ledgers, writes each node's prefix back to
//! the topology store, and writes the routes each gateway ("POP") node should
//! advertise into the node config store.
//!
//! ## Key Features
//!
//! - **Centralized allocation**: flat first-fit scan over the seed prefix
//! - **Deterministic allocation**: nodes grouped into zones around their
//!   nearest POP site, each zone advertising summary prefixes
//! - **Headroom**: zones are provisioned with spare prefixes so most node
//!   additions never trigger a reallocation
//! - **Restart safe**: zones are saved with the topology and restored when
//!   they still match it
//!
//! ## Architecture
//!
//! - `allocator`: the `PrefixAllocator` trait and both strategies
//! - `config`: allocator configuration and prefix parameter validation
//! - `config_loader`: YAML configuration loading
//! - `error`: allocator error type
//! - `ip`: IPv6 network helpers and the zone prefix trie
//! - `node_config`: node config store interface and in-memory store
//! - `topology`: topology records, store interface and site-graph search
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use meshprefix::allocator::create_allocator;
//! use meshprefix::config_loader::load_config;
//! use meshprefix::node_config::InMemoryNodeConfig;
//! use meshprefix::topology::MeshTopology;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("allocator.yaml"))?;
//! let mut topology = MeshTopology::load(Path::new("topology.json"))?;
//! let mut node_config = InMemoryNodeConfig::new();
//!
//! let allocator = create_allocator(&config, &mut topology, &mut node_config)?;
//! for (prefix, node) in allocator.allocated_prefixes() {
//!     println!("{} -> {}", node, prefix);
//! }
//!
//! // Node prefixes and saved zones now live in the topology
//! topology.save(Path::new("topology.json"))?;
//! # Ok::<(), color_eyre::Report>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! allocator: deterministic   # or centralized
//! prefix_alloc_params:
//!   seed_prefix: "face:b00c::/56"
//!   alloc_prefix_len: 64
//! zone_headroom: 7
//! ```
//!
//! ## Error Handling
//!
//! Allocator operations return `meshprefix::Result<T>` with an `AllocError`.
//! File loading returns `color_eyre::Result` with context attached.

pub mod allocator;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod ip;
pub mod node_config;
pub mod topology;

pub use error::{AllocError, Result};
