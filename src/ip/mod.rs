//! IPv6 prefix arithmetic.
//!
//! This module holds the network helpers shared by both allocators and the
//! binary-trie allocator used to carve zone prefixes out of the seed prefix.

pub mod cidr;
pub mod trie;

// Re-export commonly used types
pub use cidr::{in_subnet, network_to_string, nth_prefix, parse_network, prefix_space, CidrNetwork};
pub use trie::PrefixTrie;
