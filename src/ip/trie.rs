//! Binary-trie first-fit allocator for zone prefixes.
//!
//! Each trie node is a `(prefix length, offset)` pair below a root network:
//! the root is `(root_len, 0)` and a node's children are `(len + 1, 2 * offset)`
//! and `(len + 1, 2 * offset + 1)`. Claimed nodes are stored in a flat set,
//! so the trie itself is implicit.
//!
//! Requests must arrive in ascending prefix length order; that keeps the
//! allocation leftmost-packed and lets a set of power-of-two blocks summing
//! to the root size always fit.

use std::collections::HashSet;

/// First-fit buddy allocator over the subnets of a root network
#[derive(Debug, Clone)]
pub struct PrefixTrie {
    root_len: u8,
    claimed: HashSet<(u8, u128)>,
}

impl PrefixTrie {
    pub fn new(root_len: u8) -> Self {
        Self {
            root_len,
            claimed: HashSet::new(),
        }
    }

    /// Claim the leftmost free subnet of length `prefix_len`, returning its
    /// offset among all `/prefix_len` subnets of the root.
    pub fn claim(&mut self, prefix_len: u8) -> Option<u128> {
        if prefix_len < self.root_len {
            return None;
        }
        let offset = self.find_free(self.root_len, 0, prefix_len)?;
        self.claimed.insert((prefix_len, offset));
        Some(offset)
    }

    /// Returns true if the exact subnet `(prefix_len, offset)` was claimed
    pub fn is_claimed(&self, prefix_len: u8, offset: u128) -> bool {
        self.claimed.contains(&(prefix_len, offset))
    }

    fn find_free(&self, len: u8, offset: u128, target_len: u8) -> Option<u128> {
        // An equal-or-shorter claim covers this whole subtree
        if self.claimed.contains(&(len, offset)) {
            return None;
        }
        if len == target_len {
            return Some(offset);
        }

        let left = offset << 1;
        self.find_free(len + 1, left, target_len)
            .or_else(|| self.find_free(len + 1, left + 1, target_len))
    }
}
