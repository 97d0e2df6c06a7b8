//! Consistent hashing ring used to decide which broker is responsible for an
//! artist.
//!
//! Positions are BLAKE3 digests read as 256-bit big-endian integers and
//! reduced modulo a small ring size. There are no virtual nodes: each node
//! occupies one position, and a key belongs to the first node position
//! strictly after it, wrapping to the lowest position.
//!
//! With a ring this small, two nodes can land on the same position. The node
//! listed later wins the position and the other one ends up responsible for
//! nothing. That is accepted and logged, not corrected.

use std::collections::{BTreeMap, BTreeSet};

use crate::message::{ArtistName, NodeInfo, PartitionTable};

/// Default ring size.
pub const RING_SIZE: u64 = 19;

/// 256-bit digest of a ring key.
pub fn digest(key: &str) -> [u8; 32] {
    *blake3::hash(key.as_bytes()).as_bytes()
}

/// Reduce a big-endian 256-bit integer modulo `modulus`.
fn reduce(digest: &[u8; 32], modulus: u64) -> u64 {
    let m = modulus as u128;
    digest
        .iter()
        .fold(0u128, |acc, byte| (acc * 256 + *byte as u128) % m) as u64
}

/// Pick the node position responsible for `key_hash`.
///
/// `node_hashes` must be sorted ascending. Returns the first position
/// strictly greater than `key_hash`, or the smallest position when none is.
/// `None` only for an empty ring.
pub fn successor(node_hashes: &[u64], key_hash: u64) -> Option<u64> {
    node_hashes
        .iter()
        .copied()
        .find(|&h| h > key_hash)
        .or_else(|| node_hashes.first().copied())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRing {
    size: u64,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(RING_SIZE)
    }
}

impl HashRing {
    /// A ring with `size` positions. A size of zero is treated as one.
    pub fn new(size: u64) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Ring position of an arbitrary key.
    pub fn position(&self, key: &str) -> u64 {
        reduce(&digest(key), self.size)
    }

    /// Ring position of a node: hash of `address:port`.
    pub fn node_hash(&self, node: &NodeInfo) -> u64 {
        self.position(&node.endpoint())
    }

    /// Ring position of an artist: hash of the name.
    pub fn key_hash(&self, artist: &ArtistName) -> u64 {
        self.position(artist.as_str())
    }

    /// Assign every artist to exactly one node.
    ///
    /// Every node appears in the output, possibly with an empty list. Artists
    /// sharing a hash are kept together in a multi-map rather than
    /// overwriting each other, and duplicate names collapse to one entry.
    /// Output lists are sorted by name, so the result does not depend on the
    /// order of `artists`.
    pub fn partition(&self, nodes: &[NodeInfo], artists: &[ArtistName]) -> PartitionTable {
        let mut table = PartitionTable::new();
        let mut positions: BTreeMap<u64, &NodeInfo> = BTreeMap::new();

        for node in nodes {
            let hash = self.node_hash(node);
            if let Some(previous) = positions.insert(hash, node) {
                tracing::warn!(
                    position = hash,
                    lost = %previous,
                    won = %node,
                    "ring position collision; earlier node gets no artists"
                );
            }
            table.insert(node.clone(), Vec::new());
        }

        let mut keys: BTreeMap<u64, BTreeSet<&ArtistName>> = BTreeMap::new();
        for artist in artists {
            keys.entry(self.key_hash(artist)).or_default().insert(artist);
        }

        let node_hashes: Vec<u64> = positions.keys().copied().collect();
        let mut assigned: BTreeMap<&NodeInfo, BTreeSet<&ArtistName>> = BTreeMap::new();
        for (key_hash, group) in keys {
            let Some(owner) = successor(&node_hashes, key_hash).and_then(|h| positions.get(&h))
            else {
                continue;
            };
            assigned.entry(*owner).or_default().extend(group);
        }

        for (owner, group) in assigned {
            table.insert(owner.clone(), group.into_iter().cloned().collect());
        }
        table
    }
}
