//! Transaction merkle trees.

use lccd_consensus::Hash256;

use crate::hash::sha256d_pair;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MerkleRoot {
    pub root: Hash256,
    /// Some level had an odd length and its last node was paired with itself.
    pub mutated: bool,
    /// Two identical siblings were hashed together before any padding, so a
    /// different leaf list yields the same root (CVE-2012-2459).
    pub duplicate_pair: bool,
}

pub fn compute_merkle_root(leaves: &[Hash256]) -> MerkleRoot {
    let mut result = MerkleRoot {
        root: [0u8; 32],
        mutated: false,
        duplicate_pair: false,
    };
    if leaves.is_empty() {
        return result;
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.chunks_exact(2).any(|pair| pair[0] == pair[1]) {
            result.duplicate_pair = true;
        }
        if level.len() % 2 == 1 {
            result.mutated = true;
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .chunks_exact(2)
            .map(|pair| sha256d_pair(&pair[0], &pair[1]))
            .collect();
    }
    result.root = level[0];
    result
}

/// Sibling hashes from leaf `index` up to the root.
pub fn merkle_branch(leaves: &[Hash256], mut index: usize) -> Vec<Hash256> {
    let mut branch = Vec::new();
    if index >= leaves.len() {
        return branch;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        branch.push(level[index ^ 1]);
        index >>= 1;
        level = level
            .chunks_exact(2)
            .map(|pair| sha256d_pair(&pair[0], &pair[1]))
            .collect();
    }
    branch
}

pub fn root_from_branch(leaf: Hash256, branch: &[Hash256], mut index: usize) -> Hash256 {
    let mut hash = leaf;
    for sibling in branch {
        hash = if index & 1 == 1 {
            sha256d_pair(sibling, &hash)
        } else {
            sha256d_pair(&hash, sibling)
        };
        index >>= 1;
    }
    hash
}
