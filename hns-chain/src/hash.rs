use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// A 32-byte BLAKE2b digest, used for tx/block hashes and name hashes alike.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

/// `BLAKE2b` of the lower-cased ASCII name.
pub type NameHash = Hash;

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn digest(data: &[u8]) -> Hash {
        let mut hasher = Blake2b256::new();
        hasher.update(data);
        let out = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out);
        Hash(bytes)
    }

    pub fn digest_many(parts: &[&[u8]]) -> Hash {
        let mut hasher = Blake2b256::new();
        for part in parts {
            hasher.update(part);
        }
        let out = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out);
        Hash(bytes)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

/// `BLAKE2b` of the lower-cased ASCII name, per spec.md §3.
pub fn name_hash(name: &str) -> NameHash {
    Hash::digest(name.to_ascii_lowercase().as_bytes())
}

const LEAF_TAG: u8 = 0x00;
const INTERNAL_TAG: u8 = 0x01;

/// Standard BLAKE2b binary merkle tree. Leaf tag `0x00`, internal tag `0x01`.
///
/// Duplicating the last leaf of an odd level is rejected rather than silently
/// promoted, so CVE-2012-2459-style malleation is detectable at the block level:
/// callers must supply `MerkleTree::from_items` with the raw leaves and this
/// type does the promotion itself, recording whether it had to duplicate.
pub struct MerkleTree {
    pub root: Hash,
    pub duplicated: bool,
}

impl MerkleTree {
    pub fn from_items(items: &[Hash]) -> MerkleTree {
        if items.is_empty() {
            return MerkleTree {
                root: Hash::ZERO,
                duplicated: false,
            };
        }
        let mut level: Vec<Hash> = items
            .iter()
            .map(|leaf| hash_leaf(leaf.as_bytes()))
            .collect();
        let mut duplicated = false;
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut i = 0;
            while i < level.len() {
                let left = level[i];
                let right = if i + 1 < level.len() {
                    level[i + 1]
                } else {
                    duplicated = true;
                    level[i]
                };
                next.push(hash_internal(&left, &right));
                i += 2;
            }
            level = next;
        }
        MerkleTree {
            root: level[0],
            duplicated,
        }
    }
}

fn hash_leaf(data: &[u8; 32]) -> Hash {
    Hash::digest_many(&[&[LEAF_TAG], data])
}

fn hash_internal(left: &Hash, right: &Hash) -> Hash {
    Hash::digest_many(&[&[INTERNAL_TAG], left.as_ref(), right.as_ref()])
}

/// Verifies a leaf against a root given its sibling path, climbing the tree
/// bit by bit from `index` (LSB first decides left/right at each level).
/// Used to validate CLAIM outputs against a chain-committed airdrop root.
pub fn verify_merkle_proof(leaf: Hash, mut index: u64, proof: &[Hash], root: Hash) -> bool {
    let mut acc = hash_leaf(leaf.as_bytes());
    for sibling in proof {
        acc = if index & 1 == 0 {
            hash_internal(&acc, sibling)
        } else {
            hash_internal(sibling, &acc)
        };
        index >>= 1;
    }
    acc == root
}

/// Convenience: root over raw leaf hashes, rejecting a tree that needed
/// leaf duplication (the malleation case spec.md §4.E calls out).
pub fn merkle_root_checked(items: &[Hash]) -> Option<Hash> {
    let tree = MerkleTree::from_items(items);
    if tree.duplicated {
        None
    } else {
        Some(tree.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_root_is_leaf_hash() {
        let leaf = Hash::digest(b"hello");
        let tree = MerkleTree::from_items(&[leaf]);
        assert_eq!(tree.root, hash_leaf(leaf.as_bytes()));
        assert!(!tree.duplicated);
    }

    #[test]
    fn odd_count_flags_duplication() {
        let leaves = vec![Hash::digest(b"a"), Hash::digest(b"b"), Hash::digest(b"c")];
        let tree = MerkleTree::from_items(&leaves);
        assert!(tree.duplicated);
        assert!(merkle_root_checked(&leaves).is_none());
    }

    #[test]
    fn even_count_does_not_duplicate() {
        let leaves = vec![Hash::digest(b"a"), Hash::digest(b"b")];
        assert!(merkle_root_checked(&leaves).is_some());
    }

    #[test]
    fn name_hash_is_case_insensitive() {
        assert_eq!(name_hash("Example"), name_hash("example"));
    }
}
