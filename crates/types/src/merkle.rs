//! Merkle trees over lists of byte strings.
//!
//! Leaves and inner nodes are domain-separated (`0x00` / `0x01` prefixes)
//! so a leaf can never be reinterpreted as an inner node. A list of `n`
//! items splits at the largest power of two strictly below `n`, making the
//! left subtree perfect. The empty list hashes to the all-zero hash.

use sha2::{Digest, Sha256};

use crate::hash::{Hash, HASH_LENGTH};
use crate::TypesError;

const LEAF_PREFIX: u8 = 0x00;
const INNER_PREFIX: u8 = 0x01;

fn leaf_hash(item: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(item);
    let mut out = [0u8; HASH_LENGTH];
    out.copy_from_slice(&hasher.finalize());
    Hash(out)
}

fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([INNER_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    let mut out = [0u8; HASH_LENGTH];
    out.copy_from_slice(&hasher.finalize());
    Hash(out)
}

/// Largest power of two strictly less than `n`. `n` must be >= 2.
fn split_point(n: usize) -> usize {
    debug_assert!(n >= 2);
    let mut split = 1;
    while split * 2 < n {
        split *= 2;
    }
    split
}

/// Root hash over a list of byte strings.
pub fn hash_from_byte_slices<T: AsRef<[u8]>>(items: &[T]) -> Hash {
    match items.len() {
        0 => Hash::ZERO,
        1 => leaf_hash(items[0].as_ref()),
        n => {
            let k = split_point(n);
            let left = hash_from_byte_slices(&items[..k]);
            let right = hash_from_byte_slices(&items[k..]);
            inner_hash(&left, &right)
        }
    }
}

/// A Merkle inclusion proof for a single list item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    /// Number of items in the list.
    pub total: u64,
    /// Index of the proved item.
    pub index: u64,
    /// Hash of the proved leaf.
    pub leaf_hash: Hash,
    /// Sibling hashes from the leaf up to the root.
    pub aunts: Vec<Hash>,
}

impl Proof {
    /// Verify that `item` at this proof's index hashes up to `root`.
    pub fn verify(&self, root: &Hash, item: &[u8]) -> Result<(), TypesError> {
        if leaf_hash(item) != self.leaf_hash {
            return Err(TypesError::InvalidProof("leaf hash mismatch"));
        }
        let computed = self.compute_root()?;
        if computed != *root {
            return Err(TypesError::InvalidProof("root mismatch"));
        }
        Ok(())
    }

    /// Recompute the root from the leaf hash and the aunt trail.
    pub fn compute_root(&self) -> Result<Hash, TypesError> {
        compute_from_aunts(self.index, self.total, self.leaf_hash, &self.aunts)
            .ok_or(TypesError::InvalidProof("invalid aunt trail"))
    }
}

fn compute_from_aunts(index: u64, total: u64, leaf: Hash, aunts: &[Hash]) -> Option<Hash> {
    if index >= total || total == 0 {
        return None;
    }
    match total {
        1 => {
            if aunts.is_empty() {
                Some(leaf)
            } else {
                None
            }
        }
        _ => {
            let (last, rest) = aunts.split_last()?;
            let k = split_point(total as usize) as u64;
            if index < k {
                let left = compute_from_aunts(index, k, leaf, rest)?;
                Some(inner_hash(&left, last))
            } else {
                let right = compute_from_aunts(index - k, total - k, leaf, rest)?;
                Some(inner_hash(last, &right))
            }
        }
    }
}

/// Root hash and one inclusion proof per item.
pub fn proofs_from_byte_slices<T: AsRef<[u8]>>(items: &[T]) -> (Hash, Vec<Proof>) {
    let leaves: Vec<Hash> = items.iter().map(|i| leaf_hash(i.as_ref())).collect();
    let total = leaves.len() as u64;
    let mut proofs: Vec<Proof> = leaves
        .iter()
        .enumerate()
        .map(|(index, &leaf)| Proof {
            total,
            index: index as u64,
            leaf_hash: leaf,
            aunts: Vec::new(),
        })
        .collect();
    let root = build_proofs(&leaves, &mut proofs, 0);
    (root, proofs)
}

/// Recursively hash `leaves`, appending each level's sibling to the proofs
/// of the covered range. `offset` is the range's position in the full list.
fn build_proofs(leaves: &[Hash], proofs: &mut [Proof], offset: usize) -> Hash {
    match leaves.len() {
        0 => Hash::ZERO,
        1 => leaves[0],
        n => {
            let k = split_point(n);
            let left = build_proofs(&leaves[..k], proofs, offset);
            let right = build_proofs(&leaves[k..], proofs, offset + k);
            for proof in &mut proofs[offset..offset + k] {
                proof.aunts.push(right);
            }
            for proof in &mut proofs[offset + k..offset + n] {
                proof.aunts.push(left);
            }
            inner_hash(&left, &right)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("item-{i}").into_bytes()).collect()
    }

    #[test]
    fn empty_list_hashes_to_zero() {
        assert_eq!(hash_from_byte_slices::<Vec<u8>>(&[]), Hash::ZERO);
    }

    #[test]
    fn single_item_is_leaf_hash() {
        let root = hash_from_byte_slices(&[b"x".to_vec()]);
        assert_eq!(root, leaf_hash(b"x"));
    }

    #[test]
    fn leaf_and_inner_are_domain_separated() {
        // A two-item tree over (a, b) must differ from the leaf hash of
        // their concatenation.
        let root = hash_from_byte_slices(&[b"a".to_vec(), b"b".to_vec()]);
        assert_ne!(root, leaf_hash(b"ab"));
    }

    #[test]
    fn proofs_verify_for_every_size_and_index() {
        for n in 1..=17 {
            let list = items(n);
            let (root, proofs) = proofs_from_byte_slices(&list);
            assert_eq!(root, hash_from_byte_slices(&list), "size {n}");
            assert_eq!(proofs.len(), n);
            for (i, proof) in proofs.iter().enumerate() {
                assert_eq!(proof.index, i as u64);
                assert_eq!(proof.total, n as u64);
                proof.verify(&root, &list[i]).unwrap();
            }
        }
    }

    #[test]
    fn proof_rejects_tampered_item() {
        let list = items(8);
        let (root, proofs) = proofs_from_byte_slices(&list);
        for proof in &proofs {
            assert!(proof.verify(&root, b"forged").is_err());
        }
    }

    #[test]
    fn proof_rejects_wrong_root() {
        let list = items(5);
        let (_, proofs) = proofs_from_byte_slices(&list);
        let other_root = hash_from_byte_slices(&items(6));
        assert!(proofs[0].verify(&other_root, &list[0]).is_err());
    }

    #[test]
    fn proof_rejects_truncated_aunts() {
        let list = items(9);
        let (root, proofs) = proofs_from_byte_slices(&list);
        let mut proof = proofs[4].clone();
        proof.aunts.pop();
        assert!(proof.verify(&root, &list[4]).is_err());
    }
}
