//! Merkle tree over a batch's payout leaves.
//!
//! The pairing rule must stay bit-for-bit identical to the on-chain
//! verifier: the two child hashes are sorted lexicographically before
//! hashing, and an unpaired trailing node is paired with itself. Any
//! divergence silently invalidates every proof in the batch.

use super::{BatchId, JobId};
use alloy::{
    primitives::{Address, B256, U256, keccak256},
    sol_types::SolValue,
};
use serde::{Deserialize, Serialize};

/// The chain and contract a batch's leaves are bound to.
///
/// Part of the leaf preimage so a proof cannot be replayed against another
/// chain or ledger deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafDomain {
    /// Chain id the batch executes on.
    pub chain_id: u64,
    /// Address of the ledger contract.
    pub contract: Address,
}

/// Hashes one job into its immutable Merkle leaf.
///
/// The encoding is fixed once the tree is built; changing it afterwards
/// invalidates all proofs.
pub fn payment_leaf(
    domain: &LeafDomain,
    batch_id: BatchId,
    job_id: JobId,
    funder: Address,
    recipient: Address,
    amount: U256,
) -> B256 {
    let encoded = (
        U256::from(domain.chain_id),
        domain.contract,
        U256::from(batch_id as u64),
        U256::from(job_id as u64),
        funder,
        recipient,
        amount,
    )
        .abi_encode();

    keccak256(encoded)
}

/// One persisted node of a batch tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    /// The batch the node belongs to.
    pub batch_id: BatchId,
    /// Tree level; 0 is the leaf level.
    pub level: u32,
    /// Position within the level.
    pub index: u32,
    /// Node hash.
    pub hash: B256,
    /// Back-reference to the originating job. Level 0 only.
    pub job_id: Option<JobId>,
}

/// Errors that can occur during Merkle tree operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    /// Cannot build a tree without leaves.
    #[error("cannot operate on an empty tree")]
    EmptyTree,
    /// Leaf index out of bounds.
    #[error("leaf index {index} out of bounds (tree has {tree_size} leaves)")]
    IndexOutOfBounds {
        /// The index that was requested.
        index: usize,
        /// The actual number of leaves.
        tree_size: usize,
    },
    /// No persisted leaf node references the requested job.
    #[error("no leaf node for job {0}")]
    UnknownLeaf(JobId),
    /// The persisted node table is missing an interior node.
    #[error("missing node at level {level}, index {index}")]
    MissingNode {
        /// Level of the missing node.
        level: u32,
        /// Index of the missing node.
        index: u32,
    },
}

/// In-memory Merkle tree keeping every level, so all nodes can be persisted
/// and proofs regenerated without rebuilding.
#[derive(Debug, Clone)]
pub struct BatchMerkleTree {
    /// `levels[0]` are the leaves; the last level holds the single root.
    levels: Vec<Vec<B256>>,
}

impl BatchMerkleTree {
    /// Builds the full tree from leaves.
    pub fn from_leaves(leaves: Vec<B256>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyTree);
        }

        let mut levels = vec![leaves];
        while levels.last().map(Vec::len).unwrap_or_default() > 1 {
            let current = levels.last().map(Vec::as_slice).unwrap_or_default();
            let mut parents = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                // An unpaired trailing node is paired with itself.
                let right = pair.get(1).unwrap_or(&pair[0]);
                parents.push(hash_pair(&pair[0], right));
            }
            levels.push(parents);
        }

        Ok(Self { levels })
    }

    /// The tree root.
    pub fn root(&self) -> B256 {
        self.levels[self.levels.len() - 1][0]
    }

    /// Tree height: the number of hashing levels above the leaves.
    pub fn height(&self) -> usize {
        self.levels.len() - 1
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    /// Whether the tree has no leaves. Construction forbids this.
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// All levels, leaves first. Used for persisting the node table.
    pub fn levels(&self) -> &[Vec<B256>] {
        &self.levels
    }

    /// Generates the inclusion proof for the leaf at `index`.
    ///
    /// Proof length equals the tree height. At each level the sibling sits
    /// at `index ^ 1`; when there is none, the node's own hash is the proof
    /// element.
    pub fn proof(&self, index: usize) -> Result<Vec<B256>, MerkleError> {
        if index >= self.len() {
            return Err(MerkleError::IndexOutOfBounds { index, tree_size: self.len() });
        }

        let mut proof = Vec::with_capacity(self.height());
        let mut idx = index;
        for level in &self.levels[..self.height()] {
            let sibling = level.get(idx ^ 1).unwrap_or(&level[idx]);
            proof.push(*sibling);
            idx /= 2;
        }

        Ok(proof)
    }

    /// Re-derives the root from a leaf and its proof.
    pub fn verify_proof(root: &B256, proof: &[B256], leaf: &B256) -> bool {
        let mut rolling = *leaf;
        for sibling in proof {
            rolling = hash_pair(&rolling, sibling);
        }

        *root == rolling
    }
}

/// Hashes two nodes together, sorting the pair lexicographically first.
#[inline]
pub fn hash_pair(left: &B256, right: &B256) -> B256 {
    let (first, second) = if left <= right { (left, right) } else { (right, left) };

    let mut buffer = [0u8; 64];
    buffer[..32].copy_from_slice(first.as_slice());
    buffer[32..].copy_from_slice(second.as_slice());
    keccak256(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<B256> {
        (0..n).map(|i| keccak256([i as u8])).collect()
    }

    #[test]
    fn empty_tree_is_rejected() {
        assert!(matches!(BatchMerkleTree::from_leaves(vec![]), Err(MerkleError::EmptyTree)));
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let leaf = keccak256([42]);
        let tree = BatchMerkleTree::from_leaves(vec![leaf]).unwrap();

        assert_eq!(tree.root(), leaf);
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.proof(0).unwrap(), Vec::<B256>::new());
        assert!(BatchMerkleTree::verify_proof(&tree.root(), &[], &leaf));
    }

    #[test]
    fn pair_hash_is_order_independent() {
        let a = keccak256([1]);
        let b = keccak256([2]);
        assert_eq!(hash_pair(&a, &b), hash_pair(&b, &a));
    }

    #[test]
    fn odd_level_self_pairs() {
        let leaves = leaves(3);
        let tree = BatchMerkleTree::from_leaves(leaves.clone()).unwrap();

        // The trailing third leaf pairs with itself.
        let expected_parent = hash_pair(&leaves[2], &leaves[2]);
        assert_eq!(tree.levels()[1][1], expected_parent);

        // And its proof carries its own hash as the first element.
        let proof = tree.proof(2).unwrap();
        assert_eq!(proof[0], leaves[2]);
    }

    #[test]
    fn proof_roundtrip_all_sizes() {
        for n in 1..=9 {
            let leaves = leaves(n);
            let tree = BatchMerkleTree::from_leaves(leaves.clone()).unwrap();
            let root = tree.root();

            for (i, leaf) in leaves.iter().enumerate() {
                let proof = tree.proof(i).unwrap();
                assert_eq!(proof.len(), tree.height());
                assert!(
                    BatchMerkleTree::verify_proof(&root, &proof, leaf),
                    "proof for leaf {i} of {n} failed"
                );
            }
        }
    }

    #[test]
    fn wrong_leaf_fails_verification() {
        let leaves = leaves(4);
        let tree = BatchMerkleTree::from_leaves(leaves.clone()).unwrap();
        let proof = tree.proof(0).unwrap();

        assert!(!BatchMerkleTree::verify_proof(&tree.root(), &proof, &leaves[1]));
        assert!(!BatchMerkleTree::verify_proof(&keccak256([0]), &proof, &leaves[0]));
    }

    #[test]
    fn out_of_bounds_proof() {
        let tree = BatchMerkleTree::from_leaves(leaves(2)).unwrap();
        assert_eq!(
            tree.proof(5),
            Err(MerkleError::IndexOutOfBounds { index: 5, tree_size: 2 })
        );
    }

    #[test]
    fn leaf_encoding_is_domain_bound() {
        let domain = LeafDomain { chain_id: 137, contract: Address::repeat_byte(1) };
        let funder = Address::repeat_byte(2);
        let recipient = Address::repeat_byte(3);

        let leaf = payment_leaf(&domain, 1, 7, funder, recipient, U256::from(1_000_000u64));
        let other_chain = LeafDomain { chain_id: 1, ..domain };

        assert_ne!(
            leaf,
            payment_leaf(&other_chain, 1, 7, funder, recipient, U256::from(1_000_000u64))
        );
        assert_ne!(leaf, payment_leaf(&domain, 1, 8, funder, recipient, U256::from(1_000_000u64)));
        assert_ne!(leaf, payment_leaf(&domain, 1, 7, funder, recipient, U256::from(1_000_001u64)));
    }
}
