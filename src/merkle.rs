//! Merkle proof service: builds batch trees, persists every node, and
//! regenerates proofs from the node table.

use crate::{
    error::RelayerError,
    storage::{RelayerStorage, StorageApi},
    types::{
        Batch, BatchId, BatchJob, BatchMerkleTree, JobId, LeafDomain, MerkleError, MerkleNode,
        payment_leaf,
    },
};
use alloy::primitives::B256;
use tracing::{info, instrument};

/// Builds and serves Merkle proofs for batch leaves.
#[derive(Debug, Clone)]
pub struct MerkleProofService {
    storage: RelayerStorage,
}

impl MerkleProofService {
    /// Creates a new [`MerkleProofService`].
    pub fn new(storage: RelayerStorage) -> Self {
        Self { storage }
    }

    /// Hashes every job into a leaf, builds the tree, and persists all
    /// nodes so proofs can be regenerated without rebuilding.
    ///
    /// Jobs are taken in ascending id order; their leaf encoding is
    /// immutable from this point on.
    #[instrument(skip_all, fields(batch_id = batch.id, jobs = jobs.len()))]
    pub async fn build_tree(
        &self,
        domain: &LeafDomain,
        batch: &Batch,
        jobs: &[BatchJob],
    ) -> Result<B256, RelayerError> {
        let mut jobs: Vec<&BatchJob> = jobs.iter().collect();
        jobs.sort_by_key(|job| job.id);

        let leaves = jobs
            .iter()
            .map(|job| {
                payment_leaf(domain, batch.id, job.id, batch.funder, job.recipient, job.amount)
            })
            .collect();

        let tree = BatchMerkleTree::from_leaves(leaves).map_err(RelayerError::Merkle)?;

        let mut nodes = Vec::new();
        for (level, hashes) in tree.levels().iter().enumerate() {
            for (index, hash) in hashes.iter().enumerate() {
                nodes.push(MerkleNode {
                    batch_id: batch.id,
                    level: level as u32,
                    index: index as u32,
                    hash: *hash,
                    job_id: (level == 0).then(|| jobs[index].id),
                });
            }
        }
        self.storage.insert_merkle_nodes(&nodes).await?;

        let root = tree.root();
        self.storage.set_batch_root(batch.id, root).await?;
        info!(%root, height = tree.height(), "built batch tree");

        Ok(root)
    }

    /// Regenerates the inclusion proof for a job from the persisted node
    /// table.
    ///
    /// At each level the sibling sits at `index ^ 1`; when the sibling row
    /// is absent (the level had an odd node count), the node's own hash is
    /// the proof element.
    pub async fn proof(&self, batch_id: BatchId, job_id: JobId) -> Result<Vec<B256>, RelayerError> {
        let leaf = self
            .storage
            .leaf_node(batch_id, job_id)
            .await?
            .ok_or(MerkleError::UnknownLeaf(job_id))?;
        let height = self.storage.tree_height(batch_id).await?;

        let mut proof = Vec::with_capacity(height as usize);
        let mut index = leaf.index;
        for level in 0..height {
            let current = self
                .storage
                .merkle_node(batch_id, level, index)
                .await?
                .ok_or(MerkleError::MissingNode { level, index })?;
            let sibling = self.storage.merkle_node(batch_id, level, index ^ 1).await?;

            proof.push(sibling.map_or(current.hash, |node| node.hash));
            index /= 2;
        }

        Ok(proof)
    }

    /// Re-derives the root from a leaf and its proof.
    pub fn verify(root: &B256, proof: &[B256], leaf: &B256) -> bool {
        BatchMerkleTree::verify_proof(root, proof, leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    fn fixture(n: u64) -> (LeafDomain, Batch, Vec<BatchJob>) {
        let domain = LeafDomain { chain_id: 137, contract: Address::repeat_byte(0xAA) };
        let batch = Batch::new(1, Address::repeat_byte(0xBB), n);
        let jobs = (0..n)
            .map(|i| {
                BatchJob::new(
                    i as JobId + 1,
                    batch.id,
                    Address::repeat_byte(i as u8 + 1),
                    U256::from(1_000_000u64 + i),
                )
            })
            .collect();
        (domain, batch, jobs)
    }

    #[tokio::test]
    async fn stored_proofs_match_in_memory_tree() {
        for n in [1u64, 2, 3, 5, 8] {
            let (domain, batch, jobs) = fixture(n);
            let storage = RelayerStorage::in_memory();
            storage.create_batch(&batch).await.unwrap();
            let service = MerkleProofService::new(storage.clone());

            let root = service.build_tree(&domain, &batch, &jobs).await.unwrap();

            for job in &jobs {
                let proof = service.proof(batch.id, job.id).await.unwrap();
                let leaf = payment_leaf(
                    &domain,
                    batch.id,
                    job.id,
                    batch.funder,
                    job.recipient,
                    job.amount,
                );
                assert!(
                    MerkleProofService::verify(&root, &proof, &leaf),
                    "stored proof for job {} of {n} failed",
                    job.id
                );
            }
        }
    }

    #[tokio::test]
    async fn odd_batch_proof_self_pairs() {
        let (domain, batch, jobs) = fixture(3);
        let storage = RelayerStorage::in_memory();
        storage.create_batch(&batch).await.unwrap();
        let service = MerkleProofService::new(storage.clone());

        let root = service.build_tree(&domain, &batch, &jobs).await.unwrap();

        // The third leaf has no sibling row, so its own hash leads the proof.
        let proof = service.proof(batch.id, 3).await.unwrap();
        let leaf = payment_leaf(&domain, batch.id, 3, batch.funder, jobs[2].recipient, jobs[2].amount);
        assert_eq!(proof[0], leaf);
        assert!(MerkleProofService::verify(&root, &proof, &leaf));
    }

    #[tokio::test]
    async fn unknown_leaf_is_rejected() {
        let (domain, batch, jobs) = fixture(2);
        let storage = RelayerStorage::in_memory();
        storage.create_batch(&batch).await.unwrap();
        let service = MerkleProofService::new(storage.clone());
        service.build_tree(&domain, &batch, &jobs).await.unwrap();

        assert!(matches!(
            service.proof(batch.id, 99).await,
            Err(RelayerError::Merkle(MerkleError::UnknownLeaf(99)))
        ));
    }

    #[tokio::test]
    async fn root_recorded_on_batch() {
        let (domain, batch, jobs) = fixture(4);
        let storage = RelayerStorage::in_memory();
        storage.create_batch(&batch).await.unwrap();
        let service = MerkleProofService::new(storage.clone());

        let root = service.build_tree(&domain, &batch, &jobs).await.unwrap();
        let stored = storage.read_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.merkle_root, Some(root));
    }
}
