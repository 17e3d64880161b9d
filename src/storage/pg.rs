//! Relayer storage implementation using a PostgreSQL database.
//!
//! Queue claims rely on `FOR UPDATE SKIP LOCKED`: a claimant takes the next
//! unlocked row instead of blocking behind another claimant's lock, which is
//! what lets N workers drain one queue with no application-level
//! coordination. On-chain amounts are stored as decimal strings to keep
//! full 256-bit precision.

use super::api::{Result, StorageApi};
use crate::{
    error::StorageError,
    types::{
        Batch, BatchId, BatchJob, BatchStatus, FaucetWallet, JobId, JobStatus, MerkleNode,
        RelayerWallet, WalletStatus,
    },
};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::time::Duration;
use tracing::instrument;

const JOB_COLUMNS: &str = "id, batch_id, wallet_address_to, amount_usdc, status, \
                           relayer_address, retry_count, tx_hash, updated_at";

/// PostgreSQL storage implementation.
#[derive(Debug)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Creates a new PostgreSQL storage instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn address_from(row: &PgRow, column: &str) -> Result<Address> {
    let bytes: Vec<u8> = row.try_get(column)?;
    Address::try_from(bytes.as_slice())
        .map_err(|err| StorageError::Internal(eyre::eyre!("bad address in {column}: {err}")))
}

fn opt_address_from(row: &PgRow, column: &str) -> Result<Option<Address>> {
    let bytes: Option<Vec<u8>> = row.try_get(column)?;
    bytes
        .map(|bytes| {
            Address::try_from(bytes.as_slice()).map_err(|err| {
                StorageError::Internal(eyre::eyre!("bad address in {column}: {err}"))
            })
        })
        .transpose()
}

fn opt_b256_from(row: &PgRow, column: &str) -> Result<Option<B256>> {
    let bytes: Option<Vec<u8>> = row.try_get(column)?;
    bytes
        .map(|bytes| {
            B256::try_from(bytes.as_slice()).map_err(|err| {
                StorageError::Internal(eyre::eyre!("bad hash in {column}: {err}"))
            })
        })
        .transpose()
}

fn u256_from(row: &PgRow, column: &str) -> Result<U256> {
    let text: String = row.try_get(column)?;
    text.parse::<U256>()
        .map_err(|err| StorageError::Internal(eyre::eyre!("bad amount in {column}: {err}")))
}

fn job_from_row(row: &PgRow) -> Result<BatchJob> {
    Ok(BatchJob {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        recipient: address_from(row, "wallet_address_to")?,
        amount: u256_from(row, "amount_usdc")?,
        status: row.try_get::<String, _>("status")?.parse().map_err(StorageError::Internal)?,
        relayer: opt_address_from(row, "relayer_address")?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        tx_hash: opt_b256_from(row, "tx_hash")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn batch_from_row(row: &PgRow) -> Result<Batch> {
    Ok(Batch {
        id: row.try_get("id")?,
        funder: address_from(row, "funder_address")?,
        total_transactions: row.try_get::<i64, _>("total_transactions")? as u64,
        merkle_root: opt_b256_from(row, "merkle_root")?,
        status: row.try_get::<String, _>("status")?.parse().map_err(StorageError::Internal)?,
        funding_amount: u256_from(row, "funding_amount")?,
        refund_amount: u256_from(row, "refund_amount")?,
        started_at: row.try_get("start_time")?,
        ended_at: row.try_get("end_time")?,
    })
}

#[async_trait]
impl StorageApi for PgStorage {
    #[instrument(skip_all, fields(batch_id = batch.id))]
    async fn create_batch(&self, batch: &Batch) -> Result<()> {
        sqlx::query(
            "INSERT INTO batches \
             (id, funder_address, merkle_root, status, total_transactions, \
              funding_amount, refund_amount, start_time, end_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(batch.id)
        .bind(batch.funder.as_slice())
        .bind(batch.merkle_root.map(|root| root.to_vec()))
        .bind(batch.status.as_str())
        .bind(batch.total_transactions as i64)
        .bind(batch.funding_amount.to_string())
        .bind(batch.refund_amount.to_string())
        .bind(batch.started_at)
        .bind(batch.ended_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_batch(&self, id: BatchId) -> Result<Option<Batch>> {
        sqlx::query("SELECT * FROM batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| batch_from_row(&row))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn update_batch_status(&self, id: BatchId, status: BatchStatus) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM batches WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("batch {id}")))?;
        let current: BatchStatus =
            row.try_get::<String, _>("status")?.parse().map_err(StorageError::Internal)?;

        if !current.can_transition_to(status) {
            return Err(StorageError::IllegalBatchTransition { from: current, to: status });
        }

        sqlx::query("UPDATE batches SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn set_batch_root(&self, id: BatchId, root: B256) -> Result<()> {
        sqlx::query("UPDATE batches SET merkle_root = $2 WHERE id = $1")
            .bind(id)
            .bind(root.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_batch_funding(&self, id: BatchId, amount: U256) -> Result<()> {
        sqlx::query("UPDATE batches SET funding_amount = $2 WHERE id = $1")
            .bind(id)
            .bind(amount.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_batch_refund(&self, id: BatchId, amount: U256) -> Result<()> {
        sqlx::query(
            "UPDATE batches \
             SET refund_amount = (refund_amount::numeric + $2::numeric)::text \
             WHERE id = $1",
        )
        .bind(id)
        .bind(amount.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_batch_started(&self, id: BatchId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE batches SET start_time = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_batch_ended(&self, id: BatchId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE batches SET end_time = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = jobs.len()))]
    async fn insert_jobs(&self, jobs: &[BatchJob]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for job in jobs {
            sqlx::query(
                "INSERT INTO batch_transactions \
                 (id, batch_id, wallet_address_to, amount_usdc, status, \
                  relayer_address, retry_count, tx_hash, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(job.id)
            .bind(job.batch_id)
            .bind(job.recipient.as_slice())
            .bind(job.amount.to_string())
            .bind(job.status.as_str())
            .bind(job.relayer.map(|addr| addr.to_vec()))
            .bind(job.retry_count as i32)
            .bind(job.tx_hash.map(|hash| hash.to_vec()))
            .bind(job.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn read_job(&self, id: JobId) -> Result<Option<BatchJob>> {
        sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM batch_transactions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| job_from_row(&row))
            .transpose()
    }

    async fn batch_jobs(&self, batch_id: BatchId) -> Result<Vec<BatchJob>> {
        sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM batch_transactions WHERE batch_id = $1 ORDER BY id"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(job_from_row)
        .collect()
    }

    async fn claim_next_job(
        &self,
        batch_id: BatchId,
        worker: Address,
    ) -> Result<Option<BatchJob>> {
        sqlx::query(&format!(
            "WITH next_job AS ( \
                 SELECT id AS job_id FROM batch_transactions \
                 WHERE batch_id = $1 AND status = 'pending' \
                 ORDER BY id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE batch_transactions AS t \
             SET status = 'claimed', relayer_address = $2, updated_at = NOW() \
             FROM next_job \
             WHERE t.id = next_job.job_id \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(batch_id)
        .bind(worker.as_slice())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| job_from_row(&row))
        .transpose()
    }

    async fn claim_stuck_job(
        &self,
        batch_id: BatchId,
        worker: Address,
        lease: Duration,
    ) -> Result<Option<BatchJob>> {
        sqlx::query(&format!(
            "WITH stuck AS ( \
                 SELECT id AS job_id FROM batch_transactions \
                 WHERE batch_id = $1 \
                   AND status IN ('claimed', 'waiting_confirmation') \
                   AND updated_at < NOW() - ($3 * INTERVAL '1 second') \
                 ORDER BY updated_at \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE batch_transactions AS t \
             SET status = 'claimed', relayer_address = $2, updated_at = NOW() \
             FROM stuck \
             WHERE t.id = stuck.job_id \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(batch_id)
        .bind(worker.as_slice())
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| job_from_row(&row))
        .transpose()
    }

    async fn claim_job_for_retry(&self, id: JobId, worker: Address) -> Result<Option<BatchJob>> {
        sqlx::query(&format!(
            "UPDATE batch_transactions \
             SET status = 'claimed', relayer_address = $2, \
                 retry_count = retry_count + 1, updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'waiting_confirmation', 'failed') \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(id)
        .bind(worker.as_slice())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| job_from_row(&row))
        .transpose()
    }

    async fn update_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        self.record_job_result(id, status, None).await
    }

    async fn record_job_result(
        &self,
        id: JobId,
        status: JobStatus,
        tx_hash: Option<B256>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM batch_transactions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("job {id}")))?;
        let current: JobStatus =
            row.try_get::<String, _>("status")?.parse().map_err(StorageError::Internal)?;

        if !current.can_transition_to(status) {
            return Err(StorageError::IllegalJobTransition { from: current, to: status });
        }

        sqlx::query(
            "UPDATE batch_transactions \
             SET status = $2, tx_hash = COALESCE($3, tx_hash), updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(tx_hash.map(|hash| hash.to_vec()))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn retryable_jobs(&self, batch_id: BatchId, max_retries: u32) -> Result<Vec<BatchJob>> {
        sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM batch_transactions \
             WHERE batch_id = $1 \
               AND status IN ('pending', 'waiting_confirmation', 'failed') \
               AND retry_count < $2 \
             ORDER BY id"
        ))
        .bind(batch_id)
        .bind(max_retries as i32)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(job_from_row)
        .collect()
    }

    async fn open_job_count(&self, batch_id: BatchId) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS open FROM batch_transactions \
             WHERE batch_id = $1 AND status NOT IN ('completed', 'failed')",
        )
        .bind(batch_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("open")? as u64)
    }

    async fn pending_jobs(&self, batch_id: BatchId, limit: usize) -> Result<Vec<BatchJob>> {
        sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM batch_transactions \
             WHERE batch_id = $1 AND status = 'pending' ORDER BY id LIMIT $2"
        ))
        .bind(batch_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(job_from_row)
        .collect()
    }

    #[instrument(skip_all, fields(count = relayers.len()))]
    async fn insert_relayers(&self, relayers: &[RelayerWallet]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for relayer in relayers {
            sqlx::query(
                "INSERT INTO relayers (batch_id, address, status, last_balance, gas_cost) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(relayer.batch_id)
            .bind(relayer.address.as_slice())
            .bind(relayer.status.as_str())
            .bind(relayer.last_balance.to_string())
            .bind(relayer.gas_spent.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn batch_relayers(&self, batch_id: BatchId) -> Result<Vec<RelayerWallet>> {
        sqlx::query(
            "SELECT batch_id, address, status, last_balance, gas_cost \
             FROM relayers WHERE batch_id = $1 ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(RelayerWallet {
                address: address_from(row, "address")?,
                batch_id: row.try_get("batch_id")?,
                status: row
                    .try_get::<String, _>("status")?
                    .parse::<WalletStatus>()
                    .map_err(StorageError::Internal)?,
                last_balance: u256_from(row, "last_balance")?,
                gas_spent: u256_from(row, "gas_cost")?,
            })
        })
        .collect()
    }

    async fn add_relayer_gas(&self, address: Address, gas: U256) -> Result<()> {
        sqlx::query(
            "UPDATE relayers \
             SET gas_cost = (gas_cost::numeric + $2::numeric)::text \
             WHERE address = $1",
        )
        .bind(address.as_slice())
        .bind(gas.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_relayer_drained(&self, address: Address, last_balance: U256) -> Result<()> {
        sqlx::query(
            "UPDATE relayers SET status = 'drained', last_balance = $2 WHERE address = $1",
        )
        .bind(address.as_slice())
        .bind(last_balance.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = nodes.len()))]
    async fn insert_merkle_nodes(&self, nodes: &[MerkleNode]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for node in nodes {
            sqlx::query(
                "INSERT INTO merkle_nodes (batch_id, level, position_index, hash, transaction_id) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(node.batch_id)
            .bind(node.level as i32)
            .bind(node.index as i32)
            .bind(node.hash.to_vec())
            .bind(node.job_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn merkle_node(
        &self,
        batch_id: BatchId,
        level: u32,
        index: u32,
    ) -> Result<Option<MerkleNode>> {
        sqlx::query(
            "SELECT batch_id, level, position_index, hash, transaction_id \
             FROM merkle_nodes WHERE batch_id = $1 AND level = $2 AND position_index = $3",
        )
        .bind(batch_id)
        .bind(level as i32)
        .bind(index as i32)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| node_from_row(&row))
        .transpose()
    }

    async fn leaf_node(&self, batch_id: BatchId, job_id: JobId) -> Result<Option<MerkleNode>> {
        sqlx::query(
            "SELECT batch_id, level, position_index, hash, transaction_id \
             FROM merkle_nodes WHERE batch_id = $1 AND level = 0 AND transaction_id = $2",
        )
        .bind(batch_id)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| node_from_row(&row))
        .transpose()
    }

    async fn tree_height(&self, batch_id: BatchId) -> Result<u32> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(level), 0) AS height FROM merkle_nodes WHERE batch_id = $1",
        )
        .bind(batch_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i32, _>("height")? as u32)
    }

    async fn read_faucet(&self, funder: Address) -> Result<Option<FaucetWallet>> {
        sqlx::query("SELECT address, funder_address FROM faucets WHERE funder_address = $1")
            .bind(funder.as_slice())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| {
                Ok(FaucetWallet {
                    address: address_from(&row, "address")?,
                    funder: address_from(&row, "funder_address")?,
                })
            })
            .transpose()
    }

    async fn write_faucet(&self, faucet: &FaucetWallet) -> Result<()> {
        sqlx::query(
            "INSERT INTO faucets (address, funder_address) VALUES ($1, $2) \
             ON CONFLICT (funder_address) DO UPDATE SET address = excluded.address",
        )
        .bind(faucet.address.as_slice())
        .bind(faucet.funder.as_slice())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn node_from_row(row: &PgRow) -> Result<MerkleNode> {
    let hash: Vec<u8> = row.try_get("hash")?;
    Ok(MerkleNode {
        batch_id: row.try_get("batch_id")?,
        level: row.try_get::<i32, _>("level")? as u32,
        index: row.try_get::<i32, _>("position_index")? as u32,
        hash: B256::try_from(hash.as_slice())
            .map_err(|err| StorageError::Internal(eyre::eyre!("bad node hash: {err}")))?,
        job_id: row.try_get("transaction_id")?,
    })
}
