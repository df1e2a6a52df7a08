//! Append-only hash-chained ledger with proof-of-work sealing.
//!
//! The ledger records model update submissions as transactions in a pending
//! pool and seals them into blocks, each cryptographically linked to its
//! predecessor. Chain and pool live behind a single writer lock; mining
//! snapshots the pool, searches the nonce on a blocking worker, then appends
//! the block and drains exactly the sealed transactions in one write, so no
//! submission is ever lost or double-included.

pub mod block;

pub use block::{Block, Transaction};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::params::LedgerConfig;
use crate::utils::serialization::SerializeError;

/// Ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid transaction: {0}")]
    Validation(String),

    #[error(transparent)]
    Serialization(#[from] SerializeError),

    #[error("mining task failed: {0}")]
    Mining(String),
}

/// Structured result of a full chain verification pass.
///
/// Block self-check failures and broken predecessor links are independent
/// checks; both are reported without short-circuiting so one pass shows all
/// damage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// True when every block self-checks and every link holds.
    pub valid: bool,

    /// Chain length at verification time.
    pub total_blocks: usize,

    /// Indices of blocks whose stored hash no longer recomputes.
    pub invalid_blocks: Vec<u64>,

    /// Indices of blocks whose previous_hash does not match the predecessor.
    pub broken_links: Vec<u64>,
}

/// One occurrence of a model hash in the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub block_index: u64,
    pub block_hash: String,
    pub block_timestamp: DateTime<Utc>,
    pub transaction: Transaction,
}

/// Read-only snapshot of ledger totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_blocks: usize,
    pub total_transactions: usize,
    pub pending_transactions: usize,
    pub chain_valid: bool,
    pub latest_block: Option<Block>,
}

struct LedgerState {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
}

/// Hash-chained block store for immutable model update records.
pub struct Ledger {
    state: RwLock<LedgerState>,
    /// Serializes miners so two mines never reference the same chain tail.
    miner: Mutex<()>,
    difficulty: usize,
}

impl Ledger {
    /// Create a ledger and mine nothing: the genesis block is built exactly
    /// once here and never re-mined.
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let genesis = Block::genesis()?;
        info!("genesis block created");

        Ok(Self {
            state: RwLock::new(LedgerState {
                chain: vec![genesis],
                pending: Vec::new(),
            }),
            miner: Mutex::new(()),
            difficulty: config.difficulty,
        })
    }

    /// Proof-of-work difficulty this ledger mines at.
    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Record a model update in the pending pool.
    ///
    /// Duplicate model hashes across transactions are allowed; multiple
    /// rounds may legitimately reuse identical parameter states, so each
    /// submission is a distinct event.
    pub async fn submit_transaction(
        &self,
        model_hash: &str,
        submitter_id: &str,
        institution: &str,
    ) -> Result<Transaction, LedgerError> {
        if model_hash.is_empty() {
            return Err(LedgerError::Validation("empty model hash".to_string()));
        }

        let transaction = Transaction::new(model_hash, submitter_id, institution);

        let mut state = self.state.write().await;
        state.pending.push(transaction.clone());
        info!(
            "transaction added: {}... ({} pending)",
            hash_prefix(model_hash),
            state.pending.len()
        );

        Ok(transaction)
    }

    /// Seal the pending pool into a new block.
    ///
    /// Returns `None` when the pool is empty (not an error). The nonce search
    /// runs on a blocking worker off the async path; submissions arriving
    /// while it runs stay pending for the next block.
    pub async fn mine_pending(&self) -> Result<Option<Block>, LedgerError> {
        let _miner = self.miner.lock().await;

        let (index, previous_hash, transactions) = {
            let state = self.state.read().await;
            if state.pending.is_empty() {
                warn!("no pending transactions to mine");
                return Ok(None);
            }
            let tail = state
                .chain
                .last()
                .ok_or_else(|| LedgerError::Mining("chain has no genesis".to_string()))?;
            (
                state.chain.len() as u64,
                tail.hash.clone(),
                state.pending.clone(),
            )
        };

        let difficulty = self.difficulty;
        let block =
            tokio::task::spawn_blocking(move || block::mine(index, previous_hash, transactions, difficulty))
                .await
                .map_err(|e| LedgerError::Mining(e.to_string()))??;

        let sealed: HashSet<String> = block
            .transactions
            .iter()
            .map(|tx| tx.transaction_hash.clone())
            .collect();

        let mut state = self.state.write().await;
        state.pending.retain(|tx| !sealed.contains(&tx.transaction_hash));
        state.chain.push(block.clone());

        info!(
            "block {} mined (nonce {}, {} transactions)",
            block.index,
            block.nonce,
            block.transactions.len()
        );
        Ok(Some(block))
    }

    /// Check whether a model hash is recorded in a block that still passes
    /// its own integrity self-check. Only the containing block is
    /// re-verified; use [`Ledger::verify_chain_integrity`] for the whole
    /// chain.
    pub async fn verify_hash(&self, model_hash: &str) -> bool {
        let state = self.state.read().await;

        for block in &state.chain {
            if block.transactions.iter().any(|tx| tx.model_hash == model_hash) {
                return match block.verify_integrity() {
                    Ok(valid) => {
                        if valid {
                            debug!("hash verified in block {}", block.index);
                        } else {
                            warn!("block {} failed self-check during hash lookup", block.index);
                        }
                        valid
                    }
                    Err(e) => {
                        error!("block {} could not be re-serialized: {e}", block.index);
                        false
                    }
                };
            }
        }

        warn!("hash not found: {}...", hash_prefix(model_hash));
        false
    }

    /// Verify every block after genesis: (i) its own hash recomputes and
    /// (ii) its previous_hash matches the predecessor's stored hash.
    pub async fn verify_chain_integrity(&self) -> IntegrityReport {
        let state = self.state.read().await;
        Self::verify_chain(&state.chain)
    }

    fn verify_chain(chain: &[Block]) -> IntegrityReport {
        let mut report = IntegrityReport {
            valid: true,
            total_blocks: chain.len(),
            invalid_blocks: Vec::new(),
            broken_links: Vec::new(),
        };

        for i in 1..chain.len() {
            let current = &chain[i];
            let previous = &chain[i - 1];

            let self_check = match current.verify_integrity() {
                Ok(ok) => ok,
                Err(e) => {
                    error!("block {} could not be re-serialized: {e}", current.index);
                    false
                }
            };
            if !self_check {
                report.valid = false;
                report.invalid_blocks.push(current.index);
            }

            if current.previous_hash != previous.hash {
                report.valid = false;
                report.broken_links.push(current.index);
            }
        }

        if report.valid {
            debug!("chain integrity verified ({} blocks)", report.total_blocks);
        } else {
            warn!(
                "chain integrity issues: {} invalid blocks, {} broken links",
                report.invalid_blocks.len(),
                report.broken_links.len()
            );
        }
        report
    }

    /// All occurrences of a model hash across the chain.
    pub async fn get_transaction_history(&self, model_hash: &str) -> Vec<TransactionRecord> {
        let state = self.state.read().await;
        let mut history = Vec::new();

        for block in &state.chain {
            for tx in &block.transactions {
                if tx.model_hash == model_hash {
                    history.push(TransactionRecord {
                        block_index: block.index,
                        block_hash: block.hash.clone(),
                        block_timestamp: block.timestamp,
                        transaction: tx.clone(),
                    });
                }
            }
        }

        history
    }

    /// Fetch a block by index; out-of-range indices yield `None`.
    pub async fn get_block(&self, index: u64) -> Option<Block> {
        let state = self.state.read().await;
        state.chain.get(index as usize).cloned()
    }

    /// Totals plus a fresh chain validity check.
    pub async fn get_ledger_summary(&self) -> LedgerSummary {
        let state = self.state.read().await;
        let total_transactions = state.chain.iter().map(|b| b.transactions.len()).sum();

        LedgerSummary {
            total_blocks: state.chain.len(),
            total_transactions,
            pending_transactions: state.pending.len(),
            chain_valid: Self::verify_chain(&state.chain).valid,
            latest_block: state.chain.last().cloned(),
        }
    }

    /// Index the next mined block will carry (= current chain length).
    pub async fn get_next_block_number(&self) -> u64 {
        let state = self.state.read().await;
        state.chain.len() as u64
    }

    /// Number of transactions waiting to be sealed.
    pub async fn pending_count(&self) -> usize {
        let state = self.state.read().await;
        state.pending.len()
    }

    #[cfg(test)]
    async fn tamper<F: FnOnce(&mut Block)>(&self, index: usize, mutate: F) {
        let mut state = self.state.write().await;
        mutate(&mut state.chain[index]);
    }
}

/// Abbreviate a model hash for log lines. Model hashes are validated only
/// for non-emptiness, so the cut must land on a char boundary rather than a
/// fixed byte offset.
fn hash_prefix(hash: &str) -> &str {
    match hash.char_indices().nth(16) {
        Some((boundary, _)) => &hash[..boundary],
        None => hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ledger() -> Ledger {
        Ledger::new(LedgerConfig { difficulty: 1 }).unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_mine_clears_pool() {
        let ledger = test_ledger();

        ledger
            .submit_transaction("hash-a", "node-1", "City Hospital")
            .await
            .unwrap();
        ledger
            .submit_transaction("hash-b", "node-2", "Central Medical")
            .await
            .unwrap();
        assert_eq!(ledger.pending_count().await, 2);

        let block = ledger.mine_pending().await.unwrap().expect("block mined");
        assert_eq!(block.index, 1);
        assert_eq!(block.transactions.len(), 2);
        assert!(block.meets_difficulty(1));
        assert_eq!(ledger.pending_count().await, 0);
        assert_eq!(ledger.get_next_block_number().await, 2);
    }

    #[tokio::test]
    async fn test_mine_empty_pool_is_noop() {
        let ledger = test_ledger();
        assert!(ledger.mine_pending().await.unwrap().is_none());
        assert_eq!(ledger.get_next_block_number().await, 1);
    }

    #[tokio::test]
    async fn test_empty_model_hash_rejected() {
        let ledger = test_ledger();
        let err = ledger
            .submit_transaction("", "node-1", "A")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_chain_links_hold_across_blocks() {
        let ledger = test_ledger();

        for round in 0..3 {
            ledger
                .submit_transaction(&format!("hash-{round}"), "node-1", "A")
                .await
                .unwrap();
            ledger.mine_pending().await.unwrap();
        }

        for i in 1..4u64 {
            let current = ledger.get_block(i).await.unwrap();
            let previous = ledger.get_block(i - 1).await.unwrap();
            assert_eq!(current.previous_hash, previous.hash);
        }
        assert!(ledger.verify_chain_integrity().await.valid);
    }

    #[tokio::test]
    async fn test_verify_hash_found_and_missing() {
        let ledger = test_ledger();
        ledger
            .submit_transaction("known-hash", "node-1", "A")
            .await
            .unwrap();
        ledger.mine_pending().await.unwrap();

        assert!(ledger.verify_hash("known-hash").await);
        assert!(!ledger.verify_hash("unknown-hash").await);
    }

    #[tokio::test]
    async fn test_pending_hash_not_yet_verifiable() {
        let ledger = test_ledger();
        ledger
            .submit_transaction("still-pending", "node-1", "A")
            .await
            .unwrap();
        assert!(!ledger.verify_hash("still-pending").await);
    }

    #[tokio::test]
    async fn test_tampered_field_reported_as_invalid_block() {
        let ledger = test_ledger();
        ledger
            .submit_transaction("hash-a", "node-1", "A")
            .await
            .unwrap();
        ledger.mine_pending().await.unwrap();

        ledger.tamper(1, |b| b.nonce += 1).await;

        let report = ledger.verify_chain_integrity().await;
        assert!(!report.valid);
        assert!(report.invalid_blocks.contains(&1));
        assert!(!ledger.verify_hash("hash-a").await);
    }

    #[tokio::test]
    async fn test_tampered_hash_breaks_link_to_successor() {
        let ledger = test_ledger();
        for round in 0..2 {
            ledger
                .submit_transaction(&format!("hash-{round}"), "node-1", "A")
                .await
                .unwrap();
            ledger.mine_pending().await.unwrap();
        }

        ledger
            .tamper(1, |b| b.hash = "deadbeef".to_string())
            .await;

        let report = ledger.verify_chain_integrity().await;
        assert!(!report.valid);
        assert!(report.invalid_blocks.contains(&1));
        assert!(report.broken_links.contains(&2));
    }

    #[tokio::test]
    async fn test_get_block_out_of_range() {
        let ledger = test_ledger();
        assert!(ledger.get_block(0).await.is_some());
        assert!(ledger.get_block(7).await.is_none());
    }

    #[tokio::test]
    async fn test_submissions_during_separate_rounds() {
        let ledger = test_ledger();
        ledger
            .submit_transaction("hash-a", "node-1", "A")
            .await
            .unwrap();
        ledger.mine_pending().await.unwrap();

        ledger
            .submit_transaction("hash-b", "node-2", "B")
            .await
            .unwrap();
        let block = ledger.mine_pending().await.unwrap().unwrap();
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].model_hash, "hash-b");
    }

    #[tokio::test]
    async fn test_ledger_summary_counts() {
        let ledger = test_ledger();
        ledger
            .submit_transaction("hash-a", "node-1", "A")
            .await
            .unwrap();
        ledger
            .submit_transaction("hash-b", "node-2", "B")
            .await
            .unwrap();
        ledger.mine_pending().await.unwrap();
        ledger
            .submit_transaction("hash-c", "node-3", "C")
            .await
            .unwrap();

        let summary = ledger.get_ledger_summary().await;
        assert_eq!(summary.total_blocks, 2);
        assert_eq!(summary.total_transactions, 2);
        assert_eq!(summary.pending_transactions, 1);
        assert!(summary.chain_valid);
        assert_eq!(summary.latest_block.unwrap().index, 1);
    }

    #[test]
    fn test_non_ascii_model_hash_survives_logging() {
        assert_eq!(hash_prefix("short"), "short");
        assert_eq!(hash_prefix("aaaaaaaaaaaaaaaé-rest"), "aaaaaaaaaaaaaaaé");

        // Log arguments are only evaluated under an active subscriber, so
        // install one for the duration of the calls.
        let subscriber = tracing_subscriber::fmt()
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            runtime.block_on(async {
                let ledger = test_ledger();
                ledger
                    .submit_transaction("aaaaaaaaaaaaaaaé-rest", "node-1", "A")
                    .await
                    .unwrap();
                assert!(!ledger.verify_hash("ééééééééééééééééé-missing").await);
            });
        });
    }

    #[tokio::test]
    async fn test_concurrent_submissions_all_recorded() {
        let ledger = std::sync::Arc::new(test_ledger());

        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .submit_transaction(&format!("hash-{i}"), &format!("node-{i}"), "A")
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let block = ledger.mine_pending().await.unwrap().unwrap();
        assert_eq!(block.transactions.len(), 8);
    }
}
