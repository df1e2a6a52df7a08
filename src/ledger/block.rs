//! Block and transaction types with canonical hashing and proof-of-work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::params::GENESIS_PREVIOUS_HASH;
use crate::utils::serialization::{sha256_hex, SerializeError};

/// Record of one participant's model update submission.
///
/// Immutable once created. The ledger never inspects parameter content, only
/// the opaque `model_hash` digest of the encrypted payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Hex digest of the encrypted parameter payload.
    pub model_hash: String,

    /// Identifier of the submitting participant.
    pub submitter_id: String,

    /// Institution label of the submitter.
    pub institution: String,

    /// Submission time.
    pub timestamp: DateTime<Utc>,

    /// Digest binding model hash, submitter, and timestamp.
    pub transaction_hash: String,
}

impl Transaction {
    /// Create a transaction, stamping it with the current time and deriving
    /// `transaction_hash = sha256(model_hash ∥ submitter_id ∥ timestamp)`.
    pub fn new(
        model_hash: impl Into<String>,
        submitter_id: impl Into<String>,
        institution: impl Into<String>,
    ) -> Self {
        let model_hash = model_hash.into();
        let submitter_id = submitter_id.into();
        let timestamp = Utc::now();
        let transaction_hash = sha256_hex(
            format!("{}{}{}", model_hash, submitter_id, timestamp.to_rfc3339()).as_bytes(),
        );

        Self {
            model_hash,
            submitter_id,
            institution: institution.into(),
            timestamp,
            transaction_hash,
        }
    }
}

/// One block of the hash-chained ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain; the genesis block is index 0.
    pub index: u64,

    /// Time the block was assembled.
    pub timestamp: DateTime<Utc>,

    /// Transactions sealed by this block.
    pub transactions: Vec<Transaction>,

    /// Hash of the preceding block ("0" for genesis).
    pub previous_hash: String,

    /// Hash over the canonical serialization of every other field.
    pub hash: String,

    /// Proof-of-work counter.
    pub nonce: u64,
}

impl Block {
    /// Build the genesis block: index 0, no transactions, previous hash "0".
    pub fn genesis() -> Result<Self, SerializeError> {
        let mut block = Self {
            index: 0,
            timestamp: Utc::now(),
            transactions: Vec::new(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            hash: String::new(),
            nonce: 0,
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    /// Recompute the block hash: canonical JSON of all fields except `hash`,
    /// digested with SHA-256. Object keys are sorted, so two semantically
    /// identical blocks always hash identically.
    pub fn compute_hash(&self) -> Result<String, SerializeError> {
        let mut value = serde_json::to_value(self)?;
        if let Some(fields) = value.as_object_mut() {
            fields.remove("hash");
        }
        Ok(sha256_hex(value.to_string().as_bytes()))
    }

    /// Check the stored hash against a fresh recomputation.
    pub fn verify_integrity(&self) -> Result<bool, SerializeError> {
        Ok(self.compute_hash()? == self.hash)
    }

    /// Whether the stored hash satisfies the leading-zero difficulty
    /// predicate.
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        self.hash.starts_with(&"0".repeat(difficulty))
    }
}

/// Proof-of-work: increment the nonce until the block hash carries
/// `difficulty` leading zero hex characters. CPU-bound and blocking; callers
/// run this off any latency-sensitive path.
pub fn mine(
    index: u64,
    previous_hash: String,
    transactions: Vec<Transaction>,
    difficulty: usize,
) -> Result<Block, SerializeError> {
    let mut block = Block {
        index,
        timestamp: Utc::now(),
        transactions,
        previous_hash,
        hash: String::new(),
        nonce: 0,
    };
    let target = "0".repeat(difficulty);

    loop {
        let hash = block.compute_hash()?;
        if hash.starts_with(&target) {
            block.hash = hash;
            return Ok(block);
        }
        block.nonce += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_invariants() {
        let genesis = Block::genesis().unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.hash, genesis.compute_hash().unwrap());
    }

    #[test]
    fn test_transaction_hash_shape() {
        let tx = Transaction::new("abc123", "node-1", "City Hospital");
        assert_eq!(tx.transaction_hash.len(), 64);
        assert!(tx.transaction_hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_duplicate_model_hashes_are_distinct_events() {
        let a = Transaction::new("samehash", "node-1", "A");
        let b = Transaction::new("samehash", "node-2", "B");
        assert_eq!(a.model_hash, b.model_hash);
        assert_ne!(a.transaction_hash, b.transaction_hash);
    }

    #[test]
    fn test_mined_block_meets_difficulty_and_recomputes() {
        let genesis = Block::genesis().unwrap();
        let txs = vec![Transaction::new("hash-a", "node-1", "A")];
        let block = mine(1, genesis.hash.clone(), txs, 2).unwrap();

        assert!(block.hash.starts_with("00"));
        assert!(block.meets_difficulty(2));
        assert_eq!(block.hash, block.compute_hash().unwrap());
        assert_eq!(block.previous_hash, genesis.hash);
    }

    #[test]
    fn test_tampered_block_fails_self_check() {
        let txs = vec![Transaction::new("hash-a", "node-1", "A")];
        let mut block = mine(1, "prev".to_string(), txs, 1).unwrap();
        assert!(block.verify_integrity().unwrap());

        block.nonce += 1;
        assert!(!block.verify_integrity().unwrap());
    }
}
