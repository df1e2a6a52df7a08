// src/params.rs
// ============================================================================
// FEDLEDGER GLOBAL PARAMETERS AND CONFIGURATION
// ============================================================================
// This file defines the constants and tunable configuration structures shared
// by the ledger, the aggregation engine, and the round coordinator.
// ============================================================================

use serde::{Deserialize, Serialize};

// ============================================================================
// FIXED CONSTANTS
// ============================================================================

/// Previous-hash sentinel carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Default number of leading zero hex characters a mined block hash must
/// carry. Expected work grows with 16^difficulty hash evaluations; this is a
/// cost knob for the single miner, not a consensus parameter.
pub const DEFAULT_DIFFICULTY: usize = 2;

/// PBKDF2-HMAC-SHA256 iteration count for master key derivation.
pub const KDF_ITERATIONS: u32 = 100_000;

/// Symmetric key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Salt size in bytes for key derivation.
pub const SALT_SIZE: usize = 16;

/// AES-GCM nonce size in bytes (96-bit, one fresh nonce per encryption).
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Default privacy budget for differential privacy noise.
pub const DEFAULT_EPSILON: f64 = 1.0;

/// Default sensitivity bound for differential privacy noise.
pub const DEFAULT_SENSITIVITY: f64 = 1.0;

/// Default minimum round-over-round improvement below which a training run
/// is considered to have plateaued.
pub const CONVERGENCE_THRESHOLD: f64 = 0.01;

/// Default number of recent accuracy entries inspected by the plateau
/// detector.
pub const CONVERGENCE_PATIENCE: usize = 3;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Proof-of-work difficulty (leading zero hex characters).
    pub difficulty: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
        }
    }
}

/// Convergence detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Minimum improvement counted as progress.
    pub threshold: f64,

    /// Number of recent rounds the plateau detector inspects.
    pub patience: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            threshold: CONVERGENCE_THRESHOLD,
            patience: CONVERGENCE_PATIENCE,
        }
    }
}

/// Round coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Aggregation algorithm recorded on rounds that do not name one.
    pub default_algorithm: String,

    /// Convergence detection parameters.
    pub convergence: ConvergenceConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_algorithm: "federated_averaging".to_string(),
            convergence: ConvergenceConfig::default(),
        }
    }
}
