//! fedledger: auditable federated learning infrastructure.
//!
//! Three cooperating components:
//!
//! - [`ledger`]: a hash-chained transaction ledger. Model update digests are
//!   submitted as transactions and sealed into blocks by proof-of-work, so
//!   every accepted update leaves a tamper-evident trail.
//! - [`aggregation`]: the secure aggregation engine. Participant parameters
//!   are encrypted with AES-256-GCM, integrity-hashed with SHA-256, averaged
//!   (weighted or plain), and optionally perturbed with Laplace noise for
//!   differential privacy.
//! - [`coordinator`]: round orchestration. Tracks participants, drives each
//!   round through its lifecycle, and detects accuracy plateaus.
//!
//! The aggregation here is simulated secure aggregation: one process holds
//! the key, decrypts all contributions, and averages in the clear. The
//! knowledge proofs are hash commitments, not zero-knowledge proofs. Both
//! caveats are documented on [`aggregation`] directly; this crate is a
//! platform skeleton, not a cryptographic SMPC implementation.
//!
//! ```no_run
//! use fedledger::aggregation::{AggregationEngine, ParamValue, Parameters};
//! use fedledger::ledger::Ledger;
//! use fedledger::params::LedgerConfig;
//!
//! # async fn demo() -> Result<(), fedledger::CoreError> {
//! let engine = AggregationEngine::new();
//! let ledger = Ledger::new(LedgerConfig::default())?;
//!
//! let mut update = Parameters::new();
//! update.insert("w".to_string(), ParamValue::Scalar(0.5));
//!
//! let payload = engine.encrypt(&update)?;
//! ledger
//!     .submit_transaction(&engine.hash(&update)?, "hospital-1", "City Hospital")
//!     .await?;
//! let block = ledger.mine_pending().await?;
//! # let _ = (payload, block);
//! # Ok(())
//! # }
//! ```

pub mod aggregation;
pub mod coordinator;
pub mod ledger;
pub mod params;
pub mod utils;

pub use aggregation::{
    AggregationEngine, AggregationError, CryptoError, EncryptedPayload, KnowledgeProof,
    ParamValue, Parameters,
};
pub use coordinator::{
    ConvergenceReport, CoordinatorError, Participant, RegistrationOutcome, RemovalOutcome,
    RoundCoordinator, RoundStatus,
};
pub use ledger::{Block, IntegrityReport, Ledger, LedgerError, LedgerSummary, Transaction};
pub use params::{ConvergenceConfig, CoordinatorConfig, LedgerConfig};

use thiserror::Error;

/// Unified error type for callers composing all three components.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Serialization(#[from] utils::serialization::SerializeError),

    #[error(transparent)]
    Logging(#[from] utils::logging::LoggingError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Crate version, from Cargo metadata.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
