//! Secure aggregation engine for encrypted model parameter updates.
//!
//! The engine owns one AES-256-GCM key for its lifetime, derived at
//! construction via PBKDF2-HMAC-SHA256 over a random seed and salt. It
//! transports parameter vectors as authenticated ciphertext, hashes them with
//! the same canonical digest the ledger uses, averages decrypted batches, and
//! optionally perturbs results with calibrated Laplace noise.
//!
//! The aggregation here is simulated secure aggregation: payloads are
//! centrally decrypted and then averaged. It is not a multi-party protocol
//! in which the aggregator never sees plaintext, and the commitment "proof"
//! primitive is a hash-equality check, not a zero-knowledge protocol. Both
//! simplifications are deliberate; callers depend on the exact averaging
//! semantics, not on cryptographic multi-party guarantees.

pub mod average;

use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::{Rng, RngCore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::params::{KDF_ITERATIONS, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
use crate::utils::serialization::{canonical_digest, to_canonical_json, SerializeError};

/// Cryptographic errors. Decryption failure is recoverable and surfaced
/// distinctly from input validation so callers can tell "bad input" from
/// "tampered or wrong-key data".
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("invalid payload encoding: {0}")]
    Encoding(String),

    #[error(transparent)]
    Serialization(#[from] SerializeError),
}

/// Aggregation errors.
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("no parameters to aggregate")]
    EmptyInput,

    #[error("length mismatch for parameter '{name}': expected {expected}, got {actual}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("vector length mismatch at contributor {index}: expected {expected}, got {actual}")]
    VectorLengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("type mismatch for parameter '{name}': scalar and vector values mixed")]
    TypeMismatch { name: String },

    #[error("expected {expected} weights, got {actual}")]
    WeightCountMismatch { expected: usize, actual: usize },

    #[error("weights sum to zero")]
    ZeroWeightSum,

    #[error("invalid privacy budget: epsilon must be positive, got {0}")]
    InvalidEpsilon(f64),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// One model parameter value: a scalar or a numeric sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Scalar(value)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(value: Vec<f64>) -> Self {
        ParamValue::Vector(value)
    }
}

/// Model parameters: name to scalar or numeric sequence. A `BTreeMap` keeps
/// keys sorted, so the serialized form is canonical by construction.
pub type Parameters = BTreeMap<String, ParamValue>;

/// Opaque nonce-prefixed AES-256-GCM ciphertext of a serialized parameter
/// mapping. Ciphertext varies between calls for identical input (fresh nonce
/// per encryption); equality of payloads must not be used to detect
/// duplicate submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPayload(pub Vec<u8>);

impl EncryptedPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base64 form for storage layers that persist text columns.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        BASE64
            .decode(encoded)
            .map(Self)
            .map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}

/// Structural stand-in for a proof that data matches a commitment.
///
/// Not zero-knowledge: the verifier recomputes the hash of the data itself,
/// so the data is not hidden from it. The naming follows the protocol slot
/// this fills; the gap is documented rather than papered over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeProof {
    pub commitment: String,
    pub data_hash: String,
    pub valid: bool,
    /// Random token distinguishing proof instances.
    pub proof_id: String,
}

/// Engine owning a single symmetric key for its lifetime.
///
/// The key is derived once at construction and never persisted or exposed;
/// key rotation is out of scope. The cipher is shared read-only across all
/// encrypt/decrypt calls, so batch decryption parallelizes without locking.
pub struct AggregationEngine {
    cipher: Aes256Gcm,
}

impl AggregationEngine {
    /// Derive the master key from a fresh random seed and salt
    /// (PBKDF2-HMAC-SHA256, 100,000 iterations, 256-bit output).
    pub fn new() -> Self {
        let mut seed = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(seed.as_mut());
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2_hmac::<Sha256>(seed.as_ref(), &salt, KDF_ITERATIONS, key.as_mut());

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
        info!("master encryption key derived");

        Self { cipher }
    }

    /// Serialize parameters canonically and encrypt them under a fresh
    /// random nonce. Repeated calls with identical input yield different
    /// ciphertext.
    pub fn encrypt(&self, parameters: &Parameters) -> Result<EncryptedPayload, CryptoError> {
        let plaintext = to_canonical_json(parameters)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(nonce.as_slice());
        payload.extend_from_slice(&ciphertext);

        debug!("parameters encrypted ({} bytes)", payload.len());
        Ok(EncryptedPayload(payload))
    }

    /// Decrypt a payload back into a parameter mapping.
    ///
    /// A corrupted payload, wrong key, or truncated input fails GCM
    /// authentication and surfaces as [`CryptoError::Decrypt`]; this gates a
    /// caller decision (reject vs. accept a submission), so it is always
    /// recoverable.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Parameters, CryptoError> {
        let bytes = payload.as_bytes();
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decrypt("payload too short".to_string()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt("authentication failed".to_string()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::Decrypt(format!("malformed plaintext: {e}")))
    }

    /// Canonical SHA-256 digest of any serializable value, comparable with
    /// the ledger's transaction hashes.
    pub fn hash<T: Serialize>(&self, data: &T) -> Result<String, CryptoError> {
        let digest = canonical_digest(data)?;
        debug!("hash generated: {}...", &digest[..16]);
        Ok(digest)
    }

    /// Equality of `hash(data)` against an expected digest.
    pub fn verify_hash<T: Serialize>(&self, data: &T, expected: &str) -> Result<bool, CryptoError> {
        let matches = self.hash(data)? == expected;
        if !matches {
            warn!("hash verification failed");
        }
        Ok(matches)
    }

    /// Decrypt every payload and average the results per parameter name.
    ///
    /// All-or-nothing: a single payload failing to decrypt fails the whole
    /// call, so a corrupted batch never contributes partially. Decryption
    /// runs in parallel; the averaging reduction always follows input order
    /// for reproducible floating-point results.
    pub fn secure_aggregate(
        &self,
        payloads: &[EncryptedPayload],
    ) -> Result<Parameters, AggregationError> {
        if payloads.is_empty() {
            return Err(AggregationError::EmptyInput);
        }

        let decrypted: Vec<Parameters> = payloads
            .par_iter()
            .map(|payload| self.decrypt(payload))
            .collect::<Result<_, _>>()?;

        let aggregated = average::weighted_parameter_mean(&decrypted, None)?;
        info!(
            "secure aggregation completed for {} participants",
            payloads.len()
        );
        Ok(aggregated)
    }

    /// Weighted per-name mean over plaintext parameter mappings. Weights are
    /// normalized to sum to 1; with `weights` absent this is the unweighted
    /// mean. Same numeric semantics as the round coordinator's federated
    /// averaging.
    pub fn weighted_average(
        &self,
        value_lists: &[Parameters],
        weights: Option<&[f64]>,
    ) -> Result<Parameters, AggregationError> {
        average::weighted_parameter_mean(value_lists, weights)
    }

    /// Add i.i.d. Laplace noise with scale `sensitivity / epsilon` to every
    /// scalar and every vector element.
    ///
    /// Smaller epsilon means larger scale, more noise, stronger privacy and
    /// weaker utility; the trade-off belongs to the caller.
    pub fn add_differential_privacy_noise(
        &self,
        parameters: &Parameters,
        epsilon: f64,
        sensitivity: f64,
    ) -> Result<Parameters, AggregationError> {
        self.add_differential_privacy_noise_with_rng(
            parameters,
            epsilon,
            sensitivity,
            &mut rand::thread_rng(),
        )
    }

    /// Seedable variant of [`Self::add_differential_privacy_noise`] for
    /// reproducible noise in simulations and tests.
    pub fn add_differential_privacy_noise_with_rng<R: Rng>(
        &self,
        parameters: &Parameters,
        epsilon: f64,
        sensitivity: f64,
        rng: &mut R,
    ) -> Result<Parameters, AggregationError> {
        if !(epsilon > 0.0 && epsilon.is_finite()) {
            return Err(AggregationError::InvalidEpsilon(epsilon));
        }

        let scale = sensitivity / epsilon;
        let mut noisy = Parameters::new();
        for (name, value) in parameters {
            let perturbed = match value {
                ParamValue::Scalar(x) => ParamValue::Scalar(x + sample_laplace(rng, scale)),
                ParamValue::Vector(xs) => ParamValue::Vector(
                    xs.iter().map(|x| x + sample_laplace(rng, scale)).collect(),
                ),
            };
            noisy.insert(name.clone(), perturbed);
        }

        info!("differential privacy noise added (epsilon={epsilon})");
        Ok(noisy)
    }

    /// Commit to data by hashing it. The commitment binds but does not hide:
    /// anyone holding the data can recompute it.
    pub fn create_commitment<T: Serialize>(&self, data: &T) -> Result<String, CryptoError> {
        let commitment = self.hash(data)?;
        info!("commitment created");
        Ok(commitment)
    }

    /// Check data against a commitment, packaged as a proof record.
    ///
    /// See [`KnowledgeProof`]: this reveals the data hash to the verifier
    /// and is not a zero-knowledge protocol.
    pub fn create_zero_knowledge_proof<T: Serialize>(
        &self,
        data: &T,
        commitment: &str,
    ) -> Result<KnowledgeProof, CryptoError> {
        let data_hash = self.hash(data)?;
        let valid = data_hash == commitment;

        let mut token = [0u8; 16];
        OsRng.fill_bytes(&mut token);

        info!(
            "commitment proof created: {}",
            if valid { "valid" } else { "invalid" }
        );
        Ok(KnowledgeProof {
            commitment: commitment.to_string(),
            data_hash,
            valid,
            proof_id: hex::encode(token),
        })
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Draw one Laplace(0, scale) sample as the difference of two exponentials.
fn sample_laplace<R: Rng>(rng: &mut R, scale: f64) -> f64 {
    let a: f64 = rng.gen();
    let b: f64 = rng.gen();
    // -ln(1 - u) is Exp(1) for u in [0, 1); the difference of two
    // independent Exp(1/scale) draws is Laplace(0, scale).
    scale * ((1.0 - b).ln() - (1.0 - a).ln())
}
