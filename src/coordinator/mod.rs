//! Round coordinator for federated training.
//!
//! Tracks participants, drives the round lifecycle
//! (`initialized → collecting → aggregating → aggregated → completed`), runs
//! federated averaging over participant weight vectors, and decides when an
//! iterative aggregate has converged. Quorum policy — when enough updates
//! have arrived to advance a round — belongs to the caller, not here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::aggregation::{average, AggregationError, Parameters};
use crate::params::CoordinatorConfig;

/// Coordinator errors.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("no active round")]
    NoActiveRound,

    #[error("invalid round transition: {from} -> {to}")]
    InvalidTransition { from: RoundStatus, to: RoundStatus },

    #[error("data sizes sum to zero")]
    ZeroDataSizes,

    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

/// Participant lifecycle status. Removal tombstones a participant as
/// `Inactive` rather than deleting the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Active,
    Inactive,
}

/// Registered training participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub institution: String,
    pub status: ParticipantStatus,
    pub registered_at: DateTime<Utc>,
    pub rounds_participated: u64,
    pub updates_submitted: u64,
    pub last_accuracy: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Round lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Initialized,
    Collecting,
    Aggregating,
    Aggregated,
    Completed,
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoundStatus::Initialized => "initialized",
            RoundStatus::Collecting => "collecting",
            RoundStatus::Aggregating => "aggregating",
            RoundStatus::Aggregated => "aggregated",
            RoundStatus::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// State of the current training round. Owned exclusively by the
/// coordinator; the ledger and aggregation engine never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundState {
    pub round_number: u64,
    pub algorithm: String,
    pub status: RoundStatus,
    pub global_parameters: Option<Parameters>,
    /// Accuracy per completed round, carried across round boundaries.
    pub accuracy_history: Vec<f64>,
    /// Participant count at initialization time.
    pub participant_snapshot: usize,
    pub started_at: DateTime<Utc>,
}

/// Snapshot returned by [`RoundCoordinator::initialize_round`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundInfo {
    pub round_number: u64,
    pub algorithm: String,
    pub status: RoundStatus,
    pub timestamp: DateTime<Utc>,
    pub participants: usize,
}

/// Outcome of a registration attempt. Re-registering an already active id is
/// a no-op signal, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistrationOutcome {
    Registered(Participant),
    AlreadyRegistered,
}

/// Outcome of a removal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalOutcome {
    Removed,
    NotFound,
}

/// Convergence decision for an accuracy history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub converged: bool,
    pub message: String,
    /// Most recent accuracy, absent when the history is too short.
    pub accuracy: Option<f64>,
}

/// Aggregate view over the participant registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub total_participants: usize,
    pub active_participants: usize,
    pub current_round: Option<u64>,
    pub participants: Vec<Participant>,
}

/// Orchestrates federated training rounds across registered participants.
pub struct RoundCoordinator {
    config: CoordinatorConfig,
    participants: RwLock<HashMap<String, Participant>>,
    round: RwLock<Option<RoundState>>,
}

impl RoundCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            participants: RwLock::new(HashMap::new()),
            round: RwLock::new(None),
        }
    }

    /// Start a new round in `Initialized` state, snapshotting the current
    /// participant count. The accuracy history of the previous round carries
    /// forward.
    pub async fn initialize_round(&self, round_number: u64, algorithm: Option<&str>) -> RoundInfo {
        let algorithm = algorithm
            .unwrap_or(&self.config.default_algorithm)
            .to_string();
        let participants = self.participants.read().await.len();

        let mut round = self.round.write().await;
        let accuracy_history = round
            .take()
            .map(|previous| previous.accuracy_history)
            .unwrap_or_default();

        let state = RoundState {
            round_number,
            algorithm: algorithm.clone(),
            status: RoundStatus::Initialized,
            global_parameters: None,
            accuracy_history,
            participant_snapshot: participants,
            started_at: Utc::now(),
        };
        let info = RoundInfo {
            round_number,
            algorithm,
            status: state.status,
            timestamp: state.started_at,
            participants,
        };
        *round = Some(state);

        info!("federated learning round {round_number} initialized");
        info
    }

    /// Current round state, if any round has been initialized.
    pub async fn current_round(&self) -> Option<RoundState> {
        self.round.read().await.clone()
    }

    /// Register a participant. Registration is independent of round status;
    /// a tombstoned (inactive) participant registering again is reactivated
    /// with its counters intact.
    pub async fn register_participant(
        &self,
        participant_id: &str,
        institution: &str,
    ) -> RegistrationOutcome {
        let mut participants = self.participants.write().await;

        if let Some(existing) = participants.get_mut(participant_id) {
            if existing.status == ParticipantStatus::Active {
                warn!("participant {participant_id} already registered");
                return RegistrationOutcome::AlreadyRegistered;
            }
            existing.status = ParticipantStatus::Active;
            info!("participant reactivated: {participant_id}");
            return RegistrationOutcome::Registered(existing.clone());
        }

        let participant = Participant {
            id: participant_id.to_string(),
            institution: institution.to_string(),
            status: ParticipantStatus::Active,
            registered_at: Utc::now(),
            rounds_participated: 0,
            updates_submitted: 0,
            last_accuracy: None,
            last_update: None,
        };
        participants.insert(participant_id.to_string(), participant.clone());

        info!("participant registered: {participant_id} ({institution})");
        RegistrationOutcome::Registered(participant)
    }

    /// Tombstone a participant: the record stays, flagged inactive.
    pub async fn remove_participant(&self, participant_id: &str) -> RemovalOutcome {
        let mut participants = self.participants.write().await;
        match participants.get_mut(participant_id) {
            Some(participant) => {
                participant.status = ParticipantStatus::Inactive;
                info!("participant removed: {participant_id}");
                RemovalOutcome::Removed
            }
            None => {
                warn!("cannot remove unknown participant: {participant_id}");
                RemovalOutcome::NotFound
            }
        }
    }

    /// Record an accepted local update: bumps both counters and stores the
    /// reported accuracy.
    pub async fn update_participant_stats(
        &self,
        participant_id: &str,
        accuracy: f64,
    ) -> Result<Participant, CoordinatorError> {
        let mut participants = self.participants.write().await;
        let participant = participants
            .get_mut(participant_id)
            .ok_or_else(|| CoordinatorError::ParticipantNotFound(participant_id.to_string()))?;

        participant.rounds_participated += 1;
        participant.updates_submitted += 1;
        participant.last_accuracy = Some(accuracy);
        participant.last_update = Some(Utc::now());

        info!("participant {participant_id} updated: accuracy={accuracy}");
        Ok(participant.clone())
    }

    /// Fetch one participant record.
    pub async fn get_participant(
        &self,
        participant_id: &str,
    ) -> Result<Participant, CoordinatorError> {
        self.participants
            .read()
            .await
            .get(participant_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::ParticipantNotFound(participant_id.to_string()))
    }

    /// Registry-wide status projection.
    pub async fn get_participant_status(&self) -> CoordinatorStatus {
        let participants = self.participants.read().await;
        let round = self.round.read().await;

        let mut records: Vec<Participant> = participants.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        CoordinatorStatus {
            total_participants: records.len(),
            active_participants: records
                .iter()
                .filter(|p| p.status == ParticipantStatus::Active)
                .count(),
            current_round: round.as_ref().map(|r| r.round_number),
            participants: records,
        }
    }

    /// Plain or weighted mean of participant weight vectors. Same numeric
    /// semantics as [`crate::aggregation::AggregationEngine::weighted_average`].
    pub fn federated_averaging(
        &self,
        weight_vectors: &[Vec<f64>],
        weights: Option<&[f64]>,
    ) -> Result<Vec<f64>, CoordinatorError> {
        let global = average::weighted_vector_mean(weight_vectors, weights)?;
        info!(
            "federated averaging completed for {} participants",
            weight_vectors.len()
        );
        Ok(global)
    }

    /// Federated averaging weighted by local dataset sizes:
    /// `weight[i] = data_sizes[i] / sum(data_sizes)`.
    pub fn weighted_averaging(
        &self,
        weight_vectors: &[Vec<f64>],
        data_sizes: &[u64],
    ) -> Result<Vec<f64>, CoordinatorError> {
        let total: u64 = data_sizes.iter().sum();
        if total == 0 {
            return Err(CoordinatorError::ZeroDataSizes);
        }

        let weights: Vec<f64> = data_sizes.iter().map(|&size| size as f64).collect();
        self.federated_averaging(weight_vectors, Some(&weights))
    }

    /// Plateau detection with the configured threshold and patience.
    pub fn check_convergence(&self, accuracy_history: &[f64]) -> ConvergenceReport {
        self.check_convergence_with(
            accuracy_history,
            self.config.convergence.threshold,
            self.config.convergence.patience,
        )
    }

    /// Plateau detection: requires at least `patience` recorded accuracies,
    /// then inspects the round-over-round deltas within the most recent
    /// `patience` entries and declares convergence when the largest delta is
    /// below `threshold`.
    ///
    /// This is a plateau detector, not a best-accuracy tracker: a run
    /// improving by small amounts for `patience` rounds is judged converged
    /// even if accuracy could keep climbing.
    pub fn check_convergence_with(
        &self,
        accuracy_history: &[f64],
        threshold: f64,
        patience: usize,
    ) -> ConvergenceReport {
        if accuracy_history.is_empty() || accuracy_history.len() < patience {
            return ConvergenceReport {
                converged: false,
                message: "not enough history".to_string(),
                accuracy: None,
            };
        }

        let window = &accuracy_history[accuracy_history.len() - patience..];
        let max_improvement = window
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .fold(0.0f64, f64::max);
        let accuracy = Some(accuracy_history[accuracy_history.len() - 1]);

        if max_improvement < threshold {
            ConvergenceReport {
                converged: true,
                message: format!(
                    "model converged after {} rounds",
                    accuracy_history.len()
                ),
                accuracy,
            }
        } else {
            ConvergenceReport {
                converged: false,
                message: format!("model still improving, max improvement {max_improvement}"),
                accuracy,
            }
        }
    }

    /// `Initialized → Collecting`: the round starts accepting local updates.
    pub async fn begin_collecting(&self) -> Result<(), CoordinatorError> {
        self.advance(RoundStatus::Initialized, RoundStatus::Collecting)
            .await
    }

    /// `Collecting → Aggregating`: the caller has decided a quorum of
    /// updates has arrived.
    pub async fn begin_aggregation(&self) -> Result<(), CoordinatorError> {
        self.advance(RoundStatus::Collecting, RoundStatus::Aggregating)
            .await
    }

    /// `Aggregating → Aggregated`: stores the new global parameter vector.
    pub async fn finish_aggregation(&self, global: Parameters) -> Result<(), CoordinatorError> {
        let mut round = self.round.write().await;
        let state = round.as_mut().ok_or(CoordinatorError::NoActiveRound)?;
        Self::transition(state, RoundStatus::Aggregating, RoundStatus::Aggregated)?;
        state.global_parameters = Some(global);
        Ok(())
    }

    /// `Aggregated → Completed`: records the round's global accuracy into
    /// the history the plateau detector reads.
    pub async fn complete_round(&self, accuracy: f64) -> Result<RoundState, CoordinatorError> {
        let mut round = self.round.write().await;
        let state = round.as_mut().ok_or(CoordinatorError::NoActiveRound)?;
        Self::transition(state, RoundStatus::Aggregated, RoundStatus::Completed)?;
        state.accuracy_history.push(accuracy);

        info!(
            "round {} completed with accuracy {accuracy}",
            state.round_number
        );
        Ok(state.clone())
    }

    async fn advance(
        &self,
        expected: RoundStatus,
        next: RoundStatus,
    ) -> Result<(), CoordinatorError> {
        let mut round = self.round.write().await;
        let state = round.as_mut().ok_or(CoordinatorError::NoActiveRound)?;
        Self::transition(state, expected, next)
    }

    fn transition(
        state: &mut RoundState,
        expected: RoundStatus,
        next: RoundStatus,
    ) -> Result<(), CoordinatorError> {
        if state.status != expected {
            return Err(CoordinatorError::InvalidTransition {
                from: state.status,
                to: next,
            });
        }
        state.status = next;
        info!("round {} is now {next}", state.round_number);
        Ok(())
    }
}
