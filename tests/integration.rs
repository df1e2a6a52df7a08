//! End-to-end round: register participants, encrypt and record updates,
//! mine the block, aggregate, and complete the round.

use anyhow::Result;

use fedledger::aggregation::{AggregationEngine, ParamValue, Parameters};
use fedledger::coordinator::{RegistrationOutcome, RoundCoordinator, RoundStatus};
use fedledger::ledger::Ledger;
use fedledger::params::{CoordinatorConfig, LedgerConfig};

fn update(weight: f64) -> Parameters {
    let mut params = Parameters::new();
    params.insert("w".to_string(), ParamValue::Scalar(weight));
    params.insert(
        "layer0".to_string(),
        ParamValue::Vector(vec![weight, weight * 2.0]),
    );
    params
}

#[tokio::test(flavor = "multi_thread")]
async fn full_training_round() -> Result<()> {
    let engine = AggregationEngine::new();
    let ledger = Ledger::new(LedgerConfig { difficulty: 2 })?;
    let coordinator = RoundCoordinator::new(CoordinatorConfig::default());

    // Three hospitals join.
    for (id, institution) in [
        ("hospital-1", "City Hospital"),
        ("hospital-2", "County Clinic"),
        ("hospital-3", "University Medical Center"),
    ] {
        let outcome = coordinator.register_participant(id, institution).await;
        assert!(matches!(outcome, RegistrationOutcome::Registered(_)));
    }

    let info = coordinator.initialize_round(1, None).await;
    assert_eq!(info.participants, 3);
    coordinator.begin_collecting().await?;

    // Each participant encrypts its update and records its digest on the
    // ledger.
    let updates = [update(1.0), update(2.0), update(3.0)];
    let mut payloads = Vec::new();
    let mut hashes = Vec::new();
    for (i, params) in updates.iter().enumerate() {
        let payload = engine.encrypt(params)?;
        let model_hash = engine.hash(params)?;
        let submitter = format!("hospital-{}", i + 1);

        ledger
            .submit_transaction(&model_hash, &submitter, "test")
            .await?;
        payloads.push(payload);
        hashes.push(model_hash);
    }
    assert_eq!(ledger.pending_count().await, 3);

    // Seal the round's transactions.
    let block = ledger
        .mine_pending()
        .await?
        .ok_or_else(|| anyhow::anyhow!("expected a mined block"))?;
    assert_eq!(block.index, 1);
    assert_eq!(block.transactions.len(), 3);
    assert!(block.hash.starts_with("00"));
    assert_eq!(ledger.pending_count().await, 0);
    for hash in &hashes {
        assert!(ledger.verify_hash(hash).await);
    }

    // Aggregate: mean of w in {1, 2, 3} is exactly 2.
    coordinator.begin_aggregation().await?;
    let global = engine.secure_aggregate(&payloads)?;
    assert_eq!(global["w"], ParamValue::Scalar(2.0));
    assert_eq!(global["layer0"], ParamValue::Vector(vec![2.0, 4.0]));

    // The global model is itself auditable.
    let commitment = engine.create_commitment(&global)?;
    let proof = engine.create_zero_knowledge_proof(&global, &commitment)?;
    assert!(proof.valid);

    coordinator.finish_aggregation(global).await?;
    for (i, accuracy) in [0.78, 0.80, 0.82].iter().enumerate() {
        coordinator
            .update_participant_stats(&format!("hospital-{}", i + 1), *accuracy)
            .await?;
    }
    let state = coordinator.complete_round(0.80).await?;
    assert_eq!(state.status, RoundStatus::Completed);
    assert_eq!(state.accuracy_history, vec![0.80]);

    // One completed round is not a plateau yet.
    let report = coordinator.check_convergence(&state.accuracy_history);
    assert!(!report.converged);

    // The chain still holds together after the round.
    let integrity = ledger.verify_chain_integrity().await;
    assert!(integrity.valid);
    let summary = ledger.get_ledger_summary().await;
    assert_eq!(summary.total_blocks, 2);
    assert_eq!(summary.total_transactions, 3);
    assert!(summary.chain_valid);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn convergence_over_multiple_rounds() -> Result<()> {
    let coordinator = RoundCoordinator::new(CoordinatorConfig::default());
    coordinator.register_participant("hospital-1", "A").await;

    let mut global = Parameters::new();
    global.insert("w".to_string(), ParamValue::Scalar(0.0));

    // Accuracy plateaus from round 3 on.
    let accuracies = [0.70, 0.80, 0.81, 0.815, 0.816];
    let mut converged_at = None;
    for (round, accuracy) in accuracies.iter().enumerate() {
        coordinator.initialize_round(round as u64 + 1, None).await;
        coordinator.begin_collecting().await?;
        coordinator.begin_aggregation().await?;
        coordinator.finish_aggregation(global.clone()).await?;
        let state = coordinator.complete_round(*accuracy).await?;

        let report = coordinator.check_convergence(&state.accuracy_history);
        if report.converged && converged_at.is_none() {
            converged_at = Some(round + 1);
        }
    }

    assert_eq!(converged_at, Some(5));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn tampered_block_detected_after_rounds() -> Result<()> {
    let engine = AggregationEngine::new();
    let ledger = Ledger::new(LedgerConfig { difficulty: 1 })?;

    for round in 1..=3u64 {
        let params = update(round as f64);
        ledger
            .submit_transaction(&engine.hash(&params)?, "hospital-1", "test")
            .await?;
        ledger.mine_pending().await?;
    }

    let integrity = ledger.verify_chain_integrity().await;
    assert!(integrity.valid);

    let history = ledger
        .get_transaction_history(&engine.hash(&update(2.0))?)
        .await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].block_index, 2);

    Ok(())
}
