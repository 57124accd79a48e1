//! E2E Test: Concurrency, Cancellation and Learning
//!
//! Overlapping cycles must never run two executions on one unit, a failing
//! unit must not take the cycle down with it, cancellation must stop work
//! that has not dispatched, and succeeded executions must come back as
//! precedent.

mod support;

use std::sync::Arc;
use std::time::Duration;
use support::{
    damper_attributions, succeeded_record, test_config, unit, DamperExplainer, FailingSimulator,
    Gauge, GaugedExplainer, GaugedSimulator, Harness, LoadScript, PrecedentStore,
    RecordingChannel, SlowStore, ANOMALOUS_KW, NORMAL_KW,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wattson_core::decision::DecisionReason;
use wattson_core::diagnosis::signature::embed;
use wattson_core::execution::ledger::ExecutionLedger;
use wattson_core::knowledge::InMemoryKnowledgeStore;
use wattson_core::orchestrator::report::OutcomeClass;
use wattson_core::ports::{HistoricalCase, KnowledgeStore};
use wattson_core::scoring::ScoreBreakdown;
use wattson_core::types::{now, UnitId};
use wattson_core::{CycleOrchestrator, DecisionOutcome, ErrorKind, ExecutionStatus, Services};

fn precedent_harness() -> Harness {
    Harness::new(
        PrecedentStore::with_precedent("stuck_damper", 0.9),
        RecordingChannel::new(),
    )
}

/// E2E test: two overlapping cycles approve the same unit once
#[tokio::test(start_paused = true)]
async fn e2e_overlapping_cycles_execute_once() {
    let harness = precedent_harness();
    harness.telemetry.script("U1", LoadScript::steady(ANOMALOUS_KW));

    let orchestrator = CycleOrchestrator::new(test_config(), harness.services.clone()).unwrap();
    let fleet = [unit("U1")];
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        orchestrator.run_cycle(&fleet, &cancel),
        orchestrator.run_cycle(&fleet, &cancel)
    );

    let decisions: Vec<_> = [&a, &b]
        .iter()
        .map(|r| r.outcomes[0].decision.clone().unwrap())
        .collect();
    let executed = decisions
        .iter()
        .filter(|d| d.outcome == DecisionOutcome::AutonomousExecute)
        .count();
    assert_eq!(executed, 1);

    let busy = decisions
        .iter()
        .find(|d| d.outcome == DecisionOutcome::Escalate)
        .expect("the losing cycle escalates");
    assert_eq!(busy.rationale.reasons, vec![DecisionReason::UnitBusy]);

    assert_eq!(harness.channel.issued().len(), 1);
    assert_eq!(orchestrator.ledger().history(&UnitId::new("U1")).len(), 1);
    assert_eq!(orchestrator.settle().await.len(), 1);
}

/// E2E test: a unit under monitoring is not approved again
#[tokio::test(start_paused = true)]
async fn e2e_unit_under_monitoring_is_escalated() {
    let harness = precedent_harness();
    harness.telemetry.script("U1", LoadScript::steady(ANOMALOUS_KW));

    let orchestrator = CycleOrchestrator::new(test_config(), harness.services.clone()).unwrap();
    let fleet = [unit("U1")];
    let cancel = CancellationToken::new();

    let first = orchestrator.run_cycle(&fleet, &cancel).await;
    assert_eq!(first.outcomes[0].class(), OutcomeClass::Executed);

    let second = orchestrator.run_cycle(&fleet, &cancel).await;
    let decision = second.outcomes[0].decision.as_ref().unwrap();
    assert_eq!(decision.outcome, DecisionOutcome::Escalate);
    assert_eq!(decision.rationale.reasons, vec![DecisionReason::UnitBusy]);
    assert_eq!(harness.channel.issued().len(), 1);

    // Once the window closes the unit is free again
    orchestrator.settle().await;
    let third = orchestrator.run_cycle(&fleet, &cancel).await;
    assert_eq!(third.outcomes[0].class(), OutcomeClass::Executed);
    assert_eq!(harness.channel.issued().len(), 2);
    orchestrator.settle().await;
}

/// E2E test: one failing unit does not affect the others
#[tokio::test(start_paused = true)]
async fn e2e_unit_failures_are_isolated() {
    let harness = precedent_harness();
    harness.telemetry.script("U1", LoadScript::offline());
    harness.telemetry.script("U2", LoadScript::steady(ANOMALOUS_KW));
    harness.telemetry.script("U3", LoadScript::steady(NORMAL_KW));

    let mut config = test_config();
    config.orchestrator.max_concurrent_units = 1;
    let orchestrator = CycleOrchestrator::new(config, harness.services.clone()).unwrap();
    let fleet = [unit("U1"), unit("U2"), unit("U3"), unit("U4")];
    let report = orchestrator.run_cycle(&fleet, &CancellationToken::new()).await;

    let ids: Vec<&str> = report.outcomes.iter().map(|o| o.unit_id.as_str()).collect();
    assert_eq!(ids, vec!["U1", "U2", "U3", "U4"]);

    assert_eq!(report.outcomes[0].error.as_ref().unwrap().kind, ErrorKind::DataUnavailable);
    assert_eq!(report.outcomes[1].class(), OutcomeClass::Executed);
    assert_eq!(report.outcomes[2].class(), OutcomeClass::Normal);
    // Never scripted: the telemetry source does not know the unit
    assert_eq!(report.outcomes[3].error.as_ref().unwrap().kind, ErrorKind::DataUnavailable);

    assert_eq!(report.counts.errors, 2);
    assert_eq!(report.counts.executed, 1);
    assert_eq!(report.counts.normal, 1);
    orchestrator.settle().await;
}

/// E2E test: a simulator outage on one unit leaves the rest of the cycle alone
#[tokio::test(start_paused = true)]
async fn e2e_diagnosis_outage_is_isolated() {
    let harness = precedent_harness();
    harness.telemetry.script("U1", LoadScript::steady(ANOMALOUS_KW));
    harness.telemetry.script("U2", LoadScript::steady(ANOMALOUS_KW));
    harness.telemetry.script("U3", LoadScript::steady(NORMAL_KW));
    let services = Services {
        simulator: FailingSimulator::for_units(&["U1"]),
        ..harness.services.clone()
    };

    let orchestrator = CycleOrchestrator::new(test_config(), services).unwrap();
    let fleet = [unit("U1"), unit("U2"), unit("U3")];
    let report = orchestrator.run_cycle(&fleet, &CancellationToken::new()).await;

    let failed = &report.outcomes[0];
    assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::DiagnosisUnavailable);
    assert!(failed.candidate.is_some());
    assert!(failed.diagnosis.is_none());
    assert!(failed.decision.is_none());

    assert_eq!(report.outcomes[1].class(), OutcomeClass::Executed);
    assert_eq!(report.outcomes[2].class(), OutcomeClass::Normal);
    assert_eq!(report.counts.errors, 1);
    assert_eq!(report.counts.executed, 1);

    let issued = harness.channel.issued();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].0, UnitId::new("U2"));
    orchestrator.settle().await;
}

/// E2E test: a busy cycle stays under the shared collaborator ceiling
/// without queueing turning into timeouts
#[tokio::test(start_paused = true)]
async fn e2e_service_ceiling_holds_across_a_cycle() {
    let harness = precedent_harness();
    let units: Vec<String> = (1..=6).map(|i| format!("U{i}")).collect();
    for id in &units {
        harness.telemetry.script(id, LoadScript::steady(ANOMALOUS_KW));
    }
    let gauge = Gauge::new();
    let services = Services {
        simulator: Arc::new(GaugedSimulator {
            gauge: Arc::clone(&gauge),
            delay: Duration::from_millis(150),
        }),
        ..harness.services.clone()
    };

    let mut config = test_config();
    config.resilience.service_concurrency = 2;
    config.resilience.call_timeout_ms = 200;
    let orchestrator = CycleOrchestrator::new(config, services).unwrap();
    let fleet: Vec<_> = units.iter().map(|id| unit(id)).collect();
    let report = orchestrator.run_cycle(&fleet, &CancellationToken::new()).await;

    assert!(gauge.peak() >= 1);
    assert!(gauge.peak() <= 2, "peak {} simulations in flight", gauge.peak());
    assert_eq!(report.counts.errors, 0);
    assert_eq!(report.counts.executed, 6);
    orchestrator.settle().await;
}

/// E2E test: no more unit pipelines run at once than the worker cap
#[tokio::test(start_paused = true)]
async fn e2e_worker_cap_bounds_pipelines() {
    let harness = precedent_harness();
    let units: Vec<String> = (1..=6).map(|i| format!("U{i}")).collect();
    for id in &units {
        harness.telemetry.script(id, LoadScript::steady(ANOMALOUS_KW));
    }
    let gauge = Gauge::new();
    let services = Services {
        explainer: Arc::new(GaugedExplainer {
            gauge: Arc::clone(&gauge),
            delay: Duration::from_millis(500),
        }),
        ..harness.services.clone()
    };

    let mut config = test_config();
    config.orchestrator.max_concurrent_units = 2;
    config.resilience.service_concurrency = 8;
    let orchestrator = CycleOrchestrator::new(config, services).unwrap();
    let fleet: Vec<_> = units.iter().map(|id| unit(id)).collect();
    let report = orchestrator.run_cycle(&fleet, &CancellationToken::new()).await;

    assert!(gauge.peak() >= 1);
    assert!(gauge.peak() <= 2, "peak {} pipelines diagnosing", gauge.peak());
    assert_eq!(report.counts.executed, 6);
    orchestrator.settle().await;
}

/// E2E test: cancellation before any work
#[tokio::test(start_paused = true)]
async fn e2e_cancelled_cycle_does_nothing() {
    let harness = precedent_harness();
    harness.telemetry.script("U1", LoadScript::steady(ANOMALOUS_KW));
    harness.telemetry.script("U2", LoadScript::steady(ANOMALOUS_KW));

    let orchestrator = CycleOrchestrator::new(test_config(), harness.services.clone()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orchestrator.run_cycle(&[unit("U1"), unit("U2")], &cancel).await;

    assert!(report.cancelled);
    assert_eq!(report.outcomes.len(), 2);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.error.as_ref().map(|e| e.kind) == Some(ErrorKind::Cancelled)));
    assert_eq!(harness.telemetry.observation_calls(), 0);
    assert!(harness.channel.issued().is_empty());
}

/// E2E test: cancellation during diagnosis stops before dispatch
#[tokio::test(start_paused = true)]
async fn e2e_cancellation_during_diagnosis_prevents_dispatch() {
    let harness = Harness::with_explainer(
        PrecedentStore::with_precedent("stuck_damper", 0.9),
        RecordingChannel::new(),
        DamperExplainer {
            delay: Some(Duration::from_secs(2)),
        },
    );
    for id in ["U1", "U2", "U3"] {
        harness.telemetry.script(id, LoadScript::steady(ANOMALOUS_KW));
    }

    let orchestrator = CycleOrchestrator::new(test_config(), harness.services.clone()).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let fleet = [unit("U1"), unit("U2"), unit("U3")];
    let report = orchestrator.run_cycle(&fleet, &cancel).await;

    assert!(report.cancelled);
    for outcome in &report.outcomes {
        assert_eq!(outcome.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        assert!(outcome.candidate.is_some(), "scoring finished before the cancel");
        assert!(outcome.decision.is_none());
        assert!(outcome.execution.is_none());
    }
    assert!(harness.channel.issued().is_empty());
    assert!(orchestrator.ledger().is_empty());
}

/// E2E test: a verified execution becomes precedent for the next cycle
#[tokio::test(start_paused = true)]
async fn e2e_succeeded_execution_is_learned() {
    let harness = precedent_harness();
    harness.telemetry.script(
        "U1",
        LoadScript::sequence(&[ANOMALOUS_KW, ANOMALOUS_KW], 150.0),
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cases.json");
    let store = Arc::new(InMemoryKnowledgeStore::with_storage(&path).await.unwrap());

    // Seed one prior damper case that looks like this anomaly
    let config = test_config();
    let vocabulary = config.catalog.signals();
    let breakdown = ScoreBreakdown {
        temporal: 0.8,
        spatial: 0.5,
        weather: 0.0,
        score: 0.67,
    };
    store
        .store(HistoricalCase {
            id: Uuid::new_v4(),
            unit_id: UnitId::new("jlt-tower-5"),
            cause: "stuck_damper".to_string(),
            action: "damper_reset".to_string(),
            signature: embed(&vocabulary, &damper_attributions(), &breakdown),
            observed_delta: Some(-0.16),
            recorded_at: now(),
            summary: "damper actuator reset".to_string(),
        })
        .await
        .unwrap();

    let orchestrator = CycleOrchestrator::new(config, harness.with_store(store.clone())).unwrap();
    let cancel = CancellationToken::new();

    let first = orchestrator.run_cycle(&[unit("U1")], &cancel).await;
    assert_eq!(first.outcomes[0].class(), OutcomeClass::Executed);
    let record = orchestrator.settle().await.remove(0);
    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(orchestrator.ledger().unlearned_successes().len(), 1);

    // The next cycle harvests it before scoring
    harness.telemetry.script("U1", LoadScript::steady(NORMAL_KW));
    orchestrator.run_cycle(&[unit("U1")], &cancel).await;

    assert!(orchestrator.ledger().unlearned_successes().is_empty());
    assert!(orchestrator.ledger().record(record.id).unwrap().learned);

    let cases = store.cases().await;
    assert_eq!(cases.len(), 2);
    let learned = cases.iter().find(|c| c.id == record.id).unwrap();
    assert_eq!(learned.action, "damper_reset");
    assert_eq!(learned.cause, "stuck_damper");
    assert_eq!(learned.signature, record.signature);

    // Persisted, and harvested only once
    orchestrator.run_cycle(&[unit("U1")], &cancel).await;
    let reloaded = InMemoryKnowledgeStore::with_storage(&path).await.unwrap();
    assert_eq!(reloaded.len().await, 2);
}

/// E2E test: a slow knowledge store does not hold a cancelled cycle
#[tokio::test(start_paused = true)]
async fn e2e_cancellation_interrupts_learning() {
    let harness = precedent_harness();
    harness.telemetry.script("U1", LoadScript::steady(NORMAL_KW));
    let store = SlowStore::new(Duration::from_secs(3600));
    let services = Services {
        knowledge: store.clone(),
        ..harness.services.clone()
    };

    let ledger = ExecutionLedger::new();
    let record = succeeded_record("U1");
    ledger.append(record.clone()).unwrap();
    let orchestrator = CycleOrchestrator::with_ledger(test_config(), services, ledger).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let report = orchestrator.run_cycle(&[unit("U1")], &cancel).await;

    assert!(report.cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.outcomes[0].error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(store.stored(), 0);
    assert_eq!(orchestrator.ledger().unlearned_successes().len(), 1);
    assert_eq!(harness.telemetry.observation_calls(), 0);
}

/// E2E test: outcomes are stored concurrently at cycle start
#[tokio::test(start_paused = true)]
async fn e2e_learning_stores_cases_concurrently() {
    let harness = precedent_harness();
    harness.telemetry.script("U1", LoadScript::steady(NORMAL_KW));
    let store = SlowStore::new(Duration::from_secs(1));
    let services = Services {
        knowledge: store.clone(),
        ..harness.services.clone()
    };

    let ledger = ExecutionLedger::new();
    for id in ["U1", "U2", "U3"] {
        ledger.append(succeeded_record(id)).unwrap();
    }
    let orchestrator = CycleOrchestrator::with_ledger(test_config(), services, ledger).unwrap();

    let started = Instant::now();
    let report = orchestrator.run_cycle(&[unit("U1")], &CancellationToken::new()).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(store.stored(), 3);
    assert!(orchestrator.ledger().unlearned_successes().is_empty());
    assert_eq!(report.outcomes[0].class(), OutcomeClass::Normal);
}
