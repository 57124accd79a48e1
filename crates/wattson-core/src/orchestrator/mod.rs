//! Cycle Orchestrator
//!
//! Drives one monitoring cycle across a fleet. Every unit gets its own
//! pipeline task (Score → Diagnose → Decide → Execute), bounded by a global
//! worker cap. A failing unit becomes an error entry in the report and never
//! aborts the cycle.
//!
//! Cancellation aborts scoring, diagnosis and decisions that have not
//! dispatched yet. Monitoring tasks are detached from the cycle and keep
//! running; [`CycleOrchestrator::settle`] waits for them.

pub mod report;

use crate::config::EngineConfig;
use crate::decision::DecisionEngine;
use crate::diagnosis::{DiagnosticEngine, DiagnosticServices};
use crate::error::{Result, WattsonError};
use crate::execution::ledger::{ExecutionLease, ExecutionLedger};
use crate::execution::record::ExecutionRecord;
use crate::execution::ExecutionMonitor;
use crate::ports::{
    CommandChannel, Explainer, HistoricalCase, KnowledgeStore, Simulator, TelemetrySource,
    WeatherSource,
};
use crate::resilience::{with_retry, RetryPolicy, ServiceLimiter};
use crate::scoring::AnomalyScorer;
use crate::types::{now, Unit, UnitId};
use report::{CycleReport, ExecutionRef, ManualIntervention, OutcomeCounts, UnitError, UnitOutcome};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// External collaborators of the pipeline
#[derive(Clone)]
pub struct Services {
    pub telemetry: Arc<dyn TelemetrySource>,
    pub weather: Arc<dyn WeatherSource>,
    pub explainer: Arc<dyn Explainer>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub simulator: Arc<dyn Simulator>,
    pub channel: Arc<dyn CommandChannel>,
}

/// Output of one unit pipeline
struct UnitRun {
    outcome: UnitOutcome,
    monitoring: Option<JoinHandle<ExecutionRecord>>,
}

/// Shared by every unit task of every cycle
struct Pipeline {
    config: EngineConfig,
    scorer: AnomalyScorer,
    diagnostics: DiagnosticEngine,
    decisions: DecisionEngine,
    monitor: ExecutionMonitor,
    telemetry: Arc<dyn TelemetrySource>,
    weather: Arc<dyn WeatherSource>,
    knowledge: Arc<dyn KnowledgeStore>,
    ledger: Arc<ExecutionLedger>,
    limiter: ServiceLimiter,
    retry: RetryPolicy,
    workers: Arc<Semaphore>,
}

/// The Cycle Orchestrator
pub struct CycleOrchestrator {
    pipeline: Arc<Pipeline>,
    tracked: Mutex<Vec<JoinHandle<ExecutionRecord>>>,
}

impl CycleOrchestrator {
    /// Build an orchestrator; an invalid configuration is fatal
    pub fn new(config: EngineConfig, services: Services) -> Result<Self> {
        Self::with_ledger(config, services, ExecutionLedger::new())
    }

    /// Build an orchestrator over an existing ledger
    pub fn with_ledger(
        config: EngineConfig,
        services: Services,
        ledger: Arc<ExecutionLedger>,
    ) -> Result<Self> {
        config.validate()?;

        let retry = config.resilience.retry_policy();
        let limiter = ServiceLimiter::new(config.resilience.service_concurrency);
        let catalog = Arc::new(config.catalog.clone());

        let diagnostics = DiagnosticEngine::new(
            config.diagnosis.clone(),
            catalog,
            DiagnosticServices {
                explainer: Arc::clone(&services.explainer),
                knowledge: Arc::clone(&services.knowledge),
                simulator: Arc::clone(&services.simulator),
            },
            limiter.clone(),
            retry.clone(),
        )
        .with_comfort_weight(config.decision.comfort_weight);
        let monitor = ExecutionMonitor::new(
            config.execution.clone(),
            Arc::clone(&services.telemetry),
            Arc::clone(&services.channel),
            Arc::clone(&ledger),
            retry.clone(),
        );

        let pipeline = Pipeline {
            scorer: AnomalyScorer::new(config.scoring.clone()),
            decisions: DecisionEngine::new(config.decision.clone()),
            diagnostics,
            monitor,
            telemetry: services.telemetry,
            weather: services.weather,
            knowledge: services.knowledge,
            ledger,
            limiter,
            retry,
            workers: Arc::new(Semaphore::new(config.orchestrator.max_concurrent_units)),
            config,
        };

        Ok(Self {
            pipeline: Arc::new(pipeline),
            tracked: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.pipeline.config
    }

    pub fn ledger(&self) -> &Arc<ExecutionLedger> {
        &self.pipeline.ledger
    }

    /// Run one monitoring cycle over `fleet`
    pub async fn run_cycle(&self, fleet: &[Unit], cancel: &CancellationToken) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = now();
        tracing::info!(cycle = %cycle_id, units = fleet.len(), "Starting cycle");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(cycle = %cycle_id, "Cancelled before learning from outcomes");
            }
            _ = self.pipeline.harvest() => {}
        }

        let mut join_set = JoinSet::new();
        for (index, unit) in fleet.iter().cloned().enumerate() {
            let pipeline = Arc::clone(&self.pipeline);
            let cancel = cancel.clone();
            join_set.spawn(async move { (index, pipeline.run_unit(unit, cancel).await) });
        }

        let mut slots: Vec<Option<UnitOutcome>> = vec![None; fleet.len()];
        let mut handles = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, run)) => {
                    slots[index] = Some(run.outcome);
                    handles.extend(run.monitoring);
                }
                Err(e) => {
                    tracing::error!(cycle = %cycle_id, "Unit pipeline task failed: {}", e);
                }
            }
        }

        let outcomes: Vec<UnitOutcome> = slots
            .into_iter()
            .zip(fleet)
            .map(|(slot, unit)| {
                slot.unwrap_or_else(|| {
                    UnitOutcome::new(unit.id.clone()).with_error(&WattsonError::Invariant(
                        "unit pipeline task did not complete".to_string(),
                    ))
                })
            })
            .collect();

        {
            let mut tracked = self.tracked.lock().await;
            tracked.retain(|h| !h.is_finished());
            tracked.extend(handles);
        }

        let counts = OutcomeCounts::tally(&outcomes);
        let manual_intervention: Vec<ManualIntervention> = self
            .pipeline
            .ledger
            .flagged_for_manual_intervention()
            .iter()
            .map(ManualIntervention::from)
            .collect();

        if !manual_intervention.is_empty() {
            tracing::error!(
                cycle = %cycle_id,
                records = manual_intervention.len(),
                "Executions awaiting manual intervention"
            );
        }
        tracing::info!(
            cycle = %cycle_id,
            units = counts.units,
            candidates = counts.candidates,
            executed = counts.executed,
            escalated = counts.escalated,
            deferred = counts.deferred,
            errors = counts.errors,
            cancelled = cancel.is_cancelled(),
            "Cycle complete"
        );

        CycleReport {
            cycle_id,
            started_at,
            finished_at: now(),
            cancelled: cancel.is_cancelled(),
            outcomes,
            counts,
            manual_intervention,
        }
    }

    /// Wait for every tracked monitoring task, returning the final records
    pub async fn settle(&self) -> Vec<ExecutionRecord> {
        let handles = std::mem::take(&mut *self.tracked.lock().await);
        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(record) => records.push(record),
                Err(e) => tracing::error!("Monitoring task failed: {}", e),
            }
        }
        records
    }

    /// Monitoring tasks not yet awaited by [`settle`](Self::settle)
    pub async fn tracked_monitors(&self) -> usize {
        self.tracked.lock().await.len()
    }
}

impl Pipeline {
    async fn run_unit(self: Arc<Self>, unit: Unit, cancel: CancellationToken) -> UnitRun {
        let mut outcome = UnitOutcome::new(unit.id.clone());

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WattsonError::Cancelled),
            permit = Arc::clone(&self.workers).acquire_owned() => permit
                .map_err(|e| WattsonError::Invariant(format!("worker pool closed: {e}"))),
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(e) => return self.failed(outcome, e),
        };

        let analysed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WattsonError::Cancelled),
            result = self.analyse(&unit, &mut outcome) => result,
        };
        let lease = match analysed {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                return UnitRun {
                    outcome,
                    monitoring: None,
                }
            }
            Err(e) => return self.failed(outcome, e),
        };

        if cancel.is_cancelled() {
            drop(lease);
            return self.failed(outcome, WattsonError::Cancelled);
        }

        let Some(decision) = outcome.decision.as_ref() else {
            return self.failed(
                outcome,
                WattsonError::Invariant("lease reserved without a decision".to_string()),
            );
        };

        match self.monitor.execute(decision, lease).await {
            Ok(ticket) => {
                outcome.execution = Some(ExecutionRef::from(&ticket.record));
                if let Some(e) = ticket.record.error() {
                    outcome.error = Some(UnitError::from(&e));
                }
                UnitRun {
                    outcome,
                    monitoring: ticket.monitoring,
                }
            }
            Err(e) => self.failed(outcome, e),
        }
    }

    fn failed(&self, outcome: UnitOutcome, error: WattsonError) -> UnitRun {
        match &error {
            WattsonError::Cancelled => {
                tracing::debug!(unit = %outcome.unit_id, "Unit pipeline cancelled")
            }
            _ => tracing::warn!(unit = %outcome.unit_id, "Unit pipeline failed: {}", error),
        }
        UnitRun {
            outcome: outcome.with_error(&error),
            monitoring: None,
        }
    }

    /// Score, diagnose and decide, filling `outcome` as stages complete
    ///
    /// Returns the unit's execution lease when the decision is
    /// autonomous-execute.
    async fn analyse(
        &self,
        unit: &Unit,
        outcome: &mut UnitOutcome,
    ) -> Result<Option<ExecutionLease>> {
        let id = &unit.id;
        let at = now();
        let samples = self.config.orchestrator.history_samples;

        let (observation, history, peers, weather) = tokio::try_join!(
            async {
                with_retry("telemetry", &self.retry, || self.telemetry.get_observation(id, at))
                    .await
                    .map_err(|e| data_unavailable(id, "observation", e))
            },
            async {
                with_retry("telemetry", &self.retry, || {
                    self.telemetry.get_history(id, at, samples)
                })
                .await
                .map_err(|e| data_unavailable(id, "history", e))
            },
            async {
                with_retry("telemetry", &self.retry, || self.telemetry.get_peer_observations(id))
                    .await
                    .map_err(|e| data_unavailable(id, "peer observations", e))
            },
            async {
                with_retry("weather", &self.retry, || {
                    self.weather.get_conditions(&unit.location, at)
                })
                .await
                .map_err(|e| data_unavailable(id, "weather", e))
            },
        )?;

        let Some(candidate) = self
            .scorer
            .score(unit, &observation, &history, &peers, &weather)
        else {
            tracing::debug!(unit = %id, "Within normal range");
            return Ok(None);
        };
        tracing::info!(
            unit = %id,
            score = candidate.score,
            tier = %candidate.tier,
            "Anomaly candidate"
        );
        outcome.candidate = Some(candidate.clone());

        let diagnosis = self.diagnostics.diagnose(&candidate).await?;
        let (decision, lease) = self.decisions.decide_guarded(&diagnosis, &self.ledger);
        outcome.diagnosis = Some(diagnosis);
        outcome.decision = Some(decision);
        Ok(lease)
    }

    /// Store succeeded executions as historical cases
    ///
    /// Stores run concurrently behind the shared limiter. A record whose
    /// store fails stays unlearned and is retried next cycle.
    async fn harvest(&self) {
        let stores = self.ledger.unlearned_successes().into_iter().map(|record| async move {
            let case = historical_case(&record);
            let stored = self
                .limiter
                .call("knowledge_store", &self.retry, || self.knowledge.store(case.clone()))
                .await;
            match stored.and_then(|_| self.ledger.mark_learned(record.id)) {
                Ok(()) => tracing::debug!(record = %record.id, "Learned from execution"),
                Err(e) => tracing::warn!(record = %record.id, "Could not store case: {}", e),
            }
        });
        futures::future::join_all(stores).await;
    }
}

fn historical_case(record: &ExecutionRecord) -> HistoricalCase {
    HistoricalCase {
        id: record.id,
        unit_id: record.unit_id.clone(),
        cause: record.cause.clone(),
        action: record.action.clone(),
        signature: record.signature.clone(),
        observed_delta: record.observed_delta,
        recorded_at: record
            .transitions
            .last()
            .map(|t| t.at)
            .unwrap_or(record.issued_at),
        summary: format!(
            "{} resolved {} on {} ({:+.1}% load)",
            record.action,
            record.cause,
            record.unit_id,
            record.observed_delta.unwrap_or(0.0) * 100.0
        ),
    }
}

fn data_unavailable(unit: &UnitId, what: &str, error: WattsonError) -> WattsonError {
    WattsonError::DataUnavailable {
        unit: unit.to_string(),
        reason: format!("{what}: {error}"),
    }
}
