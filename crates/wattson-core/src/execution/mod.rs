//! Execution Monitor
//!
//! Dispatches an approved plan and then watches the unit on its own task:
//! every poll compares the load against the pre-dispatch baseline, and a
//! regression beyond the threshold triggers exactly one undo command. The
//! task holds the unit's [`ExecutionLease`] until the record is terminal and
//! is never tied to a cycle's cancellation.

pub mod ledger;
pub mod record;

use crate::config::ExecutionConfig;
use crate::decision::{Decision, DecisionOutcome};
use crate::error::{Result, WattsonError};
use crate::ports::{Command, CommandAck, CommandChannel, TelemetrySource};
use crate::resilience::{with_retry, RetryPolicy};
use crate::types::now;
use ledger::{ExecutionLease, ExecutionLedger};
use record::{ExecutionRecord, ExecutionStatus, FailureReason, PollSample};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Result of dispatching a decision
#[derive(Debug)]
pub struct ExecutionTicket {
    /// Snapshot at hand-off: `Monitoring`, or `Failed` if dispatch failed
    pub record: ExecutionRecord,
    /// Monitoring task, resolving to the terminal record
    pub monitoring: Option<JoinHandle<ExecutionRecord>>,
}

/// The Execution Monitor
#[derive(Clone)]
pub struct ExecutionMonitor {
    config: ExecutionConfig,
    telemetry: Arc<dyn TelemetrySource>,
    channel: Arc<dyn CommandChannel>,
    ledger: Arc<ExecutionLedger>,
    retry: RetryPolicy,
}

impl ExecutionMonitor {
    pub fn new(
        config: ExecutionConfig,
        telemetry: Arc<dyn TelemetrySource>,
        channel: Arc<dyn CommandChannel>,
        ledger: Arc<ExecutionLedger>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            config,
            telemetry,
            channel,
            ledger,
            retry,
        }
    }

    pub fn ledger(&self) -> &Arc<ExecutionLedger> {
        &self.ledger
    }

    /// Dispatch an autonomous-execute decision
    ///
    /// Dispatch failures end in a `Failed` record, not an `Err`; errors are
    /// reserved for a decision that should never have reached this point.
    pub async fn execute(
        &self,
        decision: &Decision,
        lease: ExecutionLease,
    ) -> Result<ExecutionTicket> {
        if decision.outcome != DecisionOutcome::AutonomousExecute {
            return Err(WattsonError::Invariant(format!(
                "decision {} is {}, not autonomous-execute",
                decision.id, decision.outcome
            )));
        }
        if lease.unit() != &decision.diagnosis.unit_id {
            return Err(WattsonError::Invariant(format!(
                "lease for {} cannot execute on {}",
                lease.unit(),
                decision.diagnosis.unit_id
            )));
        }

        let mut record = ExecutionRecord::for_decision(decision)?;
        self.ledger.append(record.clone())?;
        let unit = record.unit_id.clone();

        let baseline = with_retry("telemetry", &self.retry, || {
            self.telemetry.get_observation(&unit, now())
        })
        .await
        .and_then(|o| {
            if o.load_kw.is_finite() && o.load_kw > 0.0 {
                Ok(o.load_kw)
            } else {
                Err(WattsonError::DataUnavailable {
                    unit: unit.to_string(),
                    reason: format!("unusable baseline load {}", o.load_kw),
                })
            }
        });
        let baseline = match baseline {
            Ok(load) => load,
            Err(e) => {
                tracing::warn!(unit = %unit, "No baseline before dispatch: {}", e);
                record.fail(FailureReason::BaselineUnavailable {
                    reason: e.to_string(),
                })?;
                self.ledger.update(&record)?;
                return Ok(ExecutionTicket {
                    record,
                    monitoring: None,
                });
            }
        };
        record.baseline_load_kw = Some(baseline);

        let command = Command {
            action: record.action.clone(),
            parameters: record.parameters.clone(),
            record_id: record.id,
        };
        let ack = with_retry("command_channel", &self.retry, || {
            self.channel.issue(&unit, &command)
        })
        .await;

        let command_id = match ack {
            Ok(CommandAck::Acknowledged { command_id }) => command_id,
            Ok(CommandAck::Rejected { reason }) => {
                tracing::warn!(unit = %unit, record = %record.id, "Command rejected: {}", reason);
                record.fail(FailureReason::CommandRejected { reason })?;
                self.ledger.update(&record)?;
                return Ok(ExecutionTicket {
                    record,
                    monitoring: None,
                });
            }
            Err(e) => {
                tracing::warn!(unit = %unit, record = %record.id, "Command dispatch failed: {}", e);
                record.fail(FailureReason::DispatchFailed {
                    reason: e.to_string(),
                })?;
                self.ledger.update(&record)?;
                return Ok(ExecutionTicket {
                    record,
                    monitoring: None,
                });
            }
        };

        record.command_id = Some(command_id.clone());
        record.transition(
            ExecutionStatus::Acknowledged,
            Some(format!("command {command_id}")),
        )?;

        let window = chrono::Duration::from_std(self.config.window())
            .map_err(|e| WattsonError::Configuration(format!("monitoring window: {e}")))?;
        let window_end = now() + window;
        record.window_end = Some(window_end);
        record.transition(
            ExecutionStatus::Monitoring,
            Some(format!("window closes {}", window_end.to_rfc3339())),
        )?;
        self.ledger.update(&record)?;

        tracing::info!(
            unit = %unit,
            record = %record.id,
            action = %record.action,
            baseline_kw = baseline,
            "Command acknowledged, monitoring"
        );

        let monitor = self.clone();
        let snapshot = record.clone();
        let handle = tokio::spawn(async move { monitor.watch(record, lease).await });

        Ok(ExecutionTicket {
            record: snapshot,
            monitoring: Some(handle),
        })
    }

    /// Run the monitoring window to a terminal state
    ///
    /// The lease is released only after the terminal record is in the
    /// ledger. A window that aborts leaves the command unverified, so the
    /// record fails and is flagged for manual intervention.
    async fn watch(self, mut record: ExecutionRecord, lease: ExecutionLease) -> ExecutionRecord {
        if let Err(e) = self.watch_window(&mut record).await {
            tracing::error!(
                unit = %record.unit_id,
                record = %record.id,
                "Monitoring aborted, manual intervention required: {}",
                e
            );
            if !record.status.is_terminal() {
                record.manual_intervention_required = true;
                if let Err(e) = record.fail(FailureReason::MonitoringAborted {
                    reason: e.to_string(),
                }) {
                    tracing::error!(record = %record.id, "Could not fail record: {}", e);
                }
            }
        }
        let stored = match self.ledger.update(&record) {
            Err(WattsonError::RecordNotFound(_)) => self.ledger.append(record.clone()),
            other => other,
        };
        if let Err(e) = stored {
            tracing::error!(record = %record.id, "Failed to store final record: {}", e);
        }
        drop(lease);
        record
    }

    async fn watch_window(&self, record: &mut ExecutionRecord) -> Result<()> {
        let baseline = record.baseline_load_kw.ok_or_else(|| {
            WattsonError::Invariant(format!("record {} has no baseline", record.id))
        })?;
        let unit = record.unit_id.clone();
        let polls = self.config.polls();

        for poll in 1..=polls {
            tokio::time::sleep(self.config.poll_interval()).await;

            let observation = with_retry("telemetry", &self.retry, || {
                self.telemetry.get_observation(&unit, now())
            })
            .await;
            let load = match observation {
                Ok(o) if o.load_kw.is_finite() => o.load_kw,
                Ok(o) => {
                    tracing::warn!(unit = %unit, poll, "Ignoring non-finite load {}", o.load_kw);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(unit = %unit, poll, "Poll failed: {}", e);
                    continue;
                }
            };

            let delta = (load - baseline) / baseline;
            record.polls.push(PollSample {
                poll,
                at: now(),
                load_kw: load,
                delta,
            });
            record.observed_delta = Some(delta);
            tracing::debug!(
                unit = %unit,
                record = %record.id,
                poll,
                polls,
                delta,
                "Monitoring poll"
            );

            if delta > self.config.regression_threshold {
                return self.roll_back(record, poll, delta).await;
            }
            self.ledger.update(record)?;
        }

        let Some(observed) = record.observed_delta else {
            tracing::warn!(unit = %unit, record = %record.id, "Window closed without observations");
            return record.fail(FailureReason::NoObservations);
        };

        if observed <= record.simulated_delta + self.config.success_tolerance {
            record.transition(
                ExecutionStatus::Succeeded,
                Some(format!(
                    "observed {:+.3} against simulated {:+.3}",
                    observed, record.simulated_delta
                )),
            )?;
            tracing::info!(unit = %unit, record = %record.id, observed, "Execution succeeded");
        } else {
            tracing::warn!(
                unit = %unit,
                record = %record.id,
                observed,
                simulated = record.simulated_delta,
                "Execution underperformed"
            );
            record.fail(FailureReason::Underperformed {
                observed,
                simulated: record.simulated_delta,
            })?;
        }
        Ok(())
    }

    async fn roll_back(&self, record: &mut ExecutionRecord, poll: u32, delta: f64) -> Result<()> {
        let reason = format!(
            "load {:+.3} over baseline at poll {} exceeds regression threshold {:.3}",
            delta, poll, self.config.regression_threshold
        );
        record.rollback_reason = Some(reason.clone());
        tracing::warn!(unit = %record.unit_id, record = %record.id, "Rolling back: {}", reason);

        let command_id = record.command_id.clone().ok_or_else(|| {
            WattsonError::Invariant(format!("record {} has no command id to undo", record.id))
        })?;
        let unit = record.unit_id.clone();
        let undo = with_retry("command_channel", &self.retry, || {
            self.channel.issue_undo(&unit, &command_id)
        })
        .await;

        let failure = match undo {
            Ok(CommandAck::Acknowledged { .. }) => {
                return record.transition(ExecutionStatus::RolledBack, Some(reason));
            }
            Ok(CommandAck::Rejected { reason }) => reason,
            Err(e) => e.to_string(),
        };

        tracing::error!(
            unit = %unit,
            record = %record.id,
            command = %command_id,
            "Rollback failed, manual intervention required: {}",
            failure
        );
        record.manual_intervention_required = true;
        record.fail(FailureReason::RollbackFailed { reason: failure })
    }
}
