//! Execution records and their state machine

use crate::decision::Decision;
use crate::error::{Result, WattsonError};
use crate::types::{now, Timestamp, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of one autonomous execution
///
/// `Pending → Acknowledged → Monitoring → {Succeeded | RolledBack | Failed}`;
/// `Pending` and `Acknowledged` may also fail directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Acknowledged,
    Monitoring,
    Succeeded,
    RolledBack,
    Failed,
}

impl ExecutionStatus {
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Acknowledged)
                | (Pending, Failed)
                | (Acknowledged, Monitoring)
                | (Acknowledged, Failed)
                | (Monitoring, Succeeded)
                | (Monitoring, RolledBack)
                | (Monitoring, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::RolledBack | ExecutionStatus::Failed
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Acknowledged => "acknowledged",
            ExecutionStatus::Monitoring => "monitoring",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::RolledBack => "rolled-back",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Why a record ended in `Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// The channel refused the command
    CommandRejected { reason: String },
    /// The command never reached the channel
    DispatchFailed { reason: String },
    /// No baseline observation before dispatch
    BaselineUnavailable { reason: String },
    /// Window closed without regression but short of the simulated saving
    Underperformed { observed: f64, simulated: f64 },
    /// Not a single poll inside the window returned data
    NoObservations,
    /// Regression detected but the undo command failed
    RollbackFailed { reason: String },
    /// Monitoring stopped before the window closed; the command may still
    /// be in effect
    MonitoringAborted { reason: String },
}

/// One entry of the record's audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
    pub at: Timestamp,
    pub note: Option<String>,
}

/// One monitoring poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSample {
    pub poll: u32,
    pub at: Timestamp,
    pub load_kw: f64,
    pub delta: f64,
}

/// Audit record of one autonomous execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub decision_id: Uuid,
    pub unit_id: UnitId,
    pub action: String,
    pub cause: String,
    pub parameters: BTreeMap<String, f64>,
    /// Embedding of the diagnosed case, used when learning from the outcome
    pub signature: Vec<f64>,
    pub command_id: Option<String>,
    pub issued_at: Timestamp,
    pub status: ExecutionStatus,
    pub window_end: Option<Timestamp>,
    pub baseline_load_kw: Option<f64>,
    pub simulated_delta: f64,
    pub observed_delta: Option<f64>,
    pub polls: Vec<PollSample>,
    pub transitions: Vec<StatusTransition>,
    pub failure: Option<FailureReason>,
    pub rollback_reason: Option<String>,
    pub manual_intervention_required: bool,
    /// Stored in the knowledge store as a historical case
    pub learned: bool,
}

impl ExecutionRecord {
    /// A pending record for an autonomous-execute decision
    pub fn for_decision(decision: &Decision) -> Result<Self> {
        let plan = decision.plan.as_ref().ok_or_else(|| {
            WattsonError::Invariant(format!("decision {} carries no plan to execute", decision.id))
        })?;

        Ok(Self {
            id: Uuid::new_v4(),
            decision_id: decision.id,
            unit_id: decision.diagnosis.unit_id.clone(),
            action: plan.action.clone(),
            cause: plan.cause.clone(),
            parameters: plan.parameters.clone(),
            signature: decision.diagnosis.signature.clone(),
            command_id: None,
            issued_at: now(),
            status: ExecutionStatus::Pending,
            window_end: None,
            baseline_load_kw: None,
            simulated_delta: plan.simulated_energy_delta,
            observed_delta: None,
            polls: Vec::new(),
            transitions: Vec::new(),
            failure: None,
            rollback_reason: None,
            manual_intervention_required: false,
            learned: false,
        })
    }

    /// Move to `next`, appending to the audit trail
    pub fn transition(&mut self, next: ExecutionStatus, note: Option<String>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(WattsonError::Invariant(format!(
                "execution {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.transitions.push(StatusTransition {
            from: self.status,
            to: next,
            at: now(),
            note,
        });
        self.status = next;
        Ok(())
    }

    /// Terminal `Failed` with a reason
    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        let note = format!("{:?}", reason);
        self.transition(ExecutionStatus::Failed, Some(note))?;
        self.failure = Some(reason);
        Ok(())
    }

    /// The error a failed record reports; `None` for an underperforming
    /// action, which failed without anything going wrong
    pub fn error(&self) -> Option<WattsonError> {
        let unit = self.unit_id.to_string();
        match self.failure.as_ref()? {
            FailureReason::CommandRejected { reason } => Some(WattsonError::CommandRejected {
                unit,
                reason: reason.clone(),
            }),
            FailureReason::DispatchFailed { reason } => Some(WattsonError::CommandRejected {
                unit,
                reason: format!("command channel unreachable: {reason}"),
            }),
            FailureReason::BaselineUnavailable { reason } => Some(WattsonError::DataUnavailable {
                unit,
                reason: reason.clone(),
            }),
            FailureReason::NoObservations => Some(WattsonError::DataUnavailable {
                unit,
                reason: "no observations during the monitoring window".to_string(),
            }),
            FailureReason::RollbackFailed { reason } => Some(WattsonError::RollbackFailed {
                unit,
                command_id: self.command_id.clone().unwrap_or_default(),
                reason: reason.clone(),
            }),
            FailureReason::MonitoringAborted { reason } => Some(WattsonError::Invariant(format!(
                "monitoring of {} aborted: {reason}",
                self.id
            ))),
            FailureReason::Underperformed { .. } => None,
        }
    }
}
