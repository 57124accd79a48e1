//! Cycle reports
//!
//! A report enumerates every unit of the fleet, in fleet order, including
//! the ones that failed. Nothing is dropped silently.

use crate::decision::{Decision, DecisionOutcome};
use crate::diagnosis::Diagnosis;
use crate::error::{ErrorKind, WattsonError};
use crate::execution::record::{ExecutionRecord, ExecutionStatus};
use crate::scoring::AnomalyCandidate;
use crate::types::{Timestamp, UnitId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error entry for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&WattsonError> for UnitError {
    fn from(error: &WattsonError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Reference to an execution record in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRef {
    pub record_id: Uuid,
    pub status: ExecutionStatus,
    pub command_id: Option<String>,
    pub window_end: Option<Timestamp>,
}

impl From<&ExecutionRecord> for ExecutionRef {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            record_id: record.id,
            status: record.status,
            command_id: record.command_id.clone(),
            window_end: record.window_end,
        }
    }
}

/// A record that needs a human at the unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualIntervention {
    pub record_id: Uuid,
    pub unit_id: UnitId,
    pub action: String,
    pub command_id: Option<String>,
    pub reason: Option<String>,
}

impl From<&ExecutionRecord> for ManualIntervention {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            record_id: record.id,
            unit_id: record.unit_id.clone(),
            action: record.action.clone(),
            command_id: record.command_id.clone(),
            reason: record
                .rollback_reason
                .clone()
                .or_else(|| record.error().map(|e| e.to_string())),
        }
    }
}

/// Everything the cycle learned and did about one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit_id: UnitId,
    pub candidate: Option<AnomalyCandidate>,
    pub diagnosis: Option<Diagnosis>,
    pub decision: Option<Decision>,
    pub execution: Option<ExecutionRef>,
    pub error: Option<UnitError>,
}

/// Coarse classification used for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    /// Scored below the floor
    Normal,
    Executed,
    Escalated,
    Deferred,
    Error,
}

impl UnitOutcome {
    pub fn new(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            candidate: None,
            diagnosis: None,
            decision: None,
            execution: None,
            error: None,
        }
    }

    pub fn with_error(mut self, error: &WattsonError) -> Self {
        self.error = Some(UnitError::from(error));
        self
    }

    pub fn outcome(&self) -> Option<DecisionOutcome> {
        self.decision.as_ref().map(|d| d.outcome)
    }

    pub fn class(&self) -> OutcomeClass {
        if self.error.is_some() {
            return OutcomeClass::Error;
        }
        match self.outcome() {
            Some(DecisionOutcome::AutonomousExecute) => OutcomeClass::Executed,
            Some(DecisionOutcome::Escalate) => OutcomeClass::Escalated,
            Some(DecisionOutcome::Defer) => OutcomeClass::Deferred,
            None => OutcomeClass::Normal,
        }
    }
}

/// Counts by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub units: usize,
    pub candidates: usize,
    pub normal: usize,
    pub executed: usize,
    pub escalated: usize,
    pub deferred: usize,
    pub errors: usize,
    /// Executions still inside their monitoring window at report time
    pub monitoring: usize,
}

impl OutcomeCounts {
    pub fn tally(outcomes: &[UnitOutcome]) -> Self {
        let mut counts = Self {
            units: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            if outcome.candidate.is_some() {
                counts.candidates += 1;
            }
            if outcome
                .execution
                .as_ref()
                .is_some_and(|e| e.status == ExecutionStatus::Monitoring)
            {
                counts.monitoring += 1;
            }
            match outcome.class() {
                OutcomeClass::Normal => counts.normal += 1,
                OutcomeClass::Executed => counts.executed += 1,
                OutcomeClass::Escalated => counts.escalated += 1,
                OutcomeClass::Deferred => counts.deferred += 1,
                OutcomeClass::Error => counts.errors += 1,
            }
        }
        counts
    }
}

/// Result of one monitoring cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub cancelled: bool,
    /// One entry per fleet unit, in fleet order
    pub outcomes: Vec<UnitOutcome>,
    pub counts: OutcomeCounts,
    /// Every record flagged for manual intervention, from any cycle
    pub manual_intervention: Vec<ManualIntervention>,
}

impl CycleReport {
    pub fn outcome(&self, unit: &UnitId) -> Option<&UnitOutcome> {
        self.outcomes.iter().find(|o| &o.unit_id == unit)
    }

    /// Executions handed to the monitor and still running
    pub fn monitoring(&self) -> impl Iterator<Item = &ExecutionRef> {
        self.outcomes
            .iter()
            .filter_map(|o| o.execution.as_ref())
            .filter(|e| e.status == ExecutionStatus::Monitoring)
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
