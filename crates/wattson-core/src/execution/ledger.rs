//! Per-unit execution ledger
//!
//! The only state carried between cycles: an append-only history of
//! execution records per unit plus the per-unit execution lock. A unit holds
//! at most one lease at a time, so two executions can never be in flight on
//! the same unit.

use super::record::{ExecutionRecord, ExecutionStatus};
use crate::error::{Result, WattsonError};
use crate::types::UnitId;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct UnitLedger {
    /// Lease currently holding the unit
    lease: Option<Uuid>,
    history: Vec<ExecutionRecord>,
}

/// Append-only execution history plus the per-unit lock
#[derive(Debug, Default)]
pub struct ExecutionLedger {
    units: DashMap<UnitId, UnitLedger>,
    index: DashMap<Uuid, UnitId>,
}

impl ExecutionLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Atomically take the unit's execution lock
    ///
    /// `None` while another lease is outstanding.
    pub fn try_reserve(self: &Arc<Self>, unit: &UnitId) -> Option<ExecutionLease> {
        let mut entry = self.units.entry(unit.clone()).or_default();
        if entry.lease.is_some() {
            return None;
        }
        let id = Uuid::new_v4();
        entry.lease = Some(id);
        drop(entry);

        tracing::debug!(unit = %unit, lease = %id, "Execution lock reserved");
        Some(ExecutionLease {
            ledger: Arc::clone(self),
            unit: unit.clone(),
            id,
        })
    }

    /// Whether the unit's execution lock is held
    pub fn is_busy(&self, unit: &UnitId) -> bool {
        self.units
            .get(unit)
            .map(|u| u.lease.is_some())
            .unwrap_or(false)
    }

    fn release(&self, unit: &UnitId, lease: Uuid) {
        if let Some(mut entry) = self.units.get_mut(unit) {
            if entry.lease == Some(lease) {
                entry.lease = None;
                tracing::debug!(unit = %unit, lease = %lease, "Execution lock released");
            }
        }
    }

    /// Append a new record to its unit's history
    pub fn append(&self, record: ExecutionRecord) -> Result<()> {
        if self.index.contains_key(&record.id) {
            return Err(WattsonError::Invariant(format!(
                "execution record {} already in ledger",
                record.id
            )));
        }
        self.index.insert(record.id, record.unit_id.clone());
        self.units
            .entry(record.unit_id.clone())
            .or_default()
            .history
            .push(record);
        Ok(())
    }

    /// Replace the stored snapshot of an existing record
    pub fn update(&self, record: &ExecutionRecord) -> Result<()> {
        let mut unit = self
            .units
            .get_mut(&record.unit_id)
            .ok_or(WattsonError::RecordNotFound(record.id))?;
        let slot = unit
            .history
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or(WattsonError::RecordNotFound(record.id))?;
        if slot.transitions.len() > record.transitions.len() {
            return Err(WattsonError::Invariant(format!(
                "execution record {} would lose audit entries",
                record.id
            )));
        }
        *slot = record.clone();
        Ok(())
    }

    pub fn record(&self, id: Uuid) -> Option<ExecutionRecord> {
        let unit = self.index.get(&id)?.clone();
        let ledger = self.units.get(&unit)?;
        ledger.history.iter().find(|r| r.id == id).cloned()
    }

    /// Full history of a unit, oldest first
    pub fn history(&self, unit: &UnitId) -> Vec<ExecutionRecord> {
        self.units
            .get(unit)
            .map(|u| u.history.clone())
            .unwrap_or_default()
    }

    fn collect<F>(&self, predicate: F) -> Vec<ExecutionRecord>
    where
        F: Fn(&ExecutionRecord) -> bool,
    {
        let mut records: Vec<ExecutionRecord> = self
            .units
            .iter()
            .flat_map(|u| {
                u.history
                    .iter()
                    .filter(|r| predicate(*r))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        records.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.id.cmp(&b.id)));
        records
    }

    /// Records not yet in a terminal state
    pub fn in_flight(&self) -> Vec<ExecutionRecord> {
        self.collect(|r| !r.status.is_terminal())
    }

    /// Records whose rollback failed, from any cycle
    pub fn flagged_for_manual_intervention(&self) -> Vec<ExecutionRecord> {
        self.collect(|r| r.manual_intervention_required)
    }

    /// Succeeded records not yet stored as historical cases
    pub fn unlearned_successes(&self) -> Vec<ExecutionRecord> {
        self.collect(|r| r.status == ExecutionStatus::Succeeded && !r.learned)
    }

    pub fn mark_learned(&self, id: Uuid) -> Result<()> {
        let unit = self
            .index
            .get(&id)
            .map(|u| u.clone())
            .ok_or(WattsonError::RecordNotFound(id))?;
        let mut ledger = self
            .units
            .get_mut(&unit)
            .ok_or(WattsonError::RecordNotFound(id))?;
        let record = ledger
            .history
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(WattsonError::RecordNotFound(id))?;
        record.learned = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Exclusive right to execute on one unit
///
/// Released when dropped.
#[derive(Debug)]
pub struct ExecutionLease {
    ledger: Arc<ExecutionLedger>,
    unit: UnitId,
    id: Uuid,
}

impl ExecutionLease {
    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ledger(&self) -> &Arc<ExecutionLedger> {
        &self.ledger
    }
}

impl Drop for ExecutionLease {
    fn drop(&mut self) {
        self.ledger.release(&self.unit, self.id);
    }
}
