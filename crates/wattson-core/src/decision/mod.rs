//! Decision Engine
//!
//! Pure function of a diagnosis plus configuration: no collaborator calls.
//! Every plan gets a composite score
//!
//! ```text
//! composite = impact_weight * impact - risk_weight * risk - cost_weight * cost / cost_ceiling
//! ```
//!
//! and the outcome follows:
//!
//! - **defer** when there are no plans or the best composite is not positive
//! - **autonomous-execute** when a plan passes the confidence, risk, cost
//!   and reversibility gates; the confidence gate reads the plan's own
//!   confidence
//! - **escalate** otherwise, carrying the best plan for a human to review
//!
//! Plans are ordered by composite (desc), then risk, cost and action name
//! (asc), which is total and stable.

use crate::config::DecisionConfig;
use crate::diagnosis::{Diagnosis, InterventionPlan};
use crate::execution::ledger::{ExecutionLease, ExecutionLedger};
use crate::types::{now, Timestamp, UnitId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// What to do about a diagnosis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    AutonomousExecute,
    Escalate,
    Defer,
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DecisionOutcome::AutonomousExecute => "autonomous-execute",
            DecisionOutcome::Escalate => "escalate",
            DecisionOutcome::Defer => "defer",
        };
        f.write_str(label)
    }
}

/// A gate that shaped the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Approved,
    ConfidenceBelowThreshold,
    RiskAboveCeiling,
    CostAboveCeiling,
    Irreversible,
    UnitBusy,
    NoBeneficialAction,
    NoPlans,
}

/// Composite score of one plan and the gates it failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanScore {
    pub plan_id: Uuid,
    pub action: String,
    pub impact: f64,
    pub composite: f64,
    pub blockers: Vec<DecisionReason>,
}

impl PlanScore {
    pub fn is_eligible(&self) -> bool {
        self.blockers.is_empty()
    }
}

/// Why a decision came out the way it did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rationale {
    pub reasons: Vec<DecisionReason>,
    /// Every plan considered, in decision order
    pub plan_scores: Vec<PlanScore>,
}

/// The parts of a diagnosis a decision keeps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisRef {
    pub diagnosis_id: Uuid,
    pub candidate_id: Uuid,
    pub unit_id: UnitId,
    pub cause: Option<String>,
    pub signature: Vec<f64>,
}

impl From<&Diagnosis> for DiagnosisRef {
    fn from(diagnosis: &Diagnosis) -> Self {
        Self {
            diagnosis_id: diagnosis.id,
            candidate_id: diagnosis.candidate_id,
            unit_id: diagnosis.unit_id.clone(),
            cause: diagnosis.top_cause().map(|c| c.cause.clone()),
            signature: diagnosis.signature.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub diagnosis: DiagnosisRef,
    pub plan: Option<InterventionPlan>,
    pub outcome: DecisionOutcome,
    pub confidence: f64,
    pub rationale: Rationale,
    pub decided_at: Timestamp,
}

/// The Decision Engine
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn composite(&self, plan: &InterventionPlan) -> f64 {
        let cfg = &self.config;
        cfg.impact_weight * plan.impact(cfg.comfort_weight)
            - cfg.risk_weight * plan.estimated_risk
            - cfg.cost_weight * (plan.estimated_cost / cfg.cost_ceiling)
    }

    fn blockers(&self, plan: &InterventionPlan, composite: f64) -> Vec<DecisionReason> {
        let cfg = &self.config;
        let mut blockers = Vec::new();
        if plan.confidence < cfg.autonomy_threshold {
            blockers.push(DecisionReason::ConfidenceBelowThreshold);
        }
        if plan.estimated_risk > cfg.risk_ceiling {
            blockers.push(DecisionReason::RiskAboveCeiling);
        }
        if plan.estimated_cost > cfg.cost_ceiling {
            blockers.push(DecisionReason::CostAboveCeiling);
        }
        if cfg.require_reversible && !plan.reversible {
            blockers.push(DecisionReason::Irreversible);
        }
        if composite <= 0.0 {
            blockers.push(DecisionReason::NoBeneficialAction);
        }
        blockers
    }

    /// Decide what to do about a diagnosis
    pub fn decide(&self, diagnosis: &Diagnosis) -> Decision {
        let mut ranked: Vec<(&InterventionPlan, PlanScore)> = diagnosis
            .plans
            .iter()
            .map(|plan| {
                let composite = self.composite(plan);
                let score = PlanScore {
                    plan_id: plan.id,
                    action: plan.action.clone(),
                    impact: plan.impact(self.config.comfort_weight),
                    composite,
                    blockers: self.blockers(plan, composite),
                };
                (plan, score)
            })
            .collect();
        ranked.sort_by(decision_order);

        let (outcome, plan, reasons) = match ranked.first() {
            None => (DecisionOutcome::Defer, None, vec![DecisionReason::NoPlans]),
            Some((_, best)) if best.composite <= 0.0 => (
                DecisionOutcome::Defer,
                None,
                vec![DecisionReason::NoBeneficialAction],
            ),
            Some((best_plan, best)) => {
                match ranked.iter().find(|(_, s)| s.is_eligible()) {
                    Some((plan, _)) => (
                        DecisionOutcome::AutonomousExecute,
                        Some((*plan).clone()),
                        vec![DecisionReason::Approved],
                    ),
                    None => (
                        DecisionOutcome::Escalate,
                        Some((*best_plan).clone()),
                        best.blockers.clone(),
                    ),
                }
            }
        };

        let decision = Decision {
            id: Uuid::new_v4(),
            diagnosis: DiagnosisRef::from(diagnosis),
            confidence: match (&plan, outcome) {
                (Some(p), DecisionOutcome::AutonomousExecute) => p.confidence,
                _ => diagnosis.confidence,
            },
            plan,
            outcome,
            rationale: Rationale {
                reasons,
                plan_scores: ranked.into_iter().map(|(_, s)| s).collect(),
            },
            decided_at: now(),
        };

        tracing::info!(
            unit = %diagnosis.unit_id,
            outcome = %decision.outcome,
            action = decision.plan.as_ref().map(|p| p.action.as_str()).unwrap_or("none"),
            confidence = decision.confidence,
            "Decision made"
        );

        decision
    }

    /// [`decide`](Self::decide), reserving the unit's execution lock for an
    /// autonomous-execute outcome
    ///
    /// A unit that already holds a lease cannot be approved again; the
    /// decision is downgraded to escalate with [`DecisionReason::UnitBusy`].
    pub fn decide_guarded(
        &self,
        diagnosis: &Diagnosis,
        ledger: &Arc<ExecutionLedger>,
    ) -> (Decision, Option<ExecutionLease>) {
        let mut decision = self.decide(diagnosis);
        if decision.outcome != DecisionOutcome::AutonomousExecute {
            return (decision, None);
        }

        match ledger.try_reserve(&diagnosis.unit_id) {
            Some(lease) => (decision, Some(lease)),
            None => {
                tracing::warn!(
                    unit = %diagnosis.unit_id,
                    "Unit has an execution in flight, escalating instead"
                );
                decision.outcome = DecisionOutcome::Escalate;
                decision.rationale.reasons = vec![DecisionReason::UnitBusy];
                (decision, None)
            }
        }
    }
}

fn decision_order(
    a: &(&InterventionPlan, PlanScore),
    b: &(&InterventionPlan, PlanScore),
) -> Ordering {
    let (plan_a, score_a) = a;
    let (plan_b, score_b) = b;
    score_b
        .composite
        .total_cmp(&score_a.composite)
        .then_with(|| plan_a.estimated_risk.total_cmp(&plan_b.estimated_risk))
        .then_with(|| plan_a.estimated_cost.total_cmp(&plan_b.estimated_cost))
        .then_with(|| plan_a.action.cmp(&plan_b.action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::CauseHypothesis;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn plan(action: &str, energy: f64, risk: f64, cost: f64) -> InterventionPlan {
        InterventionPlan {
            id: Uuid::new_v4(),
            action: action.to_string(),
            cause: "stuck_damper".to_string(),
            parameters: BTreeMap::new(),
            simulated_energy_delta: energy,
            simulated_comfort_delta: 0.0,
            estimated_cost: cost,
            estimated_risk: risk,
            uncertainty: 0.0,
            confidence: 1.0,
            reversible: true,
        }
    }

    /// Every plan inherits `confidence` unless it was set lower
    fn diagnosis(confidence: f64, plans: Vec<InterventionPlan>) -> Diagnosis {
        let plans = plans
            .into_iter()
            .map(|mut p| {
                p.confidence = p.confidence.min(confidence);
                p
            })
            .collect();
        Diagnosis {
            id: Uuid::new_v4(),
            candidate_id: Uuid::new_v4(),
            unit_id: UnitId::new("U1"),
            causes: vec![CauseHypothesis {
                cause: "stuck_damper".to_string(),
                confidence,
                base_confidence: confidence,
                evidence: Vec::new(),
            }],
            plans,
            confidence,
            attributions: Vec::new(),
            signature: vec![0.7, 0.2],
            created_at: now(),
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(DecisionConfig::default())
    }

    #[test]
    fn test_confident_low_risk_plan_executes() {
        let d = engine().decide(&diagnosis(0.82, vec![plan("damper_reset", -0.15, 0.1, 120.0)]));
        assert_eq!(d.outcome, DecisionOutcome::AutonomousExecute);
        assert_eq!(d.plan.unwrap().action, "damper_reset");
        assert!((d.confidence - 0.82).abs() < 1e-12);
        assert_eq!(d.rationale.reasons, vec![DecisionReason::Approved]);
    }

    #[test]
    fn test_low_confidence_escalates() {
        let d = engine().decide(&diagnosis(0.6, vec![plan("damper_reset", -0.15, 0.1, 120.0)]));
        assert_eq!(d.outcome, DecisionOutcome::Escalate);
        assert!(d.plan.is_some());
        assert!(d
            .rationale
            .reasons
            .contains(&DecisionReason::ConfidenceBelowThreshold));
    }

    #[test]
    fn test_confidence_exactly_at_threshold_executes() {
        let d = engine().decide(&diagnosis(0.8, vec![plan("damper_reset", -0.15, 0.1, 120.0)]));
        assert_eq!(d.outcome, DecisionOutcome::AutonomousExecute);
    }

    #[test]
    fn test_risky_plan_escalates() {
        let d = engine().decide(&diagnosis(0.95, vec![plan("thermal_storage", -0.5, 0.4, 100.0)]));
        assert_eq!(d.outcome, DecisionOutcome::Escalate);
        assert_eq!(d.rationale.reasons, vec![DecisionReason::RiskAboveCeiling]);
    }

    #[test]
    fn test_expensive_plan_escalates() {
        let d = engine().decide(&diagnosis(0.95, vec![plan("retrofit", -0.5, 0.1, 900.0)]));
        assert_eq!(d.outcome, DecisionOutcome::Escalate);
        assert!(d.rationale.reasons.contains(&DecisionReason::CostAboveCeiling));
    }

    #[test]
    fn test_irreversible_plan_escalates() {
        let mut p = plan("thermal_storage", -0.2, 0.1, 100.0);
        p.reversible = false;
        let d = engine().decide(&diagnosis(0.95, vec![p]));
        assert_eq!(d.outcome, DecisionOutcome::Escalate);
        assert_eq!(d.rationale.reasons, vec![DecisionReason::Irreversible]);
    }

    #[test]
    fn test_no_benefit_defers() {
        let d = engine().decide(&diagnosis(0.95, vec![plan("pre_cooling", 0.05, 0.2, 100.0)]));
        assert_eq!(d.outcome, DecisionOutcome::Defer);
        assert!(d.plan.is_none());
        assert_eq!(d.rationale.reasons, vec![DecisionReason::NoBeneficialAction]);
    }

    #[test]
    fn test_no_plans_defers() {
        let d = engine().decide(&diagnosis(0.95, Vec::new()));
        assert_eq!(d.outcome, DecisionOutcome::Defer);
        assert_eq!(d.rationale.reasons, vec![DecisionReason::NoPlans]);
    }

    #[test]
    fn test_best_eligible_plan_is_executed_when_best_is_blocked() {
        let d = engine().decide(&diagnosis(
            0.9,
            vec![
                plan("thermal_storage", -0.5, 0.5, 100.0),
                plan("damper_reset", -0.15, 0.1, 120.0),
            ],
        ));
        assert_eq!(d.outcome, DecisionOutcome::AutonomousExecute);
        assert_eq!(d.plan.unwrap().action, "damper_reset");
        assert_eq!(d.rationale.plan_scores[0].action, "thermal_storage");
    }

    #[test]
    fn test_confidence_gate_reads_the_executed_plan() {
        let mut shaky = plan("setpoint_adjustment", -0.3, 0.1, 50.0);
        shaky.uncertainty = 0.6;
        shaky.confidence = 0.62;
        let steady = plan("damper_reset", -0.15, 0.1, 120.0);

        let d = engine().decide(&diagnosis(0.82, vec![shaky.clone(), steady]));
        assert_eq!(d.outcome, DecisionOutcome::AutonomousExecute);
        assert_eq!(d.plan.as_ref().unwrap().action, "damper_reset");
        assert!((d.confidence - 0.82).abs() < 1e-12);
        assert_eq!(d.rationale.plan_scores[0].action, "setpoint_adjustment");
        assert_eq!(
            d.rationale.plan_scores[0].blockers,
            vec![DecisionReason::ConfidenceBelowThreshold]
        );

        let d = engine().decide(&diagnosis(0.82, vec![shaky]));
        assert_eq!(d.outcome, DecisionOutcome::Escalate);
        assert_eq!(d.rationale.reasons, vec![DecisionReason::ConfidenceBelowThreshold]);
    }

    #[test]
    fn test_equal_composite_prefers_lower_risk_then_cost() {
        // risk and cost out of the composite, so ties are exact
        let e = DecisionEngine::new(DecisionConfig {
            risk_weight: 0.0,
            cost_weight: 0.0,
            ..DecisionConfig::default()
        });
        let safe = plan("b_safe", -0.2, 0.1, 10.0);

        let risky = plan("a_risky", -0.2, 0.2, 10.0);
        assert_eq!(e.composite(&risky), e.composite(&safe));
        let d = e.decide(&diagnosis(0.9, vec![risky, safe.clone()]));
        assert_eq!(d.plan.unwrap().action, "b_safe");

        let pricey = plan("a_pricey", -0.2, 0.1, 90.0);
        let d = e.decide(&diagnosis(0.9, vec![pricey, safe.clone()]));
        assert_eq!(d.plan.unwrap().action, "b_safe");

        let twin = plan("a_twin", -0.2, 0.1, 10.0);
        let d = e.decide(&diagnosis(0.9, vec![safe, twin]));
        assert_eq!(d.plan.unwrap().action, "a_twin");
    }

    #[test]
    fn test_guarded_decision_downgrades_busy_unit() {
        let e = engine();
        let ledger = ExecutionLedger::new();
        let d = diagnosis(0.9, vec![plan("damper_reset", -0.15, 0.1, 120.0)]);

        let (first, lease) = e.decide_guarded(&d, &ledger);
        assert_eq!(first.outcome, DecisionOutcome::AutonomousExecute);
        assert!(lease.is_some());

        let (second, none) = e.decide_guarded(&d, &ledger);
        assert_eq!(second.outcome, DecisionOutcome::Escalate);
        assert_eq!(second.rationale.reasons, vec![DecisionReason::UnitBusy]);
        assert!(none.is_none());

        drop(lease);
        let (third, lease) = e.decide_guarded(&d, &ledger);
        assert_eq!(third.outcome, DecisionOutcome::AutonomousExecute);
        assert!(lease.is_some());
    }

    #[test]
    fn test_non_executing_decision_takes_no_lease() {
        let ledger = ExecutionLedger::new();
        let d = diagnosis(0.5, vec![plan("damper_reset", -0.15, 0.1, 120.0)]);
        let (decision, lease) = engine().decide_guarded(&d, &ledger);
        assert_eq!(decision.outcome, DecisionOutcome::Escalate);
        assert!(lease.is_none());
        assert!(!ledger.is_busy(&UnitId::new("U1")));
    }

    proptest! {
        #[test]
        fn prop_autonomy_requires_every_gate(
            confidence in 0.0f64..=1.0,
            risk in 0.0f64..=1.0,
            cost in 0.0f64..1000.0,
            energy in -0.5f64..0.2,
        ) {
            let e = engine();
            let cfg = e.config().clone();
            let p = plan("damper_reset", energy, risk, cost);
            let composite = e.composite(&p);
            let d = e.decide(&diagnosis(confidence, vec![p]));

            let expected = confidence >= cfg.autonomy_threshold
                && risk <= cfg.risk_ceiling
                && cost <= cfg.cost_ceiling
                && composite > 0.0;
            prop_assert_eq!(d.outcome == DecisionOutcome::AutonomousExecute, expected);

            if composite <= 0.0 {
                prop_assert_eq!(d.outcome, DecisionOutcome::Defer);
            } else if !expected {
                prop_assert_eq!(d.outcome, DecisionOutcome::Escalate);
            }
        }

        #[test]
        fn prop_decision_is_order_independent(
            risks in prop::collection::vec(0.0f64..0.5, 2..5),
        ) {
            let e = engine();
            let plans: Vec<_> = risks
                .iter()
                .enumerate()
                .map(|(i, r)| plan(&format!("plan_{i}"), -0.2, *r, 50.0))
                .collect();
            let mut reversed = plans.clone();
            reversed.reverse();

            let a = e.decide(&diagnosis(0.9, plans));
            let b = e.decide(&diagnosis(0.9, reversed));
            prop_assert_eq!(
                a.plan.map(|p| p.action),
                b.plan.map(|p| p.action)
            );
        }
    }
}
