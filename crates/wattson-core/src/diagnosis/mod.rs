//! Diagnostic Engine
//!
//! Turns an anomaly candidate into ranked causal hypotheses and simulated
//! intervention plans:
//!
//! 1. Ask the explainability service which signals drive the anomaly
//! 2. Look up similar prior cases in the knowledge store
//! 3. Score every catalog cause against the attributions, boosting causes
//!    with precedent and capping novel ones at the novelty ceiling
//! 4. Draw 2-5 plans from the action templates of the top causes
//! 5. Simulate every plan and rank them by impact per unit of risk
//!
//! Every plan carries its own confidence: the top cause's confidence
//! discounted by that plan's simulation uncertainty. The diagnosis
//! confidence is the one of the best-ranked plan.
//!
//! All collaborator calls share one [`ServiceLimiter`] and run under the
//! retry policy. A collaborator that is still failing after retries makes
//! the whole diagnosis unavailable.

pub mod catalog;
pub mod signature;

use crate::config::{DecisionConfig, DiagnosisConfig};
use crate::error::{Result, WattsonError};
use crate::ports::{
    Attribution, Explainer, KnowledgeStore, ProposedAction, SimilarCase, SimulatedImpact,
    Simulator,
};
use crate::resilience::{RetryPolicy, ServiceLimiter};
use crate::scoring::AnomalyCandidate;
use crate::types::{now, Timestamp, UnitId};
use catalog::{CauseProfile, InterventionCatalog};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// A candidate intervention with its simulated impact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionPlan {
    pub id: Uuid,
    pub action: String,
    /// Cause this plan addresses
    pub cause: String,
    pub parameters: BTreeMap<String, f64>,
    /// Relative energy change (negative is a saving)
    pub simulated_energy_delta: f64,
    /// Relative comfort change (negative is worse)
    pub simulated_comfort_delta: f64,
    pub estimated_cost: f64,
    /// In [0, 1]
    pub estimated_risk: f64,
    /// Spread of the simulation, in [0, 1]
    pub uncertainty: f64,
    /// Top cause confidence discounted by this plan's uncertainty
    pub confidence: f64,
    pub reversible: bool,
}

impl InterventionPlan {
    /// Energy saved plus weighted comfort gain
    pub fn impact(&self, comfort_weight: f64) -> f64 {
        -self.simulated_energy_delta + comfort_weight * self.simulated_comfort_delta
    }
}

/// Why a cause is believed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    /// An attributed signal this cause has affinity for
    Signal {
        signal: String,
        weight: f64,
        affinity: f64,
    },
    /// A resolved prior case with the same cause
    Precedent {
        case_id: Uuid,
        action: String,
        similarity: f64,
        observed_delta: Option<f64>,
    },
    /// No precedent was found; confidence was capped
    Novel { ceiling: f64 },
}

/// One ranked causal hypothesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseHypothesis {
    pub cause: String,
    /// In [0, 1]
    pub confidence: f64,
    /// Confidence from attributions alone
    pub base_confidence: f64,
    pub evidence: Vec<Evidence>,
}

/// Diagnosis of one candidate. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub unit_id: UnitId,
    /// Most confident first
    pub causes: Vec<CauseHypothesis>,
    /// Best ranked first
    pub plans: Vec<InterventionPlan>,
    /// Top cause confidence discounted by simulation uncertainty
    pub confidence: f64,
    pub attributions: Vec<Attribution>,
    /// Embedding the case will be learned under
    pub signature: Vec<f64>,
    pub created_at: Timestamp,
}

impl Diagnosis {
    pub fn top_cause(&self) -> Option<&CauseHypothesis> {
        self.causes.first()
    }
}

/// Collaborators the engine calls
#[derive(Clone)]
pub struct DiagnosticServices {
    pub explainer: Arc<dyn Explainer>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub simulator: Arc<dyn Simulator>,
}

/// The Diagnostic Engine
pub struct DiagnosticEngine {
    config: DiagnosisConfig,
    catalog: Arc<InterventionCatalog>,
    vocabulary: Vec<String>,
    services: DiagnosticServices,
    limiter: ServiceLimiter,
    retry: RetryPolicy,
    comfort_weight: f64,
}

impl DiagnosticEngine {
    pub fn new(
        config: DiagnosisConfig,
        catalog: Arc<InterventionCatalog>,
        services: DiagnosticServices,
        limiter: ServiceLimiter,
        retry: RetryPolicy,
    ) -> Self {
        let vocabulary = catalog.signals();
        Self {
            config,
            catalog,
            vocabulary,
            services,
            limiter,
            retry,
            comfort_weight: DecisionConfig::default().comfort_weight,
        }
    }

    /// Weight of comfort delta in plan impact, shared with the decision
    /// engine
    pub fn with_comfort_weight(mut self, comfort_weight: f64) -> Self {
        self.comfort_weight = comfort_weight;
        self
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    /// Diagnose a candidate
    pub async fn diagnose(&self, candidate: &AnomalyCandidate) -> Result<Diagnosis> {
        let unit = &candidate.unit_id;

        let attributions = self
            .limiter
            .call("explainer", &self.retry, || {
                self.services.explainer.attribute(unit, &candidate.observation)
            })
            .await
            .map_err(|e| unavailable(unit, "explainability service", e))?;

        let signature = signature::embed(&self.vocabulary, &attributions, &candidate.breakdown);

        let similar = self
            .limiter
            .call("knowledge_store", &self.retry, || {
                self.services
                    .knowledge
                    .find_similar(&signature, self.config.similar_cases)
            })
            .await
            .map_err(|e| unavailable(unit, "knowledge store", e))?;

        let causes = self.rank_causes(&attributions, &similar);
        tracing::debug!(
            unit = %unit,
            causes = causes.len(),
            precedents = similar.len(),
            "Ranked causes"
        );

        let cause_confidence = causes.first().map(|c| c.confidence).unwrap_or(0.0);
        let proposals = self.propose(&causes);
        let plans = self.simulate_all(unit, proposals, cause_confidence).await?;
        let plans = self.rank_plans(plans);

        let confidence = plans
            .first()
            .map(|top| top.confidence)
            .unwrap_or(cause_confidence);

        let diagnosis = Diagnosis {
            id: Uuid::new_v4(),
            candidate_id: candidate.id,
            unit_id: unit.clone(),
            causes,
            plans,
            confidence,
            attributions,
            signature,
            created_at: now(),
        };

        tracing::info!(
            unit = %unit,
            cause = diagnosis.top_cause().map(|c| c.cause.as_str()).unwrap_or("none"),
            confidence = diagnosis.confidence,
            plans = diagnosis.plans.len(),
            "Diagnosis complete"
        );

        Ok(diagnosis)
    }

    /// Score every catalog cause, most confident first
    pub fn rank_causes(
        &self,
        attributions: &[Attribution],
        similar: &[SimilarCase],
    ) -> Vec<CauseHypothesis> {
        let mut causes: Vec<CauseHypothesis> = self
            .catalog
            .causes
            .iter()
            .filter_map(|profile| self.hypothesis(profile, attributions, similar))
            .collect();

        causes.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.cause.cmp(&b.cause))
        });
        causes
    }

    fn hypothesis(
        &self,
        profile: &CauseProfile,
        attributions: &[Attribution],
        similar: &[SimilarCase],
    ) -> Option<CauseHypothesis> {
        let base =
            profile.base_confidence(attributions.iter().map(|a| (a.signal.as_str(), a.weight)));
        if base < self.config.min_cause_confidence {
            return None;
        }

        let mut evidence: Vec<Evidence> = attributions
            .iter()
            .filter_map(|a| {
                let affinity = profile.affinities.get(&a.signal).copied().unwrap_or(0.0);
                (affinity > 0.0 && a.weight > 0.0).then(|| Evidence::Signal {
                    signal: a.signal.clone(),
                    weight: a.weight,
                    affinity,
                })
            })
            .collect();

        let precedent = similar
            .iter()
            .filter(|s| s.case.cause == profile.id && s.similarity >= self.config.min_similarity)
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity));

        let confidence = match precedent {
            Some(best) => {
                let similarity = best.similarity.clamp(0.0, 1.0);
                evidence.push(Evidence::Precedent {
                    case_id: best.case.id,
                    action: best.case.action.clone(),
                    similarity,
                    observed_delta: best.case.observed_delta,
                });
                base + (1.0 - base) * self.config.precedent_boost * similarity
            }
            None => {
                evidence.push(Evidence::Novel {
                    ceiling: self.config.novelty_ceiling,
                });
                base.min(self.config.novelty_ceiling)
            }
        };

        Some(CauseHypothesis {
            cause: profile.id.clone(),
            confidence: confidence.clamp(0.0, 1.0),
            base_confidence: base,
            evidence,
        })
    }

    /// Deduplicated actions from the top causes, padded from lower-ranked
    /// causes up to the minimum and truncated at the maximum
    pub fn propose(&self, causes: &[CauseHypothesis]) -> Vec<ProposedAction> {
        let mut proposals: Vec<ProposedAction> = Vec::new();

        for (rank, hypothesis) in causes.iter().enumerate() {
            if rank >= self.config.max_causes && proposals.len() >= self.config.min_plans {
                break;
            }
            let Some(profile) = self.catalog.cause(&hypothesis.cause) else {
                continue;
            };
            for name in &profile.actions {
                if proposals.len() >= self.config.max_plans {
                    return proposals;
                }
                if proposals.iter().any(|p| &p.action == name) {
                    continue;
                }
                if let Some(template) = self.catalog.action(name) {
                    proposals.push(ProposedAction {
                        action: template.name.clone(),
                        cause: profile.id.clone(),
                        parameters: template.parameters.clone(),
                    });
                }
            }
        }

        proposals
    }

    async fn simulate_all(
        &self,
        unit: &UnitId,
        proposals: Vec<ProposedAction>,
        cause_confidence: f64,
    ) -> Result<Vec<InterventionPlan>> {
        let runs = proposals.into_iter().map(|proposal| async move {
            let impact = self
                .limiter
                .call("simulator", &self.retry, || {
                    self.services.simulator.simulate(unit, &proposal)
                })
                .await
                .map_err(|e| unavailable(unit, "simulator", e))?;
            self.to_plan(unit, proposal, impact, cause_confidence)
        });

        futures::future::try_join_all(runs).await
    }

    fn to_plan(
        &self,
        unit: &UnitId,
        proposal: ProposedAction,
        impact: SimulatedImpact,
        cause_confidence: f64,
    ) -> Result<InterventionPlan> {
        let finite = [
            impact.energy_delta,
            impact.comfort_delta,
            impact.cost,
            impact.risk,
            impact.uncertainty,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(unavailable(
                unit,
                "simulator",
                WattsonError::service(
                    "simulator",
                    format!("non-finite estimate for {}", proposal.action),
                ),
            ));
        }

        let reversible = self
            .catalog
            .action(&proposal.action)
            .map(|t| t.reversible)
            .unwrap_or(false);
        let uncertainty = impact.uncertainty.clamp(0.0, 1.0);
        let confidence = (cause_confidence * (1.0 - self.config.uncertainty_penalty * uncertainty))
            .clamp(0.0, cause_confidence);

        Ok(InterventionPlan {
            id: Uuid::new_v4(),
            action: proposal.action,
            cause: proposal.cause,
            parameters: proposal.parameters,
            simulated_energy_delta: impact.energy_delta,
            simulated_comfort_delta: impact.comfort_delta,
            estimated_cost: impact.cost.max(0.0),
            estimated_risk: impact.risk.clamp(0.0, 1.0),
            uncertainty,
            confidence,
            reversible,
        })
    }

    /// Order by impact per unit of risk, keeping the configured number
    pub fn rank_plans(&self, mut plans: Vec<InterventionPlan>) -> Vec<InterventionPlan> {
        plans.sort_by(|a, b| self.compare_plans(a, b));
        plans.truncate(self.config.attached_plans);
        plans
    }

    fn compare_plans(&self, a: &InterventionPlan, b: &InterventionPlan) -> Ordering {
        let ratio = |p: &InterventionPlan| {
            p.impact(self.comfort_weight) / p.estimated_risk.max(self.config.risk_floor)
        };
        ratio(b)
            .total_cmp(&ratio(a))
            .then_with(|| a.estimated_risk.total_cmp(&b.estimated_risk))
            .then_with(|| a.estimated_cost.total_cmp(&b.estimated_cost))
            .then_with(|| a.action.cmp(&b.action))
    }
}

fn unavailable(unit: &UnitId, stage: &str, error: WattsonError) -> WattsonError {
    tracing::warn!(unit = %unit, "{} failed after retries: {}", stage, error);
    WattsonError::DiagnosisUnavailable {
        unit: unit.to_string(),
        reason: format!("{stage}: {error}"),
    }
}
