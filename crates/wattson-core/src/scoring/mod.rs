//! Anomaly Scorer
//!
//! Compares a unit's current load against two references and discounts the
//! part of the deviation the weather explains:
//!
//! - **temporal**: z-score against the unit's own rolling baseline
//! - **spatial**: robust z-score against the median of its peers
//! - **weather**: share of the temporal deviation explained by the change in
//!   outdoor temperature since the baseline window
//!
//! Scoring is a pure function of its inputs, so identical inputs always
//! produce the identical score and tier.

pub mod baseline;

use crate::config::{ScoringConfig, TierThresholds};
use crate::types::{now, Observation, Timestamp, Unit, UnitId, WeatherSnapshot};
use baseline::{LoadBaseline, PeerBaseline};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Scale factor turning a MAD into a standard-deviation estimate
const MAD_TO_SIGMA: f64 = 1.4826;

/// Severity tier of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityTier {
    pub fn from_score(score: f64, tiers: &TierThresholds) -> Self {
        if score >= tiers.critical {
            SeverityTier::Critical
        } else if score >= tiers.high {
            SeverityTier::High
        } else if score >= tiers.medium {
            SeverityTier::Medium
        } else {
            SeverityTier::Low
        }
    }
}

impl fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SeverityTier::Low => "low",
            SeverityTier::Medium => "medium",
            SeverityTier::High => "high",
            SeverityTier::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Which reference a signal was measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Temporal,
    Spatial,
    Weather,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Temporal => "temporal",
            SignalKind::Spatial => "spatial",
            SignalKind::Weather => "weather",
        }
    }
}

/// One component of the score with the reference it was measured against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingSignal {
    pub kind: SignalKind,
    /// Normalized component value in [0, 1]
    pub value: f64,
    /// Reference load (baseline mean or peer median); for weather, the
    /// expected relative change
    pub reference: f64,
    /// Raw z-score before saturation (0 for weather)
    pub z_score: f64,
}

/// Intermediate values of a scoring run
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub temporal: f64,
    pub spatial: f64,
    pub weather: f64,
    pub score: f64,
}

/// A unit flagged as anomalous in one cycle
///
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCandidate {
    pub id: Uuid,
    pub unit_id: UnitId,
    pub score: f64,
    pub tier: SeverityTier,
    pub breakdown: ScoreBreakdown,
    pub signals: Vec<ContributingSignal>,
    pub observation: Observation,
    pub created_at: Timestamp,
}

/// The Anomaly Scorer
#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    config: ScoringConfig,
}

impl AnomalyScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a unit; `None` when the score falls below the floor
    pub fn score(
        &self,
        unit: &Unit,
        observation: &Observation,
        history: &[Observation],
        peers: &[Observation],
        weather: &WeatherSnapshot,
    ) -> Option<AnomalyCandidate> {
        let (breakdown, signals) = self.evaluate(&unit.id, observation, history, peers, weather);

        if breakdown.score < self.config.floor {
            return None;
        }

        Some(AnomalyCandidate {
            id: Uuid::new_v4(),
            unit_id: unit.id.clone(),
            score: breakdown.score,
            tier: SeverityTier::from_score(breakdown.score, &self.config.tiers),
            breakdown,
            signals,
            observation: observation.clone(),
            created_at: now(),
        })
    }

    /// Components and final score, regardless of the floor
    pub fn breakdown(
        &self,
        unit: &UnitId,
        observation: &Observation,
        history: &[Observation],
        peers: &[Observation],
        weather: &WeatherSnapshot,
    ) -> ScoreBreakdown {
        self.evaluate(unit, observation, history, peers, weather).0
    }

    fn evaluate(
        &self,
        unit: &UnitId,
        observation: &Observation,
        history: &[Observation],
        peers: &[Observation],
        weather: &WeatherSnapshot,
    ) -> (ScoreBreakdown, Vec<ContributingSignal>) {
        let cfg = &self.config;
        let load = observation.load_kw;
        let mut signals = Vec::with_capacity(3);

        if !load.is_finite() {
            return (ScoreBreakdown::default(), signals);
        }

        let mut temporal = 0.0;
        let mut weather_part = 0.0;

        let load_baseline = LoadBaseline::from_history(history)
            .filter(|b| b.samples >= cfg.min_history_samples && b.mean > 0.0);
        if let Some(base) = load_baseline {
            let sigma = base.std_dev.max(cfg.min_relative_spread * base.mean);
            let z = (load - base.mean).abs() / sigma;
            temporal = self.saturate(z);
            signals.push(ContributingSignal {
                kind: SignalKind::Temporal,
                value: temporal,
                reference: base.mean,
                z_score: z,
            });

            let expected = cfg.cooling_sensitivity_per_c
                * (weather.temperature_c - base.mean_outdoor_temp_c);
            let actual = (load - base.mean) / base.mean;
            let explained = if actual != 0.0 && expected.is_finite() && expected * actual > 0.0 {
                (expected / actual).clamp(0.0, 1.0)
            } else {
                0.0
            };
            weather_part = explained * temporal;
            if weather_part > 0.0 {
                signals.push(ContributingSignal {
                    kind: SignalKind::Weather,
                    value: weather_part,
                    reference: expected,
                    z_score: 0.0,
                });
            }
        }

        let mut spatial = 0.0;
        let peer_baseline = PeerBaseline::from_peers(unit, peers)
            .filter(|b| b.count >= cfg.min_peer_count && b.median > 0.0);
        if let Some(base) = peer_baseline {
            let sigma = (MAD_TO_SIGMA * base.mad).max(cfg.min_relative_spread * base.median);
            let z = (load - base.median).abs() / sigma;
            spatial = self.saturate(z);
            signals.push(ContributingSignal {
                kind: SignalKind::Spatial,
                value: spatial,
                reference: base.median,
                z_score: z,
            });
        }

        let score = (cfg.temporal_weight * temporal + cfg.spatial_weight * spatial
            - cfg.weather_weight * weather_part)
            .max(0.0);

        (
            ScoreBreakdown {
                temporal,
                spatial,
                weather: weather_part,
                score,
            },
            signals,
        )
    }

    fn saturate(&self, z: f64) -> f64 {
        (z / self.config.deviation_saturation).min(1.0)
    }
}
