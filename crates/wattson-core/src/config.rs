//! Engine configuration
//!
//! All thresholds, weights and windows are configuration. Every section
//! defaults sensibly and tolerates missing keys, so a TOML file only needs
//! the values it overrides:
//!
//! ```toml
//! [decision]
//! autonomy_threshold = 0.85
//!
//! [execution]
//! monitoring_window_secs = 3600
//! ```

use crate::diagnosis::catalog::InterventionCatalog;
use crate::error::{Result, WattsonError};
use crate::resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub diagnosis: DiagnosisConfig,
    pub decision: DecisionConfig,
    pub execution: ExecutionConfig,
    pub resilience: ResilienceConfig,
    pub orchestrator: OrchestratorConfig,
    pub catalog: InterventionCatalog,
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every section; any violation is fatal at startup
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        self.diagnosis.validate()?;
        self.decision.validate()?;
        self.execution.validate()?;
        self.resilience.validate()?;
        self.orchestrator.validate()?;
        self.catalog.validate()?;
        Ok(())
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(WattsonError::Configuration(message()))
    }
}

fn ensure_unit_interval(name: &str, value: f64) -> Result<()> {
    ensure((0.0..=1.0).contains(&value), || {
        format!("{name} must be in [0, 1], got {value}")
    })
}

fn ensure_non_negative(name: &str, value: f64) -> Result<()> {
    ensure(value.is_finite() && value >= 0.0, || {
        format!("{name} must be a non-negative number, got {value}")
    })
}

/// Severity tier boundaries (score at or above the boundary)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            medium: 0.3,
            high: 0.6,
            critical: 0.9,
        }
    }
}

/// Anomaly scorer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weight of the temporal (rolling baseline) component
    pub temporal_weight: f64,
    /// Weight of the spatial (peer median) component
    pub spatial_weight: f64,
    /// Weight of the subtracted weather-explained component
    pub weather_weight: f64,
    /// z-score at which a component saturates at 1.0
    pub deviation_saturation: f64,
    /// Lower bound on spread, as a fraction of the reference load
    pub min_relative_spread: f64,
    /// Minimum history samples before the temporal component applies
    pub min_history_samples: usize,
    /// Minimum peers before the spatial component applies
    pub min_peer_count: usize,
    /// Expected relative load change per degree of outdoor temperature
    pub cooling_sensitivity_per_c: f64,
    /// Scores below this never become candidates
    pub floor: f64,
    pub tiers: TierThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            temporal_weight: 0.55,
            spatial_weight: 0.45,
            weather_weight: 0.5,
            deviation_saturation: 20.0,
            min_relative_spread: 0.05,
            min_history_samples: 6,
            min_peer_count: 3,
            cooling_sensitivity_per_c: 0.02,
            floor: 0.3,
            tiers: TierThresholds::default(),
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<()> {
        ensure_non_negative("scoring.temporal_weight", self.temporal_weight)?;
        ensure_non_negative("scoring.spatial_weight", self.spatial_weight)?;
        ensure_non_negative("scoring.weather_weight", self.weather_weight)?;
        ensure(self.temporal_weight + self.spatial_weight > 0.0, || {
            "scoring: temporal and spatial weights cannot both be zero".to_string()
        })?;
        ensure(self.deviation_saturation > 0.0, || {
            "scoring.deviation_saturation must be positive".to_string()
        })?;
        ensure(self.min_relative_spread > 0.0, || {
            "scoring.min_relative_spread must be positive".to_string()
        })?;
        ensure_non_negative("scoring.cooling_sensitivity_per_c", self.cooling_sensitivity_per_c)?;
        ensure_non_negative("scoring.floor", self.floor)?;
        let t = &self.tiers;
        ensure(
            t.medium >= 0.0 && t.medium < t.high && t.high < t.critical,
            || {
                format!(
                    "scoring.tiers must be ascending, got medium={} high={} critical={}",
                    t.medium, t.high, t.critical
                )
            },
        )
    }
}

/// Diagnostic engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosisConfig {
    /// How many prior cases to request from the knowledge store
    pub similar_cases: usize,
    /// Similarity at which a prior case counts as precedent
    pub min_similarity: f64,
    /// Fraction of remaining headroom a perfect precedent adds
    pub precedent_boost: f64,
    /// Ceiling for causes with no precedent
    pub novelty_ceiling: f64,
    /// Causes whose base confidence falls below this are dropped
    pub min_cause_confidence: f64,
    /// How many top causes contribute intervention templates
    pub max_causes: usize,
    pub min_plans: usize,
    pub max_plans: usize,
    /// How many ranked plans are attached to the diagnosis
    pub attached_plans: usize,
    /// How strongly simulation uncertainty discounts confidence
    pub uncertainty_penalty: f64,
    /// Risk used in place of smaller risks when ranking impact per risk
    pub risk_floor: f64,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            similar_cases: 5,
            min_similarity: 0.75,
            precedent_boost: 0.1,
            novelty_ceiling: 0.6,
            min_cause_confidence: 0.05,
            max_causes: 2,
            min_plans: 2,
            max_plans: 5,
            attached_plans: 3,
            uncertainty_penalty: 0.5,
            risk_floor: 0.05,
        }
    }
}

impl DiagnosisConfig {
    fn validate(&self) -> Result<()> {
        ensure(self.similar_cases > 0, || {
            "diagnosis.similar_cases must be at least 1".to_string()
        })?;
        ensure_unit_interval("diagnosis.min_similarity", self.min_similarity)?;
        ensure_unit_interval("diagnosis.precedent_boost", self.precedent_boost)?;
        ensure_unit_interval("diagnosis.novelty_ceiling", self.novelty_ceiling)?;
        ensure_unit_interval("diagnosis.min_cause_confidence", self.min_cause_confidence)?;
        ensure_unit_interval("diagnosis.uncertainty_penalty", self.uncertainty_penalty)?;
        ensure(self.max_causes > 0, || {
            "diagnosis.max_causes must be at least 1".to_string()
        })?;
        ensure(
            (1..=5).contains(&self.min_plans)
                && (1..=5).contains(&self.max_plans)
                && self.min_plans <= self.max_plans,
            || {
                format!(
                    "diagnosis plan bounds must satisfy 1 <= min <= max <= 5, got {}..={}",
                    self.min_plans, self.max_plans
                )
            },
        )?;
        ensure(self.attached_plans > 0, || {
            "diagnosis.attached_plans must be at least 1".to_string()
        })?;
        ensure(self.risk_floor > 0.0 && self.risk_floor <= 1.0, || {
            format!("diagnosis.risk_floor must be in (0, 1], got {}", self.risk_floor)
        })
    }
}

/// Decision engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Minimum diagnosis confidence for autonomous execution
    pub autonomy_threshold: f64,
    /// Maximum plan risk for autonomous execution
    pub risk_ceiling: f64,
    /// Maximum plan cost for autonomous execution
    pub cost_ceiling: f64,
    pub impact_weight: f64,
    pub risk_weight: f64,
    pub cost_weight: f64,
    /// Weight of comfort delta in plan impact, used for both plan ranking
    /// and the composite score
    pub comfort_weight: f64,
    /// Never execute an irreversible plan autonomously
    pub require_reversible: bool,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            autonomy_threshold: 0.8,
            risk_ceiling: 0.3,
            cost_ceiling: 500.0,
            impact_weight: 1.0,
            risk_weight: 0.3,
            cost_weight: 0.2,
            comfort_weight: 0.5,
            require_reversible: true,
        }
    }
}

impl DecisionConfig {
    fn validate(&self) -> Result<()> {
        ensure_unit_interval("decision.autonomy_threshold", self.autonomy_threshold)?;
        ensure_unit_interval("decision.risk_ceiling", self.risk_ceiling)?;
        ensure(self.cost_ceiling.is_finite() && self.cost_ceiling > 0.0, || {
            format!("decision.cost_ceiling must be positive, got {}", self.cost_ceiling)
        })?;
        ensure_non_negative("decision.impact_weight", self.impact_weight)?;
        ensure_non_negative("decision.risk_weight", self.risk_weight)?;
        ensure_non_negative("decision.cost_weight", self.cost_weight)?;
        ensure_non_negative("decision.comfort_weight", self.comfort_weight)?;
        ensure(self.impact_weight > 0.0, || {
            "decision.impact_weight must be positive".to_string()
        })
    }
}

/// Execution monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub monitoring_window_secs: u64,
    pub poll_interval_secs: u64,
    /// Relative load increase over the pre-execution baseline that forces rollback
    pub regression_threshold: f64,
    /// Allowed shortfall against the simulated delta at window close
    pub success_tolerance: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            monitoring_window_secs: 2 * 60 * 60,
            poll_interval_secs: 15 * 60,
            regression_threshold: 0.05,
            success_tolerance: 0.05,
        }
    }
}

impl ExecutionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.monitoring_window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Number of polls inside one window
    pub fn polls(&self) -> u32 {
        let polls = self.monitoring_window_secs / self.poll_interval_secs.max(1);
        polls.clamp(1, u32::MAX as u64) as u32
    }

    fn validate(&self) -> Result<()> {
        ensure(self.monitoring_window_secs > 0, || {
            "execution.monitoring_window_secs must be positive".to_string()
        })?;
        ensure(
            self.poll_interval_secs > 0 && self.poll_interval_secs <= self.monitoring_window_secs,
            || {
                format!(
                    "execution.poll_interval_secs must be in 1..={}, got {}",
                    self.monitoring_window_secs, self.poll_interval_secs
                )
            },
        )?;
        ensure_non_negative("execution.regression_threshold", self.regression_threshold)?;
        ensure_non_negative("execution.success_tolerance", self.success_tolerance)
    }
}

/// Timeouts, retries and the shared collaborator limiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub call_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    /// Ceiling on concurrent calls to diagnostic collaborators
    pub service_concurrency: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_multiplier: 2.0,
            service_concurrency: 8,
        }
    }
}

impl ResilienceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }

    fn validate(&self) -> Result<()> {
        ensure(self.call_timeout_ms > 0, || {
            "resilience.call_timeout_ms must be positive".to_string()
        })?;
        ensure(self.max_attempts > 0, || {
            "resilience.max_attempts must be at least 1".to_string()
        })?;
        ensure(self.backoff_multiplier >= 1.0, || {
            format!(
                "resilience.backoff_multiplier must be >= 1, got {}",
                self.backoff_multiplier
            )
        })?;
        ensure(self.service_concurrency > 0, || {
            "resilience.service_concurrency must be at least 1".to_string()
        })
    }
}

/// Cycle orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Global cap on unit pipelines running at once
    pub max_concurrent_units: usize,
    /// History samples requested for the rolling baseline
    pub history_samples: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: 16,
            history_samples: 24,
        }
    }
}

impl OrchestratorConfig {
    fn validate(&self) -> Result<()> {
        ensure(self.max_concurrent_units > 0, || {
            "orchestrator.max_concurrent_units must be at least 1".to_string()
        })?;
        ensure(self.history_samples > 0, || {
            "orchestrator.history_samples must be at least 1".to_string()
        })
    }
}
