//! Intervention catalog
//!
//! Causes and the actions that address them are data. A new intervention
//! type is a new [`ActionTemplate`] entry (and a reference to it from one or
//! more [`CauseProfile`]s), never a new code path.

use crate::error::{Result, WattsonError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// A parameterized corrective action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default command parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    /// Whether an undo command can restore the previous state
    #[serde(default = "default_reversible")]
    pub reversible: bool,
}

fn default_reversible() -> bool {
    true
}

/// A root cause and the signals that point at it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseProfile {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Affinity in [0, 1] between an attribution signal and this cause
    pub affinities: BTreeMap<String, f64>,
    /// Action templates relevant to this cause, most specific first
    pub actions: Vec<String>,
}

impl CauseProfile {
    /// Attribution-weighted affinity, in [0, 1]
    pub fn base_confidence<'a, I>(&self, attributions: I) -> f64
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (signal, weight) in attributions {
            if !weight.is_finite() || weight <= 0.0 {
                continue;
            }
            total += weight;
            weighted += weight * self.affinities.get(signal).copied().unwrap_or(0.0);
        }
        if total > 0.0 {
            (weighted / total).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Causes plus the action templates they draw on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionCatalog {
    pub causes: Vec<CauseProfile>,
    pub actions: Vec<ActionTemplate>,
}

impl InterventionCatalog {
    pub fn action(&self, name: &str) -> Option<&ActionTemplate> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub fn cause(&self, id: &str) -> Option<&CauseProfile> {
        self.causes.iter().find(|c| c.id == id)
    }

    /// Every signal any cause has an affinity for, sorted
    pub fn signals(&self) -> Vec<String> {
        self.causes
            .iter()
            .flat_map(|c| c.affinities.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.causes.is_empty() || self.actions.is_empty() {
            return Err(WattsonError::Configuration(
                "catalog needs at least one cause and one action".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for action in &self.actions {
            if action.name.trim().is_empty() {
                return Err(WattsonError::Configuration(
                    "catalog action with empty name".to_string(),
                ));
            }
            if !names.insert(action.name.as_str()) {
                return Err(WattsonError::Configuration(format!(
                    "catalog action '{}' is defined twice",
                    action.name
                )));
            }
        }

        let mut ids = HashSet::new();
        for cause in &self.causes {
            if !ids.insert(cause.id.as_str()) {
                return Err(WattsonError::Configuration(format!(
                    "catalog cause '{}' is defined twice",
                    cause.id
                )));
            }
            if cause.actions.is_empty() {
                return Err(WattsonError::Configuration(format!(
                    "catalog cause '{}' lists no actions",
                    cause.id
                )));
            }
            if let Some(unknown) = cause.actions.iter().find(|a| !names.contains(a.as_str())) {
                return Err(WattsonError::Configuration(format!(
                    "catalog cause '{}' references unknown action '{}'",
                    cause.id, unknown
                )));
            }
            if let Some((signal, value)) = cause
                .affinities
                .iter()
                .find(|(_, v)| !(0.0..=1.0).contains(*v))
            {
                return Err(WattsonError::Configuration(format!(
                    "catalog cause '{}' has affinity {} for '{}', expected [0, 1]",
                    cause.id, value, signal
                )));
            }
        }

        Ok(())
    }
}

fn action(
    name: &str,
    description: &str,
    parameters: &[(&str, f64)],
    reversible: bool,
) -> ActionTemplate {
    ActionTemplate {
        name: name.to_string(),
        description: description.to_string(),
        parameters: parameters.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        reversible,
    }
}

fn cause(
    id: &str,
    description: &str,
    affinities: &[(&str, f64)],
    actions: &[&str],
) -> CauseProfile {
    CauseProfile {
        id: id.to_string(),
        description: description.to_string(),
        affinities: affinities.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        actions: actions.iter().map(|a| a.to_string()).collect(),
    }
}

impl Default for InterventionCatalog {
    fn default() -> Self {
        Self {
            causes: vec![
                cause(
                    "stuck_damper",
                    "Air damper stuck open or closed, forcing the AHU to over-condition",
                    &[("damper_position", 1.0), ("supply_air_temp", 0.5)],
                    &["damper_reset", "hvac_optimization", "setpoint_adjustment"],
                ),
                cause(
                    "solar_gain",
                    "Facade solar gain driving cooling demand",
                    &[("solar_radiation", 1.0), ("outdoor_temperature", 0.6)],
                    &["blind_adjustment", "pre_cooling"],
                ),
                cause(
                    "occupancy_mismatch",
                    "Conditioning schedule out of step with occupancy",
                    &[("occupancy", 1.0), ("setpoint", 0.3)],
                    &["occupancy_scheduling", "setpoint_adjustment"],
                ),
                cause(
                    "setpoint_drift",
                    "Zone setpoints drifted below the comfort band",
                    &[("setpoint", 1.0), ("supply_air_temp", 0.4)],
                    &["setpoint_adjustment", "hvac_optimization"],
                ),
                cause(
                    "cooling_overload",
                    "Chiller plant running near capacity in peak heat",
                    &[
                        ("chiller_load", 1.0),
                        ("outdoor_temperature", 0.7),
                        ("humidity", 0.4),
                    ],
                    &["thermal_storage", "pre_cooling", "hvac_optimization"],
                ),
            ],
            actions: vec![
                action(
                    "damper_reset",
                    "Cycle the damper actuator and recalibrate its position",
                    &[("position_pct", 40.0)],
                    true,
                ),
                action(
                    "pre_cooling",
                    "Pre-cool ahead of the peak tariff window",
                    &[("target_temp_c", 22.0), ("hours_ahead", 2.0)],
                    true,
                ),
                action(
                    "blind_adjustment",
                    "Close facade blinds on sun-exposed orientations",
                    &[("closure_pct", 70.0)],
                    true,
                ),
                action(
                    "hvac_optimization",
                    "Rebalance AHU fan speed and supply air temperature",
                    &[("fan_speed_pct", 80.0), ("supply_air_temp_c", 14.0)],
                    true,
                ),
                action(
                    "occupancy_scheduling",
                    "Align conditioning schedule with measured occupancy",
                    &[("setback_c", 2.0)],
                    true,
                ),
                action(
                    "setpoint_adjustment",
                    "Raise zone cooling setpoints within the comfort band",
                    &[("delta_c", 1.0)],
                    true,
                ),
                action(
                    "thermal_storage",
                    "Discharge chilled-water storage to shave the peak",
                    &[("discharge_pct", 50.0)],
                    false,
                ),
            ],
        }
    }
}
