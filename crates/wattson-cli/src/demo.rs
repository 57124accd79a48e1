//! Simulated Dubai building fleet
//!
//! One seeded RNG drives every adapter, so a given `--seed` rebuilds the
//! same fleet with the same faults. Dispatched commands change the load the
//! fleet reports, which is what the monitoring window sees.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;
use wattson_core::diagnosis::catalog::InterventionCatalog;
use wattson_core::diagnosis::signature::embed;
use wattson_core::knowledge::InMemoryKnowledgeStore;
use wattson_core::ports::{
    Attribution, Command, CommandAck, CommandChannel, Explainer, HistoricalCase, KnowledgeStore,
    ProposedAction, SimulatedImpact, Simulator, TelemetrySource, WeatherSource,
};
use wattson_core::scoring::ScoreBreakdown;
use wattson_core::types::{
    now, Ambient, Location, Observation, Timestamp, Unit, UnitId, UnitMetadata, WeatherSnapshot,
};
use wattson_core::{Result, WattsonError};

const ZONES: [(&str, &str, f64, f64); 4] = [
    ("dubai-marina", "marina-tower", 25.080, 55.140),
    ("jlt", "jlt-tower", 25.069, 55.142),
    ("downtown", "downtown-tower", 25.197, 55.274),
    ("business-bay", "bay-tower", 25.186, 55.262),
];

const KINDS: [&str; 3] = ["office", "residential", "retail"];

/// What is wrong with a unit, if anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    StuckDamper,
    SolarGain,
    OccupancyMismatch,
}

impl Fault {
    fn signals(self) -> &'static [(&'static str, f64)] {
        match self {
            Fault::StuckDamper => &[
                ("damper_position", 0.75),
                ("supply_air_temp", 0.20),
                ("outdoor_temperature", 0.05),
            ],
            Fault::SolarGain => &[
                ("solar_radiation", 0.60),
                ("outdoor_temperature", 0.35),
                ("occupancy", 0.05),
            ],
            Fault::OccupancyMismatch => &[
                ("occupancy", 0.60),
                ("setpoint", 0.25),
                ("outdoor_temperature", 0.15),
            ],
        }
    }
}

const HEALTHY_SIGNALS: &[(&str, f64)] = &[
    ("outdoor_temperature", 0.45),
    ("chiller_load", 0.30),
    ("humidity", 0.25),
];

#[derive(Debug)]
struct Profile {
    base_kw: f64,
    zone: String,
    fault: Option<Fault>,
    /// Fractional excess load caused by the fault
    excess: f64,
    /// Relative load change of the last acknowledged command
    effect: f64,
}

#[derive(Debug)]
struct FleetState {
    rng: StdRng,
    profiles: BTreeMap<UnitId, Profile>,
    /// command id -> unit
    commands: HashMap<String, UnitId>,
    issued: u64,
    outdoor_c: f64,
}

/// Telemetry, weather, explainer, simulator and command channel for a
/// simulated fleet
#[derive(Debug)]
pub struct DemoFleet {
    units: Vec<Unit>,
    state: Mutex<FleetState>,
}

impl DemoFleet {
    /// `count` units spread over four districts; roughly one in three has
    /// a fault
    pub fn new(count: usize, seed: u64) -> Arc<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut units = Vec::with_capacity(count);
        let mut profiles = BTreeMap::new();

        for i in 0..count {
            let (zone, prefix, lat, lon) = ZONES[i % ZONES.len()];
            let id = UnitId::new(format!("{}-{}", prefix, i / ZONES.len() + 1));
            let kind = KINDS[rng.gen_range(0..KINDS.len())];
            let base_kw = rng.gen_range(150.0..450.0);
            let fault = if rng.gen_bool(0.35) {
                Some(match rng.gen_range(0..3) {
                    0 => Fault::StuckDamper,
                    1 => Fault::SolarGain,
                    _ => Fault::OccupancyMismatch,
                })
            } else {
                None
            };
            let excess = if fault.is_some() {
                rng.gen_range(0.35..0.9)
            } else {
                0.0
            };

            units.push(Unit::new(
                id.clone(),
                Location::new(
                    zone,
                    lat + rng.gen_range(-0.01..0.01),
                    lon + rng.gen_range(-0.01..0.01),
                ),
                UnitMetadata {
                    kind: kind.to_string(),
                    capacity_kw: base_kw * 2.5,
                },
            ));
            profiles.insert(
                id,
                Profile {
                    base_kw,
                    zone: zone.to_string(),
                    fault,
                    excess,
                    effect: 0.0,
                },
            );
        }

        let outdoor_c = rng.gen_range(40.0..46.0);
        Arc::new(Self {
            units,
            state: Mutex::new(FleetState {
                rng,
                profiles,
                commands: HashMap::new(),
                issued: 0,
                outdoor_c,
            }),
        })
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    fn state(&self) -> Result<MutexGuard<'_, FleetState>> {
        self.state
            .lock()
            .map_err(|_| WattsonError::Invariant("demo fleet state poisoned".to_string()))
    }
}

impl FleetState {
    fn profile(&self, unit: &UnitId) -> Result<&Profile> {
        self.profiles
            .get(unit)
            .ok_or_else(|| WattsonError::service("telemetry", format!("unknown unit {unit}")))
    }

    fn ambient(&mut self) -> Ambient {
        Ambient {
            outdoor_temp_c: self.outdoor_c + self.rng.gen_range(-0.5..0.5),
            indoor_temp_c: self.rng.gen_range(22.0..26.0),
            humidity_pct: self.rng.gen_range(45.0..75.0),
        }
    }

    fn current_load(&mut self, unit: &UnitId) -> Result<f64> {
        let (base, excess, effect) = {
            let p = self.profile(unit)?;
            (p.base_kw, p.excess, p.effect)
        };
        let noise = self.rng.gen_range(-0.02..0.02);
        Ok(base * (1.0 + excess) * (1.0 + effect) * (1.0 + noise))
    }
}

#[async_trait]
impl TelemetrySource for DemoFleet {
    async fn get_observation(&self, unit: &UnitId, at: Timestamp) -> Result<Observation> {
        let mut state = self.state()?;
        let load = state.current_load(unit)?;
        let ambient = state.ambient();
        Ok(Observation::new(unit.clone(), at, load, ambient))
    }

    async fn get_history(
        &self,
        unit: &UnitId,
        until: Timestamp,
        samples: usize,
    ) -> Result<Vec<Observation>> {
        let mut state = self.state()?;
        let base = state.profile(unit)?.base_kw;
        let mut history = Vec::with_capacity(samples);
        for i in 0..samples {
            let at = until - ChronoDuration::hours((samples - i) as i64);
            let load = base * (1.0 + state.rng.gen_range(-0.03..0.03));
            let ambient = state.ambient();
            history.push(Observation::new(unit.clone(), at, load, ambient));
        }
        Ok(history)
    }

    async fn get_peer_observations(&self, unit: &UnitId) -> Result<Vec<Observation>> {
        let mut state = self.state()?;
        let zone = state.profile(unit)?.zone.clone();
        let peers: Vec<UnitId> = state
            .profiles
            .iter()
            .filter(|(id, p)| *id != unit && p.zone == zone)
            .map(|(id, _)| id.clone())
            .collect();

        let at = now();
        let mut observations = Vec::with_capacity(peers.len());
        for peer in peers {
            let load = state.current_load(&peer)?;
            let ambient = state.ambient();
            observations.push(Observation::new(peer, at, load, ambient));
        }
        Ok(observations)
    }
}

#[async_trait]
impl WeatherSource for DemoFleet {
    async fn get_conditions(&self, location: &Location, at: Timestamp) -> Result<WeatherSnapshot> {
        let mut state = self.state()?;
        let temperature_c = state.outdoor_c + state.rng.gen_range(-1.0..1.0);
        Ok(WeatherSnapshot {
            zone: location.zone.clone(),
            at,
            temperature_c,
            humidity_pct: state.rng.gen_range(45.0..75.0),
            solar_radiation_wm2: state.rng.gen_range(600.0..1100.0),
        })
    }
}

#[async_trait]
impl Explainer for DemoFleet {
    async fn attribute(
        &self,
        unit: &UnitId,
        _observation: &Observation,
    ) -> Result<Vec<Attribution>> {
        let mut state = self.state()?;
        let signals = match state.profile(unit)?.fault {
            Some(fault) => fault.signals(),
            None => HEALTHY_SIGNALS,
        };
        Ok(signals
            .iter()
            .map(|(signal, weight)| {
                Attribution::new(*signal, weight * state.rng.gen_range(0.9..1.1))
            })
            .collect())
    }
}

/// Relative energy change range per action
fn impact_range(action: &str) -> (f64, f64) {
    match action {
        "pre_cooling" => (-0.20, -0.15),
        "blind_adjustment" => (-0.15, -0.10),
        "hvac_optimization" => (-0.18, -0.12),
        "occupancy_scheduling" => (-0.10, -0.06),
        "setpoint_adjustment" => (-0.12, -0.08),
        "thermal_storage" => (-0.25, -0.18),
        "damper_reset" => (-0.22, -0.15),
        _ => (-0.08, -0.03),
    }
}

#[async_trait]
impl Simulator for DemoFleet {
    async fn simulate(&self, unit: &UnitId, proposal: &ProposedAction) -> Result<SimulatedImpact> {
        let mut state = self.state()?;
        state.profile(unit)?;
        let (low, high) = impact_range(&proposal.action);
        let cost_scale = if proposal.action == "thermal_storage" {
            3.0
        } else {
            1.0
        };
        Ok(SimulatedImpact {
            energy_delta: state.rng.gen_range(low..high),
            comfort_delta: state.rng.gen_range(-0.02..0.01),
            cost: state.rng.gen_range(50.0..300.0) * cost_scale,
            risk: state.rng.gen_range(0.05..0.25),
            uncertainty: state.rng.gen_range(0.0..0.1),
        })
    }
}

#[async_trait]
impl CommandChannel for DemoFleet {
    async fn issue(&self, unit: &UnitId, command: &Command) -> Result<CommandAck> {
        let mut state = self.state()?;
        state.profile(unit)?;
        if state.rng.gen_bool(0.05) {
            return Ok(CommandAck::Rejected {
                reason: "BMS reports unit in manual override".to_string(),
            });
        }

        // Most actions land near their simulated range; a few backfire
        let effect = if state.rng.gen_bool(0.1) {
            state.rng.gen_range(0.06..0.12)
        } else {
            let (low, high) = impact_range(&command.action);
            state.rng.gen_range(low..high)
        };

        state.issued += 1;
        let command_id = format!("BMS-{:06}", state.issued);
        state.commands.insert(command_id.clone(), unit.clone());
        if let Some(profile) = state.profiles.get_mut(unit) {
            profile.effect = effect;
        }
        tracing::debug!(
            unit = %unit,
            command = %command_id,
            action = %command.action,
            effect,
            "BMS command applied"
        );
        Ok(CommandAck::Acknowledged { command_id })
    }

    async fn issue_undo(&self, unit: &UnitId, command_id: &str) -> Result<CommandAck> {
        let mut state = self.state()?;
        if state.commands.get(command_id) != Some(unit) {
            return Ok(CommandAck::Rejected {
                reason: format!("unknown command {command_id} for {unit}"),
            });
        }
        if state.rng.gen_bool(0.1) {
            return Ok(CommandAck::Rejected {
                reason: "controller did not confirm the revert".to_string(),
            });
        }
        if let Some(profile) = state.profiles.get_mut(unit) {
            profile.effect = 0.0;
        }
        Ok(CommandAck::Acknowledged {
            command_id: format!("{command_id}-UNDO"),
        })
    }
}

/// Store the resolved cases the demo starts from
pub async fn seed_knowledge(
    store: &InMemoryKnowledgeStore,
    catalog: &InterventionCatalog,
) -> Result<()> {
    if !store.is_empty().await {
        return Ok(());
    }

    let vocabulary = catalog.signals();
    let breakdown = ScoreBreakdown {
        temporal: 1.0,
        spatial: 0.8,
        weather: 0.0,
        score: 0.9,
    };
    let seeds = [
        (
            "marina-tower-2",
            Fault::SolarGain,
            "solar_gain",
            "blind_adjustment",
            -0.11,
            "High solar gain on west facade: automated blind control plus pre-cooling",
        ),
        (
            "jlt-tower-5",
            Fault::OccupancyMismatch,
            "occupancy_mismatch",
            "occupancy_scheduling",
            -0.08,
            "HVAC running during low occupancy: occupancy-based scheduling with 30-min ramp-up",
        ),
        (
            "downtown-tower-3",
            Fault::StuckDamper,
            "stuck_damper",
            "damper_reset",
            -0.17,
            "Outside-air damper stuck at 100%: actuator reset and recalibration",
        ),
    ];

    let count = seeds.len();
    for (unit, fault, cause, action, delta, summary) in seeds {
        let attributions: Vec<Attribution> = fault
            .signals()
            .iter()
            .map(|(s, w)| Attribution::new(*s, *w))
            .collect();
        store
            .store(HistoricalCase {
                id: Uuid::new_v4(),
                unit_id: UnitId::new(unit),
                cause: cause.to_string(),
                action: action.to_string(),
                signature: embed(&vocabulary, &attributions, &breakdown),
                observed_delta: Some(delta),
                recorded_at: now(),
                summary: summary.to_string(),
            })
            .await?;
    }

    tracing::info!(cases = count, "Seeded knowledge store");
    Ok(())
}
