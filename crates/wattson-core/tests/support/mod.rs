//! Scripted collaborators shared by the end-to-end tests
//!
//! The default fleet scenario: every unit has a flat history around 100 kW
//! (alternating 98/102), three peers at 100/105/110 kW and 35°C outside.
//! A unit reading 180 kW scores ~0.67 (High); one reading 100 kW is normal.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use wattson_core::knowledge::InMemoryKnowledgeStore;
use wattson_core::ports::{
    Attribution, Command, CommandAck, CommandChannel, Explainer, HistoricalCase, KnowledgeStore,
    ProposedAction, SimilarCase, SimulatedImpact, Simulator, TelemetrySource, WeatherSource,
};
use wattson_core::types::{
    now, Ambient, Location, Observation, Timestamp, Unit, UnitId, UnitMetadata, WeatherSnapshot,
};
use wattson_core::{EngineConfig, ExecutionRecord, ExecutionStatus, Result, Services, WattsonError};

pub const OUTDOOR_C: f64 = 35.0;
pub const ANOMALOUS_KW: f64 = 180.0;
pub const NORMAL_KW: f64 = 100.0;

pub fn unit(id: &str) -> Unit {
    Unit::new(
        id,
        Location::new("dubai-marina", 25.08, 55.14),
        UnitMetadata {
            kind: "office".to_string(),
            capacity_kw: 400.0,
        },
    )
}

/// Five polls of two minutes each
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.execution.monitoring_window_secs = 600;
    config.execution.poll_interval_secs = 120;
    config
}

fn observation(unit: &UnitId, at: Timestamp, load_kw: f64) -> Observation {
    Observation::new(
        unit.clone(),
        at,
        load_kw,
        Ambient {
            outdoor_temp_c: OUTDOOR_C,
            indoor_temp_c: 23.0,
            humidity_pct: 55.0,
        },
    )
}

/// Per-unit load script
///
/// `get_observation` pops `loads` first and falls back to `current` once
/// the queue is empty.
#[derive(Debug, Clone)]
pub struct LoadScript {
    pub current: f64,
    pub loads: VecDeque<f64>,
    pub offline: bool,
}

impl LoadScript {
    pub fn steady(current: f64) -> Self {
        Self {
            current,
            loads: VecDeque::new(),
            offline: false,
        }
    }

    pub fn sequence(loads: &[f64], then: f64) -> Self {
        Self {
            current: then,
            loads: loads.iter().copied().collect(),
            offline: false,
        }
    }

    pub fn offline() -> Self {
        Self {
            current: 0.0,
            loads: VecDeque::new(),
            offline: true,
        }
    }
}

#[derive(Default)]
pub struct ScriptedTelemetry {
    scripts: Mutex<HashMap<UnitId, LoadScript>>,
    observation_calls: AtomicU32,
}

impl ScriptedTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, unit: &str, script: LoadScript) {
        self.scripts.lock().unwrap().insert(UnitId::new(unit), script);
    }

    pub fn observation_calls(&self) -> u32 {
        self.observation_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetrySource for ScriptedTelemetry {
    async fn get_observation(&self, unit: &UnitId, at: Timestamp) -> Result<Observation> {
        self.observation_calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts
            .get_mut(unit)
            .ok_or_else(|| WattsonError::service("telemetry", format!("unknown unit {unit}")))?;
        if script.offline {
            return Err(WattsonError::service("telemetry", "meter offline"));
        }
        let load = script.loads.pop_front().unwrap_or(script.current);
        Ok(observation(unit, at, load))
    }

    async fn get_history(
        &self,
        unit: &UnitId,
        until: Timestamp,
        samples: usize,
    ) -> Result<Vec<Observation>> {
        let offline = self
            .scripts
            .lock()
            .unwrap()
            .get(unit)
            .map(|s| s.offline)
            .unwrap_or(true);
        if offline {
            return Err(WattsonError::service("telemetry", "meter offline"));
        }
        Ok((0..samples)
            .map(|i| {
                let at = until - ChronoDuration::hours((samples - i) as i64);
                let load = if i % 2 == 0 { 98.0 } else { 102.0 };
                observation(unit, at, load)
            })
            .collect())
    }

    async fn get_peer_observations(&self, _unit: &UnitId) -> Result<Vec<Observation>> {
        let at = now();
        Ok([("peer-a", 100.0), ("peer-b", 105.0), ("peer-c", 110.0)]
            .iter()
            .map(|(id, load)| observation(&UnitId::new(*id), at, *load))
            .collect())
    }
}

pub struct FixedWeather;

#[async_trait]
impl WeatherSource for FixedWeather {
    async fn get_conditions(&self, location: &Location, at: Timestamp) -> Result<WeatherSnapshot> {
        Ok(WeatherSnapshot {
            zone: location.zone.clone(),
            at,
            temperature_c: OUTDOOR_C,
            humidity_pct: 55.0,
            solar_radiation_wm2: 600.0,
        })
    }
}

/// Attributes every anomaly to the damper, optionally after a delay
#[derive(Default)]
pub struct DamperExplainer {
    pub delay: Option<Duration>,
}

#[async_trait]
impl Explainer for DamperExplainer {
    async fn attribute(
        &self,
        _unit: &UnitId,
        _observation: &Observation,
    ) -> Result<Vec<Attribution>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(damper_attributions())
    }
}

pub fn damper_attributions() -> Vec<Attribution> {
    vec![
        Attribution::new("damper_position", 0.7),
        Attribution::new("supply_air_temp", 0.2),
        Attribution::new("outdoor_temperature", 0.1),
    ]
}

/// Returns one fixed precedent (or none) and records what is stored
#[derive(Default)]
pub struct PrecedentStore {
    pub precedent: Option<(String, f64)>,
    stored: Mutex<Vec<HistoricalCase>>,
}

impl PrecedentStore {
    pub fn with_precedent(cause: &str, similarity: f64) -> Arc<Self> {
        Arc::new(Self {
            precedent: Some((cause.to_string(), similarity)),
            stored: Mutex::new(Vec::new()),
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stored(&self) -> Vec<HistoricalCase> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeStore for PrecedentStore {
    async fn find_similar(&self, embedding: &[f64], _k: usize) -> Result<Vec<SimilarCase>> {
        Ok(self
            .precedent
            .iter()
            .map(|(cause, similarity)| SimilarCase {
                case: HistoricalCase {
                    id: Uuid::new_v4(),
                    unit_id: UnitId::new("marina-tower-2"),
                    cause: cause.clone(),
                    action: "damper_reset".to_string(),
                    signature: embedding.to_vec(),
                    observed_delta: Some(-0.14),
                    recorded_at: now(),
                    summary: "damper reset after actuator fault".to_string(),
                },
                similarity: *similarity,
            })
            .collect())
    }

    async fn store(&self, case: HistoricalCase) -> Result<()> {
        self.stored.lock().unwrap().push(case);
        Ok(())
    }
}

/// Damper reset is the only plan worth doing
pub struct CatalogSimulator;

#[async_trait]
impl Simulator for CatalogSimulator {
    async fn simulate(&self, _unit: &UnitId, proposal: &ProposedAction) -> Result<SimulatedImpact> {
        let (energy_delta, cost, risk) = match proposal.action.as_str() {
            "damper_reset" => (-0.15, 120.0, 0.1),
            "hvac_optimization" => (-0.05, 100.0, 0.2),
            "setpoint_adjustment" => (-0.04, 50.0, 0.2),
            _ => (-0.03, 80.0, 0.2),
        };
        Ok(SimulatedImpact {
            energy_delta,
            comfort_delta: 0.0,
            cost,
            risk,
            uncertainty: 0.0,
        })
    }
}

/// Fails every simulation for the listed units
pub struct FailingSimulator {
    failing: HashSet<UnitId>,
}

impl FailingSimulator {
    pub fn for_units(units: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: units.iter().map(|u| UnitId::new(*u)).collect(),
        })
    }
}

#[async_trait]
impl Simulator for FailingSimulator {
    async fn simulate(&self, unit: &UnitId, proposal: &ProposedAction) -> Result<SimulatedImpact> {
        if self.failing.contains(unit) {
            return Err(WattsonError::service("simulator", "model not calibrated"));
        }
        CatalogSimulator.simulate(unit, proposal).await
    }
}

/// Tracks how many calls are in flight and the highest count seen
#[derive(Default)]
pub struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn hold(&self, delay: Duration) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// [`CatalogSimulator`] that takes `delay` per call under a [`Gauge`]
pub struct GaugedSimulator {
    pub gauge: Arc<Gauge>,
    pub delay: Duration,
}

#[async_trait]
impl Simulator for GaugedSimulator {
    async fn simulate(&self, unit: &UnitId, proposal: &ProposedAction) -> Result<SimulatedImpact> {
        self.gauge.hold(self.delay).await;
        CatalogSimulator.simulate(unit, proposal).await
    }
}

/// [`DamperExplainer`] that takes `delay` per call under a [`Gauge`]
pub struct GaugedExplainer {
    pub gauge: Arc<Gauge>,
    pub delay: Duration,
}

#[async_trait]
impl Explainer for GaugedExplainer {
    async fn attribute(
        &self,
        _unit: &UnitId,
        _observation: &Observation,
    ) -> Result<Vec<Attribution>> {
        self.gauge.hold(self.delay).await;
        Ok(damper_attributions())
    }
}

/// Knowledge store whose writes take `delay`
#[derive(Default)]
pub struct SlowStore {
    pub delay: Duration,
    stored: Mutex<Vec<HistoricalCase>>,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            stored: Mutex::new(Vec::new()),
        })
    }

    pub fn stored(&self) -> usize {
        self.stored.lock().unwrap().len()
    }
}

#[async_trait]
impl KnowledgeStore for SlowStore {
    async fn find_similar(&self, _embedding: &[f64], _k: usize) -> Result<Vec<SimilarCase>> {
        Ok(Vec::new())
    }

    async fn store(&self, case: HistoricalCase) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.stored.lock().unwrap().push(case);
        Ok(())
    }
}

/// A succeeded damper reset on `unit` that has not been learned yet
pub fn succeeded_record(unit: &str) -> ExecutionRecord {
    let mut record = ExecutionRecord {
        id: Uuid::new_v4(),
        decision_id: Uuid::new_v4(),
        unit_id: UnitId::new(unit),
        action: "damper_reset".to_string(),
        cause: "stuck_damper".to_string(),
        parameters: Default::default(),
        signature: vec![0.7, 0.2, 0.1],
        command_id: Some(format!("cmd-{unit}")),
        issued_at: now(),
        status: ExecutionStatus::Pending,
        window_end: None,
        baseline_load_kw: Some(ANOMALOUS_KW),
        simulated_delta: -0.15,
        observed_delta: Some(-0.14),
        polls: Vec::new(),
        transitions: Vec::new(),
        failure: None,
        rollback_reason: None,
        manual_intervention_required: false,
        learned: false,
    };
    for status in [
        ExecutionStatus::Acknowledged,
        ExecutionStatus::Monitoring,
        ExecutionStatus::Succeeded,
    ] {
        record.transition(status, None).unwrap();
    }
    record
}

/// Acknowledges commands unless told otherwise, counting every call
#[derive(Default)]
pub struct RecordingChannel {
    pub reject_commands: bool,
    pub reject_undo: bool,
    issued: Mutex<Vec<(UnitId, Command)>>,
    undo_calls: AtomicU32,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting_undo() -> Arc<Self> {
        Arc::new(Self {
            reject_undo: true,
            ..Self::default()
        })
    }

    pub fn rejecting_commands() -> Arc<Self> {
        Arc::new(Self {
            reject_commands: true,
            ..Self::default()
        })
    }

    pub fn issued(&self) -> Vec<(UnitId, Command)> {
        self.issued.lock().unwrap().clone()
    }

    pub fn undo_calls(&self) -> u32 {
        self.undo_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandChannel for RecordingChannel {
    async fn issue(&self, unit: &UnitId, command: &Command) -> Result<CommandAck> {
        self.issued.lock().unwrap().push((unit.clone(), command.clone()));
        if self.reject_commands {
            return Ok(CommandAck::Rejected {
                reason: "unit in manual override".to_string(),
            });
        }
        Ok(CommandAck::Acknowledged {
            command_id: format!("cmd-{}", command.record_id),
        })
    }

    async fn issue_undo(&self, _unit: &UnitId, command_id: &str) -> Result<CommandAck> {
        self.undo_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_undo {
            return Ok(CommandAck::Rejected {
                reason: format!("controller lost state for {command_id}"),
            });
        }
        Ok(CommandAck::Acknowledged {
            command_id: format!("undo-{command_id}"),
        })
    }
}

/// Handles to the fakes behind a [`Services`] bundle
pub struct Harness {
    pub telemetry: Arc<ScriptedTelemetry>,
    pub knowledge: Arc<PrecedentStore>,
    pub channel: Arc<RecordingChannel>,
    pub services: Services,
}

impl Harness {
    pub fn new(knowledge: Arc<PrecedentStore>, channel: Arc<RecordingChannel>) -> Self {
        Self::with_explainer(knowledge, channel, DamperExplainer::default())
    }

    pub fn with_explainer(
        knowledge: Arc<PrecedentStore>,
        channel: Arc<RecordingChannel>,
        explainer: DamperExplainer,
    ) -> Self {
        let telemetry = ScriptedTelemetry::new();
        let services = Services {
            telemetry: telemetry.clone(),
            weather: Arc::new(FixedWeather),
            explainer: Arc::new(explainer),
            knowledge: knowledge.clone(),
            simulator: Arc::new(CatalogSimulator),
            channel: channel.clone(),
        };
        Self {
            telemetry,
            knowledge,
            channel,
            services,
        }
    }

    /// Same fakes, with a real in-memory store as the knowledge base
    pub fn with_store(&self, store: Arc<InMemoryKnowledgeStore>) -> Services {
        Services {
            knowledge: store,
            ..self.services.clone()
        }
    }
}
