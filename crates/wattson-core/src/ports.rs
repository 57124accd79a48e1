//! Collaborator contracts
//!
//! Each external collaborator is one fixed capability set with one explicit
//! contract. Implementations report transport failures as
//! [`WattsonError::Service`](crate::error::WattsonError::Service); the
//! pipeline wraps every call in timeout and retry.
//!
//! A command *rejection* is an answer, not a failure: it comes back as
//! [`CommandAck::Rejected`] and is never retried.

use crate::error::Result;
use crate::types::{Location, Observation, Timestamp, UnitId, WeatherSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Telemetry adapter
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Latest observation of a unit at (or just before) `at`
    async fn get_observation(&self, unit: &UnitId, at: Timestamp) -> Result<Observation>;

    /// Trailing observations ending before `until`, oldest first
    async fn get_history(
        &self,
        unit: &UnitId,
        until: Timestamp,
        samples: usize,
    ) -> Result<Vec<Observation>>;

    /// Current observations of the unit's peers (same locality and class)
    async fn get_peer_observations(&self, unit: &UnitId) -> Result<Vec<Observation>>;
}

/// Weather adapter
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn get_conditions(&self, location: &Location, at: Timestamp) -> Result<WeatherSnapshot>;
}

/// Contribution of one signal to a unit's behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub signal: String,
    pub weight: f64,
}

impl Attribution {
    pub fn new(signal: impl Into<String>, weight: f64) -> Self {
        Self {
            signal: signal.into(),
            weight,
        }
    }
}

/// Explainability service
#[async_trait]
pub trait Explainer: Send + Sync {
    async fn attribute(&self, unit: &UnitId, observation: &Observation) -> Result<Vec<Attribution>>;
}

/// A resolved prior case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalCase {
    pub id: Uuid,
    pub unit_id: UnitId,
    /// Cause identifier from the catalog
    pub cause: String,
    /// Action that resolved it
    pub action: String,
    /// Embedding the case is indexed under
    pub signature: Vec<f64>,
    /// Relative load change observed after the action
    pub observed_delta: Option<f64>,
    pub recorded_at: Timestamp,
    pub summary: String,
}

/// Prior case with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarCase {
    pub case: HistoricalCase,
    pub similarity: f64,
}

/// Historical knowledge store
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// The `k` most similar prior cases, most similar first
    async fn find_similar(&self, embedding: &[f64], k: usize) -> Result<Vec<SimilarCase>>;

    async fn store(&self, case: HistoricalCase) -> Result<()>;
}

/// An intervention to evaluate before any commitment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub action: String,
    pub cause: String,
    pub parameters: BTreeMap<String, f64>,
}

/// Simulator estimate for one proposed action
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatedImpact {
    /// Relative energy change (negative is a saving)
    pub energy_delta: f64,
    /// Relative comfort change (negative is worse)
    pub comfort_delta: f64,
    pub cost: f64,
    /// Probability of an adverse outcome, in [0, 1]
    pub risk: f64,
    /// Spread of the estimate, in [0, 1]
    pub uncertainty: f64,
}

/// Simulator
#[async_trait]
pub trait Simulator: Send + Sync {
    async fn simulate(&self, unit: &UnitId, proposal: &ProposedAction) -> Result<SimulatedImpact>;
}

/// A control command for a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: String,
    pub parameters: BTreeMap<String, f64>,
    /// Execution record this command belongs to
    pub record_id: Uuid,
}

/// Answer from the command channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandAck {
    Acknowledged { command_id: String },
    Rejected { reason: String },
}

/// Physical command channel
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn issue(&self, unit: &UnitId, command: &Command) -> Result<CommandAck>;

    async fn issue_undo(&self, unit: &UnitId, command_id: &str) -> Result<CommandAck>;
}
