//! Wattson Core - detect, diagnose and act on energy anomalies across a fleet
//!
//! Wattson watches a fleet of buildings, scores each one against its own
//! history and its peers, explains anything anomalous, and either acts on
//! its own, asks a human, or waits.
//!
//! # Architecture
//!
//! One monitoring cycle runs every unit through the same pipeline:
//!
//! 1. **Scoring** (`scoring`): temporal and spatial deviation minus what the
//!    weather explains, bucketed into severity tiers
//! 2. **Diagnosis** (`diagnosis`): attributions, precedent lookup, cause
//!    ranking and simulated intervention plans
//! 3. **Decision** (`decision`): autonomous-execute, escalate or defer,
//!    behind confidence, risk, cost and reversibility gates
//! 4. **Execution** (`execution`): dispatch, monitoring window and
//!    automatic rollback, with an append-only audit ledger
//! 5. **Orchestration** (`orchestrator`): per-unit tasks under a global cap,
//!    cancellation and the cycle report
//!
//! Every external system sits behind a trait in `ports`.
//!
//! # Quick Start
//!
//! ```no_run
//! use wattson_core::{CycleOrchestrator, EngineConfig, Services};
//! use tokio_util::sync::CancellationToken;
//!
//! # use wattson_core::types::Unit;
//! # async fn run(services: Services, fleet: Vec<Unit>) -> wattson_core::Result<()> {
//! let orchestrator = CycleOrchestrator::new(EngineConfig::default(), services)?;
//! let cancel = CancellationToken::new();
//!
//! let report = orchestrator.run_cycle(&fleet, &cancel).await;
//! println!("{} executed, {} escalated", report.counts.executed, report.counts.escalated);
//!
//! // Wait for the monitoring windows to close
//! let records = orchestrator.settle().await;
//! # let _ = records;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod config;
pub mod decision;
pub mod diagnosis;
pub mod error;
pub mod execution;
pub mod knowledge;
pub mod orchestrator;
pub mod ports;
pub mod resilience;
pub mod scoring;
pub mod types;

pub use config::EngineConfig;
pub use decision::{Decision, DecisionOutcome};
pub use diagnosis::Diagnosis;
pub use error::{ErrorKind, Result, WattsonError};
pub use execution::record::{ExecutionRecord, ExecutionStatus};
pub use orchestrator::report::CycleReport;
pub use orchestrator::{CycleOrchestrator, Services};
pub use scoring::{AnomalyCandidate, SeverityTier};
