//! Core types for Wattson
//!
//! Reference data owned by external collaborators and consumed read-only:
//! - Units (buildings) and their locations
//! - Observations (load plus ambient conditions)
//! - Weather snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type alias
pub type Timestamp = DateTime<Utc>;

/// Create a timestamp for the current moment
pub fn now() -> Timestamp {
    Utc::now()
}

/// Identifier of a monitored unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a unit sits, used for spatial peer comparison and weather lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Locality used to group peers (district, campus, ...)
    pub zone: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(zone: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            zone: zone.into(),
            latitude,
            longitude,
        }
    }
}

/// Static unit metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    /// Unit class (office, residential, retail, ...)
    pub kind: String,
    /// Rated capacity in kW
    pub capacity_kw: f64,
}

/// A monitored physical unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub location: Location,
    pub metadata: UnitMetadata,
}

impl Unit {
    pub fn new(id: impl Into<UnitId>, location: Location, metadata: UnitMetadata) -> Self {
        Self {
            id: id.into(),
            location,
            metadata,
        }
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Ambient conditions measured at the unit
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Ambient {
    pub outdoor_temp_c: f64,
    pub indoor_temp_c: f64,
    pub humidity_pct: f64,
}

/// Timestamped snapshot of a unit's measured load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub unit_id: UnitId,
    pub at: Timestamp,
    pub load_kw: f64,
    pub ambient: Ambient,
}

impl Observation {
    pub fn new(unit_id: impl Into<UnitId>, at: Timestamp, load_kw: f64, ambient: Ambient) -> Self {
        Self {
            unit_id: unit_id.into(),
            at,
            load_kw,
            ambient,
        }
    }
}

/// Weather at a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub zone: String,
    pub at: Timestamp,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub solar_radiation_wm2: f64,
}
