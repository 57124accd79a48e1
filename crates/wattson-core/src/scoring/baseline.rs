//! Reference statistics the scorer compares against

use crate::types::{Observation, UnitId};

/// Rolling-window statistics of a unit's own load
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadBaseline {
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Mean outdoor temperature over the same window
    pub mean_outdoor_temp_c: f64,
    pub samples: usize,
}

impl LoadBaseline {
    /// Statistics over finite samples; `None` when the window is empty
    pub fn from_history(history: &[Observation]) -> Option<Self> {
        let samples: Vec<&Observation> = history
            .iter()
            .filter(|o| o.load_kw.is_finite() && o.ambient.outdoor_temp_c.is_finite())
            .collect();
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let mean = samples.iter().map(|o| o.load_kw).sum::<f64>() / n;
        let variance = samples
            .iter()
            .map(|o| {
                let diff = o.load_kw - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        let mean_outdoor_temp_c = samples.iter().map(|o| o.ambient.outdoor_temp_c).sum::<f64>() / n;

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            mean_outdoor_temp_c,
            samples: samples.len(),
        })
    }
}

/// Robust statistics of the peer group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerBaseline {
    pub median: f64,
    /// Median absolute deviation from the median
    pub mad: f64,
    pub count: usize,
}

impl PeerBaseline {
    /// Statistics over peers, excluding the unit itself
    pub fn from_peers(unit: &UnitId, peers: &[Observation]) -> Option<Self> {
        let loads: Vec<f64> = peers
            .iter()
            .filter(|o| &o.unit_id != unit && o.load_kw.is_finite())
            .map(|o| o.load_kw)
            .collect();
        let median = median(&loads)?;
        let deviations: Vec<f64> = loads.iter().map(|l| (l - median).abs()).collect();
        let mad = median_or_zero(&deviations);

        Some(Self {
            median,
            mad,
            count: loads.len(),
        })
    }
}

/// Median of finite values
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn median_or_zero(values: &[f64]) -> f64 {
    median(values).unwrap_or(0.0)
}
