//! Case signatures for similarity lookup

use crate::ports::Attribution;
use crate::scoring::ScoreBreakdown;

/// Embed an anomaly as attribution weights over the catalog's signal
/// vocabulary followed by the three score components.
///
/// Signals outside the vocabulary are ignored; repeated signals add up.
pub fn embed(
    vocabulary: &[String],
    attributions: &[Attribution],
    breakdown: &ScoreBreakdown,
) -> Vec<f64> {
    let mut embedding = vec![0.0; vocabulary.len() + 3];
    for attribution in attributions {
        if !attribution.weight.is_finite() {
            continue;
        }
        if let Ok(idx) = vocabulary.binary_search_by(|s| s.as_str().cmp(&attribution.signal)) {
            embedding[idx] += attribution.weight;
        }
    }
    let tail = vocabulary.len();
    embedding[tail] = breakdown.temporal;
    embedding[tail + 1] = breakdown.spatial;
    embedding[tail + 2] = breakdown.weather;
    embedding
}

/// Cosine similarity in [-1, 1]; 0 when either vector is zero or the
/// lengths differ
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}
