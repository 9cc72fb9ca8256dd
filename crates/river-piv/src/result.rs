//! Velocimetry outputs.
//!
//! Arrays are flattened row-major over the interrogation grid. Missing
//! samples are `NaN` in memory and `null` in JSON.

use crate::CorrelationFailure;
use serde::{Deserialize, Serialize};

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
        let raw = Vec::<Option<f64>>::deserialize(d)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

mod nan_as_null_rows {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(rows: &[Vec<f64>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(
            rows.iter()
                .map(|row| row.iter().map(|v| v.is_finite().then_some(*v)).collect::<Vec<_>>()),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<f64>>, D::Error> {
        let raw = Vec::<Vec<Option<f64>>>::deserialize(d)?;
        Ok(raw
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            .collect())
    }
}

/// Per-pair diagnostics, summed over pairs in a batch.
///
/// Failure counters refer to first-pass windows; `refined` counts windows
/// that the second pass replaced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairStats {
    pub evaluated: usize,
    pub valid: usize,
    pub peak_missing: usize,
    pub low_seeding: usize,
    pub out_of_bounds: usize,
    pub standard_rejected: usize,
    pub median_rejected: usize,
    pub refined: usize,
}

impl PairStats {
    pub(crate) fn record(&mut self, failure: CorrelationFailure) {
        match failure {
            CorrelationFailure::PeakMissing { .. } => self.peak_missing += 1,
            CorrelationFailure::LowSeeding { .. } => self.low_seeding += 1,
            CorrelationFailure::OutOfBounds { .. } => self.out_of_bounds += 1,
        }
    }

    pub fn merge(&mut self, other: &PairStats) {
        self.evaluated += other.evaluated;
        self.valid += other.valid;
        self.peak_missing += other.peak_missing;
        self.low_seeding += other.low_seeding;
        self.out_of_bounds += other.out_of_bounds;
        self.standard_rejected += other.standard_rejected;
        self.median_rejected += other.median_rejected;
        self.refined += other.refined;
    }
}

/// Displacement field of a single frame pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// `[rows, cols]` of the interrogation grid.
    pub shape: [usize; 2],
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub u: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub v: Vec<f64>,
    #[serde(default)]
    pub stats: PairStats,
}

impl TestResult {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Aggregate of every consecutive pair in a frame sequence.
///
/// `u` and `v` hold the full series, one row per pair. Pairs that were
/// skipped or never started (cancellation) are rows of missing values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub shape: [usize; 2],
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Whether the point lies inside the mask.
    pub active: Vec<bool>,
    #[serde(with = "nan_as_null")]
    pub u_median: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub v_median: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub magnitude_median: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub magnitude_std: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub magnitude_p5: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub magnitude_p95: Vec<f64>,
    /// Valid samples per point across pairs.
    pub valid_counts: Vec<usize>,
    /// Mean intensity gradient magnitude per point (seeding quality).
    #[serde(with = "nan_as_null")]
    pub gradient: Vec<f64>,
    /// Points with too little texture to trust.
    pub weak: Vec<bool>,
    #[serde(with = "nan_as_null_rows")]
    pub u: Vec<Vec<f64>>,
    #[serde(with = "nan_as_null_rows")]
    pub v: Vec<Vec<f64>>,
    pub pairs_total: usize,
    pub pairs_evaluated: usize,
    pub pairs_skipped: usize,
    pub cancelled: bool,
    #[serde(default)]
    pub stats: PairStats,
}

impl AnalysisResult {
    /// Number of interrogation points.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// `(u, v)` of point `i` for every pair, missing pairs included.
    pub fn series(&self, i: usize) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.u.iter().zip(&self.v).map(move |(u, v)| (u[i], v[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_samples_serialize_as_null() {
        let r = TestResult {
            shape: [1, 2],
            x: vec![10.0, 20.0],
            y: vec![5.0, 5.0],
            u: vec![1.5, f64::NAN],
            v: vec![f64::NAN, 0.0],
            stats: PairStats::default(),
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["u"], serde_json::json!([1.5, null]));
        assert_eq!(json["shape"], serde_json::json!([1, 2]));

        let back: TestResult = serde_json::from_value(json).unwrap();
        assert!(back.u[1].is_nan());
        assert_eq!(back.v[1], 0.0);
    }

    #[test]
    fn stats_merge_adds_counters() {
        let mut a = PairStats {
            evaluated: 4,
            valid: 3,
            ..PairStats::default()
        };
        a.record(CorrelationFailure::LowSeeding { std: 0.1 });
        let b = a;
        a.merge(&b);
        assert_eq!(a.evaluated, 8);
        assert_eq!(a.low_seeding, 2);
    }
}
