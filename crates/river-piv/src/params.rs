use crate::PivError;
use serde::{Deserialize, Serialize};

/// Velocimetry configuration.
///
/// Defaults follow common river-surface practice: a 128 px first pass with
/// 50 % overlap refined by a 64 px second pass, both spatial filters on and
/// CLAHE contrast equalization applied to grayscale frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PivParams {
    /// First-pass window size (pixels, square).
    pub ia1: usize,
    /// Second-pass window size; must not exceed `ia1`.
    pub ia2: usize,
    /// Overlap between neighbouring first-pass windows. Grid step is
    /// `ia1 - overlap`.
    pub overlap: usize,
    /// First-pass search radius in pixels; `None` means `ia1 / 4`.
    pub search_radius: Option<usize>,
    /// Smooth the correlation plane (3×3) before picking the peak.
    pub mask_auto: bool,
    /// Refine with a second pass at `ia2`, predicted by the first.
    pub multipass: bool,
    pub standard_filter: bool,
    /// Neighbourhood standard deviations tolerated by the standard filter.
    pub standard_threshold: f64,
    pub median_test_filter: bool,
    pub median_test_threshold: f64,
    pub median_test_epsilon: f64,
    /// Correlate on luma only; otherwise every color channel is correlated
    /// and the scores are averaged.
    pub grayscale: bool,
    pub clahe: bool,
    pub clip_limit: f64,
    /// CLAHE tiles per image side.
    pub clahe_tiles: usize,
    /// Peaks below this ZNCC score are rejected.
    pub min_correlation: f64,
    /// Windows whose intensity std (gray levels) is below this are rejected.
    pub min_seeding_std: f64,
    /// Points whose mean gradient magnitude is below this are flagged weak.
    pub min_gradient: f64,
}

impl Default for PivParams {
    fn default() -> Self {
        Self {
            ia1: 128,
            ia2: 64,
            overlap: 64,
            search_radius: None,
            mask_auto: true,
            multipass: true,
            standard_filter: true,
            standard_threshold: 4.0,
            median_test_filter: true,
            median_test_threshold: 2.0,
            median_test_epsilon: 0.02,
            grayscale: true,
            clahe: true,
            clip_limit: 5.0,
            clahe_tiles: 8,
            min_correlation: 0.2,
            min_seeding_std: 1.0,
            min_gradient: 2.0,
        }
    }
}

impl PivParams {
    /// Distance between neighbouring grid points.
    pub fn grid_step(&self) -> usize {
        self.ia1.saturating_sub(self.overlap)
    }

    pub fn first_pass_radius(&self) -> usize {
        self.search_radius.unwrap_or(self.ia1 / 4).max(1)
    }

    pub fn second_pass_radius(&self) -> usize {
        (self.ia2 / 4).max(2)
    }

    pub fn validate(&self) -> Result<(), PivError> {
        let invalid = |msg: String| Err(PivError::InvalidParams(msg));
        if self.ia1 < 4 || self.ia2 < 4 {
            return invalid(format!(
                "window sizes must be at least 4 px (ia1={}, ia2={})",
                self.ia1, self.ia2
            ));
        }
        if self.ia2 > self.ia1 {
            return invalid(format!(
                "ia2 ({}) must not exceed ia1 ({})",
                self.ia2, self.ia1
            ));
        }
        if self.overlap >= self.ia1 {
            return invalid(format!(
                "overlap ({}) must be smaller than ia1 ({})",
                self.overlap, self.ia1
            ));
        }
        if self.search_radius == Some(0) {
            return invalid("search_radius must be positive".into());
        }
        for (name, value) in [
            ("standard_threshold", self.standard_threshold),
            ("median_test_threshold", self.median_test_threshold),
            ("clip_limit", self.clip_limit),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        if !(self.median_test_epsilon.is_finite() && self.median_test_epsilon >= 0.0) {
            return invalid(format!(
                "median_test_epsilon must be non-negative, got {}",
                self.median_test_epsilon
            ));
        }
        if !(-1.0..=1.0).contains(&self.min_correlation) {
            return invalid(format!(
                "min_correlation must lie in [-1, 1], got {}",
                self.min_correlation
            ));
        }
        if self.clahe && self.clahe_tiles == 0 {
            return invalid("clahe_tiles must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let p = PivParams::default();
        p.validate().unwrap();
        assert_eq!(p.grid_step(), 64);
        assert_eq!(p.first_pass_radius(), 32);
        assert_eq!(p.second_pass_radius(), 16);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let p: PivParams = serde_json::from_str(r#"{"ia1": 64, "ia2": 32, "overlap": 32}"#).unwrap();
        assert_eq!(p.ia1, 64);
        assert!(p.clahe);
        assert_eq!(p.median_test_epsilon, 0.02);
    }

    #[test]
    fn inconsistent_windows_are_rejected() {
        let p = PivParams {
            ia1: 32,
            ia2: 64,
            ..PivParams::default()
        };
        assert!(matches!(p.validate(), Err(PivError::InvalidParams(_))));

        let p = PivParams {
            overlap: 128,
            ..PivParams::default()
        };
        assert!(p.validate().is_err());
    }
}
