//! Velocity-area discharge from a velocimetry run.
//!
//! Interrogation points are mapped to the water plane, binned to the
//! nearest station along the section and their per-pair displacements are
//! pooled into station speed statistics. Gaps are filled across the section
//! and the discharge is integrated with the stations' quadrature widths.

use crate::{CrossSection, DischargeError, Station};
use nalgebra::{Point2, Vector2};
use river_core::TransformationMapping;
use river_piv::stats::Summary;
use river_piv::AnalysisResult;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Integration settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DischargeParams {
    /// Video frame rate.
    pub fps: f64,
    /// Frames between the two images of a pair.
    pub frame_step: usize,
    /// Overrides the section's alpha when set.
    pub alpha: Option<f64>,
    /// Fill stations without samples.
    pub interpolate: bool,
    /// Ignore points farther than this from the section line (metres).
    pub max_offset: Option<f64>,
}

impl Default for DischargeParams {
    fn default() -> Self {
        Self {
            fps: 30.0,
            frame_step: 1,
            alpha: None,
            interpolate: true,
            max_offset: None,
        }
    }
}

impl DischargeParams {
    /// Seconds between the frames of one pair.
    pub fn dt(&self) -> f64 {
        self.frame_step as f64 / self.fps
    }

    fn validate(&self) -> Result<(), DischargeError> {
        if !(self.fps.is_finite() && self.fps > 0.0) || self.frame_step == 0 {
            return Err(DischargeError::InputValidation(format!(
                "frame interval needs fps > 0 and frame_step > 0 (fps={}, frame_step={})",
                self.fps, self.frame_step
            )));
        }
        if let Some(alpha) = self.alpha {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(DischargeError::InputValidation(format!(
                    "alpha must lie in (0, 1], got {alpha}"
                )));
            }
        }
        if let Some(m) = self.max_offset {
            if !(m.is_finite() && m > 0.0) {
                return Err(DischargeError::InputValidation(format!(
                    "max_offset must be positive, got {m}"
                )));
            }
        }
        Ok(())
    }
}

/// Pooled surface speeds of one station.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StationSamples {
    /// Speed magnitudes, m/s.
    pub speed: Vec<f64>,
    /// Downstream components, m/s.
    pub streamwise: Vec<f64>,
}

/// Surface velocity statistics per station, before gap filling.
#[derive(Clone, Debug, PartialEq)]
pub struct StationVelocity {
    pub speed: Summary,
    pub streamwise: f64,
}

/// Per-station arrays and section totals.
///
/// Field names follow the established report layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DischargeSummary {
    pub distance: Vec<f64>,
    pub east: Vec<f64>,
    pub north: Vec<f64>,
    pub depth: Vec<f64>,
    pub width: Vec<f64>,
    /// Measured station surface speed; `null` where no sample exists.
    pub streamwise_velocity_magnitude: Vec<Option<f64>>,
    /// Median downstream component of the measured samples.
    pub streamwise_component: Vec<Option<f64>>,
    pub filled_streamwise_velocity_magnitude: Vec<Option<f64>>,
    pub depth_averaged_velocity: Vec<Option<f64>>,
    pub std: Vec<Option<f64>>,
    pub minus_std: Vec<Option<f64>>,
    pub plus_std: Vec<Option<f64>>,
    #[serde(rename = "5th_percentile")]
    pub p5: Vec<Option<f64>>,
    #[serde(rename = "95th_percentile")]
    pub p95: Vec<Option<f64>>,
    /// Samples pooled at each station.
    pub sample_count: Vec<usize>,
    /// Velocity was interpolated or set to zero rather than measured.
    pub filled: Vec<bool>,
    /// Station discharge, m³/s.
    #[serde(rename = "Q")]
    pub q: Vec<f64>,
    #[serde(rename = "Q_portion")]
    pub q_portion: Vec<f64>,
    #[serde(rename = "total_Q")]
    pub total_q: f64,
    pub total_q_std: f64,
    /// Discharge over wetted area.
    #[serde(rename = "mean_V")]
    pub mean_v: f64,
    /// Summed width of the wet stations.
    #[serde(rename = "total_W")]
    pub total_w: f64,
    #[serde(rename = "total_A")]
    pub total_a: f64,
    pub max_depth: f64,
    pub alpha: f64,
    pub dt: f64,
}

fn opt(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Map every valid displacement of `analysis` to world speeds and pool them
/// at the nearest station.
///
/// A point is used when its along-section position is within half a
/// station spacing of a station and, with `max_offset`, when it lies close
/// enough to the section line. Points whose pixel ray misses the water
/// plane are skipped.
pub fn sample_stations(
    section: &CrossSection,
    stations: &[Station],
    analysis: &AnalysisResult,
    mapping: &TransformationMapping,
    params: &DischargeParams,
) -> Result<Vec<StationSamples>, DischargeError> {
    let n = analysis.len();
    if analysis.y.len() != n
        || analysis.u.len() != analysis.v.len()
        || analysis.u.iter().chain(&analysis.v).any(|row| row.len() != n)
    {
        return Err(DischargeError::InputValidation(
            "velocimetry arrays do not match the grid size".into(),
        ));
    }
    if stations.len() < 2 {
        return Err(DischargeError::InputValidation(
            "need at least two stations".into(),
        ));
    }

    let dt = params.dt();
    let level = Some(section.level);
    let dir = section.direction();
    let downstream = section.downstream();
    let spacing = section.length() / (stations.len() - 1) as f64;
    let mut pools = vec![StationSamples::default(); stations.len()];
    let mut used = 0usize;

    for i in 0..n {
        let pixel = Point2::new(analysis.x[i], analysis.y[i]);
        let Ok(w0) = mapping.pixel_to_world(pixel, level) else {
            log::debug!("point {i} at {pixel:?} does not reach the water plane");
            continue;
        };
        let offset = w0 - section.left;
        let along = offset.dot(&dir);
        let k = (along / spacing).round();
        if k < 0.0 || k >= stations.len() as f64 {
            continue;
        }
        if let Some(max) = params.max_offset {
            if offset.dot(&downstream).abs() > max {
                continue;
            }
        }
        let pool = &mut pools[k as usize];
        let before = pool.speed.len();
        for (u, v) in analysis.series(i) {
            if !(u.is_finite() && v.is_finite()) {
                continue;
            }
            let Ok(w1) = mapping.pixel_to_world(pixel + Vector2::new(u, v), level) else {
                continue;
            };
            let delta = (w1 - w0) / dt;
            pool.speed.push(delta.norm());
            pool.streamwise.push(delta.dot(&downstream));
        }
        if pool.speed.len() > before {
            used += 1;
        }
    }
    log::debug!("{used} of {n} interrogation points contributed samples");
    Ok(pools)
}

/// Reduce pooled samples to station statistics.
pub fn station_velocities(pools: &[StationSamples]) -> Vec<StationVelocity> {
    pools
        .iter()
        .map(|p| StationVelocity {
            speed: Summary::of(p.speed.iter().copied()),
            streamwise: Summary::of(p.streamwise.iter().copied()).median,
        })
        .collect()
}

/// Fill missing wet-station values by linear interpolation in distance
/// between the nearest measured stations.
///
/// A side without any measured station is anchored at zero at the bank
/// (distance `0` or `length`). Dry stations without a value become zero.
/// `values` are updated in place; the returned flags mark filled stations.
pub fn fill_gaps(stations: &[Station], length: f64, values: &mut [f64]) -> Vec<bool> {
    let measured: Vec<usize> = (0..values.len()).filter(|&k| values[k].is_finite()).collect();
    let mut filled = vec![false; values.len()];
    for k in 0..values.len() {
        if values[k].is_finite() {
            continue;
        }
        filled[k] = true;
        if !stations[k].is_wet() {
            values[k] = 0.0;
            continue;
        }
        let d = stations[k].distance;
        let left = measured
            .iter()
            .rev()
            .find(|&&j| j < k)
            .map_or((0.0, 0.0), |&j| (stations[j].distance, values[j]));
        let right = measured
            .iter()
            .find(|&&j| j > k)
            .map_or((length, 0.0), |&j| (stations[j].distance, values[j]));
        values[k] = if right.0 > left.0 {
            left.1 + (d - left.0) / (right.0 - left.0) * (right.1 - left.1)
        } else {
            left.1
        };
    }
    filled
}

/// Integrate discharge from station velocities.
pub fn summarize(
    stations: &[Station],
    length: f64,
    velocities: &[StationVelocity],
    alpha: f64,
    interpolate: bool,
    dt: f64,
) -> DischargeSummary {
    let mut speed: Vec<f64> = velocities.iter().map(|v| v.speed.median).collect();
    let mut std: Vec<f64> = velocities.iter().map(|v| v.speed.std).collect();
    let mut p5: Vec<f64> = velocities.iter().map(|v| v.speed.p5).collect();
    let mut p95: Vec<f64> = velocities.iter().map(|v| v.speed.p95).collect();
    let measured = speed.clone();

    let filled = if interpolate {
        let flags = fill_gaps(stations, length, &mut speed);
        fill_gaps(stations, length, &mut std);
        fill_gaps(stations, length, &mut p5);
        fill_gaps(stations, length, &mut p95);
        flags
    } else {
        vec![false; stations.len()]
    };

    let term = |v: f64, s: &Station| {
        if v.is_finite() {
            alpha * v * s.depth * s.width
        } else {
            0.0
        }
    };
    let q: Vec<f64> = speed.iter().zip(stations).map(|(&v, s)| term(v, s)).collect();
    let total_q: f64 = q.iter().sum();
    let total_q_std = std
        .iter()
        .zip(stations)
        .map(|(&sd, s)| term(sd, s).powi(2))
        .sum::<f64>()
        .sqrt();
    let total_a: f64 = stations.iter().map(|s| s.depth * s.width).sum();
    let total_w: f64 = stations.iter().filter(|s| s.is_wet()).map(|s| s.width).sum();
    let max_depth = stations.iter().map(|s| s.depth).fold(0.0, f64::max);

    DischargeSummary {
        distance: stations.iter().map(|s| s.distance).collect(),
        east: stations.iter().map(|s| s.east).collect(),
        north: stations.iter().map(|s| s.north).collect(),
        depth: stations.iter().map(|s| s.depth).collect(),
        width: stations.iter().map(|s| s.width).collect(),
        streamwise_velocity_magnitude: measured.iter().copied().map(opt).collect(),
        streamwise_component: velocities.iter().map(|v| opt(v.streamwise)).collect(),
        filled_streamwise_velocity_magnitude: speed.iter().copied().map(opt).collect(),
        depth_averaged_velocity: speed.iter().map(|v| opt(alpha * v)).collect(),
        std: std.iter().copied().map(opt).collect(),
        minus_std: speed.iter().zip(&std).map(|(v, s)| opt(v - s)).collect(),
        plus_std: speed.iter().zip(&std).map(|(v, s)| opt(v + s)).collect(),
        p5: p5.iter().copied().map(opt).collect(),
        p95: p95.iter().copied().map(opt).collect(),
        sample_count: velocities.iter().map(|v| v.speed.count).collect(),
        filled,
        q_portion: q
            .iter()
            .map(|&qi| if total_q != 0.0 { qi / total_q } else { 0.0 })
            .collect(),
        q,
        total_q,
        total_q_std,
        mean_v: if total_a > 0.0 { total_q / total_a } else { 0.0 },
        total_w,
        total_a,
        max_depth,
        alpha,
        dt,
    }
}

/// Discharge through `section` from a velocimetry run.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(points = analysis.len(), stations = section.num_stations))
)]
pub fn integrate(
    section: &CrossSection,
    analysis: &AnalysisResult,
    mapping: &TransformationMapping,
    params: &DischargeParams,
) -> Result<DischargeSummary, DischargeError> {
    params.validate()?;
    let stations = section.stations()?;
    let pools = sample_stations(section, &stations, analysis, mapping, params)?;
    let velocities = station_velocities(&pools);

    let measured = velocities.iter().filter(|v| v.speed.count > 0).count();
    if measured == 0 {
        log::warn!("no velocimetry sample falls on the section; discharge is zero");
    }
    let alpha = params.alpha.unwrap_or(section.alpha);
    let summary = summarize(
        &stations,
        section.length(),
        &velocities,
        alpha,
        params.interpolate,
        params.dt(),
    );
    log::info!(
        "Q = {:.3} ± {:.3} m³/s over {:.2} m² ({measured}/{} stations measured)",
        summary.total_q,
        summary.total_q_std,
        summary.total_a,
        stations.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn flat_stations(depths: &[f64], length: f64) -> Vec<Station> {
        let n = depths.len();
        let spacing = length / (n - 1) as f64;
        depths
            .iter()
            .enumerate()
            .map(|(i, &depth)| Station {
                distance: i as f64 * spacing,
                east: i as f64 * spacing,
                north: 0.0,
                bed: -depth,
                depth,
                width: if i == 0 || i == n - 1 {
                    0.5 * spacing
                } else {
                    spacing
                },
            })
            .collect()
    }

    fn velocity(v: f64, std: f64) -> StationVelocity {
        StationVelocity {
            speed: Summary {
                median: v,
                std,
                p5: v - std,
                p95: v + std,
                count: usize::from(v.is_finite()),
            },
            streamwise: v,
        }
    }

    #[test]
    fn rectangular_channel_is_v_d_w() {
        let stations = flat_stations(&[2.0; 11], 10.0);
        let vel: Vec<_> = (0..11).map(|_| velocity(1.5, 0.1)).collect();
        let s = summarize(&stations, 10.0, &vel, 1.0, true, 0.1);
        assert_relative_eq!(s.total_q, 1.5 * 2.0 * 10.0, epsilon = 1e-9);
        assert_relative_eq!(s.mean_v, 1.5, epsilon = 1e-12);
        assert_relative_eq!(s.total_w, 10.0, epsilon = 1e-12);
        assert_relative_eq!(s.q_portion.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(s.filled.iter().all(|&f| !f));
    }

    #[test]
    fn alpha_scales_discharge_and_std() {
        let stations = flat_stations(&[1.0; 3], 2.0);
        let vel: Vec<_> = (0..3).map(|_| velocity(1.0, 0.2)).collect();
        let s = summarize(&stations, 2.0, &vel, 0.8, true, 0.1);
        assert_relative_eq!(s.total_q, 0.8 * 2.0, epsilon = 1e-12);
        let expected = (0.8f64 * 0.2).powi(2) * (0.25 + 1.0 + 0.25);
        assert_relative_eq!(s.total_q_std, expected.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn interior_gap_is_bracketed_by_neighbours() {
        let stations = flat_stations(&[1.0; 5], 4.0);
        let mut values = vec![1.0, 2.0, f64::NAN, 4.0, 5.0];
        let filled = fill_gaps(&stations, 4.0, &mut values);
        assert_eq!(filled, vec![false, false, true, false, false]);
        assert_relative_eq!(values[2], 3.0);
    }

    #[test]
    fn edge_gaps_fail_low_toward_the_bank() {
        let stations = flat_stations(&[1.0; 5], 4.0);
        let mut values = vec![f64::NAN, f64::NAN, 2.0, 2.0, f64::NAN];
        fill_gaps(&stations, 4.0, &mut values);
        assert_relative_eq!(values[0], 0.0);
        assert_relative_eq!(values[1], 1.0);
        assert_relative_eq!(values[4], 0.0);
    }

    #[test]
    fn dry_gaps_are_zero() {
        let stations = flat_stations(&[0.0, 1.0, 1.0, 0.0], 3.0);
        let mut values = vec![f64::NAN, 1.0, 1.0, f64::NAN];
        let filled = fill_gaps(&stations, 3.0, &mut values);
        assert_eq!(values, vec![0.0, 1.0, 1.0, 0.0]);
        assert!(filled[0] && filled[3]);
    }

    #[test]
    fn missing_stations_contribute_nothing_without_interpolation() {
        let stations = flat_stations(&[1.0; 3], 2.0);
        let vel = vec![velocity(1.0, 0.0), velocity(f64::NAN, f64::NAN), velocity(1.0, 0.0)];
        let s = summarize(&stations, 2.0, &vel, 1.0, false, 0.1);
        assert_relative_eq!(s.total_q, 0.5 + 0.5);
        assert_eq!(s.filled_streamwise_velocity_magnitude[1], None);

        let s = summarize(&stations, 2.0, &vel, 1.0, true, 0.1);
        assert_relative_eq!(s.total_q, 2.0);
        assert!(s.filled[1]);
        let gap = s.q[1];
        assert!(gap <= 1.0 * 1.0 * 1.0 + 1e-12);
    }

    #[test]
    fn zero_discharge_has_zero_portions() {
        let stations = flat_stations(&[1.0; 3], 2.0);
        let vel: Vec<_> = (0..3).map(|_| velocity(0.0, 0.0)).collect();
        let s = summarize(&stations, 2.0, &vel, 1.0, true, 0.1);
        assert!(s.q_portion.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn summary_json_uses_report_keys() {
        let stations = flat_stations(&[1.0; 3], 2.0);
        let vel = vec![velocity(1.0, 0.0), velocity(f64::NAN, f64::NAN), velocity(1.0, 0.0)];
        let s = summarize(&stations, 2.0, &vel, 1.0, false, 0.1);
        let json = serde_json::to_value(&s).unwrap();
        for key in ["total_Q", "Q_portion", "5th_percentile", "mean_V", "total_W", "filled_streamwise_velocity_magnitude"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json["streamwise_velocity_magnitude"][1].is_null());
    }
}
