//! Cross-section definition and its discretization into stations.

use crate::{Bathymetry, SectionError};
use nalgebra::{Point2, Vector2};
use river_core::{GeometryError, TransformationMapping};
use serde::{Deserialize, Serialize};

/// A measurement line between two banks, with the water level and the
/// surveyed bed beneath it.
///
/// Looking downstream the left bank is on the left. Along-section distance
/// is measured from the left bank; the bathymetry distance of the left bank
/// is `left_station`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrossSection {
    pub left: Point2<f64>,
    pub right: Point2<f64>,
    /// Water-surface elevation, same datum as the bathymetry.
    pub level: f64,
    /// Ratio of depth-averaged to surface velocity, in `(0, 1]`.
    pub alpha: f64,
    pub num_stations: usize,
    #[serde(default)]
    pub left_station: f64,
    pub bathymetry: Bathymetry,
}

/// One integration station.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// Distance from the left bank.
    pub distance: f64,
    pub east: f64,
    pub north: f64,
    pub bed: f64,
    pub depth: f64,
    /// Width this station represents in the quadrature.
    pub width: f64,
}

impl Station {
    pub fn is_wet(&self) -> bool {
        self.depth > 0.0
    }
}

impl CrossSection {
    /// Bank-to-bank length.
    pub fn length(&self) -> f64 {
        (self.right - self.left).norm()
    }

    /// Unit vector from the left to the right bank.
    pub fn direction(&self) -> Vector2<f64> {
        (self.right - self.left) / self.length()
    }

    /// Unit downstream vector: the section direction turned a quarter
    /// counterclockwise, so the left bank sits on its left.
    pub fn downstream(&self) -> Vector2<f64> {
        let d = self.direction();
        Vector2::new(-d.y, d.x)
    }

    /// Point at `distance` from the left bank.
    pub fn point_at(&self, distance: f64) -> Point2<f64> {
        self.left + self.direction() * distance
    }

    pub fn validate(&self) -> Result<(), SectionError> {
        let invalid = |msg: String| Err(SectionError::InvalidSection(msg));
        if [self.left.x, self.left.y, self.right.x, self.right.y, self.level]
            .iter()
            .any(|v| !v.is_finite())
        {
            return invalid("bank coordinates and level must be finite".into());
        }
        if self.num_stations < 2 {
            return invalid(format!(
                "need at least 2 stations, got {}",
                self.num_stations
            ));
        }
        if self.length() <= f64::EPSILON {
            return invalid("left and right banks coincide".into());
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return invalid(format!("alpha must lie in (0, 1], got {}", self.alpha));
        }
        if !self.left_station.is_finite() {
            return invalid("left_station must be finite".into());
        }

        let (lowest, highest) = self.bathymetry.elevation_range();
        if self.level <= lowest {
            return Err(SectionError::BathymetryRange(format!(
                "water level {} is at or below the lowest bed elevation {lowest}; the section is dry",
                self.level
            )));
        }
        if self.level > highest {
            return Err(SectionError::BathymetryRange(format!(
                "water level {} is above the highest surveyed elevation {highest}",
                self.level
            )));
        }
        Ok(())
    }

    /// Evenly spaced stations from bank to bank.
    ///
    /// Widths follow the trapezoidal rule: interior stations get the full
    /// spacing and the two bank stations half of it, so they sum to the
    /// section length.
    pub fn stations(&self) -> Result<Vec<Station>, SectionError> {
        self.validate()?;
        let n = self.num_stations;
        let length = self.length();
        let spacing = length / (n - 1) as f64;
        let (first, last) = self.bathymetry.span();

        (0..n)
            .map(|i| {
                let distance = if i == n - 1 {
                    length
                } else {
                    i as f64 * spacing
                };
                let survey = self.left_station + distance;
                let bed = self.bathymetry.elevation_at(survey).ok_or_else(|| {
                    SectionError::BathymetryRange(format!(
                        "station {i} at bathymetry distance {survey:.3} lies outside the surveyed range [{first}, {last}]"
                    ))
                })?;
                let p = self.point_at(distance);
                let width = if i == 0 || i == n - 1 {
                    0.5 * spacing
                } else {
                    spacing
                };
                Ok(Station {
                    distance,
                    east: p.x,
                    north: p.y,
                    bed,
                    depth: (self.level - bed).max(0.0),
                    width,
                })
            })
            .collect()
    }

    /// Pixel positions of the left and right bank. Camera mappings are
    /// evaluated at the water level.
    pub fn bank_pixels(
        &self,
        mapping: &TransformationMapping,
    ) -> Result<(Point2<f64>, Point2<f64>), GeometryError> {
        Ok((
            mapping.world_to_pixel(self.left, Some(self.level))?,
            mapping.world_to_pixel(self.right, Some(self.level))?,
        ))
    }

    /// Height (metres) of the analysis band around the section such that it
    /// spans `window_px` pixels at the section midpoint.
    pub fn recommend_height_roi(
        &self,
        mapping: &TransformationMapping,
        window_px: usize,
    ) -> Result<f64, GeometryError> {
        let mid = self.point_at(0.5 * self.length());
        let pixel = mapping.world_to_pixel(mid, Some(self.level))?;
        let gsd = mapping.ground_sampling_distance(pixel, Some(self.level))?;
        Ok(gsd * window_px as f64)
    }
}

/// Cross-section record in its on-disk layout.
///
/// `bath` is a path to a bathymetry CSV, resolved by the caller. Pixel
/// positions of the banks (`xl`, `yl`, `xr`, `yr`) and the real-world length
/// are derived fields, refreshed by [`SectionRecord::with_pixels`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub east_l: f64,
    pub north_l: f64,
    pub east_r: f64,
    pub north_r: f64,
    pub level: f64,
    pub num_stations: usize,
    pub alpha: f64,
    pub bath: String,
    #[serde(default)]
    pub left_station: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rw_length: Option<f64>,
}

impl SectionRecord {
    pub fn to_cross_section(&self, bathymetry: Bathymetry) -> CrossSection {
        CrossSection {
            left: Point2::new(self.east_l, self.north_l),
            right: Point2::new(self.east_r, self.north_r),
            level: self.level,
            alpha: self.alpha,
            num_stations: self.num_stations,
            left_station: self.left_station,
            bathymetry,
        }
    }

    /// Copy with bank pixel positions and length filled in from `mapping`.
    pub fn with_pixels(&self, mapping: &TransformationMapping) -> Result<Self, GeometryError> {
        let left = Point2::new(self.east_l, self.north_l);
        let right = Point2::new(self.east_r, self.north_r);
        let pl = mapping.world_to_pixel(left, Some(self.level))?;
        let pr = mapping.world_to_pixel(right, Some(self.level))?;
        Ok(Self {
            xl: Some(pl.x),
            yl: Some(pl.y),
            xr: Some(pr.x),
            yr: Some(pr.y),
            rw_length: Some((right - left).norm()),
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use river_core::PlanarMapping;

    /// 10 m wide flat bed, 2 m deep, walls surveyed beyond both banks.
    fn rectangular(num_stations: usize) -> CrossSection {
        CrossSection {
            left: Point2::new(0.0, 0.0),
            right: Point2::new(10.0, 0.0),
            level: 2.0,
            alpha: 0.85,
            num_stations,
            left_station: 1.0,
            bathymetry: Bathymetry::new(vec![0.0, 1.0, 11.0, 12.0], vec![3.0, 0.0, 0.0, 3.0])
                .unwrap(),
        }
    }

    #[test]
    fn trapezoid_widths_sum_to_length() {
        let stations = rectangular(11).stations().unwrap();
        assert_eq!(stations.len(), 11);
        assert!(stations.iter().all(|s| s.depth == 2.0));
        assert_relative_eq!(stations[0].width, 0.5);
        assert_relative_eq!(stations[5].width, 1.0);
        let total: f64 = stations.iter().map(|s| s.width).sum();
        assert_relative_eq!(total, 10.0, epsilon = 1e-12);
        assert_relative_eq!(stations[10].distance, 10.0);
        assert_relative_eq!(stations[3].east, 3.0);
    }

    #[test]
    fn left_station_offsets_the_survey() {
        let mut s = rectangular(3);
        s.bathymetry = Bathymetry::new(vec![0.0, 5.0, 15.0], vec![3.0, 0.0, 3.0]).unwrap();
        s.left_station = 5.0;
        s.level = 2.5;
        let st = s.stations().unwrap();
        assert_relative_eq!(st[0].bed, 0.0);
        assert_relative_eq!(st[0].depth, 2.5);
        assert_relative_eq!(st[2].bed, 3.0);
        assert_relative_eq!(st[2].depth, 0.0);
        assert!(!st[2].is_wet());
    }

    #[test]
    fn level_outside_bed_range_is_rejected() {
        let mut s = rectangular(5);
        s.bathymetry = Bathymetry::new(vec![0.0, 5.0, 10.0], vec![2.0, 0.0, 2.0]).unwrap();
        s.level = -0.5;
        assert!(matches!(s.stations(), Err(SectionError::BathymetryRange(_))));
        s.level = 2.5;
        assert!(matches!(s.stations(), Err(SectionError::BathymetryRange(_))));
    }

    #[test]
    fn stations_may_not_leave_the_survey() {
        let mut s = rectangular(5);
        s.left_station = 1.0;
        s.bathymetry = Bathymetry::new(vec![0.0, 5.0, 10.0], vec![2.0, 0.0, 2.0]).unwrap();
        s.level = 1.0;
        let err = s.stations().unwrap_err();
        assert!(matches!(err, SectionError::BathymetryRange(msg) if msg.contains("station 4")));
    }

    #[test]
    fn invalid_definitions() {
        let mut s = rectangular(1);
        assert!(matches!(s.stations(), Err(SectionError::InvalidSection(_))));
        s.num_stations = 5;
        s.alpha = 1.2;
        assert!(s.validate().is_err());
        s.alpha = 1.0;
        s.right = s.left;
        assert!(s.validate().is_err());
    }

    #[test]
    fn downstream_keeps_left_bank_on_the_left() {
        let s = rectangular(3);
        // Banks along +east: the river flows north.
        assert_relative_eq!(s.downstream(), Vector2::new(0.0, 1.0));
    }

    #[test]
    fn pixels_and_roi_height_from_planar_mapping() {
        // 0.05 m per pixel, image y down.
        let m: TransformationMapping =
            PlanarMapping::from_matrix([[0.05, 0.0, 0.0], [0.0, -0.05, 20.0], [0.0, 0.0, 1.0]])
                .unwrap()
                .into();
        let s = rectangular(5);
        let (l, r) = s.bank_pixels(&m).unwrap();
        assert_relative_eq!(l, Point2::new(0.0, 400.0), epsilon = 1e-9);
        assert_relative_eq!(r, Point2::new(200.0, 400.0), epsilon = 1e-9);
        assert_relative_eq!(s.recommend_height_roi(&m, 64).unwrap(), 3.2, epsilon = 1e-9);
    }

    #[test]
    fn record_round_trip_keeps_disk_keys() {
        let json = r#"{"section1": {"east_l": 0.0, "north_l": 0.0, "east_r": 10.0, "north_r": 0.0,
            "level": 2.0, "num_stations": 5, "alpha": 0.85, "bath": "bath.csv", "left_station": 0.0}}"#;
        let map: std::collections::BTreeMap<String, SectionRecord> =
            serde_json::from_str(json).unwrap();
        let rec = &map["section1"];
        assert!(rec.xl.is_none());
        let m: TransformationMapping = PlanarMapping::from_matrix([
            [0.05, 0.0, 0.0],
            [0.0, -0.05, 20.0],
            [0.0, 0.0, 1.0],
        ])
        .unwrap()
        .into();
        let rec = rec.with_pixels(&m).unwrap();
        assert_relative_eq!(rec.xr.unwrap(), 200.0, epsilon = 1e-9);
        assert_relative_eq!(rec.rw_length.unwrap(), 10.0);
        let section = rec.to_cross_section(rectangular(5).bathymetry);
        assert_eq!(section.stations().unwrap().len(), 5);
    }
}
