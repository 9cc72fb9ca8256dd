//! Point correspondences and the collector that assembles them.
//!
//! Pixels and world coordinates are joined **positionally**: the `i`-th pixel
//! belongs to the `i`-th world point. Every constructor here checks lengths so
//! that a shifted list fails instead of producing a plausible wrong mapping.

use crate::GeometryError;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// A ground control point: a pixel with its known world coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointCorrespondence<W> {
    /// Ordinal index within the set it was captured in.
    pub index: usize,
    pub pixel: Point2<f64>,
    pub world: W,
}

pub type PlanarCorrespondence = PointCorrespondence<Point2<f64>>;
pub type SpatialCorrespondence = PointCorrespondence<Point3<f64>>;

/// An ordered, validated list of correspondences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrespondenceSet<W> {
    points: Vec<PointCorrespondence<W>>,
}

impl<W: Copy> CorrespondenceSet<W> {
    /// Join two parallel lists by position.
    pub fn from_parallel(pixels: &[Point2<f64>], world: &[W]) -> Result<Self, GeometryError> {
        if pixels.len() != world.len() {
            return Err(GeometryError::MismatchedLengths {
                pixels: pixels.len(),
                world: world.len(),
            });
        }
        let points = pixels
            .iter()
            .zip(world)
            .enumerate()
            .map(|(index, (&pixel, &world))| PointCorrespondence {
                index,
                pixel,
                world,
            })
            .collect();
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[PointCorrespondence<W>] {
        &self.points
    }

    pub fn pixels(&self) -> Vec<Point2<f64>> {
        self.points.iter().map(|p| p.pixel).collect()
    }

    pub fn world(&self) -> Vec<W> {
        self.points.iter().map(|p| p.world).collect()
    }

    /// Keep the correspondences at the listed positions in this set, in the
    /// listed order; out-of-range positions are skipped. Kept points retain
    /// their original `index`, so positions and ordinals differ once a set
    /// has been subset.
    pub fn subset(&self, positions: &[usize]) -> Self {
        let points = positions
            .iter()
            .filter_map(|&i| self.points.get(i).copied())
            .collect();
        Self { points }
    }
}

/// Synchronous accumulator for digitized points.
///
/// Pixels and world coordinates may arrive in any interleaving (a click
/// handler and a survey table, for instance); `finish` validates the counts
/// and returns the joined set. Nothing is shared or global: the collector is
/// an ordinary value owned by whoever drives the digitizing.
#[derive(Clone, Debug)]
pub struct PointCollector<W> {
    min_points: usize,
    max_points: Option<usize>,
    pixels: Vec<Point2<f64>>,
    world: Vec<W>,
}

impl<W: Copy> PointCollector<W> {
    /// Collector that requires exactly `count` points.
    pub fn exactly(count: usize) -> Self {
        Self {
            min_points: count,
            max_points: Some(count),
            pixels: Vec::with_capacity(count),
            world: Vec::with_capacity(count),
        }
    }

    /// Collector that requires at least `min_points` points.
    pub fn at_least(min_points: usize) -> Self {
        Self {
            min_points,
            max_points: None,
            pixels: Vec::new(),
            world: Vec::new(),
        }
    }

    pub fn push_pixel(&mut self, x: f64, y: f64) -> Result<usize, GeometryError> {
        if !(x.is_finite() && y.is_finite()) {
            return Err(GeometryError::InputValidation(format!(
                "pixel ({x}, {y}) is not finite"
            )));
        }
        if let Some(max) = self.max_points {
            if self.pixels.len() >= max {
                return Err(GeometryError::InputValidation(format!(
                    "collector already holds {max} pixels"
                )));
            }
        }
        self.pixels.push(Point2::new(x, y));
        Ok(self.pixels.len() - 1)
    }

    pub fn push_world(&mut self, world: W) -> Result<usize, GeometryError> {
        if let Some(max) = self.max_points {
            if self.world.len() >= max {
                return Err(GeometryError::InputValidation(format!(
                    "collector already holds {max} world points"
                )));
            }
        }
        self.world.push(world);
        Ok(self.world.len() - 1)
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_complete(&self) -> bool {
        self.pixels.len() == self.world.len() && self.pixels.len() >= self.min_points
    }

    /// Validate and return the completed correspondence set.
    pub fn finish(self) -> Result<CorrespondenceSet<W>, GeometryError> {
        if self.pixels.len() < self.min_points {
            return Err(GeometryError::InsufficientPoints {
                required: self.min_points,
                got: self.pixels.len(),
            });
        }
        for (i, a) in self.pixels.iter().enumerate() {
            for b in &self.pixels[i + 1..] {
                if (a - b).norm() < 1e-9 {
                    return Err(GeometryError::InputValidation(format!(
                        "duplicate pixel ({:.2}, {:.2})",
                        a.x, a.y
                    )));
                }
            }
        }
        CorrespondenceSet::from_parallel(&self.pixels, &self.world)
    }
}

/// Ground control point table in the column layout used on disk:
/// `{"x": [...], "y": [...], "X": [...], "Y": [...], "Z": [...]}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GcpTable {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    #[serde(rename = "X")]
    pub east: Vec<f64>,
    #[serde(rename = "Y")]
    pub north: Vec<f64>,
    #[serde(rename = "Z", default)]
    pub elevation: Vec<f64>,
}

impl GcpTable {
    fn pixels(&self) -> Result<Vec<Point2<f64>>, GeometryError> {
        if self.x.len() != self.y.len() {
            return Err(GeometryError::InputValidation(format!(
                "pixel columns differ in length (x={}, y={})",
                self.x.len(),
                self.y.len()
            )));
        }
        Ok(self
            .x
            .iter()
            .zip(&self.y)
            .map(|(&x, &y)| Point2::new(x, y))
            .collect())
    }

    fn check_world_columns(&self, with_z: bool) -> Result<usize, GeometryError> {
        let n = self.east.len();
        let z_ok = !with_z || self.elevation.len() == n;
        if self.north.len() != n || !z_ok {
            return Err(GeometryError::InputValidation(format!(
                "world columns differ in length (X={}, Y={}, Z={})",
                n,
                self.north.len(),
                self.elevation.len()
            )));
        }
        Ok(n)
    }

    pub fn to_planar(&self) -> Result<CorrespondenceSet<Point2<f64>>, GeometryError> {
        self.check_world_columns(false)?;
        let world: Vec<_> = self
            .east
            .iter()
            .zip(&self.north)
            .map(|(&e, &n)| Point2::new(e, n))
            .collect();
        CorrespondenceSet::from_parallel(&self.pixels()?, &world)
    }

    pub fn to_spatial(&self) -> Result<CorrespondenceSet<Point3<f64>>, GeometryError> {
        self.check_world_columns(true)?;
        let world: Vec<_> = (0..self.east.len())
            .map(|i| Point3::new(self.east[i], self.north[i], self.elevation[i]))
            .collect();
        CorrespondenceSet::from_parallel(&self.pixels()?, &world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_join_rejects_length_mismatch() {
        let px = [Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)];
        let w = [Point2::new(0.0, 0.0)];
        let err = CorrespondenceSet::from_parallel(&px, &w).unwrap_err();
        assert_eq!(err, GeometryError::MismatchedLengths { pixels: 2, world: 1 });
    }

    #[test]
    fn collector_joins_interleaved_input() {
        let mut c = PointCollector::exactly(2);
        c.push_pixel(10.0, 20.0).unwrap();
        c.push_world(Point2::new(1.0, 2.0)).unwrap();
        c.push_world(Point2::new(3.0, 4.0)).unwrap();
        assert!(!c.is_complete());
        c.push_pixel(30.0, 40.0).unwrap();
        assert!(c.is_complete());

        let set = c.finish().unwrap();
        assert_eq!(set.points()[1].pixel, Point2::new(30.0, 40.0));
        assert_eq!(set.points()[1].world, Point2::new(3.0, 4.0));
        assert_eq!(set.points()[1].index, 1);
    }

    #[test]
    fn collector_rejects_overflow_and_duplicates() {
        let mut c = PointCollector::<Point2<f64>>::exactly(1);
        c.push_pixel(1.0, 1.0).unwrap();
        assert!(c.push_pixel(2.0, 2.0).is_err());

        let mut c = PointCollector::at_least(2);
        c.push_pixel(1.0, 1.0).unwrap();
        c.push_pixel(1.0, 1.0).unwrap();
        c.push_world(Point2::new(0.0, 0.0)).unwrap();
        c.push_world(Point2::new(1.0, 0.0)).unwrap();
        assert!(matches!(c.finish(), Err(GeometryError::InputValidation(_))));
    }

    #[test]
    fn gcp_table_reads_column_json() {
        let raw = r#"{"x":[1,2],"y":[3,4],"X":[5,6],"Y":[7,8],"Z":[9,10]}"#;
        let table: GcpTable = serde_json::from_str(raw).unwrap();
        let set = table.to_spatial().unwrap();
        assert_eq!(set.points()[1].world, Point3::new(6.0, 8.0, 10.0));
        assert_eq!(set.points()[0].pixel, Point2::new(1.0, 3.0));
    }

    #[test]
    fn subset_selects_by_position_and_keeps_ordinals() {
        let px: Vec<_> = (0..4).map(|i| Point2::new(i as f64, 0.0)).collect();
        let set = CorrespondenceSet::from_parallel(&px, &px).unwrap();
        let sub = set.subset(&[1, 3]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.points()[1].index, 3);

        // Position 1 of the subset is ordinal 3 of the original set.
        let nested = sub.subset(&[1, 7]);
        assert_eq!(nested.len(), 1);
        assert_eq!(nested.points()[0].index, 3);
        assert_eq!(nested.points()[0].pixel, Point2::new(3.0, 0.0));
    }
}
