//! Oblique-view calibration from four control points.
//!
//! Four pixel points alone fix a projective map only once their world
//! positions are known. In the field those positions are usually not
//! surveyed directly; instead the four edges and both diagonals of the
//! quadrilateral are taped. [`place_quadrilateral`] turns the six distances
//! into planar world coordinates (trilateration followed by a Gauss–Newton
//! fit over all six distances), and [`solve_oblique`] solves the pixel →
//! world homography from them.
//!
//! Points are expected in a fixed traversal order: point 1 is the most
//! upstream-left point, points 2–4 follow counterclockwise as seen in the
//! image. The order is never inferred.

use crate::homography::homography_from_4pt;
use crate::{CorrespondenceSet, GeometryError, PlanarMapping};
use nalgebra::{Point2, SMatrix, SVector};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Surveyed distances between the four control points (metres).
///
/// `dij` is the distance between point `i` and point `j` (1-based, in
/// traversal order); `d13` and `d24` are the diagonals.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistanceConstraints {
    pub d12: f64,
    pub d23: f64,
    pub d34: f64,
    pub d41: f64,
    pub d13: f64,
    pub d24: f64,
}

impl DistanceConstraints {
    /// `((i, j), distance)` with 0-based point indices.
    pub fn pairs(&self) -> [((usize, usize), f64); 6] {
        [
            ((0, 1), self.d12),
            ((1, 2), self.d23),
            ((2, 3), self.d34),
            ((3, 0), self.d41),
            ((0, 2), self.d13),
            ((1, 3), self.d24),
        ]
    }

    /// Distances measured between already-known world points.
    pub fn from_world(points: &[Point2<f64>; 4]) -> Self {
        let d = |i: usize, j: usize| (points[i] - points[j]).norm();
        Self {
            d12: d(0, 1),
            d23: d(1, 2),
            d34: d(2, 3),
            d41: d(3, 0),
            d13: d(0, 2),
            d24: d(1, 3),
        }
    }

    fn validate(&self) -> Result<(), GeometryError> {
        for ((i, j), d) in self.pairs() {
            if !(d.is_finite() && d > 0.0) {
                return Err(GeometryError::InputValidation(format!(
                    "distance d{}{} must be positive, got {d}",
                    i + 1,
                    j + 1
                )));
            }
        }
        Ok(())
    }

    fn span(&self) -> f64 {
        self.pairs().iter().map(|(_, d)| *d).fold(0.0, f64::max)
    }
}

/// Four pixel points plus their surveyed distances, as stored on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObliqueInput {
    pub pixels: [Point2<f64>; 4],
    pub distances: DistanceConstraints,
}

/// Result of an oblique calibration.
#[derive(Clone, Debug)]
pub struct ObliqueSolution {
    pub mapping: PlanarMapping,
    /// World coordinates assigned to the four control points.
    pub world_points: [Point2<f64>; 4],
    /// `fitted - measured` for each entry of [`DistanceConstraints::pairs`].
    pub distance_residuals: [f64; 6],
}

impl ObliqueSolution {
    pub fn max_abs_residual(&self) -> f64 {
        self.distance_residuals
            .iter()
            .fold(0.0, |acc: f64, r| acc.max(r.abs()))
    }
}

/// Signed shoelace area of a closed polygon.
pub(crate) fn signed_area(pts: &[Point2<f64>]) -> f64 {
    let n = pts.len();
    let mut acc = 0.0;
    for i in 0..n {
        let a = pts[i];
        let b = pts[(i + 1) % n];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc
}

fn cross(o: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn segments_cross(a: Point2<f64>, b: Point2<f64>, c: Point2<f64>, d: Point2<f64>) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

/// Reject bow-tie quadrilaterals; warn on non-convex ones.
fn check_traversal(pixels: &[Point2<f64>; 4]) -> Result<(), GeometryError> {
    if segments_cross(pixels[0], pixels[1], pixels[2], pixels[3]) {
        return Err(GeometryError::SelfIntersecting { first: 1, second: 3 });
    }
    if segments_cross(pixels[1], pixels[2], pixels[3], pixels[0]) {
        return Err(GeometryError::SelfIntersecting { first: 2, second: 4 });
    }
    let turns: Vec<f64> = (0..4)
        .map(|i| cross(pixels[i], pixels[(i + 1) % 4], pixels[(i + 2) % 4]))
        .collect();
    let convex = turns.iter().all(|&t| t > 0.0) || turns.iter().all(|&t| t < 0.0);
    if !convex {
        log::warn!("control point quadrilateral is not convex; check the point order");
    }
    Ok(())
}

/// Third vertex of a triangle with base `(0,0)-(base,0)`, side `a` from the
/// origin and side `b` from the base end, on the side given by `sign`.
fn trilaterate(base: f64, a: f64, b: f64, sign: f64) -> Result<Point2<f64>, GeometryError> {
    let x = (a * a - b * b + base * base) / (2.0 * base);
    let h2 = a * a - x * x;
    if h2 < -0.01 * a * a {
        return Err(GeometryError::InputValidation(format!(
            "distances {base:.3}, {a:.3}, {b:.3} violate the triangle inequality"
        )));
    }
    Ok(Point2::new(x, sign * h2.max(0.0).sqrt()))
}

/// Planar coordinates for the four control points honouring all six
/// distances in the least-squares sense.
///
/// Point 1 lands on the origin and point 2 on the positive east axis.
/// `counterclockwise` selects the handedness of the traversal 1→2→3→4 in the
/// world frame (north up).
pub fn place_quadrilateral(
    distances: &DistanceConstraints,
    counterclockwise: bool,
) -> Result<[Point2<f64>; 4], GeometryError> {
    distances.validate()?;
    let sign = if counterclockwise { 1.0 } else { -1.0 };
    let base = distances.d12;
    let p3 = trilaterate(base, distances.d13, distances.d23, sign)?;
    let p4 = trilaterate(base, distances.d41, distances.d24, sign)?;

    // Parameters: [x2, x3, y3, x4, y4]; point 1 and y2 are gauge-fixed.
    let mut theta = SVector::<f64, 5>::new(base, p3.x, p3.y, p4.x, p4.y);
    let points = |t: &SVector<f64, 5>| {
        [
            Point2::new(0.0, 0.0),
            Point2::new(t[0], 0.0),
            Point2::new(t[1], t[2]),
            Point2::new(t[3], t[4]),
        ]
    };
    // Parameter slots for (x, y) of each point.
    const SLOTS: [[Option<usize>; 2]; 4] = [
        [None, None],
        [Some(0), None],
        [Some(1), Some(2)],
        [Some(3), Some(4)],
    ];

    let scale = distances.span();
    for _ in 0..50 {
        let pts = points(&theta);
        let mut jac = SMatrix::<f64, 6, 5>::zeros();
        let mut res = SVector::<f64, 6>::zeros();
        for (row, ((i, j), d)) in distances.pairs().into_iter().enumerate() {
            let diff = pts[i] - pts[j];
            let len = diff.norm().max(1e-12);
            res[row] = len - d;
            let g = diff / len;
            for axis in 0..2 {
                if let Some(k) = SLOTS[i][axis] {
                    jac[(row, k)] += g[axis];
                }
                if let Some(k) = SLOTS[j][axis] {
                    jac[(row, k)] -= g[axis];
                }
            }
        }
        let jtj = jac.transpose() * jac;
        let jtr = jac.transpose() * res;
        let Some(step) = jtj.lu().solve(&(-jtr)) else {
            break;
        };
        theta += step;
        if step.norm() < 1e-12 * scale {
            break;
        }
    }

    Ok(points(&theta))
}

/// Solve the oblique mapping from four pixels and six surveyed distances.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn solve_oblique(
    pixels: &[Point2<f64>; 4],
    distances: &DistanceConstraints,
) -> Result<ObliqueSolution, GeometryError> {
    check_traversal(pixels)?;
    // Image rows grow downwards, so an on-screen counterclockwise traversal
    // has a negative shoelace area in raw pixel coordinates.
    let counterclockwise = signed_area(pixels) < 0.0;
    let world = place_quadrilateral(distances, counterclockwise)?;
    let solution = solve_with_world(pixels, world, distances)?;

    let worst = solution.max_abs_residual();
    if worst > 1e-3 * distances.span() {
        log::warn!(
            "surveyed distances are inconsistent: worst residual {:.3} m over a {:.3} m span",
            worst,
            distances.span()
        );
    }
    log::debug!("oblique world points: {:?}", solution.world_points);
    Ok(solution)
}

/// Solve the oblique mapping when the world coordinates of the four
/// control points are known directly.
pub fn solve_oblique_from_world(
    set: &CorrespondenceSet<Point2<f64>>,
) -> Result<ObliqueSolution, GeometryError> {
    if set.len() != 4 {
        return Err(GeometryError::InputValidation(format!(
            "oblique calibration needs exactly 4 points, got {}",
            set.len()
        )));
    }
    let pixels: [Point2<f64>; 4] = std::array::from_fn(|i| set.points()[i].pixel);
    let world: [Point2<f64>; 4] = std::array::from_fn(|i| set.points()[i].world);
    check_traversal(&pixels)?;
    let distances = DistanceConstraints::from_world(&world);
    solve_with_world(&pixels, world, &distances)
}

fn solve_with_world(
    pixels: &[Point2<f64>; 4],
    world: [Point2<f64>; 4],
    distances: &DistanceConstraints,
) -> Result<ObliqueSolution, GeometryError> {
    let h = homography_from_4pt(pixels, &world)?;
    let mapping = PlanarMapping::new(h)?;

    let fitted = DistanceConstraints::from_world(&world);
    let mut distance_residuals = [0.0; 6];
    for (k, ((_, measured), (_, got))) in distances.pairs().iter().zip(fitted.pairs()).enumerate()
    {
        distance_residuals[k] = got - measured;
    }

    Ok(ObliqueSolution {
        mapping,
        world_points: world,
        distance_residuals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn field_example() -> ([Point2<f64>; 4], DistanceConstraints) {
        let pixels = [
            Point2::new(1498.0, 313.0),
            Point2::new(1313.0, 146.0),
            Point2::new(1084.0, 141.0),
            Point2::new(727.0, 395.0),
        ];
        let world = [
            Point2::new(0.0, 0.0),
            Point2::new(28.0, 0.0),
            Point2::new(26.0, 12.0),
            Point2::new(-1.5, 11.8),
        ];
        (pixels, DistanceConstraints::from_world(&world))
    }

    #[test]
    fn placement_reproduces_consistent_distances() {
        let (_, d) = field_example();
        let world = place_quadrilateral(&d, true).unwrap();
        let fitted = DistanceConstraints::from_world(&world);
        for ((_, a), (_, b)) in d.pairs().iter().zip(fitted.pairs()) {
            assert_relative_eq!(*a, b, max_relative = 1e-9);
        }
        assert!(signed_area(&world) > 0.0);
    }

    #[test]
    fn noisy_distances_are_balanced() {
        let (_, mut d) = field_example();
        d.d34 += 0.05;
        let world = place_quadrilateral(&d, true).unwrap();
        let fitted = DistanceConstraints::from_world(&world);
        // The misfit is spread instead of landing entirely on d34.
        assert!((fitted.d34 - d.d34).abs() < 0.05);
    }

    #[test]
    fn oblique_solution_round_trips_and_preserves_handedness() {
        let (pixels, d) = field_example();
        let sol = solve_oblique(&pixels, &d).unwrap();
        assert!(sol.max_abs_residual() < 1e-6);
        for (p, w) in pixels.iter().zip(sol.world_points) {
            let got = sol.mapping.pixel_to_world(*p);
            assert_relative_eq!(got.x, w.x, epsilon = 1e-6);
            assert_relative_eq!(got.y, w.y, epsilon = 1e-6);
        }
        assert!(signed_area(&sol.world_points) > 0.0);
    }

    #[test]
    fn interior_pixels_round_trip_through_skewed_mapping() {
        // Camera looking obliquely down the reach: far bank compressed.
        let (pixels, distances) = field_example();
        let sol = solve_oblique(&pixels, &distances).unwrap();
        let m = &sol.mapping;
        for i in 0..=8 {
            for j in 0..=8 {
                let (s, t) = (i as f64 / 8.0, j as f64 / 8.0);
                // Bilinear sweep over the control quadrilateral.
                let top = pixels[0].coords.lerp(&pixels[1].coords, s);
                let bottom = pixels[3].coords.lerp(&pixels[2].coords, s);
                let p = Point2::from(top.lerp(&bottom, t));
                let back = m.world_to_pixel(m.pixel_to_world(p));
                assert_relative_eq!(back.x, p.x, epsilon = 1e-6);
                assert_relative_eq!(back.y, p.y, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn bow_tie_order_is_rejected() {
        let (mut pixels, d) = field_example();
        pixels.swap(2, 3);
        let err = solve_oblique(&pixels, &d).unwrap_err();
        assert!(matches!(err, GeometryError::SelfIntersecting { .. }));
    }

    #[test]
    fn impossible_triangle_is_rejected() {
        let d = DistanceConstraints {
            d12: 10.0,
            d23: 1.0,
            d34: 10.0,
            d41: 1.0,
            d13: 1.0,
            d24: 1.0,
        };
        assert!(matches!(
            place_quadrilateral(&d, true),
            Err(GeometryError::InputValidation(_))
        ));
    }

    #[test]
    fn non_positive_distance_is_rejected() {
        let (_, mut d) = field_example();
        d.d13 = 0.0;
        assert!(place_quadrilateral(&d, true).is_err());
    }
}
