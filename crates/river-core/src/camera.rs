//! Fixed-station camera calibration from 3D ground control points.
//!
//! A normalized direct linear transform estimates the 3×4 projection `P`
//! from six or more non-coplanar correspondences. With `optimize` enabled,
//! every subset of at least six points is fitted and the one with the
//! lowest mean reprojection error wins; this is how gross digitizing
//! mistakes get voted out without a robust estimator.

use crate::homography::MAX_CONDITION_NUMBER;
use crate::mapping::project;
use crate::{CameraModel, CorrespondenceSet, GeometryError};
use nalgebra::{DMatrix, Matrix3, Matrix3x4, Matrix4, Point2, Point3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Minimum number of correspondences for the DLT.
pub const MIN_CAMERA_POINTS: usize = 6;

/// Largest set accepted for the exhaustive subset search.
pub const MAX_OPTIMIZE_POINTS: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSolveOptions {
    /// Search all subsets of size ≥ 6 for the lowest reprojection error.
    pub optimize: bool,
}

fn normalize_points_2d(points: &[Point2<f64>]) -> Option<(Vec<Point2<f64>>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if !(mean_dist > f64::EPSILON) {
        return None;
    }
    let s = (2.0_f64).sqrt() / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = points
        .iter()
        .map(|p| Point2::new((p.x - cx) * s, (p.y - cy) * s))
        .collect();
    Some((out, t))
}

fn normalize_points_3d(points: &[Point3<f64>]) -> Option<(Vec<Point3<f64>>, Matrix4<f64>)> {
    let n = points.len() as f64;
    let c = points
        .iter()
        .fold(Point3::origin().coords, |acc, p| acc + p.coords)
        / n;
    let mean_dist = points.iter().map(|p| (p.coords - c).norm()).sum::<f64>() / n;
    if !(mean_dist > f64::EPSILON) {
        return None;
    }
    let s = (3.0_f64).sqrt() / mean_dist;
    #[rustfmt::skip]
    let t = Matrix4::new(
        s, 0.0, 0.0, -s * c.x,
        0.0, s, 0.0, -s * c.y,
        0.0, 0.0, s, -s * c.z,
        0.0, 0.0, 0.0, 1.0,
    );
    let out = points
        .iter()
        .map(|p| Point3::from((p.coords - c) * s))
        .collect();
    Some((out, t))
}

/// Estimate `P` such that `pixel ~ P * [X Y Z 1]`, defined up to scale.
pub fn dlt_projection(
    world: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Result<Matrix3x4<f64>, GeometryError> {
    let n = world.len();
    if n != image.len() {
        return Err(GeometryError::MismatchedLengths {
            pixels: image.len(),
            world: n,
        });
    }
    if n < MIN_CAMERA_POINTS {
        return Err(GeometryError::InsufficientPoints {
            required: MIN_CAMERA_POINTS,
            got: n,
        });
    }

    let degenerate = || GeometryError::degenerate("control points coincide", f64::INFINITY);
    let (world_n, t_w) = normalize_points_3d(world).ok_or_else(degenerate)?;
    let (image_n, t_i) = normalize_points_2d(image).ok_or_else(degenerate)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (pw, pi)) in world_n.iter().zip(&image_n).enumerate() {
        let (x, y, z) = (pw.x, pw.y, pw.z);
        let (u, v) = (pi.x, pi.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -u * x;
        a[(r0, 9)] = -u * y;
        a[(r0, 10)] = -u * z;
        a[(r0, 11)] = -u;

        a[(r1, 4)] = x;
        a[(r1, 5)] = y;
        a[(r1, 6)] = z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -v * x;
        a[(r1, 9)] = -v * y;
        a[(r1, 10)] = -v * z;
        a[(r1, 11)] = -v;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| GeometryError::degenerate("SVD did not converge", f64::INFINITY))?;

    // A unique solution leaves exactly one vanishing singular value; coplanar
    // or collinear points leave several.
    let mut sv: Vec<f64> = svd.singular_values.iter().copied().collect();
    sv.sort_by(|a, b| b.total_cmp(a));
    let condition = if sv[10] > 0.0 {
        sv[0] / sv[10]
    } else {
        f64::INFINITY
    };
    if !(condition <= MAX_CONDITION_NUMBER) {
        return Err(GeometryError::degenerate(
            "control points are coplanar or collinear",
            condition,
        ));
    }

    let row = svd.singular_values.imin();
    let mut p_norm = Matrix3x4::<f64>::zeros();
    for r in 0..3 {
        for c in 0..4 {
            p_norm[(r, c)] = v_t[(row, 4 * r + c)];
        }
    }

    let t_i_inv = t_i
        .try_inverse()
        .ok_or_else(|| GeometryError::degenerate("image normalization", f64::INFINITY))?;
    Ok(t_i_inv * p_norm * t_w)
}

/// World position of the projection center: `C = -M⁻¹ p₄`.
pub fn camera_center(projection: &Matrix3x4<f64>) -> Result<Point3<f64>, GeometryError> {
    let m = projection.fixed_view::<3, 3>(0, 0).into_owned();
    let m_inv = m.try_inverse().ok_or_else(|| {
        GeometryError::degenerate("projection has a singular left 3×3 block", f64::INFINITY)
    })?;
    Ok(Point3::from(-(m_inv * projection.column(3))))
}

/// Mean Euclidean reprojection error in pixels.
pub fn mean_reprojection_error(
    projection: &Matrix3x4<f64>,
    set: &CorrespondenceSet<Point3<f64>>,
) -> f64 {
    if set.is_empty() {
        return 0.0;
    }
    let sum: f64 = set
        .points()
        .iter()
        .map(|c| (project(projection, c.world) - c.pixel).norm())
        .sum();
    sum / set.len() as f64
}

fn fit(set: &CorrespondenceSet<Point3<f64>>) -> Result<(Matrix3x4<f64>, f64), GeometryError> {
    let p = dlt_projection(&set.world(), &set.pixels())?;
    let err = mean_reprojection_error(&p, set);
    if !err.is_finite() {
        return Err(GeometryError::degenerate(
            "projection sends a control point to infinity",
            f64::INFINITY,
        ));
    }
    Ok((p, err))
}

/// Subsets whose errors differ by less than this (pixels) are ranked as
/// equally good.
pub const ERROR_TIE_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq)]
struct Candidate {
    error: f64,
    positions: Vec<usize>,
}

/// Among equally good candidates: the larger subset, then the smallest indices.
fn rank_tied(a: &Candidate, b: &Candidate) -> Ordering {
    b.positions
        .len()
        .cmp(&a.positions.len())
        .then_with(|| a.positions.cmp(&b.positions))
}

/// Lowest error within [`ERROR_TIE_TOLERANCE`], ties broken by [`rank_tied`].
fn select_best(candidates: Vec<Candidate>) -> Option<Candidate> {
    let lowest = candidates
        .iter()
        .map(|c| c.error)
        .min_by(|a, b| a.total_cmp(b))?;
    candidates
        .into_iter()
        .filter(|c| c.error <= lowest + ERROR_TIE_TOLERANCE)
        .min_by(rank_tied)
}

/// Advance `combo` to the next k-combination of `0..n` in lexicographic
/// order; returns `false` once exhausted.
fn next_combination(combo: &mut [usize], n: usize) -> bool {
    let k = combo.len();
    let mut i = k;
    while i > 0 {
        i -= 1;
        if combo[i] < n - k + i {
            combo[i] += 1;
            for j in i + 1..k {
                combo[j] = combo[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

fn all_subsets(n: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    for k in MIN_CAMERA_POINTS..=n {
        let mut combo: Vec<usize> = (0..k).collect();
        loop {
            out.push(combo.clone());
            if !next_combination(&mut combo, n) {
                break;
            }
        }
    }
    out
}

/// Calibrate a camera from 3D ground control points.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(set), fields(points = set.len()))
)]
pub fn solve_camera(
    set: &CorrespondenceSet<Point3<f64>>,
    options: CameraSolveOptions,
) -> Result<CameraModel, GeometryError> {
    let n = set.len();
    if n < MIN_CAMERA_POINTS {
        return Err(GeometryError::InsufficientPoints {
            required: MIN_CAMERA_POINTS,
            got: n,
        });
    }
    if options.optimize && n > MAX_OPTIMIZE_POINTS {
        return Err(GeometryError::InputValidation(format!(
            "subset search supports at most {MAX_OPTIMIZE_POINTS} points, got {n}"
        )));
    }

    // The full set must be solvable even when a subset ends up winning.
    let (full_p, full_err) = fit(set)?;
    let (projection, mean_error, positions) = if options.optimize && n > MIN_CAMERA_POINTS {
        let subsets = all_subsets(n);
        log::debug!("evaluating {} control point subsets", subsets.len());
        let candidates: Vec<Candidate> = subsets
            .into_par_iter()
            .filter_map(|positions| {
                let (_, error) = fit(&set.subset(&positions)).ok()?;
                Some(Candidate { error, positions })
            })
            .collect();
        match select_best(candidates) {
            Some(c) if c.positions.len() < n => {
                let (p, err) = fit(&set.subset(&c.positions))?;
                (p, err, c.positions)
            }
            _ => (full_p, full_err, (0..n).collect()),
        }
    } else {
        (full_p, full_err, (0..n).collect())
    };

    let camera_position = camera_center(&projection)?;
    let point_indices: Vec<usize> = positions
        .iter()
        .map(|&i| set.points()[i].index)
        .collect();
    log::info!(
        "camera calibrated on {}/{} points, mean reprojection error {:.3} px (all points: {:.3} px)",
        point_indices.len(),
        n,
        mean_error,
        full_err
    );

    Ok(CameraModel {
        projection,
        camera_position,
        mean_error,
        point_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Vector2};

    struct Scene {
        projection: Matrix3x4<f64>,
        center: Point3<f64>,
        world: Vec<Point3<f64>>,
    }

    fn scene() -> Scene {
        let k = Matrix3::new(1400.0, 0.0, 960.0, 0.0, 1400.0, 540.0, 0.0, 0.0, 1.0);
        // Looking north and down onto the river from the left bank.
        let r = Rotation3::from_euler_angles(1.9, 0.0, 0.1);
        let center = Point3::new(-5.0, -20.0, 12.0);
        let t = -(r.matrix() * center.coords);
        let mut rt = Matrix3x4::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(r.matrix());
        rt.set_column(3, &t);
        let world = vec![
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(10.0, 2.0, 1.2),
            Point3::new(20.0, 1.0, 0.8),
            Point3::new(2.0, 15.0, 2.5),
            Point3::new(12.0, 18.0, 3.0),
            Point3::new(22.0, 14.0, 2.0),
            Point3::new(6.0, 8.0, 0.2),
            Point3::new(16.0, 9.0, 0.4),
        ];
        Scene {
            projection: k * rt,
            center,
            world,
        }
    }

    fn correspondences(s: &Scene, outlier: Option<usize>) -> CorrespondenceSet<Point3<f64>> {
        let mut pixels: Vec<_> = s.world.iter().map(|w| project(&s.projection, *w)).collect();
        if let Some(i) = outlier {
            pixels[i] += Vector2::new(25.0, -18.0);
        }
        CorrespondenceSet::from_parallel(&pixels, &s.world).unwrap()
    }

    #[test]
    fn dlt_recovers_center_and_reprojects() {
        let s = scene();
        let model = solve_camera(&correspondences(&s, None), CameraSolveOptions::default()).unwrap();
        assert!(model.mean_error < 1e-6);
        assert_relative_eq!(model.camera_position, s.center, epsilon = 1e-5);
        assert_eq!(model.point_indices, (0..8).collect::<Vec<_>>());

        let w = Point3::new(8.0, 6.0, 1.0);
        let px = model.project(w);
        let back = model.pixel_to_world(px, 1.0).unwrap();
        assert_relative_eq!(back, w, epsilon = 1e-6);
    }

    #[test]
    fn optimize_never_worsens_and_drops_outlier() {
        let s = scene();
        let set = correspondences(&s, Some(4));
        let plain = solve_camera(&set, CameraSolveOptions { optimize: false }).unwrap();
        let best = solve_camera(&set, CameraSolveOptions { optimize: true }).unwrap();
        assert!(best.mean_error <= plain.mean_error);
        assert!(best.mean_error < 1e-6);
        assert!(!best.point_indices.contains(&4));
        // Every 6- and 7-point subset without the outlier fits exactly; the
        // largest one wins.
        assert_eq!(best.point_indices, vec![0, 1, 2, 3, 5, 6, 7]);
    }

    #[test]
    fn noise_free_optimize_keeps_every_point() {
        let s = scene();
        let best = solve_camera(&correspondences(&s, None), CameraSolveOptions { optimize: true })
            .unwrap();
        assert_eq!(best.point_indices, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn near_equal_errors_prefer_more_points() {
        let c = |error: f64, positions: &[usize]| Candidate {
            error,
            positions: positions.to_vec(),
        };
        let best = select_best(vec![
            c(2e-12, &[0, 1, 2, 3, 4, 5]),
            c(5e-12, &[0, 1, 2, 3, 4, 5, 6]),
            c(3e-12, &[1, 2, 3, 4, 5, 6]),
        ])
        .unwrap();
        assert_eq!(best.positions, vec![0, 1, 2, 3, 4, 5, 6]);

        let best = select_best(vec![
            c(0.5, &[0, 1, 2, 3, 4, 5, 6]),
            c(0.1, &[0, 1, 2, 3, 4, 6]),
            c(0.1, &[0, 1, 2, 3, 4, 5]),
        ])
        .unwrap();
        assert_eq!(best.positions, vec![0, 1, 2, 3, 4, 5]);
        assert!(select_best(Vec::new()).is_none());
    }

    #[test]
    fn coplanar_points_are_degenerate() {
        let s = scene();
        let flat: Vec<_> = s.world.iter().map(|w| Point3::new(w.x, w.y, 0.0)).collect();
        let pixels: Vec<_> = flat.iter().map(|w| project(&s.projection, *w)).collect();
        let set = CorrespondenceSet::from_parallel(&pixels, &flat).unwrap();
        let err = solve_camera(&set, CameraSolveOptions::default()).unwrap_err();
        assert!(matches!(err, GeometryError::DegenerateGeometry { .. }));
    }

    #[test]
    fn five_points_are_not_enough() {
        let s = scene();
        let set = correspondences(&s, None).subset(&[0, 1, 2, 3, 4]);
        assert_eq!(
            solve_camera(&set, CameraSolveOptions::default()).unwrap_err(),
            GeometryError::InsufficientPoints {
                required: 6,
                got: 5
            }
        );
    }

    #[test]
    fn combinations_are_enumerated_in_order() {
        let mut c = vec![0, 1];
        let mut seen = vec![c.clone()];
        while next_combination(&mut c, 4) {
            seen.push(c.clone());
        }
        assert_eq!(
            seen,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(all_subsets(7).len(), 7 + 1);
    }
}
