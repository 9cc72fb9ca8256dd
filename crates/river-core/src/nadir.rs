//! Nadir (UAV) calibration from a single measured segment.
//!
//! A camera looking straight down sees the water plane up to a similarity:
//! one scale, one rotation and a translation. Two pixel points with their
//! world positions fix all four parameters. The scale may instead be given
//! directly as a ground pixel size, in which case the world segment only
//! sets the orientation.

use crate::homography::Homography;
use crate::{GeometryError, PlanarMapping};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Two pixel points, their world positions and an optional pixel size, as
/// stored on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NadirInput {
    pub pixels: [Point2<f64>; 2],
    pub world: [Point2<f64>; 2],
    /// Ground size of one pixel in metres; derived from the segment when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_size: Option<f64>,
}

/// Result of a nadir calibration.
#[derive(Clone, Debug)]
pub struct NadirSolution {
    pub mapping: PlanarMapping,
    /// Metres per pixel.
    pub pixel_size: f64,
    /// Angle from the image x axis to the world X axis, radians
    /// counterclockwise.
    pub rotation: f64,
}

impl NadirSolution {
    /// World bounds `[x_min, x_max, y_min, y_max]` of a `width x height`
    /// frame.
    pub fn frame_extent(&self, width: u32, height: u32) -> [f64; 4] {
        let (w, h) = (width as f64, height as f64);
        let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
            .map(|(x, y)| self.mapping.pixel_to_world(Point2::new(x, y)));
        corners.iter().fold(
            [
                f64::INFINITY,
                f64::NEG_INFINITY,
                f64::INFINITY,
                f64::NEG_INFINITY,
            ],
            |e, p| [e[0].min(p.x), e[1].max(p.x), e[2].min(p.y), e[3].max(p.y)],
        )
    }
}

fn segment(a: Point2<f64>, b: Point2<f64>, what: &str) -> Result<Vector2<f64>, GeometryError> {
    let d = b - a;
    if !a.coords.iter().chain(b.coords.iter()).all(|v| v.is_finite()) {
        return Err(GeometryError::InputValidation(format!("{what} points must be finite")));
    }
    if d.norm() <= f64::EPSILON * (1.0 + a.coords.norm()) {
        return Err(GeometryError::InputValidation(format!("{what} points coincide")));
    }
    Ok(d)
}

/// Solve the pixel → world similarity of a nadir view.
///
/// Image rows grow downwards while world Y grows upwards, so the map
/// includes a reflection of the pixel y axis.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn solve_nadir(
    pixels: &[Point2<f64>; 2],
    world: &[Point2<f64>; 2],
    pixel_size: Option<f64>,
) -> Result<NadirSolution, GeometryError> {
    let a = segment(pixels[0], pixels[1], "pixel")?;
    let b = segment(world[0], world[1], "world")?;
    // Pixel segment expressed with y pointing up.
    let a = Vector2::new(a.x, -a.y);

    let scale = match pixel_size {
        Some(s) if s.is_finite() && s > 0.0 => s,
        Some(s) => {
            return Err(GeometryError::InputValidation(format!(
                "pixel size must be positive, got {s}"
            )))
        }
        None => b.norm() / a.norm(),
    };
    if pixel_size.is_some() {
        let implied = b.norm() / a.norm();
        if (implied - scale).abs() > 0.05 * scale {
            log::warn!(
                "pixel size {scale:.5} m differs from the segment's {implied:.5} m; using {scale:.5}"
            );
        }
    }

    let rotation = b.y.atan2(b.x) - a.y.atan2(a.x);
    let (sin, cos) = rotation.sin_cos();
    // [x_w, y_w] = s R [x, -y] + t
    let (m00, m01) = (scale * cos, scale * sin);
    let (m10, m11) = (scale * sin, -scale * cos);
    let p = pixels[0];
    let tx = world[0].x - (m00 * p.x + m01 * p.y);
    let ty = world[0].y - (m10 * p.x + m11 * p.y);

    let mapping = PlanarMapping::new(Homography::from_array([
        [m00, m01, tx],
        [m10, m11, ty],
        [0.0, 0.0, 1.0],
    ]))?;
    log::debug!(
        "nadir calibration: {scale:.5} m/px, rotation {:.2} deg",
        rotation.to_degrees()
    );
    Ok(NadirSolution {
        mapping,
        pixel_size: scale,
        rotation,
    })
}
