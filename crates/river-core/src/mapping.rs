//! Pixel ↔ world transformations produced by calibration.
//!
//! Two calibrations exist and are stored as one tagged union:
//!
//! - [`PlanarMapping`]: a 3×3 homography valid for a single world plane.
//! - [`CameraModel`]: a full 3×4 projection; inverting a pixel requires the
//!   elevation of the plane the ray is intersected with.
//!
//! ```json
//! {"kind": "planar", "matrix": [[...], [...], [...]]}
//! {"kind": "camera", "projection": [[...], [...], [...]], "camera_position": [x, y, z],
//!  "mean_error": 0.8, "point_indices": [0, 1, 2, 4, 5, 7]}
//! ```

use crate::{warp_perspective_gray, GeometryError, GrayImage, GrayImageView, Homography};
use nalgebra::{Matrix2, Matrix3, Matrix3x4, Point2, Point3, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// Homography between image pixels and a world plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanarRecord", into = "PlanarRecord")]
pub struct PlanarMapping {
    to_world: Homography,
    to_pixel: Homography,
}

#[derive(Serialize, Deserialize)]
struct PlanarRecord {
    matrix: [[f64; 3]; 3],
}

impl TryFrom<PlanarRecord> for PlanarMapping {
    type Error = GeometryError;

    fn try_from(value: PlanarRecord) -> Result<Self, Self::Error> {
        Self::from_matrix(value.matrix)
    }
}

impl From<PlanarMapping> for PlanarRecord {
    fn from(value: PlanarMapping) -> Self {
        Self {
            matrix: value.matrix(),
        }
    }
}

/// Rectified top-down raster of the world plane.
#[derive(Clone, Debug)]
pub struct Orthophoto {
    pub image: GrayImage,
    /// `[east_min, east_max, north_min, north_max]` in world units.
    pub extent: [f64; 4],
    /// World units per raster pixel.
    pub resolution: f64,
}

impl PlanarMapping {
    /// Wrap a pixel → world homography; fails if it is not invertible.
    pub fn new(to_world: Homography) -> Result<Self, GeometryError> {
        let to_pixel = to_world.inverse().ok_or_else(|| {
            GeometryError::degenerate("pixel-to-world homography is singular", f64::INFINITY)
        })?;
        Ok(Self { to_world, to_pixel })
    }

    pub fn from_matrix(matrix: [[f64; 3]; 3]) -> Result<Self, GeometryError> {
        if matrix.iter().flatten().any(|v| !v.is_finite()) {
            return Err(GeometryError::InputValidation(
                "transformation matrix contains non-finite entries".into(),
            ));
        }
        Self::new(Homography::from_array(matrix))
    }

    /// Row-major pixel → world matrix.
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        self.to_world.to_array()
    }

    pub fn homography(&self) -> &Homography {
        &self.to_world
    }

    #[inline]
    pub fn pixel_to_world(&self, pixel: Point2<f64>) -> Point2<f64> {
        self.to_world.apply(pixel)
    }

    #[inline]
    pub fn world_to_pixel(&self, world: Point2<f64>) -> Point2<f64> {
        self.to_pixel.apply(world)
    }

    /// Mean world length of a one-pixel step at `pixel` (metres per pixel).
    pub fn ground_sampling_distance(&self, pixel: Point2<f64>) -> f64 {
        let w0 = self.pixel_to_world(pixel);
        let wx = self.pixel_to_world(pixel + Vector2::new(1.0, 0.0));
        let wy = self.pixel_to_world(pixel + Vector2::new(0.0, 1.0));
        0.5 * ((wx - w0).norm() + (wy - w0).norm())
    }

    /// Resample `src` onto a north-up world grid covering `extent` at
    /// `resolution` world units per pixel.
    pub fn orthorectify(
        &self,
        src: &GrayImageView<'_>,
        extent: [f64; 4],
        resolution: f64,
    ) -> Result<Orthophoto, GeometryError> {
        let [e0, e1, n0, n1] = extent;
        if !(resolution.is_finite() && resolution > 0.0) || e1 <= e0 || n1 <= n0 {
            return Err(GeometryError::InputValidation(format!(
                "invalid orthophoto extent {extent:?} at resolution {resolution}"
            )));
        }
        let out_w = ((e1 - e0) / resolution).ceil() as usize;
        let out_h = ((n1 - n0) / resolution).ceil() as usize;

        // Raster (col, row) → world (east, north), north up.
        let raster_to_world = Matrix3::new(
            resolution, 0.0, e0, //
            0.0, -resolution, n1, //
            0.0, 0.0, 1.0,
        );
        let h = Homography::new(self.to_pixel.h * raster_to_world);
        Ok(Orthophoto {
            image: warp_perspective_gray(src, &h, out_w, out_h),
            extent,
            resolution,
        })
    }
}

/// Calibrated pinhole camera as a DLT projection matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CameraRecord", into = "CameraRecord")]
pub struct CameraModel {
    pub projection: Matrix3x4<f64>,
    pub camera_position: Point3<f64>,
    /// Mean reprojection error in pixels over `point_indices`.
    pub mean_error: f64,
    /// Original indices of the control points the model was fitted on.
    pub point_indices: Vec<usize>,
}

#[derive(Serialize, Deserialize)]
struct CameraRecord {
    projection: [[f64; 4]; 3],
    camera_position: [f64; 3],
    mean_error: f64,
    #[serde(default)]
    point_indices: Vec<usize>,
}

impl TryFrom<CameraRecord> for CameraModel {
    type Error = GeometryError;

    fn try_from(value: CameraRecord) -> Result<Self, Self::Error> {
        let flat: Vec<f64> = value.projection.iter().flatten().copied().collect();
        if flat.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::InputValidation(
                "projection matrix contains non-finite entries".into(),
            ));
        }
        let [x, y, z] = value.camera_position;
        Ok(Self {
            projection: Matrix3x4::from_row_slice(&flat),
            camera_position: Point3::new(x, y, z),
            mean_error: value.mean_error,
            point_indices: value.point_indices,
        })
    }
}

impl From<CameraModel> for CameraRecord {
    fn from(value: CameraModel) -> Self {
        let p = value.projection;
        let row = |r: usize| [p[(r, 0)], p[(r, 1)], p[(r, 2)], p[(r, 3)]];
        Self {
            projection: [row(0), row(1), row(2)],
            camera_position: [
                value.camera_position.x,
                value.camera_position.y,
                value.camera_position.z,
            ],
            mean_error: value.mean_error,
            point_indices: value.point_indices,
        }
    }
}

impl CameraModel {
    /// Project a world point to pixels.
    pub fn project(&self, world: Point3<f64>) -> Point2<f64> {
        project(&self.projection, world)
    }

    /// Intersect the ray through `pixel` with the horizontal plane
    /// `Z = elevation`.
    pub fn pixel_to_world(
        &self,
        pixel: Point2<f64>,
        elevation: f64,
    ) -> Result<Point3<f64>, GeometryError> {
        let p = &self.projection;
        let a: Vector4<f64> = p.row(0).transpose() - pixel.x * p.row(2).transpose();
        let b: Vector4<f64> = p.row(1).transpose() - pixel.y * p.row(2).transpose();
        let m = Matrix2::new(a[0], a[1], b[0], b[1]);
        let rhs = -Vector2::new(a[2] * elevation + a[3], b[2] * elevation + b[3]);
        let scale = m.abs().max().max(f64::MIN_POSITIVE);
        if m.determinant().abs() <= 1e-12 * scale * scale {
            return Err(GeometryError::RayParallelToPlane {
                x: pixel.x,
                y: pixel.y,
                elevation,
            });
        }
        let xy = m
            .try_inverse()
            .map(|inv| inv * rhs)
            .ok_or(GeometryError::RayParallelToPlane {
                x: pixel.x,
                y: pixel.y,
                elevation,
            })?;
        Ok(Point3::new(xy[0], xy[1], elevation))
    }
}

pub(crate) fn project(projection: &Matrix3x4<f64>, world: Point3<f64>) -> Point2<f64> {
    let v: Vector3<f64> = projection * world.to_homogeneous();
    Point2::new(v[0] / v[2], v[1] / v[2])
}

/// Either calibration, tagged by `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformationMapping {
    Planar(PlanarMapping),
    Camera(CameraModel),
}

impl From<PlanarMapping> for TransformationMapping {
    fn from(value: PlanarMapping) -> Self {
        Self::Planar(value)
    }
}

impl From<CameraModel> for TransformationMapping {
    fn from(value: CameraModel) -> Self {
        Self::Camera(value)
    }
}

impl TransformationMapping {
    /// Map a pixel to planar world coordinates.
    ///
    /// The camera variant needs the elevation of the target plane (usually
    /// the water surface); the planar variant ignores it.
    pub fn pixel_to_world(
        &self,
        pixel: Point2<f64>,
        elevation: Option<f64>,
    ) -> Result<Point2<f64>, GeometryError> {
        match self {
            Self::Planar(m) => Ok(m.pixel_to_world(pixel)),
            Self::Camera(c) => {
                let z = elevation.ok_or(GeometryError::ElevationRequired)?;
                c.pixel_to_world(pixel, z).map(|p| Point2::new(p.x, p.y))
            }
        }
    }

    pub fn world_to_pixel(
        &self,
        world: Point2<f64>,
        elevation: Option<f64>,
    ) -> Result<Point2<f64>, GeometryError> {
        match self {
            Self::Planar(m) => Ok(m.world_to_pixel(world)),
            Self::Camera(c) => {
                let z = elevation.ok_or(GeometryError::ElevationRequired)?;
                Ok(c.project(Point3::new(world.x, world.y, z)))
            }
        }
    }

    /// Metres per pixel at `pixel` on the mapped plane.
    pub fn ground_sampling_distance(
        &self,
        pixel: Point2<f64>,
        elevation: Option<f64>,
    ) -> Result<f64, GeometryError> {
        let w0 = self.pixel_to_world(pixel, elevation)?;
        let wx = self.pixel_to_world(pixel + Vector2::new(1.0, 0.0), elevation)?;
        let wy = self.pixel_to_world(pixel + Vector2::new(0.0, 1.0), elevation)?;
        Ok(0.5 * ((wx - w0).norm() + (wy - w0).norm()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scaled() -> PlanarMapping {
        PlanarMapping::from_matrix([[0.1, 0.0, 0.0], [0.0, -0.1, 50.0], [0.0, 0.0, 1.0]]).unwrap()
    }

    #[test]
    fn planar_serializes_with_kind_tag() {
        let m = TransformationMapping::from(scaled());
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["kind"], "planar");
        assert_eq!(json["matrix"][1][2], 50.0);

        let back: TransformationMapping = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn singular_matrix_is_rejected_on_load() {
        let raw = r#"{"kind":"planar","matrix":[[1,0,0],[2,0,0],[0,0,1]]}"#;
        assert!(serde_json::from_str::<TransformationMapping>(raw).is_err());
    }

    #[test]
    fn ground_sampling_distance_matches_scale() {
        let m = scaled();
        assert_relative_eq!(
            m.ground_sampling_distance(Point2::new(10.0, 10.0)),
            0.1,
            epsilon = 1e-12
        );
    }

    #[test]
    fn camera_variant_requires_elevation() {
        let cam = CameraModel {
            projection: Matrix3x4::new(
                1000.0, 0.0, 500.0, 0.0, //
                0.0, 1000.0, 400.0, 0.0, //
                0.0, 0.0, 1.0, 10.0,
            ),
            camera_position: Point3::new(0.0, 0.0, -10.0),
            mean_error: 0.0,
            point_indices: vec![],
        };
        let m = TransformationMapping::Camera(cam.clone());
        assert_eq!(
            m.pixel_to_world(Point2::new(1.0, 1.0), None),
            Err(GeometryError::ElevationRequired)
        );

        let w = Point3::new(1.5, -2.0, 3.0);
        let px = cam.project(w);
        let back = cam.pixel_to_world(px, 3.0).unwrap();
        assert_relative_eq!(back.x, w.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, w.y, epsilon = 1e-9);
    }

    #[test]
    fn orthophoto_has_requested_size() {
        let src = GrayImage::from_fn(100, 100, |x, _| x as u8);
        let ortho = scaled()
            .orthorectify(&src.view(), [0.0, 10.0, 40.0, 50.0], 0.5)
            .unwrap();
        assert_eq!(ortho.image.width, 20);
        assert_eq!(ortho.image.height, 20);
    }
}
