//! Pixel ↔ world geometry for river surface velocimetry.
//!
//! Three calibrations are supported:
//!
//! - **Nadir**: a camera looking straight down, fixed by one segment of
//!   known world position or a known pixel size ([`solve_nadir`]).
//! - **Oblique**: four control points on the water plane plus the six
//!   distances between them ([`solve_oblique`]).
//! - **Camera**: six or more surveyed 3D points fitted with a DLT, with an
//!   optional exhaustive subset search ([`solve_camera`]).
//!
//! Each produces a [`TransformationMapping`], the single type downstream
//! crates consume. The crate has no notion of images beyond the small
//! grayscale buffers needed for orthorectification.

mod camera;
mod error;
mod homography;
mod image;
mod io;
mod logger;
mod mapping;
mod nadir;
mod oblique;
mod points;

pub use camera::{
    camera_center, dlt_projection, mean_reprojection_error, solve_camera, CameraSolveOptions,
    ERROR_TIE_TOLERANCE, MAX_OPTIMIZE_POINTS, MIN_CAMERA_POINTS,
};
pub use error::GeometryError;
pub use homography::{homography_from_4pt, warp_perspective_gray, Homography, MAX_CONDITION_NUMBER};
pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView};
pub use io::{load_json, write_json, JsonIoError};
pub use mapping::{CameraModel, Orthophoto, PlanarMapping, TransformationMapping};
pub use nadir::{solve_nadir, NadirInput, NadirSolution};
pub use oblique::{
    place_quadrilateral, solve_oblique, solve_oblique_from_world, DistanceConstraints,
    ObliqueInput, ObliqueSolution,
};
pub use points::{
    CorrespondenceSet, GcpTable, PlanarCorrespondence, PointCollector, PointCorrespondence,
    SpatialCorrespondence,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
