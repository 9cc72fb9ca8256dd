/// Errors returned by the geometry solvers and transformation mappings.
///
/// None of these are retried internally: a failed solve never produces a
/// partial mapping.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("mismatched correspondence lengths (pixels={pixels}, world={world})")]
    MismatchedLengths { pixels: usize, world: usize },

    #[error("need at least {required} point correspondences, got {got}")]
    InsufficientPoints { required: usize, got: usize },

    #[error("degenerate point configuration: {reason} (condition number {condition:.3e})")]
    DegenerateGeometry { reason: String, condition: f64 },

    #[error("control points {first} and {second} form crossing edges; check the traversal order")]
    SelfIntersecting { first: usize, second: usize },

    #[error("camera mappings need a target elevation to map pixels to the ground")]
    ElevationRequired,

    #[error("pixel ray ({x:.2}, {y:.2}) does not intersect the plane at elevation {elevation:.3}")]
    RayParallelToPlane { x: f64, y: f64, elevation: f64 },
}

impl GeometryError {
    pub(crate) fn degenerate(reason: impl Into<String>, condition: f64) -> Self {
        Self::DegenerateGeometry {
            reason: reason.into(),
            condition,
        }
    }
}
