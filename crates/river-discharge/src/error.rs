use river_core::GeometryError;

/// Problems with a cross-section definition or its bathymetry.
#[derive(thiserror::Error, Debug)]
pub enum SectionError {
    /// The section cannot be evaluated against the surveyed profile: the
    /// level is outside the bed's elevation range, or a station lies outside
    /// the surveyed distances.
    #[error("bathymetry range: {0}")]
    BathymetryRange(String),

    #[error("invalid bathymetry: {0}")]
    InvalidBathymetry(String),

    #[error("invalid cross-section: {0}")]
    InvalidSection(String),

    #[error("failed to read bathymetry: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bathymetry csv: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors that abort a discharge computation.
#[derive(thiserror::Error, Debug)]
pub enum DischargeError {
    #[error(transparent)]
    Section(#[from] SectionError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("invalid input: {0}")]
    InputValidation(String),
}
