use river_core::{GeometryError, JsonIoError};
use river_discharge::{DischargeError, SectionError};
use river_piv::{FrameError, PivError};

/// Errors produced by the facade helpers and the command-line tool.
#[derive(thiserror::Error, Debug)]
pub enum RiverError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Section(#[from] SectionError),

    #[error(transparent)]
    Discharge(#[from] DischargeError),

    #[error(transparent)]
    Piv(#[from] PivError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Json(#[from] JsonIoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "image")]
    #[error("{path}: {source}")]
    Image {
        path: String,
        #[source]
        source: ::image::ImageError,
    },

    #[error("section '{0}' not found")]
    UnknownSection(String),

    #[error("{0}")]
    InvalidInput(String),
}
