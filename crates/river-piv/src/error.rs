use crate::FrameError;

/// Errors that abort a velocimetry run.
#[derive(thiserror::Error, Debug)]
pub enum PivError {
    #[error("analysis region is empty: {0}")]
    EmptyRegion(String),
    #[error("invalid PIV parameters: {0}")]
    InvalidParams(String),
    #[error("need at least 2 frames, got {0}")]
    NotEnoughFrames(usize),
    #[error("mask is {mask_width}x{mask_height} but frames are {frame_width}x{frame_height}")]
    MaskMismatch {
        mask_width: usize,
        mask_height: usize,
        frame_width: usize,
        frame_height: usize,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Why a single interrogation window produced no displacement.
///
/// These never abort a run; they become missing samples and are counted.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum CorrelationFailure {
    #[error("no usable correlation peak (best {peak:.3})")]
    PeakMissing { peak: f64 },
    #[error("window lacks texture (std {std:.3})")]
    LowSeeding { std: f64 },
    #[error("window centered at ({x}, {y}) leaves the frame")]
    OutOfBounds { x: usize, y: usize },
}
