//! Surface velocimetry by windowed cross-correlation.
//!
//! A [`PivEngine`] lays a fixed interrogation grid over a masked region and
//! estimates pixel displacements between frames:
//!
//! 1. frames are reduced to correlation planes (luma or per-channel,
//!    optionally CLAHE-equalized),
//! 2. each window is matched by zero-normalized cross-correlation with a
//!    Gaussian sub-pixel peak fit,
//! 3. the field is cleaned by a neighbourhood standard-deviation filter and
//!    the normalized median test,
//! 4. with `multipass`, the gap-filled field predicts a second pass with a
//!    smaller window.
//!
//! [`PivEngine::run_test`] handles one pair; [`PivEngine::run_analyze_all`]
//! runs every consecutive pair of a [`FrameSource`] in parallel and reduces
//! the series to robust per-point statistics.
//!
//! ```no_run
//! use river_piv::{BoundingBox, CancelToken, Frame, PivEngine, PivParams, RegionMask};
//!
//! # fn frames() -> Vec<Frame> { Vec::new() }
//! let frames = frames();
//! let mask = RegionMask::full(1920, 1080);
//! let engine = PivEngine::new(PivParams::default(), mask, BoundingBox::new(0, 300, 1920, 400))?;
//! let result = engine.run_analyze_all(&frames, &CancelToken::new())?;
//! println!("{} points, {} pairs", result.len(), result.pairs_evaluated);
//! # Ok::<(), river_piv::PivError>(())
//! ```

mod cancel;
mod correlation;
mod engine;
mod error;
mod filters;
mod frame;
mod grid;
mod params;
mod preprocess;
mod result;
pub mod stats;

pub use cancel::CancelToken;
pub use correlation::{gaussian_subpixel, match_window, WindowMatch, WindowSpec};
pub use engine::PivEngine;
pub use error::{CorrelationFailure, PivError};
pub use filters::{fill_missing, normalized_median_test, standard_filter, VectorField};
pub use frame::{Frame, FrameError, FrameSource};
pub use grid::{BoundingBox, InterrogationGrid, RegionMask};
pub use params::PivParams;
pub use preprocess::{clahe, mean_gradient, prepare_frame, Integral, Plane, PreparedFrame};
pub use result::{AnalysisResult, PairStats, TestResult};
