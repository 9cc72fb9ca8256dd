//! High-level facade for the `river-*` workspace.
//!
//! This crate provides:
//! - re-exports of the geometry, velocimetry and discharge crates
//! - loaders for the project files shared between pipeline stages
//!   (named section maps, bathymetry references, analysis regions)
//! - (feature `image`) a directory-backed [`piv::FrameSource`] and PNG writers
//! - (feature `cli`) the `river` command-line tool
//!
//! ## Quickstart
//!
//! ```no_run
//! use river::piv::{CancelToken, PivEngine, PivParams};
//! use river::{AnalysisRegion, ImageDirectory};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let region = AnalysisRegion::load_json("region.json")?;
//! let params = PivParams::default();
//! let frames = ImageDirectory::open("frames", params.grayscale)?;
//! let engine = PivEngine::new(params, region.mask, region.bbox)?;
//! let result = engine.run_analyze_all(&frames, &CancelToken::new())?;
//! println!("{} points, {} pairs", result.len(), result.pairs_evaluated);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `river::core`: pixel ↔ world mappings, oblique and camera calibration.
//! - `river::piv`: particle image velocimetry over frame pairs.
//! - `river::discharge`: cross-sections, stations and discharge integration.

pub use river_core as core;
pub use river_discharge as discharge;
pub use river_piv as piv;

pub use river_core::TransformationMapping;
pub use river_discharge::{CrossSection, DischargeParams, DischargeSummary};
pub use river_piv::{AnalysisResult, PivParams, TestResult};

mod error;
mod project;

#[cfg(feature = "image")]
mod frames;

pub use error::RiverError;
pub use project::{
    bathymetry_path, cross_section, load_cross_section, load_cross_sections, load_sections,
    update_pixels, AnalysisRegion, SectionMap, SectionReport,
};

#[cfg(feature = "image")]
pub use frames::{
    frame_from_image, gray_view, load_frame, open_image, save_gray_png, save_mask_png,
    ImageDirectory, FRAME_EXTENSIONS,
};
