//! Cross-section geometry and discharge integration.
//!
//! A [`CrossSection`] joins two bank points, a water level and a surveyed
//! [`Bathymetry`]. It is discretized into [`Station`]s whose quadrature
//! widths follow the trapezoidal rule. [`integrate`] pools the velocimetry
//! series at the stations, fills gaps and returns a [`DischargeSummary`].
//!
//! [`SectionRoi`] derives the image mask and bounding box that restrict
//! velocimetry to a band around the section.

mod bathymetry;
mod discharge;
mod error;
mod roi;
mod section;

pub use bathymetry::Bathymetry;
pub use discharge::{
    fill_gaps, integrate, sample_stations, station_velocities, summarize, DischargeParams,
    DischargeSummary, StationSamples, StationVelocity,
};
pub use error::{DischargeError, SectionError};
pub use roi::{point_in_polygon, SectionRoi};
pub use section::{CrossSection, SectionRecord, Station};
