//! Project files shared by the pipeline stages: the named section map,
//! bathymetry references and the analysis region.

use crate::RiverError;
use river_core::{load_json, write_json, TransformationMapping};
use river_discharge::{Bathymetry, CrossSection, SectionRecord, SectionRoi, Station};
use river_piv::{BoundingBox, RegionMask};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Cross-sections keyed by name, e.g. `{"section1": {...}}`.
pub type SectionMap = BTreeMap<String, SectionRecord>;

pub fn load_sections(path: impl AsRef<Path>) -> Result<SectionMap, RiverError> {
    let sections: SectionMap = load_json(path.as_ref())?;
    if sections.is_empty() {
        return Err(RiverError::InvalidInput(format!(
            "{} defines no sections",
            path.as_ref().display()
        )));
    }
    Ok(sections)
}

/// Bathymetry path of a record; relative paths are taken from the directory
/// holding the section file.
pub fn bathymetry_path(sections_path: &Path, bath: &str) -> PathBuf {
    let bath = Path::new(bath);
    if bath.is_absolute() {
        return bath.to_path_buf();
    }
    sections_path
        .parent()
        .map(|dir| dir.join(bath))
        .unwrap_or_else(|| bath.to_path_buf())
}

/// Resolve one record into a validated [`CrossSection`].
pub fn cross_section(sections_path: &Path, record: &SectionRecord) -> Result<CrossSection, RiverError> {
    let path = bathymetry_path(sections_path, &record.bath);
    log::debug!("loading bathymetry from {}", path.display());
    let bathymetry = Bathymetry::load_csv(&path)?;
    let section = record.to_cross_section(bathymetry);
    section.validate()?;
    Ok(section)
}

/// Load the section named `name` from a section file.
pub fn load_cross_section(
    sections_path: impl AsRef<Path>,
    name: &str,
) -> Result<CrossSection, RiverError> {
    let sections_path = sections_path.as_ref();
    let sections = load_sections(sections_path)?;
    let record = sections
        .get(name)
        .ok_or_else(|| RiverError::UnknownSection(name.to_string()))?;
    cross_section(sections_path, record)
}

/// Every section of a file, in name order.
pub fn load_cross_sections(
    sections_path: impl AsRef<Path>,
) -> Result<Vec<(String, CrossSection)>, RiverError> {
    let sections_path = sections_path.as_ref();
    load_sections(sections_path)?
        .iter()
        .map(|(name, record)| Ok((name.clone(), cross_section(sections_path, record)?)))
        .collect()
}

/// Refresh the bank pixel positions and lengths of every record.
pub fn update_pixels(
    sections: &SectionMap,
    mapping: &TransformationMapping,
) -> Result<SectionMap, RiverError> {
    sections
        .iter()
        .map(|(name, record)| Ok((name.clone(), record.with_pixels(mapping)?)))
        .collect()
}

/// Discretization and ROI advice for one section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectionReport {
    pub name: String,
    pub length: f64,
    pub wetted_area: f64,
    pub wetted_width: f64,
    /// Band height (metres) spanning the requested window at mid-section.
    pub height_roi: f64,
    pub stations: Vec<Station>,
}

impl SectionReport {
    pub fn new(
        name: &str,
        section: &CrossSection,
        mapping: &TransformationMapping,
        window_px: usize,
    ) -> Result<Self, RiverError> {
        let (wetted_area, wetted_width) = section.bathymetry.wetted_area(section.level);
        Ok(Self {
            name: name.to_string(),
            length: section.length(),
            wetted_area,
            wetted_width,
            height_roi: section.recommend_height_roi(mapping, window_px)?,
            stations: section.stations()?,
        })
    }
}

/// Mask and bounding box restricting velocimetry to the section bands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRegion {
    pub mask: RegionMask,
    pub bbox: BoundingBox,
}

impl AnalysisRegion {
    /// Union of the `height_roi` bands around `sections` on a
    /// `width × height` frame.
    pub fn from_sections<'a>(
        sections: impl IntoIterator<Item = &'a CrossSection>,
        mapping: &TransformationMapping,
        height_roi: f64,
        width: usize,
        height: usize,
    ) -> Result<Self, RiverError> {
        let rois = sections
            .into_iter()
            .map(|s| SectionRoi::new(s, mapping, height_roi, width, height))
            .collect::<Result<Vec<_>, _>>()?;
        let (mask, bbox) = SectionRoi::union(&rois)
            .ok_or_else(|| RiverError::InvalidInput("no sections to build a region from".into()))?;
        if bbox.is_empty() {
            return Err(RiverError::InvalidInput(
                "section bands do not intersect the frame".into(),
            ));
        }
        log::info!(
            "analysis region: {} px in bbox {:?}",
            mask.count(),
            [bbox.x, bbox.y, bbox.width, bbox.height]
        );
        Ok(Self { mask, bbox })
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, RiverError> {
        Ok(load_json(path)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), RiverError> {
        Ok(write_json(self, path)?)
    }
}
