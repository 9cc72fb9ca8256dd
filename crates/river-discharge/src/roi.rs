//! Analysis region around one or more cross-sections.

use crate::CrossSection;
use nalgebra::Point2;
use river_core::{GeometryError, TransformationMapping};
use river_piv::{BoundingBox, RegionMask};

/// Image region covering a band around a cross-section.
#[derive(Clone, Debug, PartialEq)]
pub struct SectionRoi {
    /// Band corners in pixels: left-upstream, right-upstream,
    /// right-downstream, left-downstream.
    pub polygon: Vec<Point2<f64>>,
    pub mask: RegionMask,
    pub bbox: BoundingBox,
}

/// Even-odd point-in-polygon test.
pub fn point_in_polygon(p: Point2<f64>, polygon: &[Point2<f64>]) -> bool {
    let mut inside = false;
    let n = polygon.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn clamped_bbox(polygon: &[Point2<f64>], width: usize, height: usize) -> BoundingBox {
    let (mut x0, mut y0) = (f64::INFINITY, f64::INFINITY);
    let (mut x1, mut y1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in polygon {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    // Tolerate round-off so corners landing on whole pixels stay put.
    const SLACK: f64 = 1e-6;
    let clamp = |v: f64, hi: usize| v.clamp(0.0, hi as f64) as usize;
    let (bx0, by0) = (
        clamp((x0 + SLACK).floor(), width),
        clamp((y0 + SLACK).floor(), height),
    );
    let (bx1, by1) = (
        clamp((x1 - SLACK).ceil(), width),
        clamp((y1 - SLACK).ceil(), height),
    );
    BoundingBox::new(bx0, by0, bx1.saturating_sub(bx0), by1.saturating_sub(by0))
}

impl SectionRoi {
    /// Band of total height `height_roi` metres centred on the section line,
    /// rasterized on a `width × height` image.
    pub fn new(
        section: &CrossSection,
        mapping: &TransformationMapping,
        height_roi: f64,
        width: usize,
        height: usize,
    ) -> Result<Self, GeometryError> {
        if !(height_roi.is_finite() && height_roi > 0.0) {
            return Err(GeometryError::InputValidation(format!(
                "ROI height must be positive, got {height_roi}"
            )));
        }
        let offset = section.downstream() * (0.5 * height_roi);
        let corners = [
            section.left - offset,
            section.right - offset,
            section.right + offset,
            section.left + offset,
        ];
        let polygon = corners
            .iter()
            .map(|&c| mapping.world_to_pixel(c, Some(section.level)))
            .collect::<Result<Vec<_>, _>>()?;
        let mask = RegionMask::from_fn(width, height, |x, y| {
            point_in_polygon(Point2::new(x as f64 + 0.5, y as f64 + 0.5), &polygon)
        });
        let bbox = clamped_bbox(&polygon, width, height);
        Ok(Self {
            polygon,
            mask,
            bbox,
        })
    }

    /// Union of several section bands on the same image.
    ///
    /// Returns `None` for an empty input.
    pub fn union(rois: &[SectionRoi]) -> Option<(RegionMask, BoundingBox)> {
        let first = rois.first()?;
        let (w, h) = (first.mask.width(), first.mask.height());
        let mask = RegionMask::from_fn(w, h, |x, y| rois.iter().any(|r| r.mask.contains(x, y)));
        let bbox = mask
            .bounding_box()
            .unwrap_or_else(|| BoundingBox::new(0, 0, 0, 0));
        Some((mask, bbox))
    }
}
