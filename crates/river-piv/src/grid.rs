//! Analysis region and the interrogation grid laid over it.

use crate::PivError;
use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle, serialized as `[x, y, width, height]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl TryFrom<[f64; 4]> for BoundingBox {
    type Error = String;

    fn try_from(v: [f64; 4]) -> Result<Self, Self::Error> {
        if v.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(format!("bounding box {v:?} must be finite and non-negative"));
        }
        Ok(Self {
            x: v[0].floor() as usize,
            y: v[1].floor() as usize,
            width: v[2].round() as usize,
            height: v[3].round() as usize,
        })
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x as f64, b.y as f64, b.width as f64, b.height as f64]
    }
}

impl BoundingBox {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Same box clipped to a `width × height` image.
    pub fn clamp_to(&self, width: usize, height: usize) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Binary region mask, serialized as rows of 0/1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<u8>>", into = "Vec<Vec<u8>>")]
pub struct RegionMask {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl TryFrom<Vec<Vec<u8>>> for RegionMask {
    type Error = String;

    fn try_from(rows: Vec<Vec<u8>>) -> Result<Self, Self::Error> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != width) {
            return Err("mask rows differ in length".into());
        }
        let data = rows.into_iter().flatten().map(|v| v != 0).collect();
        Ok(Self {
            width,
            height,
            data,
        })
    }
}

impl From<RegionMask> for Vec<Vec<u8>> {
    fn from(m: RegionMask) -> Self {
        m.data
            .chunks(m.width.max(1))
            .map(|row| row.iter().map(|&b| u8::from(b)).collect())
            .collect()
    }
}

impl RegionMask {
    /// Mask covering the whole image.
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![true; width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> bool) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `false` outside the mask extent.
    #[inline]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.data[y * self.width + x]
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }

    /// Tight bounding box of the set pixels, if any.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let mut x0 = usize::MAX;
        let mut y0 = usize::MAX;
        let mut x1 = 0;
        let mut y1 = 0;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.data[y * self.width + x] {
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x + 1);
                    y1 = y1.max(y + 1);
                }
            }
        }
        (x0 < x1).then(|| BoundingBox::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Fixed grid of window centers for one run.
///
/// Points are stored row-major; `active[i]` is false when the center of
/// point `i` falls outside the mask, in which case it is never evaluated.
#[derive(Clone, Debug, PartialEq)]
pub struct InterrogationGrid {
    pub rows: usize,
    pub cols: usize,
    pub x: Vec<usize>,
    pub y: Vec<usize>,
    pub active: Vec<bool>,
}

impl InterrogationGrid {
    /// Lay windows of size `window` with spacing `step` inside `bbox` so that
    /// every window lies fully within the box.
    pub fn new(
        bbox: BoundingBox,
        mask: &RegionMask,
        window: usize,
        step: usize,
    ) -> Result<Self, PivError> {
        if step == 0 {
            return Err(PivError::InvalidParams("grid step must be positive".into()));
        }
        let centers = |origin: usize, extent: usize| -> Vec<usize> {
            if extent < window {
                return Vec::new();
            }
            (0..=(extent - window) / step)
                .map(|k| origin + window / 2 + k * step)
                .collect()
        };
        let xs = centers(bbox.x, bbox.width);
        let ys = centers(bbox.y, bbox.height);
        if xs.is_empty() || ys.is_empty() {
            return Err(PivError::EmptyRegion(format!(
                "bounding box {}x{} cannot hold a {window} px window",
                bbox.width, bbox.height
            )));
        }

        let mut grid = Self {
            rows: ys.len(),
            cols: xs.len(),
            x: Vec::with_capacity(xs.len() * ys.len()),
            y: Vec::with_capacity(xs.len() * ys.len()),
            active: Vec::with_capacity(xs.len() * ys.len()),
        };
        for &cy in &ys {
            for &cx in &xs {
                grid.x.push(cx);
                grid.y.push(cy);
                grid.active.push(mask.contains(cx, cy));
            }
        }
        if grid.active_count() == 0 {
            return Err(PivError::EmptyRegion(
                "no window center falls inside the mask".into(),
            ));
        }
        Ok(grid)
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    /// Row-major indices of the up to 8 neighbours of point `i`.
    pub fn neighbours(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        let r = (i / self.cols) as isize;
        let c = (i % self.cols) as isize;
        (-1isize..=1)
            .flat_map(move |dr| (-1isize..=1).map(move |dc| (r + dr, c + dc)))
            .filter(move |&(rr, cc)| {
                (rr, cc) != (r, c)
                    && rr >= 0
                    && cc >= 0
                    && (rr as usize) < self.rows
                    && (cc as usize) < self.cols
            })
            .map(move |(rr, cc)| rr as usize * self.cols + cc as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_fits_windows_inside_box() {
        let mask = RegionMask::full(200, 100);
        let grid = InterrogationGrid::new(BoundingBox::new(10, 0, 100, 64), &mask, 32, 16).unwrap();
        assert_eq!(grid.cols, 5);
        assert_eq!(grid.rows, 3);
        assert_eq!(grid.x[0], 26);
        assert_eq!(*grid.x.last().unwrap(), 26 + 4 * 16);
        assert!(grid.x.iter().all(|&x| x + 16 <= 110));
    }

    #[test]
    fn masked_centers_are_inactive() {
        let mask = RegionMask::from_fn(100, 100, |x, _| x < 50);
        let grid = InterrogationGrid::new(BoundingBox::new(0, 0, 100, 100), &mask, 20, 20).unwrap();
        for i in 0..grid.len() {
            assert_eq!(grid.active[i], grid.x[i] < 50);
        }
    }

    #[test]
    fn fully_masked_region_is_empty() {
        let mask = RegionMask::from_fn(64, 64, |_, _| false);
        let err = InterrogationGrid::new(BoundingBox::new(0, 0, 64, 64), &mask, 16, 16).unwrap_err();
        assert!(matches!(err, PivError::EmptyRegion(_)));
    }

    #[test]
    fn corner_point_has_three_neighbours() {
        let mask = RegionMask::full(64, 64);
        let grid = InterrogationGrid::new(BoundingBox::new(0, 0, 64, 64), &mask, 16, 16).unwrap();
        assert_eq!(grid.neighbours(0).count(), 3);
        assert_eq!(grid.neighbours(5).count(), 8);
    }

    #[test]
    fn mask_and_bbox_json_layouts() {
        let mask: RegionMask = serde_json::from_str("[[0,1,1],[0,0,1]]").unwrap();
        assert_eq!(mask.count(), 3);
        assert_eq!(mask.bounding_box(), Some(BoundingBox::new(1, 0, 2, 2)));
        let bbox: BoundingBox = serde_json::from_str("[12.7, 3.0, 99.6, 40]").unwrap();
        assert_eq!(bbox, BoundingBox::new(12, 3, 100, 40));
        assert!(serde_json::from_str::<BoundingBox>("[-1, 0, 4, 4]").is_err());
    }
}
