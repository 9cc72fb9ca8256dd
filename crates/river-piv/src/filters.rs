//! Spatial outlier filters and gap filling on a displacement field.
//!
//! Missing samples are `NaN`. Filters decide on the incoming field and
//! apply all rejections at once, so the result does not depend on visit
//! order.

use crate::stats::{mean_std, median};
use crate::InterrogationGrid;

/// Lower bound on the neighbourhood spread used by the standard filter
/// (pixels). Keeps a perfectly uniform field from rejecting sub-pixel noise.
const STD_FLOOR: f64 = 0.1;

/// Minimum valid neighbours before a point can be judged.
const MIN_NEIGHBOURS: usize = 3;

/// Displacement components on an interrogation grid, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorField {
    pub u: Vec<f64>,
    pub v: Vec<f64>,
}

impl VectorField {
    pub fn missing(len: usize) -> Self {
        Self {
            u: vec![f64::NAN; len],
            v: vec![f64::NAN; len],
        }
    }

    #[inline]
    pub fn is_valid(&self, i: usize) -> bool {
        self.u[i].is_finite() && self.v[i].is_finite()
    }

    pub fn valid_count(&self) -> usize {
        (0..self.u.len()).filter(|&i| self.is_valid(i)).count()
    }

    fn reject(&mut self, flagged: &[usize]) {
        for &i in flagged {
            self.u[i] = f64::NAN;
            self.v[i] = f64::NAN;
        }
    }
}

fn neighbour_values(
    field: &VectorField,
    grid: &InterrogationGrid,
    i: usize,
) -> (Vec<f64>, Vec<f64>) {
    grid.neighbours(i)
        .filter(|&j| field.is_valid(j))
        .map(|j| (field.u[j], field.v[j]))
        .unzip()
}

/// Reject samples deviating from their 3×3 neighbourhood mean by more than
/// `threshold` neighbourhood standard deviations. Returns the number
/// rejected.
pub fn standard_filter(field: &mut VectorField, grid: &InterrogationGrid, threshold: f64) -> usize {
    let mut flagged = Vec::new();
    for i in 0..field.u.len() {
        if !field.is_valid(i) {
            continue;
        }
        let (nu, nv) = neighbour_values(field, grid, i);
        if nu.len() < MIN_NEIGHBOURS {
            continue;
        }
        let (mu, su) = mean_std(&nu);
        let (mv, sv) = mean_std(&nv);
        if (field.u[i] - mu).abs() > threshold * su.max(STD_FLOOR)
            || (field.v[i] - mv).abs() > threshold * sv.max(STD_FLOOR)
        {
            flagged.push(i);
        }
    }
    field.reject(&flagged);
    flagged.len()
}

/// Normalized median test (Westerweel & Scarano, 2005): a sample is
/// rejected when `|x - median(N)| / (median(|N - median(N)|) + epsilon)`
/// exceeds `threshold` for either component.
pub fn normalized_median_test(
    field: &mut VectorField,
    grid: &InterrogationGrid,
    threshold: f64,
    epsilon: f64,
) -> usize {
    let residual = |x: f64, mut n: Vec<f64>| {
        let med = median(&mut n);
        let mut dev: Vec<f64> = n.iter().map(|v| (v - med).abs()).collect();
        (x - med).abs() / (median(&mut dev) + epsilon)
    };
    let mut flagged = Vec::new();
    for i in 0..field.u.len() {
        if !field.is_valid(i) {
            continue;
        }
        let (nu, nv) = neighbour_values(field, grid, i);
        if nu.len() < MIN_NEIGHBOURS {
            continue;
        }
        if residual(field.u[i], nu) > threshold || residual(field.v[i], nv) > threshold {
            flagged.push(i);
        }
    }
    field.reject(&flagged);
    flagged.len()
}

/// Fill missing active samples with the median of their valid neighbours,
/// sweeping until nothing changes. Active points that stay unreachable get
/// the field median, or zero when the field is empty.
pub fn fill_missing(field: &VectorField, grid: &InterrogationGrid) -> VectorField {
    let mut out = field.clone();
    loop {
        let mut updates = Vec::new();
        for i in 0..out.u.len() {
            if !grid.active[i] || out.is_valid(i) {
                continue;
            }
            let (mut nu, mut nv) = neighbour_values(&out, grid, i);
            if !nu.is_empty() {
                updates.push((i, median(&mut nu), median(&mut nv)));
            }
        }
        if updates.is_empty() {
            break;
        }
        for (i, u, v) in updates {
            out.u[i] = u;
            out.v[i] = v;
        }
    }

    let mut all_u: Vec<f64> = out.u.iter().copied().filter(|x| x.is_finite()).collect();
    let mut all_v: Vec<f64> = out.v.iter().copied().filter(|x| x.is_finite()).collect();
    let gu = if all_u.is_empty() { 0.0 } else { median(&mut all_u) };
    let gv = if all_v.is_empty() { 0.0 } else { median(&mut all_v) };
    for i in 0..out.u.len() {
        if grid.active[i] && !out.is_valid(i) {
            out.u[i] = gu;
            out.v[i] = gv;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, RegionMask};

    fn grid5() -> InterrogationGrid {
        let mask = RegionMask::full(80, 80);
        InterrogationGrid::new(BoundingBox::new(0, 0, 80, 80), &mask, 16, 16).unwrap()
    }

    fn uniform(grid: &InterrogationGrid, u: f64, v: f64) -> VectorField {
        VectorField {
            u: vec![u; grid.len()],
            v: vec![v; grid.len()],
        }
    }

    #[test]
    fn standard_filter_removes_spike() {
        let grid = grid5();
        let mut f = uniform(&grid, 3.0, 0.0);
        f.u[12] = 9.0;
        assert_eq!(standard_filter(&mut f, &grid, 4.0), 1);
        assert!(!f.is_valid(12));
        assert_eq!(f.valid_count(), 24);
    }

    #[test]
    fn median_test_removes_spike_but_keeps_smooth_gradient() {
        let grid = grid5();
        let mut f = uniform(&grid, 0.0, 0.0);
        for i in 0..grid.len() {
            f.u[i] = (i % grid.cols) as f64 * 0.5;
        }
        assert_eq!(normalized_median_test(&mut f.clone(), &grid, 2.0, 0.3), 0);

        f.v[7] = -6.0;
        assert_eq!(normalized_median_test(&mut f, &grid, 2.0, 0.3), 1);
        assert!(!f.is_valid(7));
    }

    #[test]
    fn fill_reaches_every_active_point() {
        let grid = grid5();
        let mut f = VectorField::missing(grid.len());
        f.u[0] = 2.0;
        f.v[0] = 1.0;
        let filled = fill_missing(&f, &grid);
        assert_eq!(filled.valid_count(), grid.len());
        assert_eq!(filled.u[24], 2.0);
        assert_eq!(filled.v[13], 1.0);
    }
}
