//! Zero-normalized cross-correlation of one interrogation window.
//!
//! The frame-A window is compared against every frame-B window displaced by
//! an integer offset within `radius` of the predictor. Frame-B statistics
//! come from summed-area tables, so each candidate costs one dot product.

use crate::preprocess::PreparedFrame;
use crate::CorrelationFailure;

/// Settings for one correlation pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowSpec {
    pub size: usize,
    pub radius: usize,
    pub min_correlation: f64,
    pub min_seeding_std: f64,
    /// Pick the peak on a 3×3 box-smoothed plane.
    pub smooth_peak: bool,
}

/// Displacement of one window in pixels, with its ZNCC peak score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowMatch {
    pub u: f64,
    pub v: f64,
    pub peak: f64,
}

struct Template {
    values: Vec<f32>,
    norm: f64,
}

fn template(plane: &crate::Plane, x0: usize, y0: usize, size: usize) -> Template {
    let n = (size * size) as f64;
    let mut sum = 0.0f64;
    for y in y0..y0 + size {
        let row = &plane.data[plane.idx(x0, y)..plane.idx(x0, y) + size];
        sum += row.iter().map(|&v| v as f64).sum::<f64>();
    }
    let mean = (sum / n) as f32;
    let mut values = Vec::with_capacity(size * size);
    let mut sq = 0.0f64;
    for y in y0..y0 + size {
        let row = &plane.data[plane.idx(x0, y)..plane.idx(x0, y) + size];
        for &v in row {
            let d = v - mean;
            sq += (d as f64) * (d as f64);
            values.push(d);
        }
    }
    Template {
        values,
        norm: sq.sqrt(),
    }
}

/// ZNCC of the template against the frame-B window at `(x0, y0)`.
fn zncc(
    t: &Template,
    plane: &crate::Plane,
    integral: &crate::preprocess::Integral,
    x0: usize,
    y0: usize,
    size: usize,
) -> f64 {
    let n = (size * size) as f64;
    let (s, ss) = integral.block(x0, y0, size);
    let var = ss - s * s / n;
    if var <= 1e-9 * n {
        return 0.0;
    }
    let mut num = 0.0f64;
    for (r, y) in (y0..y0 + size).enumerate() {
        let row = &plane.data[plane.idx(x0, y)..plane.idx(x0, y) + size];
        let trow = &t.values[r * size..(r + 1) * size];
        let dot: f32 = trow.iter().zip(row).map(|(a, b)| a * b).sum();
        num += dot as f64;
    }
    num / (t.norm * var.sqrt())
}

/// 3-point Gaussian peak offset, falling back to a parabola when any of
/// the samples is non-positive. Clamped to ±0.5.
pub fn gaussian_subpixel(minus: f64, center: f64, plus: f64) -> f64 {
    let offset = if minus > 0.0 && center > 0.0 && plus > 0.0 {
        let (lm, l0, lp) = (minus.ln(), center.ln(), plus.ln());
        let den = 2.0 * (lm - 2.0 * l0 + lp);
        if den.abs() > 1e-12 {
            (lm - lp) / den
        } else {
            0.0
        }
    } else {
        let den = 2.0 * (minus - 2.0 * center + plus);
        if den.abs() > 1e-12 {
            (minus - plus) / den
        } else {
            0.0
        }
    };
    offset.clamp(-0.5, 0.5)
}

fn smooth3(plane: &[f64], side: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; plane.len()];
    for y in 0..side {
        for x in 0..side {
            let mut acc = 0.0;
            let mut k = 0usize;
            for yy in y.saturating_sub(1)..(y + 2).min(side) {
                for xx in x.saturating_sub(1)..(x + 2).min(side) {
                    let v = plane[yy * side + xx];
                    if v.is_finite() {
                        acc += v;
                        k += 1;
                    }
                }
            }
            if plane[y * side + x].is_finite() && k > 0 {
                out[y * side + x] = acc / k as f64;
            }
        }
    }
    out
}

/// Displacement of the window centered at `(cx, cy)` from frame A to B.
///
/// `predictor` is the expected displacement; the search covers integer
/// offsets within `spec.radius` of its rounded value.
pub fn match_window(
    a: &PreparedFrame,
    b: &PreparedFrame,
    cx: usize,
    cy: usize,
    predictor: (f64, f64),
    spec: &WindowSpec,
) -> Result<WindowMatch, CorrelationFailure> {
    let size = spec.size;
    let half = size / 2;
    let (w, h) = (a.width(), a.height());
    if cx < half || cy < half || cx - half + size > w || cy - half + size > h {
        return Err(CorrelationFailure::OutOfBounds { x: cx, y: cy });
    }
    let (ax0, ay0) = (cx - half, cy - half);

    let mut templates = Vec::with_capacity(a.planes.len());
    let mut best_std = 0.0f64;
    for plane in &a.planes {
        let t = template(plane, ax0, ay0, size);
        best_std = best_std.max(t.norm / size as f64);
        templates.push(t);
    }
    if best_std < spec.min_seeding_std || best_std <= f64::EPSILON {
        return Err(CorrelationFailure::LowSeeding { std: best_std });
    }

    let (px, py) = (predictor.0.round() as isize, predictor.1.round() as isize);
    let r = spec.radius as isize;
    let side = 2 * spec.radius + 1;
    let mut plane = vec![f64::NAN; side * side];
    for dy in -r..=r {
        for dx in -r..=r {
            let bx0 = ax0 as isize + px + dx;
            let by0 = ay0 as isize + py + dy;
            if bx0 < 0 || by0 < 0 || bx0 as usize + size > w || by0 as usize + size > h {
                continue;
            }
            let mut acc = 0.0;
            let mut k = 0usize;
            for ((t, bp), bi) in templates.iter().zip(&b.planes).zip(&b.integrals) {
                if t.norm <= f64::EPSILON {
                    continue;
                }
                acc += zncc(t, bp, bi, bx0 as usize, by0 as usize, size);
                k += 1;
            }
            if k > 0 {
                plane[((dy + r) as usize) * side + (dx + r) as usize] = acc / k as f64;
            }
        }
    }

    let search = if spec.smooth_peak {
        smooth3(&plane, side)
    } else {
        plane.clone()
    };
    let best = search
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i);
    let Some(best) = best else {
        return Err(CorrelationFailure::PeakMissing { peak: f64::NAN });
    };
    let (bx, by) = (best % side, best / side);
    let peak = plane[best];
    if peak < spec.min_correlation {
        return Err(CorrelationFailure::PeakMissing { peak });
    }
    if bx == 0 || by == 0 || bx == side - 1 || by == side - 1 {
        return Err(CorrelationFailure::PeakMissing { peak });
    }
    let at = |x: usize, y: usize| plane[y * side + x];
    let (left, right, up, down) = (at(bx - 1, by), at(bx + 1, by), at(bx, by - 1), at(bx, by + 1));
    if !(left.is_finite() && right.is_finite() && up.is_finite() && down.is_finite()) {
        return Err(CorrelationFailure::PeakMissing { peak });
    }

    let sx = gaussian_subpixel(left, peak, right);
    let sy = gaussian_subpixel(up, peak, down);
    Ok(WindowMatch {
        u: (px + bx as isize - r) as f64 + sx,
        v: (py + by as isize - r) as f64 + sy,
        peak,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::prepare_frame;
    use crate::{Frame, PivParams};
    use approx::assert_relative_eq;

    fn unit_hash(i: i64, j: i64, k: u64) -> f64 {
        let mut h = (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (j as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
            ^ k.wrapping_mul(0x1656_67B1_9E37_79F9);
        h ^= h >> 29;
        h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
        h ^= h >> 32;
        (h >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Jittered-lattice particle image sampled at `(x - sx, y - sy)`.
    fn texture(w: usize, h: usize, sx: f64, sy: f64) -> Frame {
        const CELL: f64 = 6.0;
        Frame::gray_from_fn(w, h, |x, y| {
            let (x, y) = (x as f64 - sx, y as f64 - sy);
            let (i0, j0) = ((x / CELL).floor() as i64, (y / CELL).floor() as i64);
            let mut v = 20.0;
            for i in i0 - 2..=i0 + 2 {
                for j in j0 - 2..=j0 + 2 {
                    let cx = CELL * (i as f64 + unit_hash(i, j, 0));
                    let cy = CELL * (j as f64 + unit_hash(i, j, 1));
                    let amp = 60.0 + 140.0 * unit_hash(i, j, 2);
                    let d2 = (x - cx).powi(2) + (y - cy).powi(2);
                    v += amp * (-d2 / 4.5).exp();
                }
            }
            v.clamp(0.0, 255.0) as u8
        })
    }

    fn raw_params() -> PivParams {
        PivParams {
            clahe: false,
            ..PivParams::default()
        }
    }

    fn spec() -> WindowSpec {
        WindowSpec {
            size: 32,
            radius: 8,
            min_correlation: 0.2,
            min_seeding_std: 1.0,
            smooth_peak: false,
        }
    }

    #[test]
    fn recovers_integer_shift() {
        let a = prepare_frame(&texture(96, 96, 0.0, 0.0), &raw_params());
        let b = prepare_frame(&texture(96, 96, 3.0, -2.0), &raw_params());
        let m = match_window(&a, &b, 48, 48, (0.0, 0.0), &spec()).unwrap();
        assert_relative_eq!(m.u, 3.0, epsilon = 0.2);
        assert_relative_eq!(m.v, -2.0, epsilon = 0.2);
        assert!(m.peak > 0.9);
    }

    #[test]
    fn predictor_extends_the_search() {
        let a = prepare_frame(&texture(128, 96, 0.0, 0.0), &raw_params());
        let b = prepare_frame(&texture(128, 96, 14.0, 0.0), &raw_params());
        let s = WindowSpec { radius: 3, ..spec() };
        let blind = match_window(&a, &b, 56, 48, (0.0, 0.0), &s);
        assert!(blind.map_or(true, |m| m.u.abs() <= 3.5));
        let m = match_window(&a, &b, 56, 48, (13.0, 0.0), &s).unwrap();
        assert_relative_eq!(m.u, 14.0, epsilon = 0.2);
    }

    #[test]
    fn flat_window_is_low_seeding() {
        let flat = prepare_frame(&Frame::gray_from_fn(64, 64, |_, _| 90), &raw_params());
        let err = match_window(&flat, &flat, 32, 32, (0.0, 0.0), &spec()).unwrap_err();
        assert!(matches!(err, CorrelationFailure::LowSeeding { .. }));
    }

    #[test]
    fn window_leaving_the_frame_is_out_of_bounds() {
        let a = prepare_frame(&texture(64, 64, 0.0, 0.0), &raw_params());
        let err = match_window(&a, &a, 10, 32, (0.0, 0.0), &spec()).unwrap_err();
        assert_eq!(err, CorrelationFailure::OutOfBounds { x: 10, y: 32 });
    }

    #[test]
    fn shift_beyond_radius_puts_peak_on_border() {
        let a = prepare_frame(&texture(128, 96, 0.0, 0.0), &raw_params());
        let b = prepare_frame(&texture(128, 96, 9.0, 0.0), &raw_params());
        let err = match_window(&a, &b, 56, 48, (0.0, 0.0), &spec()).unwrap_err();
        assert!(matches!(err, CorrelationFailure::PeakMissing { .. }));
    }

    #[test]
    fn gaussian_fit_is_symmetric() {
        assert_relative_eq!(gaussian_subpixel(0.5, 1.0, 0.5), 0.0);
        assert!(gaussian_subpixel(0.4, 1.0, 0.8) > 0.0);
        assert!(gaussian_subpixel(-0.2, 0.5, 0.1) < 0.0);
    }
}
