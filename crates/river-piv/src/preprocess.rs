//! Frame preparation: channel selection, CLAHE and summed-area tables.

use crate::{Frame, PivParams};

/// Owned single-channel f32 plane in row-major layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Plane {
    pub w: usize,
    pub h: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            data: vec![0.0; w * h],
        }
    }

    #[inline]
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.w + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.idx(x, y)]
    }
}

/// Summed-area tables of a plane and of its squares.
///
/// Stored with a leading zero row/column so that the sum over
/// `[x0, x1) × [y0, y1)` is four lookups.
#[derive(Clone, Debug)]
pub struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Integral {
    pub fn new(plane: &Plane) -> Self {
        let stride = plane.w + 1;
        let mut sum = vec![0.0; stride * (plane.h + 1)];
        let mut sum_sq = vec![0.0; stride * (plane.h + 1)];
        for y in 0..plane.h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..plane.w {
                let v = plane.get(x, y) as f64;
                row += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row;
                sum_sq[i] = sum_sq[i - stride] + row_sq;
            }
        }
        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    /// `(Σv, Σv²)` over the `size × size` block with top-left `(x0, y0)`.
    #[inline]
    pub fn block(&self, x0: usize, y0: usize, size: usize) -> (f64, f64) {
        let s = self.stride;
        let (x1, y1) = (x0 + size, y0 + size);
        let at = |t: &[f64], x: usize, y: usize| t[y * s + x];
        let sum = at(&self.sum, x1, y1) - at(&self.sum, x0, y1) - at(&self.sum, x1, y0)
            + at(&self.sum, x0, y0);
        let sq = at(&self.sum_sq, x1, y1) - at(&self.sum_sq, x0, y1) - at(&self.sum_sq, x1, y0)
            + at(&self.sum_sq, x0, y0);
        (sum, sq)
    }
}

/// A frame ready for correlation.
#[derive(Clone, Debug)]
pub struct PreparedFrame {
    pub planes: Vec<Plane>,
    pub integrals: Vec<Integral>,
}

impl PreparedFrame {
    pub fn width(&self) -> usize {
        self.planes.first().map_or(0, |p| p.w)
    }

    pub fn height(&self) -> usize {
        self.planes.first().map_or(0, |p| p.h)
    }
}

/// Convert a frame to correlation planes according to `params`.
pub fn prepare_frame(frame: &Frame, params: &PivParams) -> PreparedFrame {
    let mut planes = if params.grayscale || frame.channels == 1 {
        vec![luma(frame)]
    } else {
        (0..frame.channels).map(|c| channel(frame, c)).collect()
    };
    if params.clahe {
        for plane in &mut planes {
            *plane = clahe(plane, params.clahe_tiles, params.clip_limit);
        }
    }
    let integrals = planes.iter().map(Integral::new).collect();
    PreparedFrame { planes, integrals }
}

fn channel(frame: &Frame, c: usize) -> Plane {
    let mut out = Plane::new(frame.width, frame.height);
    for y in 0..frame.height {
        for x in 0..frame.width {
            let i = out.idx(x, y);
            out.data[i] = frame.channel(x, y, c) as f32;
        }
    }
    out
}

/// ITU-R BT.601 luma.
fn luma(frame: &Frame) -> Plane {
    if frame.channels == 1 {
        return channel(frame, 0);
    }
    let mut out = Plane::new(frame.width, frame.height);
    for y in 0..frame.height {
        for x in 0..frame.width {
            let r = frame.channel(x, y, 0) as f32;
            let g = frame.channel(x, y, 1) as f32;
            let b = frame.channel(x, y, 2) as f32;
            let i = out.idx(x, y);
            out.data[i] = 0.299 * r + 0.587 * g + 0.114 * b;
        }
    }
    out
}

const BINS: usize = 256;

/// Contrast-limited adaptive histogram equalization.
///
/// The plane is split into `tiles × tiles` blocks; each block's histogram is
/// clipped at `clip_limit × (pixels / 256)` with the excess spread evenly,
/// and pixels are remapped by bilinear interpolation between the four
/// nearest tile lookup tables.
pub fn clahe(src: &Plane, tiles: usize, clip_limit: f64) -> Plane {
    let tile_w = src.w.div_ceil(tiles.clamp(1, src.w.max(1))).max(1);
    let tile_h = src.h.div_ceil(tiles.clamp(1, src.h.max(1))).max(1);
    // Recount so that rounding up the tile size leaves no empty tiles.
    let tiles_x = src.w.div_ceil(tile_w).max(1);
    let tiles_y = src.h.div_ceil(tile_h).max(1);

    let mut luts = vec![[0.0f32; BINS]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(src.w);
            let y1 = (y0 + tile_h).min(src.h);
            if x0 >= x1 || y0 >= y1 {
                luts[ty * tiles_x + tx] = identity_lut();
                continue;
            }
            let mut hist = [0.0f64; BINS];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[bin(src.get(x, y))] += 1.0;
                }
            }
            let count = ((x1 - x0) * (y1 - y0)) as f64;
            let limit = (clip_limit * count / BINS as f64).max(1.0);
            let mut excess = 0.0;
            for h in hist.iter_mut() {
                if *h > limit {
                    excess += *h - limit;
                    *h = limit;
                }
            }
            let bonus = excess / BINS as f64;
            let lut = &mut luts[ty * tiles_x + tx];
            let mut cdf = 0.0;
            for (b, h) in hist.iter().enumerate() {
                cdf += h + bonus;
                lut[b] = (cdf / count * 255.0).min(255.0) as f32;
            }
        }
    }

    let mut out = Plane::new(src.w, src.h);
    for y in 0..src.h {
        let (ty0, ty1, ay) = tile_coord(y, tile_h, tiles_y);
        for x in 0..src.w {
            let (tx0, tx1, ax) = tile_coord(x, tile_w, tiles_x);
            let b = bin(src.get(x, y));
            let l = |tx: usize, ty: usize| luts[ty * tiles_x + tx][b];
            let top = l(tx0, ty0) + ax * (l(tx1, ty0) - l(tx0, ty0));
            let bottom = l(tx0, ty1) + ax * (l(tx1, ty1) - l(tx0, ty1));
            let i = out.idx(x, y);
            out.data[i] = top + ay * (bottom - top);
        }
    }
    out
}

#[inline]
fn bin(v: f32) -> usize {
    v.round().clamp(0.0, (BINS - 1) as f32) as usize
}

fn identity_lut() -> [f32; BINS] {
    std::array::from_fn(|b| b as f32)
}

/// Neighbouring tile indices and interpolation weight for coordinate `p`.
#[inline]
fn tile_coord(p: usize, tile: usize, tiles: usize) -> (usize, usize, f32) {
    let f = (p as f32 + 0.5) / tile as f32 - 0.5;
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    let t0 = (f.floor() as usize).min(tiles - 1);
    let t1 = (t0 + 1).min(tiles - 1);
    let a = if t1 == t0 { 0.0 } else { f - t0 as f32 };
    (t0, t1, a)
}

/// Mean central-difference gradient magnitude over a square window.
///
/// Used as a seeding-quality metric: smooth, featureless water yields values
/// near zero.
pub fn mean_gradient(plane: &Plane, cx: usize, cy: usize, size: usize) -> f64 {
    let half = size / 2;
    let x0 = cx.saturating_sub(half).max(1);
    let y0 = cy.saturating_sub(half).max(1);
    let x1 = (cx + half).min(plane.w.saturating_sub(1));
    let y1 = (cy + half).min(plane.h.saturating_sub(1));
    if x0 >= x1 || y0 >= y1 {
        return 0.0;
    }
    let mut acc = 0.0;
    for y in y0..y1 {
        for x in x0..x1 {
            let gx = 0.5 * (plane.get(x + 1, y) - plane.get(x - 1, y)) as f64;
            let gy = 0.5 * (plane.get(x, y + 1) - plane.get(x, y - 1)) as f64;
            acc += gx.hypot(gy);
        }
    }
    acc / ((x1 - x0) * (y1 - y0)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(w: usize, h: usize) -> Plane {
        let mut p = Plane::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let i = p.idx(x, y);
                p.data[i] = (x * 2 + y) as f32;
            }
        }
        p
    }

    #[test]
    fn integral_block_matches_direct_sum() {
        let p = ramp(9, 7);
        let integral = Integral::new(&p);
        let (s, sq) = integral.block(2, 1, 4);
        let mut es = 0.0;
        let mut esq = 0.0;
        for y in 1..5 {
            for x in 2..6 {
                let v = p.get(x, y) as f64;
                es += v;
                esq += v * v;
            }
        }
        assert_relative_eq!(s, es);
        assert_relative_eq!(sq, esq);
    }

    #[test]
    fn clahe_stretches_low_contrast_plane() {
        let mut p = Plane::new(64, 64);
        for (i, v) in p.data.iter_mut().enumerate() {
            *v = 100.0 + (i % 7) as f32;
        }
        let out = clahe(&p, 4, 40.0);
        let (lo, hi) = out
            .data
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        assert!(hi - lo > 100.0, "range {lo}..{hi}");
    }

    #[test]
    fn clahe_keeps_flat_plane_flat() {
        let mut p = Plane::new(36, 30);
        p.data.fill(90.0);
        let out = clahe(&p, 3, 2.0);
        let first = out.data[0];
        assert!(out.data.iter().all(|&v| (v - first).abs() < 1e-3));
    }

    #[test]
    fn rgb_frames_keep_channels_when_requested() {
        let frame = Frame::rgb(4, 4, vec![10; 48]).unwrap();
        let params = PivParams {
            grayscale: false,
            clahe: false,
            ..PivParams::default()
        };
        assert_eq!(prepare_frame(&frame, &params).planes.len(), 3);
        let params = PivParams {
            clahe: false,
            ..PivParams::default()
        };
        let gray = prepare_frame(&frame, &params);
        assert_eq!(gray.planes.len(), 1);
        assert_relative_eq!(gray.planes[0].get(1, 1), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn gradient_of_ramp_is_constant() {
        let p = ramp(20, 20);
        assert_relative_eq!(mean_gradient(&p, 10, 10, 8), 5f64.sqrt(), epsilon = 1e-9);
    }
}
