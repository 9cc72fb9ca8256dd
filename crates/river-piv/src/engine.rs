//! Per-pair analysis and the batch driver.

use crate::correlation::{match_window, WindowSpec};
use crate::filters::{fill_missing, normalized_median_test, standard_filter, VectorField};
use crate::preprocess::{mean_gradient, prepare_frame, PreparedFrame};
use crate::stats::Summary;
use crate::{
    AnalysisResult, BoundingBox, CancelToken, Frame, FrameSource, InterrogationGrid, PairStats,
    PivError, PivParams, RegionMask, TestResult,
};
use rayon::prelude::*;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Outcome of one pair inside a batch.
enum PairOutcome {
    Done {
        field: VectorField,
        gradient: Vec<f64>,
        stats: PairStats,
    },
    Skipped,
    NotStarted,
}

/// Velocimetry engine bound to one region and parameter set.
///
/// The interrogation grid is fixed at construction and shared by every pair
/// the engine analyzes.
#[derive(Clone, Debug)]
pub struct PivEngine {
    params: PivParams,
    mask: RegionMask,
    bbox: BoundingBox,
    grid: InterrogationGrid,
}

impl PivEngine {
    /// Validate `params` and lay the grid over `bbox ∩ mask`.
    ///
    /// The bounding box is clipped to the mask extent; frames analyzed later
    /// must have the mask's dimensions.
    pub fn new(params: PivParams, mask: RegionMask, bbox: BoundingBox) -> Result<Self, PivError> {
        params.validate()?;
        let bbox = bbox.clamp_to(mask.width(), mask.height());
        if bbox.is_empty() {
            return Err(PivError::EmptyRegion(
                "bounding box lies outside the mask".into(),
            ));
        }
        let grid = InterrogationGrid::new(bbox, &mask, params.ia1, params.grid_step())?;
        log::debug!(
            "interrogation grid {}x{} ({} active) over bbox {:?}",
            grid.rows,
            grid.cols,
            grid.active_count(),
            bbox
        );
        Ok(Self {
            params,
            mask,
            bbox,
            grid,
        })
    }

    pub fn params(&self) -> &PivParams {
        &self.params
    }

    pub fn grid(&self) -> &InterrogationGrid {
        &self.grid
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    fn check_dims(&self, frame: &Frame) -> Result<(), PivError> {
        if frame.width != self.mask.width() || frame.height != self.mask.height() {
            return Err(PivError::MaskMismatch {
                mask_width: self.mask.width(),
                mask_height: self.mask.height(),
                frame_width: frame.width,
                frame_height: frame.height,
            });
        }
        Ok(())
    }

    fn first_pass_spec(&self) -> WindowSpec {
        WindowSpec {
            size: self.params.ia1,
            radius: self.params.first_pass_radius(),
            min_correlation: self.params.min_correlation,
            min_seeding_std: self.params.min_seeding_std,
            smooth_peak: self.params.mask_auto,
        }
    }

    fn grid_coords(&self) -> (Vec<f64>, Vec<f64>) {
        (
            self.grid.x.iter().map(|&x| x as f64).collect(),
            self.grid.y.iter().map(|&y| y as f64).collect(),
        )
    }

    /// Analyze a single frame pair.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(points = self.grid.len()))
    )]
    pub fn run_test(&self, frame_a: &Frame, frame_b: &Frame) -> Result<TestResult, PivError> {
        self.check_dims(frame_a)?;
        self.check_dims(frame_b)?;
        let a = prepare_frame(frame_a, &self.params);
        let b = prepare_frame(frame_b, &self.params);
        let (field, stats) = self.analyze_pair(&a, &b);
        log::info!(
            "test pair: {}/{} valid vectors ({} peak, {} seeding, {} filtered)",
            stats.valid,
            stats.evaluated,
            stats.peak_missing,
            stats.low_seeding,
            stats.standard_rejected + stats.median_rejected
        );
        let (x, y) = self.grid_coords();
        Ok(TestResult {
            shape: [self.grid.rows, self.grid.cols],
            x,
            y,
            u: field.u,
            v: field.v,
            stats,
        })
    }

    /// Analyze every consecutive pair `(i, i + 1)` of `source`.
    ///
    /// Pairs run in parallel. A pair whose frames cannot be read is skipped
    /// and counted; once `cancel` is set, pairs not yet started are left
    /// missing and the result is flagged `cancelled`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(frames = source.len(), points = self.grid.len()))
    )]
    pub fn run_analyze_all<S>(
        &self,
        source: &S,
        cancel: &CancelToken,
    ) -> Result<AnalysisResult, PivError>
    where
        S: FrameSource + ?Sized,
    {
        let frames = source.len();
        if frames < 2 {
            return Err(PivError::NotEnoughFrames(frames));
        }
        if let Ok(first) = source.frame(0) {
            self.check_dims(&first)?;
        }

        let pairs = frames - 1;
        let outcomes: Vec<PairOutcome> = (0..pairs)
            .into_par_iter()
            .map(|pair| {
                if cancel.is_cancelled() {
                    return PairOutcome::NotStarted;
                }
                self.analyze_indexed_pair(source, pair)
            })
            .collect();

        Ok(self.reduce(outcomes))
    }

    fn analyze_indexed_pair<S>(&self, source: &S, pair: usize) -> PairOutcome
    where
        S: FrameSource + ?Sized,
    {
        let load = |index: usize| -> Result<PreparedFrame, PivError> {
            let frame = source.frame(index)?;
            self.check_dims(&frame)?;
            Ok(prepare_frame(&frame, &self.params))
        };
        let (a, b) = match (load(pair), load(pair + 1)) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("skipping pair {pair}: {e}");
                return PairOutcome::Skipped;
            }
        };
        let (field, stats) = self.analyze_pair(&a, &b);
        let gradient = (0..self.grid.len())
            .map(|i| {
                if self.grid.active[i] {
                    mean_gradient(&a.planes[0], self.grid.x[i], self.grid.y[i], self.params.ia1)
                } else {
                    f64::NAN
                }
            })
            .collect();
        log::debug!("pair {pair}: {}/{} valid", stats.valid, stats.evaluated);
        PairOutcome::Done {
            field,
            gradient,
            stats,
        }
    }

    /// Scatter per-pair fields into dense `(point, pair)` buffers and reduce
    /// each point's series.
    fn reduce(&self, outcomes: Vec<PairOutcome>) -> AnalysisResult {
        let n = self.grid.len();
        let pairs = outcomes.len();
        let mut u_arena = vec![f64::NAN; n * pairs];
        let mut v_arena = vec![f64::NAN; n * pairs];
        let mut grad_sum = vec![0.0; n];
        let mut stats = PairStats::default();
        let (mut evaluated, mut skipped, mut not_started) = (0, 0, 0);

        for (pair, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                PairOutcome::Done {
                    field,
                    gradient,
                    stats: pair_stats,
                } => {
                    evaluated += 1;
                    stats.merge(&pair_stats);
                    for i in 0..n {
                        u_arena[i * pairs + pair] = field.u[i];
                        v_arena[i * pairs + pair] = field.v[i];
                        grad_sum[i] += gradient[i];
                    }
                }
                PairOutcome::Skipped => skipped += 1,
                PairOutcome::NotStarted => not_started += 1,
            }
        }

        let mut u_median = vec![f64::NAN; n];
        let mut v_median = vec![f64::NAN; n];
        let mut magnitude = vec![Summary::missing(); n];
        let mut valid_counts = vec![0; n];
        let mut gradient = vec![f64::NAN; n];
        let mut weak = vec![false; n];
        for i in 0..n {
            let us = &u_arena[i * pairs..(i + 1) * pairs];
            let vs = &v_arena[i * pairs..(i + 1) * pairs];
            let mags = us.iter().zip(vs).map(|(u, v)| u.hypot(*v));
            magnitude[i] = Summary::of(mags);
            valid_counts[i] = magnitude[i].count;
            u_median[i] = Summary::of(us.iter().copied()).median;
            v_median[i] = Summary::of(vs.iter().copied()).median;
            if self.grid.active[i] && evaluated > 0 {
                gradient[i] = grad_sum[i] / evaluated as f64;
                weak[i] = gradient[i] < self.params.min_gradient || valid_counts[i] == 0;
            }
        }

        let cancelled = not_started > 0;
        if cancelled {
            log::warn!("analysis cancelled after {evaluated} of {pairs} pairs");
        }
        log::info!(
            "analyzed {evaluated}/{pairs} pairs ({skipped} skipped), {} weak points",
            weak.iter().filter(|&&w| w).count()
        );

        let pair_major = |arena: &[f64]| -> Vec<Vec<f64>> {
            (0..pairs)
                .map(|pair| (0..n).map(|i| arena[i * pairs + pair]).collect())
                .collect()
        };
        let (x, y) = self.grid_coords();
        AnalysisResult {
            shape: [self.grid.rows, self.grid.cols],
            x,
            y,
            active: self.grid.active.clone(),
            u_median,
            v_median,
            magnitude_median: magnitude.iter().map(|s| s.median).collect(),
            magnitude_std: magnitude.iter().map(|s| s.std).collect(),
            magnitude_p5: magnitude.iter().map(|s| s.p5).collect(),
            magnitude_p95: magnitude.iter().map(|s| s.p95).collect(),
            valid_counts,
            gradient,
            weak,
            u: pair_major(&u_arena),
            v: pair_major(&v_arena),
            pairs_total: pairs,
            pairs_evaluated: evaluated,
            pairs_skipped: skipped,
            cancelled,
            stats,
        }
    }

    /// First pass, filters, then an optional refinement pass predicted by
    /// the gap-filled first-pass field.
    fn analyze_pair(&self, a: &PreparedFrame, b: &PreparedFrame) -> (VectorField, PairStats) {
        let grid = &self.grid;
        let n = grid.len();
        let mut stats = PairStats {
            evaluated: grid.active_count(),
            ..PairStats::default()
        };

        let spec = self.first_pass_spec();
        let first: Vec<_> = (0..n)
            .into_par_iter()
            .map(|i| {
                grid.active[i]
                    .then(|| match_window(a, b, grid.x[i], grid.y[i], (0.0, 0.0), &spec))
            })
            .collect();
        let mut field = VectorField::missing(n);
        for (i, outcome) in first.into_iter().enumerate() {
            match outcome {
                Some(Ok(m)) => {
                    field.u[i] = m.u;
                    field.v[i] = m.v;
                }
                Some(Err(failure)) => stats.record(failure),
                None => {}
            }
        }
        self.filter(&mut field, &mut stats);

        if self.params.multipass && field.valid_count() > 0 {
            let predictor = fill_missing(&field, grid);
            let spec = WindowSpec {
                size: self.params.ia2,
                radius: self.params.second_pass_radius(),
                ..spec
            };
            let second: Vec<_> = (0..n)
                .into_par_iter()
                .map(|i| {
                    grid.active[i].then(|| {
                        let guess = (predictor.u[i], predictor.v[i]);
                        match_window(a, b, grid.x[i], grid.y[i], guess, &spec)
                    })
                })
                .collect();
            for (i, outcome) in second.into_iter().enumerate() {
                if let Some(Ok(m)) = outcome {
                    field.u[i] = m.u;
                    field.v[i] = m.v;
                    stats.refined += 1;
                }
            }
            self.filter(&mut field, &mut stats);
        }

        stats.valid = field.valid_count();
        (field, stats)
    }

    fn filter(&self, field: &mut VectorField, stats: &mut PairStats) {
        if self.params.standard_filter {
            stats.standard_rejected +=
                standard_filter(field, &self.grid, self.params.standard_threshold);
        }
        if self.params.median_test_filter {
            stats.median_rejected += normalized_median_test(
                field,
                &self.grid,
                self.params.median_test_threshold,
                self.params.median_test_epsilon,
            );
        }
    }
}
