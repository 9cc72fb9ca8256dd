//! Robust summaries over samples that may contain missing (`NaN`) values.

use serde::{Deserialize, Serialize};

/// Median of `values`; reorders the slice. `NaN` for an empty slice.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Percentile `q ∈ [0, 100]` of an ascending slice, linearly interpolated
/// between closest ranks.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Population mean and standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Median, spread and 5th/95th percentiles of one sample pool.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub median: f64,
    pub std: f64,
    pub p5: f64,
    pub p95: f64,
    pub count: usize,
}

impl Summary {
    /// All-missing summary.
    pub fn missing() -> Self {
        Self {
            median: f64::NAN,
            std: f64::NAN,
            p5: f64::NAN,
            p95: f64::NAN,
            count: 0,
        }
    }

    /// Summarize the finite values of `values`, ignoring missing ones.
    pub fn of(values: impl IntoIterator<Item = f64>) -> Self {
        let mut pool: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if pool.is_empty() {
            return Self::missing();
        }
        let (_, std) = mean_std(&pool);
        let median = median(&mut pool);
        Self {
            median,
            std,
            p5: percentile(&pool, 5.0),
            p95: percentile(&pool, 95.0),
            count: pool.len(),
        }
    }
}
