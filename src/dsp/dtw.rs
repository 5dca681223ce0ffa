//! Dynamic Time Warping
//!
//! Banded DTW between two sequences of equal-dimensional feature vectors.
//! Cumulative cost `D[i,j] = local(i,j) + min(D[i-1,j], D[i,j-1],
//! D[i-1,j-1])` with Euclidean local cost, an optional Sakoe-Chiba band,
//! and deterministic path recovery. Lower distance means more similar.

use crate::config::DtwConfig;

use super::DspError;

/// Alignment outcome: distance plus the recovered warping path.
#[derive(Debug, Clone)]
pub struct DtwResult {
    /// Final cost, normalized by path length when configured, scaled by
    /// `distance_weight`.
    pub distance: f32,
    /// Monotone path from `(0, 0)` to `(m-1, n-1)`.
    pub path: Vec<(usize, usize)>,
    /// Effective Sakoe-Chiba half-width used for this comparison
    /// (`max(m, n)` when windowing is disabled).
    pub band_half_width: usize,
}

impl DtwResult {
    /// Mean absolute deviation of the path from the square diagonal
    /// `i = j`, in frames. Zero for an exactly diagonal path.
    pub fn mean_diagonal_deviation(&self) -> f32 {
        if self.path.is_empty() {
            return 0.0;
        }
        let total: f32 = self
            .path
            .iter()
            .map(|&(i, j)| (i as f32 - j as f32).abs())
            .sum();
        total / self.path.len() as f32
    }

    /// Fraction of path points lying within half the band half-width of
    /// the square diagonal. 1.0 for a fully diagonal path; drops toward
    /// 0.0 as the alignment hugs the band edge. This is a count-based
    /// measure, distinct from the mean deviation above.
    pub fn band_occupancy(&self) -> f32 {
        if self.path.is_empty() {
            return 0.0;
        }
        if self.band_half_width == 0 {
            return 1.0;
        }
        let near = self
            .path
            .iter()
            .filter(|&&(i, j)| 2 * i.abs_diff(j) <= self.band_half_width)
            .count();
        near as f32 / self.path.len() as f32
    }
}

/// Sequence comparator for one [`DtwConfig`].
pub struct DtwComparator {
    config: DtwConfig,
}

impl DtwComparator {
    pub fn new(config: &DtwConfig) -> Result<Self, DspError> {
        config
            .validate()
            .map_err(|e| DspError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &DtwConfig {
        &self.config
    }

    /// Align `a` (length m) against `b` (length n).
    ///
    /// Both sequences must be non-empty and share one feature dimension;
    /// dimension equality is the caller's precondition and is checked.
    pub fn compare(&self, a: &[Vec<f32>], b: &[Vec<f32>]) -> Result<DtwResult, DspError> {
        let m = a.len();
        let n = b.len();
        if m == 0 || n == 0 {
            return Err(DspError::NoComparison(format!(
                "empty sequence (lengths {} and {})",
                m, n
            )));
        }
        let dim = a[0].len();
        if dim == 0 || b[0].len() != dim {
            return Err(DspError::InvalidInput(format!(
                "feature dimensions differ: {} vs {}",
                dim,
                b[0].len()
            )));
        }

        // Band half-width. Must cover the corner cell, so it is never
        // narrower than the length difference.
        let longer = m.max(n);
        let band = if self.config.use_window {
            let w = (self.config.window_ratio * longer as f32).ceil() as usize;
            w.max(m.abs_diff(n))
        } else {
            longer
        };

        let mut cost = vec![f32::INFINITY; m * n];
        let at = |i: usize, j: usize| i * n + j;

        for i in 0..m {
            // Cells outside the band stay +infinity.
            let j_lo = i.saturating_sub(band);
            let j_hi = (i + band).min(n - 1);
            for j in j_lo..=j_hi {
                let local = euclidean(&a[i], &b[j]);
                let best_prev = if i == 0 && j == 0 {
                    0.0
                } else {
                    let mut best = f32::INFINITY;
                    if i > 0 && j > 0 {
                        best = best.min(cost[at(i - 1, j - 1)]);
                    }
                    if i > 0 {
                        best = best.min(cost[at(i - 1, j)]);
                    }
                    if j > 0 {
                        best = best.min(cost[at(i, j - 1)]);
                    }
                    best
                };
                cost[at(i, j)] = local + best_prev;
            }
        }

        let total = cost[at(m - 1, n - 1)];
        if !total.is_finite() {
            return Err(DspError::ProcessingFailed(
                "no alignment path within the band".into(),
            ));
        }

        let path = recover_path(&cost, m, n, m >= n);

        let mut distance = total;
        if self.config.normalize_distance {
            distance /= path.len() as f32;
        }
        distance *= self.config.distance_weight;

        Ok(DtwResult {
            distance,
            path,
            band_half_width: band,
        })
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    let sum: f32 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x - y;
            d * d
        })
        .sum();
    sum.sqrt()
}

/// Walk the cumulative matrix back from `(m-1, n-1)` to `(0, 0)`.
/// Ties prefer the diagonal step, then advancing the longer sequence.
fn recover_path(cost: &[f32], m: usize, n: usize, a_is_longer: bool) -> Vec<(usize, usize)> {
    let at = |i: usize, j: usize| i * n + j;
    let mut path = Vec::with_capacity(m.max(n));
    let (mut i, mut j) = (m - 1, n - 1);
    path.push((i, j));

    while i > 0 || j > 0 {
        let diag = if i > 0 && j > 0 {
            cost[at(i - 1, j - 1)]
        } else {
            f32::INFINITY
        };
        let up = if i > 0 { cost[at(i - 1, j)] } else { f32::INFINITY };
        let left = if j > 0 { cost[at(i, j - 1)] } else { f32::INFINITY };

        let (first, second) = if a_is_longer { (up, left) } else { (left, up) };
        if diag <= first && diag <= second {
            i -= 1;
            j -= 1;
        } else if first <= second {
            if a_is_longer {
                i -= 1;
            } else {
                j -= 1;
            }
        } else if a_is_longer {
            j -= 1;
        } else {
            i -= 1;
        }
        path.push((i, j));
    }

    path.reverse();
    path
}
