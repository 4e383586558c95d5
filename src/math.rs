//   Copyright 2024 The PyMC Developers
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.

//! Numerical helpers: stable log-space arithmetic and sample statistics
//! over draw sequences. Special functions come from `statrs`.

use ndarray::{Array1, ArrayView1};
use statrs::function::gamma::ln_gamma;

/// `ln(1 + exp(x))` without overflow.
pub fn log1p_exp(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// `ln(sum(exp(values)))` using the max-shift trick.
pub fn log_sum_exp<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
    I::IntoIter: Clone,
{
    let iter = values.into_iter();
    let max = iter.clone().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + iter.map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Log of the binomial coefficient for real-valued `n` and `k`.
pub fn ln_choose(n: f64, k: f64) -> f64 {
    ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0)
}

/// Arithmetic mean; NaN for an empty sequence.
pub fn mean(values: ArrayView1<f64>) -> f64 {
    values.mean().unwrap_or(f64::NAN)
}

/// Sample variance with the `n - 1` denominator.
pub fn variance(values: ArrayView1<f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let mu = mean(values);
    values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Sorted copy of the values; NaNs sort last.
pub fn sorted(values: ArrayView1<f64>) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Quantile of already-sorted values with linear interpolation.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Median of the values.
pub fn median(values: ArrayView1<f64>) -> f64 {
    quantile_sorted(&sorted(values), 0.5)
}

/// Highest density interval: the narrowest interval holding `prob` of the
/// draws.
pub fn hdi(values: ArrayView1<f64>, prob: f64) -> (f64, f64) {
    let sorted = sorted(values);
    let n = sorted.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }

    let included = (prob * n as f64).floor() as usize;
    if included == 0 || included >= n {
        return (sorted[0], sorted[n - 1]);
    }

    let (start, _) = (0..n - included)
        .map(|i| (i, sorted[i + included] - sorted[i]))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best });

    (sorted[start], sorted[start + included])
}

/// Running (Welford) estimate of per-coordinate variance.
///
/// Used during warm-up to estimate the diagonal of the mass matrix.
#[derive(Debug, Clone)]
pub struct RunningVariance {
    count: usize,
    mean: Array1<f64>,
    m2: Array1<f64>,
}

impl RunningVariance {
    /// Creates a new accumulator for `dim` coordinates.
    pub fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: Array1::zeros(dim),
            m2: Array1::zeros(dim),
        }
    }

    /// Adds one point.
    pub fn add(&mut self, x: ArrayView1<f64>) {
        self.count += 1;
        let delta = &x - &self.mean;
        self.mean.scaled_add(1.0 / self.count as f64, &delta);
        let delta2 = &x - &self.mean;
        self.m2 += &(&delta * &delta2);
    }

    /// Number of points seen.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Sample variance of each coordinate.
    pub fn variance(&self) -> Array1<f64> {
        if self.count < 2 {
            return Array1::ones(self.mean.len());
        }
        &self.m2 / (self.count - 1) as f64
    }

    /// Forgets every point.
    pub fn reset(&mut self) {
        self.count = 0;
        self.mean.fill(0.0);
        self.m2.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn ln_choose_matches_integer_coefficients() {
        assert_relative_eq!(ln_choose(5.0, 2.0), 10f64.ln(), epsilon = 1e-10);
        assert_relative_eq!(ln_choose(7.0, 0.0), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn log_sum_exp_is_stable() {
        let v = [1000.0, 1000.0];
        assert_relative_eq!(log_sum_exp(v), 1000.0 + 2f64.ln(), epsilon = 1e-10);
        assert_eq!(log_sum_exp([f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn quantiles_and_hdi() {
        let x = array![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(median(x.view()), 3.0);
        assert_relative_eq!(quantile_sorted(&sorted(x.view()), 0.25), 2.0);

        let skewed = array![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 5.0, 10.0];
        let (lo, hi) = hdi(skewed.view(), 0.7);
        assert_relative_eq!(lo, 0.0);
        assert_relative_eq!(hi, 0.7);
    }

    #[test]
    fn running_variance_matches_batch() {
        let rows = [array![1.0, 10.0], array![2.0, 20.0], array![4.0, 40.0]];
        let mut rv = RunningVariance::new(2);
        rows.iter().for_each(|r| rv.add(r.view()));

        let first = array![1.0, 2.0, 4.0];
        assert_relative_eq!(rv.variance()[0], variance(first.view()), epsilon = 1e-12);
        assert_relative_eq!(rv.variance()[1], 100.0 * variance(first.view()), epsilon = 1e-9);
    }
}
