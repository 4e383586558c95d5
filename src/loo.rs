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

//! Leave-one-out cross-validation with Pareto-smoothed importance sampling.
//!
//! For each observation the raw importance ratios `1 / p(y_i | theta_s)`
//! are stabilized by replacing their largest values with quantiles of a
//! generalized Pareto distribution fitted to the tail (Vehtari, Gelman &
//! Gabry, 2017). The fitted shape `k` doubles as a reliability diagnostic.

use log::warn;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::Serialize;

use crate::errors::{GlmError, GlmResult};
use crate::math::{log_sum_exp, variance};
use crate::posterior::Posterior;

/// Pareto `k` above which the importance sampling estimate is unreliable.
pub const PARETO_K_THRESHOLD: f64 = 0.7;

/// Expected log pointwise predictive density of a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LooScore {
    /// Sum of pointwise elpd.
    pub elpd: f64,
    /// Standard error of `elpd`.
    pub se: f64,
    /// Effective number of parameters.
    pub p_loo: f64,
    /// Per-observation elpd.
    pub pointwise: Vec<f64>,
    /// Per-observation Pareto shape estimates.
    pub pareto_k: Vec<f64>,
}

/// Difference between two LOO scores on the same observations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LooComparison {
    /// `elpd(a) - elpd(b)`.
    pub elpd_diff: f64,
    /// Standard error of the pointwise differences.
    pub se_diff: f64,
    /// Index (0 for `a`, 1 for `b`) of the model with the higher elpd.
    pub preferred: usize,
}

impl LooComparison {
    /// Rule-of-thumb: the models predict about equally well when the
    /// difference is small in absolute terms or relative to its error.
    pub fn practically_equivalent(&self) -> bool {
        self.elpd_diff.abs() < 4.0 || self.elpd_diff.abs() < 2.0 * self.se_diff
    }
}

/// Generalized Pareto fit by the empirical Bayes method of Zhang & Stephens
/// (2009), followed by a weakly informative shrinkage of `k` towards 0.5.
///
/// `x` must be sorted ascending and positive. Returns `(k, sigma)`.
fn gpd_fit(x: &[f64]) -> (f64, f64) {
    const PRIOR: f64 = 3.0;
    let n = x.len();
    let n_f = n as f64;
    let m = 30 + (n_f.sqrt() as usize);
    let x_star = x[((n_f / 4.0 + 0.5).floor() as usize).max(1) - 1];
    let x_max = x[n - 1];

    let theta: Vec<f64> = (1..=m)
        .map(|j| 1.0 / x_max + (1.0 - (m as f64 / (j as f64 - 0.5)).sqrt()) / PRIOR / x_star)
        .collect();

    let profile = |t: f64| x.iter().map(|&xi| (-t * xi).ln_1p()).sum::<f64>() / n_f;
    let log_lik: Vec<f64> = theta
        .iter()
        .map(|&t| {
            let k = profile(t);
            n_f * ((-t / k).ln() - k - 1.0)
        })
        .collect();

    let norm = log_sum_exp(log_lik.iter().copied());
    let theta_hat: f64 = theta
        .iter()
        .zip(&log_lik)
        .map(|(&t, &l)| t * (l - norm).exp())
        .filter(|v| v.is_finite())
        .sum();

    let k = profile(theta_hat);
    let sigma = -k / theta_hat;
    let k = (n_f * k + 5.0) / (n_f + 10.0);
    (k, sigma)
}

/// Inverse CDF of the generalized Pareto with location zero.
fn gpd_quantile(p: f64, k: f64, sigma: f64) -> f64 {
    if k.abs() < 1e-12 {
        -sigma * (-p).ln_1p()
    } else {
        sigma * (-k * (-p).ln_1p()).exp_m1() / k
    }
}

/// Pareto-smoothed, normalized log weights from raw log ratios.
/// Returns the log weights and the tail shape `k`.
pub fn psis(log_ratios: ArrayView1<f64>) -> (Array1<f64>, f64) {
    let s = log_ratios.len();
    let max = log_ratios.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let mut lw = log_ratios.mapv(|v| v - max);

    let tail_len = ((0.2 * s as f64).min(3.0 * (s as f64).sqrt())).ceil() as usize;
    let mut k = f64::INFINITY;

    if tail_len >= 5 && tail_len < s {
        let mut order: Vec<usize> = (0..s).collect();
        order.sort_by(|&a, &b| lw[a].total_cmp(&lw[b]));
        let cutoff = lw[order[s - tail_len - 1]];
        let exp_cutoff = cutoff.exp();
        let tail = &order[s - tail_len..];

        let shifted: Vec<f64> = tail.iter().map(|&i| lw[i].exp() - exp_cutoff).collect();
        if shifted.iter().any(|&v| v <= 0.0) {
            // Tail tied with the cutoff: nothing to smooth.
            k = 0.0;
        } else {
            let (k_hat, sigma) = gpd_fit(&shifted);
            k = k_hat;
            if k.is_finite() {
                for (j, &i) in tail.iter().enumerate() {
                    let p = (j as f64 + 0.5) / tail_len as f64;
                    let smoothed = (gpd_quantile(p, k, sigma) + exp_cutoff).ln();
                    lw[i] = smoothed.min(0.0);
                }
            }
        }
    }

    let norm = log_sum_exp(lw.iter().copied());
    lw.mapv_inplace(|v| v - norm);
    (lw, k)
}

/// PSIS-LOO from a `draws x observations` log-likelihood matrix.
pub fn loo_from_log_likelihood(log_lik: &Array2<f64>) -> LooScore {
    let (s, n) = log_lik.dim();
    let log_s = (s as f64).ln();

    let mut pointwise = Vec::with_capacity(n);
    let mut pareto_k = Vec::with_capacity(n);
    let mut p_loo = 0.0;

    for ll in log_lik.axis_iter(Axis(1)) {
        let (lw, k) = psis(ll.mapv(|v| -v).view());
        let elpd_i = log_sum_exp(lw.iter().zip(ll.iter()).map(|(w, l)| w + l));
        let lpd_i = log_sum_exp(ll.iter().copied()) - log_s;
        p_loo += lpd_i - elpd_i;
        pointwise.push(elpd_i);
        pareto_k.push(k);
    }

    let bad = pareto_k.iter().filter(|&&k| k > PARETO_K_THRESHOLD).count();
    if bad > 0 {
        warn!(
            "{} of {} observations have Pareto k > {}; the LOO estimate may be unreliable",
            bad, n, PARETO_K_THRESHOLD
        );
    }

    let values = Array1::from_vec(pointwise.clone());
    LooScore {
        elpd: values.sum(),
        se: (n as f64 * variance(values.view())).sqrt(),
        p_loo,
        pointwise,
        pareto_k,
    }
}

/// PSIS-LOO of a fitted posterior on its training data.
pub fn loo(posterior: &Posterior) -> LooScore {
    let model = posterior.model();
    let design = model.training_design();
    let mut log_lik = Array2::zeros((posterior.n_draws(), model.n_obs()));
    for (i, mut row) in log_lik.outer_iter_mut().enumerate() {
        row.assign(&model.pointwise_log_likelihood(posterior.draw_at(i), design));
    }
    loo_from_log_likelihood(&log_lik)
}

/// Compares two scores computed on the same observations.
pub fn compare(a: &LooScore, b: &LooScore) -> GlmResult<LooComparison> {
    if a.pointwise.len() != b.pointwise.len() {
        return Err(GlmError::IncomparableScores {
            left: a.pointwise.len(),
            right: b.pointwise.len(),
        });
    }

    let diff = Array1::from_iter(a.pointwise.iter().zip(&b.pointwise).map(|(x, y)| x - y));
    let n = diff.len() as f64;
    let elpd_diff = diff.sum();
    Ok(LooComparison {
        elpd_diff,
        se_diff: (n * variance(diff.view())).sqrt(),
        preferred: if elpd_diff >= 0.0 { 0 } else { 1 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Exp, Normal};

    #[test]
    fn gpd_fit_recovers_exponential_tail() {
        // An exponential is a generalized Pareto with k = 0.
        let mut rng = StdRng::seed_from_u64(11);
        let exp = Exp::new(2.0).unwrap();
        let mut x: Vec<f64> = (0..2000).map(|_| exp.sample(&mut rng)).collect();
        x.sort_by(|a, b| a.total_cmp(b));
        let (k, sigma) = gpd_fit(&x);
        assert!(k.abs() < 0.1, "k = {}", k);
        assert_relative_eq!(sigma, 0.5, epsilon = 0.05);
    }

    #[test]
    fn psis_weights_are_normalized() {
        let mut rng = StdRng::seed_from_u64(5);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let ratios = Array1::from_iter((0..1000).map(|_| normal.sample(&mut rng)));
        let (lw, k) = psis(ratios.view());
        assert_relative_eq!(log_sum_exp(lw.iter().copied()), 0.0, epsilon = 1e-10);
        assert!(k < PARETO_K_THRESHOLD);
    }

    #[test]
    fn identical_scores_are_equivalent() {
        let ll = Array2::from_shape_fn((400, 20), |(s, i)| -1.0 - 0.01 * ((s * 7 + i) % 13) as f64);
        let a = loo_from_log_likelihood(&ll);
        let cmp = compare(&a, &a).unwrap();
        assert_eq!(cmp.elpd_diff, 0.0);
        assert!(cmp.practically_equivalent());
        assert_eq!(cmp.preferred, 0);
    }

    #[test]
    fn comparing_different_sizes_fails() {
        let a = loo_from_log_likelihood(&Array2::zeros((100, 3)));
        let b = loo_from_log_likelihood(&Array2::zeros((100, 4)));
        assert!(compare(&a, &b).is_err());
    }
}
