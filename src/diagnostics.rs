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

//! Convergence diagnostics: split R-hat and bulk effective sample size.
//!
//! Both take one parameter's draws as a `chains x draws` matrix. Chains are
//! split in half so that within-chain trends show up as between-chain
//! disagreement (Vehtari et al., 2021).

use std::fmt;

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};


/// Split R-hat above which a parameter is reported.
pub const RHAT_THRESHOLD: f64 = 1.01;
/// Bulk ESS per chain below which a parameter is reported.
pub const ESS_PER_CHAIN: f64 = 100.0;

/// A sign of unreliable sampling. Not an error: the posterior is still
/// returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum InferenceWarning {
    /// Transitions whose energy error blew up after tuning.
    Divergences {
        /// Total over all chains.
        count: usize,
    },
    /// Chains disagree about a parameter.
    HighRhat {
        /// Parameter name.
        parameter: String,
        /// Split R-hat.
        value: f64,
    },
    /// Too few effectively independent draws of a parameter.
    LowEss {
        /// Parameter name.
        parameter: String,
        /// Bulk effective sample size.
        value: f64,
    },
    /// R-hat or ESS could not be computed, because the chains are too
    /// short or a chain never moved.
    UndeterminedDiagnostics {
        /// Parameter name.
        parameter: String,
    },
}

impl fmt::Display for InferenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InferenceWarning::Divergences { count } => write!(
                f,
                "{} divergent transitions after tuning; consider a higher target_accept",
                count
            ),
            InferenceWarning::HighRhat { parameter, value } => write!(
                f,
                "split R-hat of '{}' is {:.3} (> {}); chains have not mixed",
                parameter, value, RHAT_THRESHOLD
            ),
            InferenceWarning::LowEss { parameter, value } => write!(
                f,
                "bulk ESS of '{}' is {:.0}; estimates may be unreliable",
                parameter, value
            ),
            InferenceWarning::UndeterminedDiagnostics { parameter } => write!(
                f,
                "convergence of '{}' cannot be assessed; draw more samples",
                parameter
            ),
        }
    }
}

/// Splits every chain in half, dropping the middle draw of odd chains.
fn split_chains(draws: ArrayView2<f64>) -> Option<Array2<f64>> {
    let (m, n) = draws.dim();
    let half = n / 2;
    if m == 0 || half < 2 {
        return None;
    }

    let mut out = Array2::zeros((2 * m, half));
    for (c, chain) in draws.outer_iter().enumerate() {
        out.row_mut(2 * c).assign(&chain.slice(s![..half]));
        out.row_mut(2 * c + 1).assign(&chain.slice(s![n - half..]));
    }
    Some(out)
}

/// Within-chain variance `W` and pooled variance estimate `var+`.
fn variance_components(chains: ArrayView2<f64>) -> (f64, f64) {
    let n = chains.ncols() as f64;
    let means = chains.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(0));
    let w = chains.var_axis(Axis(1), 1.0).mean().unwrap_or(f64::NAN);
    let b_over_n = if means.len() > 1 {
        means.var(1.0)
    } else {
        0.0
    };
    (w, (n - 1.0) / n * w + b_over_n)
}

/// Split R-hat of one parameter; NaN when chains are too short or constant.
pub fn split_rhat(draws: ArrayView2<f64>) -> f64 {
    let split = match split_chains(draws) {
        Some(split) => split,
        None => return f64::NAN,
    };
    let (w, var_plus) = variance_components(split.view());
    if !(w > 0.0) {
        return f64::NAN;
    }
    (var_plus / w).sqrt()
}

/// Replaces draws by normal scores of their pooled ranks.
fn rank_normalize(draws: ArrayView2<f64>) -> Array2<f64> {
    let flat: Vec<f64> = draws.iter().copied().collect();
    let total = flat.len();
    let mut order: Vec<usize> = (0..total).collect();
    order.sort_by(|&a, &b| flat[a].total_cmp(&flat[b]));

    // Average ranks over ties.
    let mut ranks = vec![0.0; total];
    let mut i = 0;
    while i < total {
        let mut j = i;
        while j + 1 < total && flat[order[j + 1]] == flat[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = rank;
        }
        i = j + 1;
    }

    let normal = match Normal::new(0.0, 1.0) {
        Ok(normal) => normal,
        Err(_) => return draws.to_owned(),
    };
    let scale = total as f64 + 0.25;
    let z: Vec<f64> = ranks
        .iter()
        .map(|r| normal.inverse_cdf((r - 0.375) / scale))
        .collect();
    Array2::from_shape_vec(draws.dim(), z).unwrap_or_else(|_| draws.to_owned())
}

/// Autocovariance of one chain at `lag`, with the `1/n` denominator.
fn autocovariance(chain: &[f64], mean: f64, lag: usize) -> f64 {
    let n = chain.len();
    (0..n - lag)
        .map(|t| (chain[t] - mean) * (chain[t + lag] - mean))
        .sum::<f64>()
        / n as f64
}

/// Effective sample size of already split chains using Geyer's initial
/// monotone sequence.
fn ess(chains: ArrayView2<f64>) -> f64 {
    let (m, n) = chains.dim();
    let (w, var_plus) = variance_components(chains);
    if !(w > 0.0) || !var_plus.is_finite() {
        return f64::NAN;
    }

    let rows: Vec<Vec<f64>> = chains.outer_iter().map(|r| r.to_vec()).collect();
    let means: Vec<f64> = rows
        .iter()
        .map(|r| r.iter().sum::<f64>() / n as f64)
        .collect();
    let rho = |lag: usize| {
        let acov = rows
            .iter()
            .zip(&means)
            .map(|(r, &mu)| autocovariance(r, mu, lag))
            .sum::<f64>()
            / m as f64;
        1.0 - (w - acov) / var_plus
    };

    // Sum of positive pair sums, forced to be non-increasing.
    let mut tau = -1.0;
    let mut previous_pair = f64::INFINITY;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = if lag == 0 { 1.0 } else { rho(lag) } + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(previous_pair);
        tau += 2.0 * pair;
        previous_pair = pair;
        lag += 2;
    }

    let total = (m * n) as f64;
    let tau = tau.max(1.0 / total.log10());
    total / tau
}

/// Bulk effective sample size: ESS of the rank-normalized split chains.
pub fn ess_bulk(draws: ArrayView2<f64>) -> f64 {
    match split_chains(draws) {
        Some(split) => ess(rank_normalize(split.view()).view()),
        None => f64::NAN,
    }
}

/// Warnings for one parameter's draws.
///
/// A diagnostic that comes out non-finite is itself reported.
pub fn check_parameter(name: &str, draws: ArrayView2<f64>) -> Vec<InferenceWarning> {
    let mut warnings = Vec::new();
    let n_chains = draws.nrows() as f64;

    let rhat = split_rhat(draws);
    let ess = ess_bulk(draws);
    if !rhat.is_finite() || !ess.is_finite() {
        warnings.push(InferenceWarning::UndeterminedDiagnostics {
            parameter: name.to_string(),
        });
        return warnings;
    }

    if rhat > RHAT_THRESHOLD {
        warnings.push(InferenceWarning::HighRhat {
            parameter: name.to_string(),
            value: rhat,
        });
    }
    if ess < ESS_PER_CHAIN * n_chains {
        warnings.push(InferenceWarning::LowEss {
            parameter: name.to_string(),
            value: ess,
        });
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StandardNormal};

    fn iid(chains: usize, draws: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_simple_fn((chains, draws), || StandardNormal.sample(&mut rng))
    }

    #[test]
    fn iid_draws_look_converged() {
        let draws = iid(4, 500, 1);
        let rhat = split_rhat(draws.view());
        let ess = ess_bulk(draws.view());
        assert!((rhat - 1.0).abs() < 0.01, "rhat {}", rhat);
        assert!(ess > 1500.0, "ess {}", ess);
        assert!(check_parameter("x", draws.view()).is_empty());
    }

    #[test]
    fn shifted_chain_is_flagged() {
        let mut draws = iid(4, 500, 2);
        draws.row_mut(0).mapv_inplace(|v| v + 3.0);
        let warnings = check_parameter("x", draws.view());
        assert!(matches!(
            warnings.first(),
            Some(InferenceWarning::HighRhat { parameter, .. }) if parameter == "x"
        ));
    }

    #[test]
    fn autocorrelated_draws_have_low_ess() {
        let noise = iid(2, 1000, 3);
        let mut draws = Array2::zeros((2, 1000));
        for c in 0..2 {
            for t in 1..1000 {
                draws[[c, t]] = 0.95 * draws[[c, t - 1]] + noise[[c, t]];
            }
        }
        assert!(ess_bulk(draws.view()) < 200.0);
    }

    #[test]
    fn short_chains_give_nan() {
        let draws = iid(2, 3, 4);
        assert!(split_rhat(draws.view()).is_nan());
        assert!(ess_bulk(draws.view()).is_nan());
    }

    #[test]
    fn undetermined_diagnostics_are_reported() {
        let short = iid(4, 3, 5);
        assert_eq!(
            check_parameter("x", short.view()),
            vec![InferenceWarning::UndeterminedDiagnostics {
                parameter: "x".to_string()
            }]
        );

        let stuck = Array2::from_elem((4, 200), 0.25);
        assert!(matches!(
            check_parameter("y", stuck.view()).as_slice(),
            [InferenceWarning::UndeterminedDiagnostics { parameter }] if parameter == "y"
        ));
    }
}
