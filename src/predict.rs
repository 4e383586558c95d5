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

//! Predictions for new rows.
//!
//! `predict` averages the expected response over posterior draws.
//! `posterior_predictive` adds observation noise and, for group levels the
//! model has never seen, a fresh deviation from the fitted group
//! distribution.

use std::collections::HashMap;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::Serialize;

use crate::data::Table;
use crate::errors::GlmResult;
use crate::family::Likelihood;
use crate::posterior::Posterior;

/// Expected response per row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Posterior mean of the expected response.
    pub mean: Vec<f64>,
    /// Posterior standard deviation of the expected response.
    pub sd: Vec<f64>,
}

/// Posterior mean and standard deviation of the expected response of every
/// row of `table`.
///
/// Rows whose group level was not seen during fitting use the population
/// level (zero deviation).
pub fn predict(posterior: &Posterior, table: &Table) -> GlmResult<Prediction> {
    let model = posterior.model();
    let family = model.family();
    let design = model.design(table)?;
    let n_rows = design.n_rows();

    let mut mu = Array2::zeros((posterior.n_draws(), n_rows));
    for (i, mut row) in mu.outer_iter_mut().enumerate() {
        let params = posterior.draw_at(i);
        let aux = model.auxiliary(params);
        let eta = model.linear_predictor(params, &design);
        row.assign(&eta.mapv(|e| family.mean(e, aux)));
    }

    let mean = mu.columns().into_iter().map(crate::math::mean).collect();
    let sd = mu
        .columns()
        .into_iter()
        .map(|c| crate::math::variance(c).sqrt())
        .collect();

    Ok(Prediction { mean, sd })
}

/// Indices of `n` evenly spaced draws out of `total`.
fn thin(total: usize, n: Option<usize>) -> Vec<usize> {
    match n {
        Some(n) if n > 0 && n < total => (0..n).map(|k| k * total / n).collect(),
        _ => (0..total).collect(),
    }
}

/// Simulated outcomes, `draws x rows`.
///
/// Uses every posterior draw, or `n_draws` evenly spaced ones. Binomial
/// outcomes are proportions of the row's trial count (the weight column,
/// one trial when absent).
pub fn posterior_predictive(
    posterior: &Posterior,
    table: &Table,
    n_draws: Option<usize>,
    seed: Option<u64>,
) -> GlmResult<Array2<f64>> {
    let model = posterior.model();
    let family = model.family();
    let design = model.design(table)?;
    let layout = model.layout();
    let n_rows = design.n_rows();

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // Unseen levels share one new deviation per draw.
    let mut unseen: Vec<Vec<Option<usize>>> = Vec::with_capacity(model.factors().len());
    let mut n_unseen = Vec::with_capacity(model.factors().len());
    for (factor, rows) in model.factors().iter().zip(&design.levels) {
        let keys = table.keys(&factor.name)?;
        let mut new_levels: HashMap<&str, usize> = HashMap::new();
        let slots = keys
            .iter()
            .zip(rows)
            .map(|(key, level)| match level {
                Some(_) => None,
                None => {
                    let next = new_levels.len();
                    Some(*new_levels.entry(key.as_str()).or_insert(next))
                }
            })
            .collect();
        unseen.push(slots);
        n_unseen.push(new_levels.len());
    }

    let picks = thin(posterior.n_draws(), n_draws);
    let mut out = Array2::zeros((picks.len(), n_rows));
    for (mut row, &i) in out.outer_iter_mut().zip(&picks) {
        let params = posterior.draw_at(i);
        let aux = model.auxiliary(params);
        let mut eta = model.linear_predictor(params, &design);

        for ((block, slots), &count) in layout.groups.iter().zip(&unseen).zip(&n_unseen) {
            if count == 0 {
                continue;
            }
            let tau = params[block.sigma];
            let fresh: Array1<f64> = (0..count)
                .map(|_| {
                    let z: f64 = StandardNormal.sample(&mut rng);
                    tau * z
                })
                .collect();
            for (e, slot) in eta.iter_mut().zip(slots) {
                if let Some(k) = slot {
                    *e += fresh[*k];
                }
            }
        }

        for (r, value) in row.iter_mut().enumerate() {
            *value = family.simulate(eta[r], aux, design.weights[r], &mut rng);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinning_spreads_over_all_draws() {
        assert_eq!(thin(10, Some(5)), vec![0, 2, 4, 6, 8]);
        assert_eq!(thin(4, Some(10)).len(), 4);
        assert_eq!(thin(3, None), vec![0, 1, 2]);
    }
}
