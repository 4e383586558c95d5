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

//! Fitting a model and querying its posterior.
//!
//! `fit` compiles a `ModelSpec` against a table, runs the sampler and keeps
//! the draws on the reported (constrained) scale, chains stacked one after
//! the other. A `Posterior` remembers the specification and settings that
//! produced it, so it can be refit to new data.

use std::collections::BTreeMap;

use log::{info, warn};
use ndarray::{s, Array1, Array2, ArrayView1};
use serde::Serialize;

use crate::data::Table;
use crate::diagnostics::{self, InferenceWarning};
use crate::errors::{GlmError, GlmResult};
use crate::math;
use crate::model::{Model, ModelSpec};
use crate::sampler::{self, SamplerSettings};

/// Point estimate used by [`Posterior::coefficients`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Estimate {
    /// Posterior mean.
    #[default]
    Mean,
    /// Posterior median.
    Median,
}

/// Summary statistics of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSummary {
    /// Parameter name.
    pub name: String,
    /// Posterior mean.
    pub mean: f64,
    /// Posterior standard deviation.
    pub sd: f64,
    /// Lower bound of the highest density interval.
    pub hdi_lower: f64,
    /// Upper bound of the highest density interval.
    pub hdi_upper: f64,
    /// Bulk effective sample size.
    pub ess_bulk: f64,
    /// Split R-hat.
    pub r_hat: f64,
}

/// Draws of a fitted model.
#[derive(Debug, Clone)]
pub struct Posterior {
    model: Model,
    settings: SamplerSettings,
    /// `(chains * draws) x parameters`, chain-major.
    draws: Array2<f64>,
    n_chains: usize,
    warnings: Vec<InferenceWarning>,
}

/// Fits `spec` to `table`.
///
/// Every configuration problem is reported before sampling starts. Poor
/// convergence is not an error: it is logged and attached to the result as
/// [`InferenceWarning`]s.
pub fn fit(table: &Table, spec: &ModelSpec, settings: &SamplerSettings) -> GlmResult<Posterior> {
    settings.validate()?;
    let model = Model::compile(table, spec)?;
    let chains = sampler::sample(&model, settings)?;

    let dim = model.layout().dim();
    let n_draws = settings.draws;
    let mut draws = Array2::zeros((settings.chains * n_draws, dim));
    let mut divergences = 0;
    for (c, chain) in chains.iter().enumerate() {
        divergences += chain.divergences;
        for (i, theta) in chain.draws.outer_iter().enumerate() {
            draws
                .row_mut(c * n_draws + i)
                .assign(&model.constrain(theta));
        }
    }

    let mut posterior = Posterior {
        model,
        settings: settings.clone(),
        draws,
        n_chains: settings.chains,
        warnings: Vec::new(),
    };

    let mut warnings = Vec::new();
    if divergences > 0 {
        warnings.push(InferenceWarning::Divergences { count: divergences });
    }
    for (j, name) in posterior.names().iter().enumerate() {
        warnings.extend(diagnostics::check_parameter(name, posterior.chain_matrix(j).view()));
    }
    for warning in &warnings {
        warn!("{}", warning);
    }
    posterior.warnings = warnings;

    info!(
        "fitted {} ({}) to {} rows: {} chains x {} draws, {} warnings",
        spec.formula,
        spec.family,
        table.n_rows(),
        settings.chains,
        n_draws,
        posterior.warnings.len()
    );

    Ok(posterior)
}

impl Posterior {
    /// Fits the same specification with the same settings to a new table.
    ///
    /// The result is independent of `self`.
    pub fn refit(&self, table: &Table) -> GlmResult<Posterior> {
        fit(table, self.model.spec(), &self.settings)
    }

    /// Compiled model the draws belong to.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Specification that produced this posterior.
    pub fn spec(&self) -> &ModelSpec {
        self.model.spec()
    }

    /// Sampler settings that produced this posterior.
    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    /// Parameter names in column order.
    pub fn names(&self) -> &[String] {
        &self.model.layout().names
    }

    /// Number of chains.
    pub fn n_chains(&self) -> usize {
        self.n_chains
    }

    /// Total number of draws (all chains).
    pub fn n_draws(&self) -> usize {
        self.draws.nrows()
    }

    /// Raw `draws x parameters` matrix.
    pub fn draws_matrix(&self) -> &Array2<f64> {
        &self.draws
    }

    /// Warnings raised while fitting.
    pub fn warnings(&self) -> &[InferenceWarning] {
        &self.warnings
    }

    fn index_of(&self, name: &str) -> GlmResult<usize> {
        self.model
            .layout()
            .index_of(name)
            .ok_or_else(|| GlmError::UnknownParameter {
                name: name.to_string(),
                available: self.names().to_vec(),
            })
    }

    /// `chains x draws` matrix of one parameter.
    fn chain_matrix(&self, j: usize) -> Array2<f64> {
        let per_chain = self.n_draws() / self.n_chains.max(1);
        let column = self.draws.column(j);
        Array2::from_shape_fn((self.n_chains, per_chain), |(c, i)| {
            column[c * per_chain + i]
        })
    }

    /// Point estimate of every parameter.
    pub fn coefficients(&self, estimate: Estimate) -> BTreeMap<String, f64> {
        self.names()
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let column = self.draws.column(j);
                let value = match estimate {
                    Estimate::Mean => math::mean(column),
                    Estimate::Median => math::median(column),
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Draw sequences of the named parameters, or of all when `None`.
    pub fn draws(&self, names: Option<&[&str]>) -> GlmResult<BTreeMap<String, Array1<f64>>> {
        match names {
            None => Ok(self
                .names()
                .iter()
                .enumerate()
                .map(|(j, name)| (name.clone(), self.draws.column(j).to_owned()))
                .collect()),
            Some(names) => names
                .iter()
                .map(|name| -> GlmResult<(String, Array1<f64>)> {
                    Ok((name.to_string(), self.draw(name)?))
                })
                .collect(),
        }
    }

    /// Draw sequence of one parameter.
    pub fn draw(&self, name: &str) -> GlmResult<Array1<f64>> {
        let j = self.index_of(name)?;
        Ok(self.draws.column(j).to_owned())
    }

    /// One joint draw of every parameter.
    pub fn draw_at(&self, i: usize) -> ArrayView1<f64> {
        self.draws.row(i)
    }

    /// Per-parameter summary with a `hdi_prob` highest density interval.
    pub fn summary(&self, hdi_prob: f64) -> Vec<ParameterSummary> {
        self.names()
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let column = self.draws.column(j);
                let chains = self.chain_matrix(j);
                let (hdi_lower, hdi_upper) = math::hdi(column, hdi_prob);
                ParameterSummary {
                    name: name.clone(),
                    mean: math::mean(column),
                    sd: math::variance(column).sqrt(),
                    hdi_lower,
                    hdi_upper,
                    ess_bulk: diagnostics::ess_bulk(chains.view()),
                    r_hat: diagnostics::split_rhat(chains.view()),
                }
            })
            .collect()
    }

    /// Per-level deviation draws of a grouping factor, in level order.
    pub fn group_effects(&self, group: &str) -> GlmResult<Vec<(String, Array1<f64>)>> {
        let layout = self.model.layout();
        let position = self
            .model
            .factors()
            .iter()
            .position(|f| f.name == group)
            .ok_or_else(|| GlmError::UnknownParameter {
                name: group.to_string(),
                available: self.model.factors().iter().map(|f| f.name.clone()).collect(),
            })?;

        let block = layout.groups[position];
        let levels = &self.model.factors()[position].levels;
        Ok(levels
            .iter()
            .enumerate()
            .map(|(l, level)| {
                let j = block.first_level + l;
                (level.clone(), self.draws.slice(s![.., j]).to_owned())
            })
            .collect())
    }
}
