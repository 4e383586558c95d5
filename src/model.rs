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

//! Model specifications and their compiled log-densities.
//!
//! A `ModelSpec` is what the caller writes down: formula, family, priors and
//! weights. `Model::compile` checks it against a table and produces a
//! `Model`, which owns the design matrix and evaluates the joint
//! log-density and its gradient on an unconstrained parameter vector.
//!
//! Unconstrained layout, in order:
//! - fixed-effect coefficients (intercept first, when present)
//! - per grouping factor: `log(sd)` followed by one standardized offset
//!   per level (non-centred parameterization)
//! - `log(sigma)` for Gaussian and Student-t
//! - `log(nu)` for Student-t
//!
//! Reported (constrained) draws use the same positions: the intercept is
//! moved back to the uncentred predictor scale, scales are exponentiated
//! and offsets become group deviations `sd * z`.
//!
//! The data-scaled default intercept prior sits on the centred intercept.
//! A prior the caller sets on `Intercept` sits on the reported one.
#![allow(non_snake_case)]

use std::collections::{BTreeMap, HashMap};

use ndarray::{s, Array1, Array2, ArrayView1};
use rand::Rng;

use crate::data::Table;
use crate::errors::{ConfigError, DataError, GlmError, GlmResult};
use crate::family::{Auxiliary, Family, Likelihood, Observation};
use crate::formula::Formula;
use crate::math;
use crate::priors::{LogDensity, Prior};
use crate::sampler::Density;

/// Name of the global intercept parameter.
pub const INTERCEPT: &str = "Intercept";
/// Name of the residual scale parameter.
pub const SIGMA: &str = "sigma";
/// Name of the Student-t degrees of freedom parameter.
pub const NU: &str = "nu";

/// Name of the standard deviation parameter of a grouping factor.
pub fn group_sigma_name(group: &str) -> String {
    format!("1|{}_sigma", group)
}

/// Name of the deviation of one level of a grouping factor.
pub fn group_level_name(group: &str, level: &str) -> String {
    format!("1|{}[{}]", group, level)
}

/// Per-row weights.
#[derive(Debug, Clone, PartialEq)]
pub enum Weights {
    /// Read from a table column (also used for new data at prediction time).
    Column(String),
    /// Given directly; must match the number of rows being fitted.
    Values(Vec<f64>),
}

/// Everything needed to fit a model apart from the data.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    /// Response and terms.
    pub formula: Formula,
    /// Likelihood family.
    pub family: Family,
    /// Priors by parameter name; `None` is a flat prior.
    pub priors: BTreeMap<String, Option<Prior>>,
    /// Optional row weights (trial counts for Binomial).
    pub weights: Option<Weights>,
}

impl ModelSpec {
    /// Specification with default priors and no weights.
    pub fn new(formula: Formula, family: Family) -> Self {
        Self {
            formula,
            family,
            priors: BTreeMap::new(),
            weights: None,
        }
    }

    /// Sets the prior of one parameter (`None` for flat).
    pub fn prior(mut self, parameter: &str, prior: Option<Prior>) -> Self {
        self.priors.insert(parameter.to_string(), prior);
        self
    }

    /// Uses a table column as row weights.
    pub fn weights_column(mut self, column: &str) -> Self {
        self.weights = Some(Weights::Column(column.to_string()));
        self
    }

    /// Uses explicit row weights.
    pub fn weights(mut self, values: Vec<f64>) -> Self {
        self.weights = Some(Weights::Values(values));
        self
    }
}

/// Levels of one grouping factor.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupFactor {
    /// Grouping column.
    pub name: String,
    /// Levels in order of first appearance in the training table.
    pub levels: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl GroupFactor {
    fn from_keys(name: &str, keys: &[String]) -> Self {
        let mut levels = Vec::new();
        let mut lookup = HashMap::new();
        for key in keys {
            if !lookup.contains_key(key) {
                lookup.insert(key.clone(), levels.len());
                levels.push(key.clone());
            }
        }
        Self {
            name: name.to_string(),
            levels,
            lookup,
        }
    }

    /// Index of `level`, if it was seen during fitting.
    pub fn index_of(&self, level: &str) -> Option<usize> {
        self.lookup.get(level).copied()
    }
}

/// Position of a grouping factor's parameters in the parameter vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupBlock {
    /// Index of the group standard deviation.
    pub sigma: usize,
    /// Index of the first level deviation.
    pub first_level: usize,
    /// Number of levels.
    pub n_levels: usize,
}

/// Where each parameter lives in a draw vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterLayout {
    /// Parameter names, in vector order.
    pub names: Vec<String>,
    /// Number of fixed-effect coefficients (they come first).
    pub n_coef: usize,
    /// One block per grouping factor.
    pub groups: Vec<GroupBlock>,
    /// Index of `sigma`, if the family has one.
    pub sigma: Option<usize>,
    /// Index of `nu`, if the family has one.
    pub nu: Option<usize>,
}

impl ParameterLayout {
    /// Length of a parameter vector.
    pub fn dim(&self) -> usize {
        self.names.len()
    }

    /// Index of a parameter by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Model matrices for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    /// Uncentred fixed-effect matrix (a column of ones first when the
    /// formula has an intercept).
    pub X: Array2<f64>,
    /// Per grouping factor, the level index of each row (`None` for a
    /// level not seen during fitting).
    pub levels: Vec<Vec<Option<usize>>>,
    /// Response, when the table has it.
    pub y: Option<Array1<f64>>,
    /// Row weights (ones when the model has none).
    pub weights: Array1<f64>,
}

impl Design {
    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.X.nrows()
    }
}

/// A specification compiled against a training table.
#[derive(Debug, Clone)]
pub struct Model {
    spec: ModelSpec,
    layout: ParameterLayout,
    factors: Vec<GroupFactor>,
    train: Design,
    /// Design matrix with term columns centred (when there is an intercept).
    X_centred: Array2<f64>,
    centres: Array1<f64>,
    /// The caller's Intercept prior applies to the uncentred intercept.
    uncentred_intercept_prior: bool,
    y: Array1<f64>,
    coef_priors: Vec<Option<Prior>>,
    group_priors: Vec<Option<Prior>>,
    sigma_prior: Option<Prior>,
    nu_prior: Option<Prior>,
    init: Array1<f64>,
}

fn sd_or_one(values: ArrayView1<f64>) -> f64 {
    let sd = math::variance(values).sqrt();
    if sd.is_finite() && sd > 0.0 {
        sd
    } else {
        1.0
    }
}

fn resolve(
    priors: &BTreeMap<String, Option<Prior>>,
    name: &str,
    default: Prior,
) -> Option<Prior> {
    priors.get(name).copied().unwrap_or(Some(default))
}

impl Model {
    /// Checks `spec` against `table` and builds the log-density.
    ///
    /// Every configuration problem is reported here, before sampling.
    pub fn compile(table: &Table, spec: &ModelSpec) -> GlmResult<Model> {
        let formula = &spec.formula;
        let family = spec.family;
        formula.validate()?;

        if table.n_rows() == 0 {
            return Err(ConfigError::NoObservations.into());
        }

        let response = formula.response();
        let y = table.reals(response).map_err(|e| match e {
            DataError::MissingColumn { name, available } => {
                GlmError::from(ConfigError::UnknownColumn { name, available })
            }
            _ => GlmError::from(ConfigError::InvalidResponse {
                column: response.to_string(),
                family: family.to_string(),
                reason: "the column holds labels".to_string(),
            }),
        })?;
        family
            .check_response(&y.to_vec())
            .map_err(|reason| ConfigError::InvalidResponse {
                column: response.to_string(),
                family: family.to_string(),
                reason,
            })?;

        let mut factors = Vec::with_capacity(formula.groups().len());
        for group in formula.groups() {
            let keys = table.keys(group).map_err(|_| ConfigError::UnknownColumn {
                name: group.clone(),
                available: table.column_names().to_vec(),
            })?;
            factors.push(GroupFactor::from_keys(group, &keys));
        }

        if family.requires_trials() && spec.weights.is_none() {
            return Err(ConfigError::MissingWeights(family.to_string()).into());
        }

        let train = design_matrix(formula, &factors, spec.weights.as_ref(), table, true)?;
        if let Some((row, &value)) = train
            .weights
            .iter()
            .enumerate()
            .find(|(_, w)| !(w.is_finite() && **w > 0.0))
        {
            return Err(ConfigError::InvalidWeight { row, value }.into());
        }

        let layout = build_layout(formula, family, &factors);
        for name in spec.priors.keys() {
            let is_level = layout
                .index_of(name)
                .map_or(true, |idx| is_level_index(&layout, idx));
            if is_level {
                return Err(ConfigError::UnknownPrior {
                    name: name.clone(),
                    known: priorable_names(&layout),
                }
                .into());
            }
        }

        // Centre term columns so the intercept is nearly uncorrelated with
        // the slopes.
        let n_coef = layout.n_coef;
        let mut centres = Array1::zeros(n_coef);
        let mut X_centred = train.X.clone();
        if formula.has_intercept() {
            for j in 1..n_coef {
                let c = train.X.column(j).mean().unwrap_or(0.0);
                centres[j] = c;
                X_centred.column_mut(j).mapv_inplace(|v| v - c);
            }
        }

        let (coef_priors, group_priors, sigma_prior, nu_prior) =
            default_priors(spec, &layout, &train, &y)?;
        // A default intercept prior stays on the centred intercept.
        let uncentred_intercept_prior = formula.has_intercept()
            && spec.priors.contains_key(INTERCEPT)
            && centres.iter().any(|&c| c != 0.0);
        let init = data_initial_point(family, &layout, &y, &train.weights);

        Ok(Model {
            spec: spec.clone(),
            layout,
            factors,
            train,
            X_centred,
            centres,
            uncentred_intercept_prior,
            y,
            coef_priors,
            group_priors,
            sigma_prior,
            nu_prior,
            init,
        })
    }

    /// The specification the model was compiled from.
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Likelihood family.
    pub fn family(&self) -> Family {
        self.spec.family
    }

    /// Parameter layout shared by unconstrained and reported vectors.
    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// Grouping factors with their training levels.
    pub fn factors(&self) -> &[GroupFactor] {
        &self.factors
    }

    /// Design of the training table.
    pub fn training_design(&self) -> &Design {
        &self.train
    }

    /// Number of training observations.
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    /// Builds the design of a new table for prediction.
    ///
    /// Group levels not seen in training map to `None`; weights come from
    /// the weight column when present and default to one.
    pub fn design(&self, table: &Table) -> GlmResult<Design> {
        let weights = match &self.spec.weights {
            Some(Weights::Column(name)) if table.has_column(name) => self.spec.weights.as_ref(),
            _ => None,
        };
        design_matrix(&self.spec.formula, &self.factors, weights, table, false)
    }

    /// Maps an unconstrained vector to reported parameter values.
    pub fn constrain(&self, theta: ArrayView1<f64>) -> Array1<f64> {
        let mut out = theta.to_owned();
        let n_coef = self.layout.n_coef;

        if self.spec.formula.has_intercept() && n_coef > 0 {
            let shift: f64 = (1..n_coef).map(|j| theta[j] * self.centres[j]).sum();
            out[0] = theta[0] - shift;
        }
        for block in &self.layout.groups {
            let tau = theta[block.sigma].exp();
            out[block.sigma] = tau;
            for l in 0..block.n_levels {
                out[block.first_level + l] = tau * theta[block.first_level + l];
            }
        }
        if let Some(idx) = self.layout.sigma {
            out[idx] = theta[idx].exp();
        }
        if let Some(idx) = self.layout.nu {
            out[idx] = theta[idx].exp();
        }

        out
    }

    /// Auxiliary likelihood parameters from a reported draw.
    pub fn auxiliary(&self, params: ArrayView1<f64>) -> Auxiliary {
        let mut aux = Auxiliary::default();
        if let Some(idx) = self.layout.sigma {
            aux.sigma = params[idx];
        }
        if let Some(idx) = self.layout.nu {
            aux.nu = params[idx];
        }
        aux
    }

    /// Fixed-effect part of the linear predictor from a reported draw.
    pub fn fixed_eta(&self, params: ArrayView1<f64>, x: ArrayView1<f64>) -> f64 {
        x.dot(&params.slice(s![..self.layout.n_coef]))
    }

    /// Linear predictor of every row of `design` from a reported draw.
    ///
    /// Rows with unseen group levels get no group contribution; use
    /// `crate::predict` to simulate new levels instead.
    pub fn linear_predictor(&self, params: ArrayView1<f64>, design: &Design) -> Array1<f64> {
        let mut eta = design.X.dot(&params.slice(s![..self.layout.n_coef]));
        for (block, rows) in self.layout.groups.iter().zip(&design.levels) {
            for (e, level) in eta.iter_mut().zip(rows) {
                if let Some(l) = level {
                    *e += params[block.first_level + l];
                }
            }
        }
        eta
    }

    /// Log-likelihood of each observation of `design` under a reported draw.
    pub fn pointwise_log_likelihood(&self, params: ArrayView1<f64>, design: &Design) -> Array1<f64> {
        let family = self.spec.family;
        let aux = self.auxiliary(params);
        let eta = self.linear_predictor(params, design);
        let y = design.y.as_ref().unwrap_or(&self.y);

        Array1::from_iter((0..eta.len()).map(|i| {
            let obs = Observation {
                y: y[i],
                weight: design.weights[i],
            };
            family.log_likelihood(obs, eta[i], aux)
        }))
    }
}

impl Density for Model {
    fn dim(&self) -> usize {
        self.layout.dim()
    }

    fn initial_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        self.init.mapv(|v| v + rng.gen_range(-0.5..0.5))
    }

    fn log_density_gradient(&self, theta: ArrayView1<f64>) -> (f64, Array1<f64>) {
        let family = self.spec.family;
        let layout = &self.layout;
        let n_coef = layout.n_coef;
        let mut grad = Array1::zeros(layout.dim());

        let beta = theta.slice(s![..n_coef]);
        let mut eta = self.X_centred.dot(&beta);

        for (block, rows) in layout.groups.iter().zip(&self.train.levels) {
            let tau = theta[block.sigma].exp();
            for (e, level) in eta.iter_mut().zip(rows) {
                if let Some(l) = level {
                    *e += tau * theta[block.first_level + l];
                }
            }
        }

        let mut aux = Auxiliary::default();
        if let Some(idx) = layout.sigma {
            aux.sigma = theta[idx].exp();
        }
        if let Some(idx) = layout.nu {
            aux.nu = theta[idx].exp();
        }

        // Likelihood
        let mut logp = 0.0;
        let mut d_eta = Array1::zeros(eta.len());
        let mut d_log_sigma = 0.0;
        let mut d_log_nu = 0.0;
        for i in 0..eta.len() {
            let obs = Observation {
                y: self.y[i],
                weight: self.train.weights[i],
            };
            logp += family.log_likelihood(obs, eta[i], aux);
            let g = family.gradient(obs, eta[i], aux);
            d_eta[i] = g.eta;
            d_log_sigma += g.log_sigma;
            d_log_nu += g.log_nu;
        }

        grad.slice_mut(s![..n_coef])
            .assign(&self.X_centred.t().dot(&d_eta));

        for (block, rows) in layout.groups.iter().zip(&self.train.levels) {
            let tau = theta[block.sigma].exp();
            for (d, level) in d_eta.iter().zip(rows) {
                if let Some(l) = level {
                    let z = theta[block.first_level + l];
                    grad[block.first_level + l] += d * tau;
                    grad[block.sigma] += d * tau * z;
                }
            }
        }
        if let Some(idx) = layout.sigma {
            grad[idx] += d_log_sigma;
        }
        if let Some(idx) = layout.nu {
            grad[idx] += d_log_nu;
        }

        // Priors
        for (j, prior) in self.coef_priors.iter().enumerate() {
            if j == 0 && self.uncentred_intercept_prior {
                let shift: f64 = (1..n_coef).map(|k| theta[k] * self.centres[k]).sum();
                let alpha = theta[0] - shift;
                let g = prior.grad_log_density(alpha);
                logp += prior.log_density(alpha);
                grad[0] += g;
                for k in 1..n_coef {
                    grad[k] -= self.centres[k] * g;
                }
                continue;
            }
            logp += prior.log_density(theta[j]);
            grad[j] += prior.grad_log_density(theta[j]);
        }
        for (block, prior) in layout.groups.iter().zip(&self.group_priors) {
            let (lp, g) = log_scale_prior(prior, theta[block.sigma]);
            logp += lp;
            grad[block.sigma] += g;
            for l in 0..block.n_levels {
                let z = theta[block.first_level + l];
                logp -= 0.5 * z * z;
                grad[block.first_level + l] -= z;
            }
        }
        if let Some(idx) = layout.sigma {
            let (lp, g) = log_scale_prior(&self.sigma_prior, theta[idx]);
            logp += lp;
            grad[idx] += g;
        }
        if let Some(idx) = layout.nu {
            let (lp, g) = log_scale_prior(&self.nu_prior, theta[idx]);
            logp += lp;
            grad[idx] += g;
        }

        (logp, grad)
    }
}

/// Prior on a positive parameter evaluated at `u = log(x)`, Jacobian included.
fn log_scale_prior(prior: &Option<Prior>, u: f64) -> (f64, f64) {
    let x = u.exp();
    (
        prior.log_density(x) + u,
        prior.grad_log_density(x) * x + 1.0,
    )
}

fn is_level_index(layout: &ParameterLayout, idx: usize) -> bool {
    layout
        .groups
        .iter()
        .any(|b| idx >= b.first_level && idx < b.first_level + b.n_levels)
}

fn priorable_names(layout: &ParameterLayout) -> Vec<String> {
    (0..layout.dim())
        .filter(|&i| !is_level_index(layout, i))
        .map(|i| layout.names[i].clone())
        .collect()
}

fn build_layout(formula: &Formula, family: Family, factors: &[GroupFactor]) -> ParameterLayout {
    let mut names = Vec::new();
    if formula.has_intercept() {
        names.push(INTERCEPT.to_string());
    }
    names.extend(formula.terms().iter().cloned());
    let n_coef = names.len();

    let mut groups = Vec::with_capacity(factors.len());
    for factor in factors {
        let sigma = names.len();
        names.push(group_sigma_name(&factor.name));
        let first_level = names.len();
        names.extend(
            factor
                .levels
                .iter()
                .map(|level| group_level_name(&factor.name, level)),
        );
        groups.push(GroupBlock {
            sigma,
            first_level,
            n_levels: factor.levels.len(),
        });
    }

    let sigma = family.has_sigma().then(|| {
        names.push(SIGMA.to_string());
        names.len() - 1
    });
    let nu = family.has_nu().then(|| {
        names.push(NU.to_string());
        names.len() - 1
    });

    ParameterLayout {
        names,
        n_coef,
        groups,
        sigma,
        nu,
    }
}

fn design_matrix(
    formula: &Formula,
    factors: &[GroupFactor],
    weights: Option<&Weights>,
    table: &Table,
    training: bool,
) -> GlmResult<Design> {
    let n = table.n_rows();
    let intercept = formula.has_intercept() as usize;
    let n_coef = intercept + formula.terms().len();

    let mut X = Array2::zeros((n, n_coef));
    if intercept == 1 {
        X.column_mut(0).fill(1.0);
    }
    for (j, term) in formula.terms().iter().enumerate() {
        let values = table.reals(term).map_err(|e| match e {
            DataError::NotNumeric(name) => GlmError::from(ConfigError::NonNumericTerm(name)),
            _ => GlmError::from(ConfigError::UnknownColumn {
                name: term.clone(),
                available: table.column_names().to_vec(),
            }),
        })?;
        X.column_mut(intercept + j).assign(&values);
    }

    let mut levels = Vec::with_capacity(factors.len());
    for factor in factors {
        let keys = table.keys(&factor.name).map_err(|_| ConfigError::UnknownColumn {
            name: factor.name.clone(),
            available: table.column_names().to_vec(),
        })?;
        levels.push(keys.iter().map(|k| factor.index_of(k)).collect());
    }

    let y = if training || table.has_column(formula.response()) {
        table.reals(formula.response()).ok()
    } else {
        None
    };

    let weights = match weights {
        None => Array1::ones(n),
        Some(Weights::Column(name)) => table.reals(name).map_err(|e| match e {
            DataError::NotNumeric(column) => ConfigError::NonNumericWeights(column),
            _ => ConfigError::UnknownColumn {
                name: name.clone(),
                available: table.column_names().to_vec(),
            },
        })?,
        Some(Weights::Values(values)) => {
            if values.len() != n {
                return Err(ConfigError::WeightLength {
                    expected: n,
                    found: values.len(),
                }
                .into());
            }
            Array1::from_vec(values.clone())
        }
    };

    Ok(Design {
        X,
        levels,
        y,
        weights,
    })
}

type ResolvedPriors = (Vec<Option<Prior>>, Vec<Option<Prior>>, Option<Prior>, Option<Prior>);

/// Weakly informative priors scaled to the data, overridden by the spec.
fn default_priors(
    spec: &ModelSpec,
    layout: &ParameterLayout,
    train: &Design,
    y: &Array1<f64>,
) -> GlmResult<ResolvedPriors> {
    let family = spec.family;
    let logit = !family.has_sigma();
    let y_sd = if logit { 1.0 } else { sd_or_one(y.view()) };
    let y_mean = if logit { 0.0 } else { y.mean().unwrap_or(0.0) };
    let has_intercept = spec.formula.has_intercept();

    let mut coef_priors = Vec::with_capacity(layout.n_coef);
    for j in 0..layout.n_coef {
        let name = &layout.names[j];
        let default = if has_intercept && j == 0 {
            Prior::normal(y_mean, 2.5 * y_sd)?
        } else {
            let x_sd = sd_or_one(train.X.column(j));
            Prior::normal(0.0, 2.5 * y_sd / x_sd)?
        };
        let prior = resolve(&spec.priors, name, default);
        if prior.map_or(false, |p| p.is_positive()) {
            return Err(ConfigError::InvalidPrior {
                family: prior.map_or("Flat", |p| p.name()),
                reason: format!("coefficient '{}' needs a Normal or flat prior", name),
            }
            .into());
        }
        coef_priors.push(prior);
    }

    let scale_prior = |name: &str, default: Prior| -> Result<Option<Prior>, ConfigError> {
        let prior = resolve(&spec.priors, name, default);
        match prior {
            Some(p) if !p.is_positive() => Err(ConfigError::UnsupportedScalePrior(name.to_string())),
            _ => Ok(prior),
        }
    };

    let mut group_priors = Vec::with_capacity(layout.groups.len());
    for block in &layout.groups {
        let name = &layout.names[block.sigma];
        group_priors.push(scale_prior(name, Prior::half_normal(2.5 * y_sd)?)?);
    }

    let sigma_prior = match layout.sigma {
        Some(_) => scale_prior(SIGMA, Prior::half_normal(2.5 * y_sd)?)?,
        None => None,
    };
    let nu_prior = match layout.nu {
        Some(_) => scale_prior(NU, Prior::gamma(2.0, 0.1)?)?,
        None => None,
    };

    Ok((coef_priors, group_priors, sigma_prior, nu_prior))
}

fn data_initial_point(
    family: Family,
    layout: &ParameterLayout,
    y: &Array1<f64>,
    weights: &Array1<f64>,
) -> Array1<f64> {
    let mut init = Array1::zeros(layout.dim());
    let has_intercept = layout.names.first().map_or(false, |n| n == INTERCEPT);

    let y_mean = match family {
        Family::Binomial => (y * weights).sum() / weights.sum(),
        _ => y.mean().unwrap_or(0.0),
    };
    if has_intercept {
        init[0] = match family {
            Family::Bernoulli | Family::Binomial => family.link().link(y_mean.clamp(0.05, 0.95)),
            _ => y_mean,
        };
    }

    let log_sd = if family.has_sigma() {
        sd_or_one(y.view()).ln()
    } else {
        0.0
    };
    for block in &layout.groups {
        init[block.sigma] = log_sd;
    }
    if let Some(idx) = layout.sigma {
        init[idx] = log_sd;
    }
    if let Some(idx) = layout.nu {
        init[idx] = 10f64.ln();
    }

    init
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_table() -> Table {
        Table::new()
            .with_reals("y", vec![1.0, 2.5, 2.9, 4.2, 5.1, 5.8])
            .unwrap()
            .with_reals("x", vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap()
            .with_labels("g", vec!["a", "b", "a", "b", "c", "c"])
            .unwrap()
    }

    #[test]
    fn layout_names_follow_parameter_order() {
        let spec = ModelSpec::new(
            Formula::new("y").term("x").group_intercept("g"),
            Family::StudentT,
        );
        let model = Model::compile(&gaussian_table(), &spec).unwrap();
        assert_eq!(
            model.layout().names,
            vec!["Intercept", "x", "1|g_sigma", "1|g[a]", "1|g[b]", "1|g[c]", "sigma", "nu"]
        );
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let spec = ModelSpec::new(
            Formula::new("y").term("x").group_intercept("g"),
            Family::StudentT,
        );
        let model = Model::compile(&gaussian_table(), &spec).unwrap();
        let theta = Array1::from_vec(vec![0.3, 0.8, -0.2, 0.4, -0.7, 0.1, -0.3, 1.5]);
        let (_, grad) = model.log_density_gradient(theta.view());

        let h = 1e-6;
        for i in 0..theta.len() {
            let mut up = theta.clone();
            let mut down = theta.clone();
            up[i] += h;
            down[i] -= h;
            let numeric = (model.log_density_gradient(up.view()).0
                - model.log_density_gradient(down.view()).0)
                / (2.0 * h);
            assert!(
                (numeric - grad[i]).abs() < 1e-4 * (1.0 + numeric.abs()),
                "parameter {}: numeric {} analytic {}",
                model.layout().names[i],
                numeric,
                grad[i]
            );
        }
    }

    #[test]
    fn constrain_restores_uncentred_intercept() {
        let spec = ModelSpec::new(Formula::new("y").term("x"), Family::Gaussian);
        let model = Model::compile(&gaussian_table(), &spec).unwrap();
        let theta = Array1::from_vec(vec![3.0, 1.0, 0.0]);
        let params = model.constrain(theta.view());

        // x has mean 2.5, so the centred intercept 3.0 becomes 0.5
        assert!((params[0] - 0.5).abs() < 1e-12);
        assert!((params[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn intercept_prior_applies_to_reported_intercept() {
        let formula = Formula::new("y").term("x");
        let flat = ModelSpec::new(formula.clone(), Family::Gaussian).prior(INTERCEPT, None);
        let tight = ModelSpec::new(formula, Family::Gaussian)
            .prior(INTERCEPT, Some(Prior::normal(0.5, 0.1).unwrap()));
        let flat = Model::compile(&gaussian_table(), &flat).unwrap();
        let tight = Model::compile(&gaussian_table(), &tight).unwrap();

        // Centred intercept 3.0 with slope 1.0 reports an Intercept of 0.5
        let theta = Array1::from_vec(vec![3.0, 1.0, 0.0]);
        let added = tight.log_density_gradient(theta.view()).0
            - flat.log_density_gradient(theta.view()).0;
        let expected = Prior::normal(0.5, 0.1).unwrap().log_density(0.5);
        assert!((added - expected).abs() < 1e-9, "{} vs {}", added, expected);

        let theta = Array1::from_vec(vec![0.4, -0.6, 0.2]);
        let (_, grad) = tight.log_density_gradient(theta.view());
        let h = 1e-6;
        for i in 0..theta.len() {
            let mut up = theta.clone();
            let mut down = theta.clone();
            up[i] += h;
            down[i] -= h;
            let numeric = (tight.log_density_gradient(up.view()).0
                - tight.log_density_gradient(down.view()).0)
                / (2.0 * h);
            assert!((numeric - grad[i]).abs() < 1e-4 * (1.0 + numeric.abs()));
        }
    }
}
