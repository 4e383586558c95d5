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

//! Likelihood families and their link functions.
//!
//! This module provides, per family:
//! - the per-observation log-likelihood at a linear predictor value
//! - its derivatives with respect to the linear predictor and the
//!   log-transformed auxiliary parameters (`sigma`, `nu`)
//! - the expected response and a simulated outcome, for prediction
//!
//! The families are:
//! - Bernoulli: 0/1 response, logit link
//! - Binomial: proportion response with trial counts as weights, logit link
//! - Gaussian: real response, identity link, scale `sigma`
//! - StudentT: real response, identity link, scale `sigma` and degrees of
//!   freedom `nu`

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand_distr::{Binomial, Distribution, StandardNormal, StudentT};
use serde::Serialize;
use statrs::function::gamma::{digamma, ln_gamma};

use crate::errors::ConfigError;
use crate::math::{ln_choose, log1p_exp};
use crate::transform::{inv_logit, logit};

/// Variants indicate the likelihood of the response given the linear predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Family {
    /// Binary outcomes.
    Bernoulli,
    /// Proportions of successes out of a known number of trials.
    Binomial,
    /// Normally distributed outcomes.
    Gaussian,
    /// Heavy-tailed continuous outcomes.
    StudentT,
}

impl FromStr for Family {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bernoulli" => Ok(Family::Bernoulli),
            "binomial" => Ok(Family::Binomial),
            "gaussian" | "normal" => Ok(Family::Gaussian),
            "t" | "studentt" | "student_t" | "student-t" => Ok(Family::StudentT),
            _ => Err(ConfigError::UnknownFamily(s.to_string())),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Family::Bernoulli => "bernoulli",
            Family::Binomial => "binomial",
            Family::Gaussian => "gaussian",
            Family::StudentT => "t",
        };
        write!(f, "{}", name)
    }
}

/// Link between the mean response and the linear predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Link {
    /// `eta = log(mu / (1 - mu))`.
    Logit,
    /// `eta = mu`.
    Identity,
}

impl Link {
    /// Maps a mean response to the linear predictor scale.
    pub fn link(&self, mu: f64) -> f64 {
        match self {
            Link::Logit => logit(mu),
            Link::Identity => mu,
        }
    }

    /// Maps a linear predictor value to the mean response.
    pub fn inverse(&self, eta: f64) -> f64 {
        match self {
            Link::Logit => inv_logit(eta),
            Link::Identity => eta,
        }
    }
}

/// A single observed response with its weight.
///
/// For the Binomial family `y` is the observed proportion and `weight` the
/// number of trials; elsewhere `weight` multiplies the log-likelihood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Observed response.
    pub y: f64,
    /// Row weight.
    pub weight: f64,
}

/// Auxiliary (non-linear-predictor) parameters of a likelihood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Auxiliary {
    /// Residual scale; ignored by the logit families.
    pub sigma: f64,
    /// Degrees of freedom; only used by Student-t.
    pub nu: f64,
}

impl Default for Auxiliary {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            nu: f64::INFINITY,
        }
    }
}

/// Derivatives of one observation's log-likelihood.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LikelihoodGradient {
    /// With respect to the linear predictor.
    pub eta: f64,
    /// With respect to `log(sigma)`.
    pub log_sigma: f64,
    /// With respect to `log(nu)`.
    pub log_nu: f64,
}

/// Interface shared by every likelihood family.
pub trait Likelihood {
    /// Log-likelihood of one observation.
    fn log_likelihood(&self, obs: Observation, eta: f64, aux: Auxiliary) -> f64;
    /// Derivatives of `log_likelihood`.
    fn gradient(&self, obs: Observation, eta: f64, aux: Auxiliary) -> LikelihoodGradient;
    /// Expected response at `eta`.
    fn mean(&self, eta: f64, aux: Auxiliary) -> f64;
    /// Draws one outcome at `eta`. `trials` is only used by Binomial.
    fn simulate<R: Rng + ?Sized>(&self, eta: f64, aux: Auxiliary, trials: f64, rng: &mut R)
        -> f64;
}

// Unit structs carry the per-family implementations; `Family` dispatches to
// them so callers only handle the tag.

/// Bernoulli likelihood with logit link.
#[derive(Debug)]
pub struct BernoulliLikelihood;

impl Likelihood for BernoulliLikelihood {
    fn log_likelihood(&self, obs: Observation, eta: f64, _aux: Auxiliary) -> f64 {
        obs.weight * (obs.y * eta - log1p_exp(eta))
    }

    fn gradient(&self, obs: Observation, eta: f64, _aux: Auxiliary) -> LikelihoodGradient {
        LikelihoodGradient {
            eta: obs.weight * (obs.y - inv_logit(eta)),
            ..Default::default()
        }
    }

    fn mean(&self, eta: f64, _aux: Auxiliary) -> f64 {
        inv_logit(eta)
    }

    fn simulate<R: Rng + ?Sized>(
        &self,
        eta: f64,
        _aux: Auxiliary,
        _trials: f64,
        rng: &mut R,
    ) -> f64 {
        if rng.gen::<f64>() < inv_logit(eta) {
            1.0
        } else {
            0.0
        }
    }
}

/// Binomial likelihood on proportions with logit link.
#[derive(Debug)]
pub struct BinomialLikelihood;

impl Likelihood for BinomialLikelihood {
    fn log_likelihood(&self, obs: Observation, eta: f64, _aux: Auxiliary) -> f64 {
        let n = obs.weight;
        let k = obs.y * n;
        ln_choose(n, k) + k * eta - n * log1p_exp(eta)
    }

    fn gradient(&self, obs: Observation, eta: f64, _aux: Auxiliary) -> LikelihoodGradient {
        let n = obs.weight;
        LikelihoodGradient {
            eta: obs.y * n - n * inv_logit(eta),
            ..Default::default()
        }
    }

    fn mean(&self, eta: f64, _aux: Auxiliary) -> f64 {
        inv_logit(eta)
    }

    fn simulate<R: Rng + ?Sized>(
        &self,
        eta: f64,
        _aux: Auxiliary,
        trials: f64,
        rng: &mut R,
    ) -> f64 {
        let n = trials.round();
        if !(n >= 1.0) {
            return f64::NAN;
        }
        match Binomial::new(n as u64, inv_logit(eta)) {
            Ok(dist) => dist.sample(rng) as f64 / n,
            Err(_) => f64::NAN,
        }
    }
}

/// Gaussian likelihood with identity link.
#[derive(Debug)]
pub struct GaussianLikelihood;

impl Likelihood for GaussianLikelihood {
    fn log_likelihood(&self, obs: Observation, eta: f64, aux: Auxiliary) -> f64 {
        let z = (obs.y - eta) / aux.sigma;
        obs.weight * (-0.5 * (2.0 * PI).ln() - aux.sigma.ln() - 0.5 * z * z)
    }

    fn gradient(&self, obs: Observation, eta: f64, aux: Auxiliary) -> LikelihoodGradient {
        let r = obs.y - eta;
        let s2 = aux.sigma * aux.sigma;
        LikelihoodGradient {
            eta: obs.weight * r / s2,
            log_sigma: obs.weight * (r * r / s2 - 1.0),
            log_nu: 0.0,
        }
    }

    fn mean(&self, eta: f64, _aux: Auxiliary) -> f64 {
        eta
    }

    fn simulate<R: Rng + ?Sized>(
        &self,
        eta: f64,
        aux: Auxiliary,
        _trials: f64,
        rng: &mut R,
    ) -> f64 {
        let z: f64 = StandardNormal.sample(rng);
        eta + aux.sigma * z
    }
}

/// Student-t likelihood with identity link.
#[derive(Debug)]
pub struct StudentTLikelihood;

impl Likelihood for StudentTLikelihood {
    fn log_likelihood(&self, obs: Observation, eta: f64, aux: Auxiliary) -> f64 {
        let nu = aux.nu;
        let r = obs.y - eta;
        let q = r * r / (nu * aux.sigma * aux.sigma);
        obs.weight
            * (ln_gamma(0.5 * (nu + 1.0)) - ln_gamma(0.5 * nu) - 0.5 * (nu * PI).ln()
                - aux.sigma.ln()
                - 0.5 * (nu + 1.0) * q.ln_1p())
    }

    fn gradient(&self, obs: Observation, eta: f64, aux: Auxiliary) -> LikelihoodGradient {
        let nu = aux.nu;
        let s2 = aux.sigma * aux.sigma;
        let r = obs.y - eta;
        let q = r * r / (nu * s2);

        let d_nu = 0.5 * digamma(0.5 * (nu + 1.0)) - 0.5 * digamma(0.5 * nu) - 0.5 / nu
            - 0.5 * q.ln_1p()
            + 0.5 * (nu + 1.0) * q / (nu * (1.0 + q));

        LikelihoodGradient {
            eta: obs.weight * (nu + 1.0) * r / (nu * s2 + r * r),
            log_sigma: obs.weight * ((nu + 1.0) * q / (1.0 + q) - 1.0),
            log_nu: obs.weight * nu * d_nu,
        }
    }

    fn mean(&self, eta: f64, _aux: Auxiliary) -> f64 {
        eta
    }

    fn simulate<R: Rng + ?Sized>(
        &self,
        eta: f64,
        aux: Auxiliary,
        _trials: f64,
        rng: &mut R,
    ) -> f64 {
        match StudentT::new(aux.nu) {
            Ok(dist) => eta + aux.sigma * dist.sample(rng),
            Err(_) => f64::NAN,
        }
    }
}

impl Family {
    /// Link function of the family.
    pub fn link(&self) -> Link {
        match self {
            Family::Bernoulli | Family::Binomial => Link::Logit,
            Family::Gaussian | Family::StudentT => Link::Identity,
        }
    }

    /// Whether the family has a residual scale `sigma`.
    pub fn has_sigma(&self) -> bool {
        matches!(self, Family::Gaussian | Family::StudentT)
    }

    /// Whether the family has degrees of freedom `nu`.
    pub fn has_nu(&self) -> bool {
        matches!(self, Family::StudentT)
    }

    /// Whether weights are trial counts that must be supplied.
    pub fn requires_trials(&self) -> bool {
        matches!(self, Family::Binomial)
    }

    /// Checks that every response value is in the family's support.
    pub fn check_response(&self, y: &[f64]) -> Result<(), String> {
        let bad = match self {
            Family::Bernoulli => y.iter().position(|&v| v != 0.0 && v != 1.0),
            Family::Binomial => y.iter().position(|v| !(0.0..=1.0).contains(v)),
            Family::Gaussian | Family::StudentT => y.iter().position(|v| !v.is_finite()),
        };

        match (bad, self) {
            (None, _) => Ok(()),
            (Some(row), Family::Bernoulli) => {
                Err(format!("row {} is {}; expected 0 or 1", row, y[row]))
            }
            (Some(row), Family::Binomial) => Err(format!(
                "row {} is {}; expected a proportion in [0, 1]",
                row, y[row]
            )),
            (Some(row), _) => Err(format!("row {} is {}; expected a finite value", row, y[row])),
        }
    }
}

impl Likelihood for Family {
    /// Calls the corresponding `log_likelihood` for each `Family` variant.
    fn log_likelihood(&self, obs: Observation, eta: f64, aux: Auxiliary) -> f64 {
        match self {
            Family::Bernoulli => BernoulliLikelihood.log_likelihood(obs, eta, aux),
            Family::Binomial => BinomialLikelihood.log_likelihood(obs, eta, aux),
            Family::Gaussian => GaussianLikelihood.log_likelihood(obs, eta, aux),
            Family::StudentT => StudentTLikelihood.log_likelihood(obs, eta, aux),
        }
    }

    fn gradient(&self, obs: Observation, eta: f64, aux: Auxiliary) -> LikelihoodGradient {
        match self {
            Family::Bernoulli => BernoulliLikelihood.gradient(obs, eta, aux),
            Family::Binomial => BinomialLikelihood.gradient(obs, eta, aux),
            Family::Gaussian => GaussianLikelihood.gradient(obs, eta, aux),
            Family::StudentT => StudentTLikelihood.gradient(obs, eta, aux),
        }
    }

    fn mean(&self, eta: f64, aux: Auxiliary) -> f64 {
        match self {
            Family::Bernoulli => BernoulliLikelihood.mean(eta, aux),
            Family::Binomial => BinomialLikelihood.mean(eta, aux),
            Family::Gaussian => GaussianLikelihood.mean(eta, aux),
            Family::StudentT => StudentTLikelihood.mean(eta, aux),
        }
    }

    fn simulate<R: Rng + ?Sized>(&self, eta: f64, aux: Auxiliary, trials: f64, rng: &mut R) -> f64 {
        match self {
            Family::Bernoulli => BernoulliLikelihood.simulate(eta, aux, trials, rng),
            Family::Binomial => BinomialLikelihood.simulate(eta, aux, trials, rng),
            Family::Gaussian => GaussianLikelihood.simulate(eta, aux, trials, rng),
            Family::StudentT => StudentTLikelihood.simulate(eta, aux, trials, rng),
        }
    }
}
