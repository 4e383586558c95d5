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

//! Prior distributions on model parameters.
//!
//! Priors live on the latent (link) scale of the model: a `Normal(0, 1.5)`
//! prior on the intercept of a Bernoulli model is a prior on log-odds.
//! Wherever a prior is accepted, `None` means a flat (improper) prior.
//! [`Prior::flat`] returns that `None` and logs a reminder that flat priors
//! are rarely a good idea.
//!
//! Includes:
//! - `Prior`: the supported families.
//! - `LogDensity`: log-density and derivative, implemented for `Prior` and
//!   for `Option<Prior>` so flat priors need no special casing downstream.

use log::warn;
use serde::Serialize;

use crate::errors::ConfigError;

/// Supported prior families.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "family")]
pub enum Prior {
    /// Normal(mu, sigma) on the real line.
    Normal {
        /// Location.
        mu: f64,
        /// Scale.
        sigma: f64,
    },
    /// Normal(0, sigma) truncated to the positive half line.
    HalfNormal {
        /// Scale.
        sigma: f64,
    },
    /// Exponential(rate).
    Exponential {
        /// Rate.
        rate: f64,
    },
    /// Gamma(shape, rate).
    Gamma {
        /// Shape.
        shape: f64,
        /// Rate.
        rate: f64,
    },
}

fn check_scale(family: &'static str, label: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidPrior {
            family,
            reason: format!("{} must be positive and finite, got {}", label, value),
        })
    }
}

impl Prior {
    /// Normal prior with location `mu` and scale `sigma`.
    ///
    /// Fails fast when `sigma <= 0` or either argument is not finite.
    pub fn normal(mu: f64, sigma: f64) -> Result<Prior, ConfigError> {
        if !mu.is_finite() {
            return Err(ConfigError::InvalidPrior {
                family: "Normal",
                reason: format!("mu must be finite, got {}", mu),
            });
        }
        check_scale("Normal", "sigma", sigma)?;
        Ok(Prior::Normal { mu, sigma })
    }

    /// Half-normal prior with scale `sigma`.
    pub fn half_normal(sigma: f64) -> Result<Prior, ConfigError> {
        check_scale("HalfNormal", "sigma", sigma)?;
        Ok(Prior::HalfNormal { sigma })
    }

    /// Exponential prior with the given rate.
    pub fn exponential(rate: f64) -> Result<Prior, ConfigError> {
        check_scale("Exponential", "rate", rate)?;
        Ok(Prior::Exponential { rate })
    }

    /// Gamma prior with shape and rate.
    pub fn gamma(shape: f64, rate: f64) -> Result<Prior, ConfigError> {
        check_scale("Gamma", "shape", shape)?;
        check_scale("Gamma", "rate", rate)?;
        Ok(Prior::Gamma { shape, rate })
    }

    /// A flat (improper) prior.
    ///
    /// Always `None`; the model treats it as a constant log-density. Flat
    /// priors can leave the posterior improper (e.g. a Bernoulli model with
    /// all-zero outcomes), so this is generally discouraged.
    pub fn flat() -> Option<Prior> {
        warn!("using a flat prior; this is generally discouraged and may yield an improper posterior");
        None
    }

    /// Whether the prior only has support on positive values.
    pub fn is_positive(&self) -> bool {
        !matches!(self, Prior::Normal { .. })
    }

    /// Family name.
    pub fn name(&self) -> &'static str {
        match self {
            Prior::Normal { .. } => "Normal",
            Prior::HalfNormal { .. } => "HalfNormal",
            Prior::Exponential { .. } => "Exponential",
            Prior::Gamma { .. } => "Gamma",
        }
    }
}

/// Log-density (up to an additive constant) and its derivative.
pub trait LogDensity {
    /// Unnormalized log-density at `x`.
    fn log_density(&self, x: f64) -> f64;
    /// Derivative of the log-density at `x`.
    fn grad_log_density(&self, x: f64) -> f64;
}

impl LogDensity for Prior {
    fn log_density(&self, x: f64) -> f64 {
        match *self {
            Prior::Normal { mu, sigma } => {
                let z = (x - mu) / sigma;
                -0.5 * z * z - sigma.ln()
            }
            Prior::HalfNormal { sigma } => {
                if x < 0.0 {
                    return f64::NEG_INFINITY;
                }
                let z = x / sigma;
                -0.5 * z * z - sigma.ln()
            }
            Prior::Exponential { rate } => {
                if x < 0.0 {
                    return f64::NEG_INFINITY;
                }
                rate.ln() - rate * x
            }
            Prior::Gamma { shape, rate } => {
                if x <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                shape * rate.ln() + (shape - 1.0) * x.ln() - rate * x
            }
        }
    }

    fn grad_log_density(&self, x: f64) -> f64 {
        match *self {
            Prior::Normal { mu, sigma } => -(x - mu) / (sigma * sigma),
            Prior::HalfNormal { sigma } => -x / (sigma * sigma),
            Prior::Exponential { rate } => -rate,
            Prior::Gamma { shape, rate } => (shape - 1.0) / x - rate,
        }
    }
}

impl LogDensity for Option<Prior> {
    fn log_density(&self, x: f64) -> f64 {
        self.as_ref().map_or(0.0, |prior| prior.log_density(x))
    }

    fn grad_log_density(&self, x: f64) -> f64 {
        self.as_ref().map_or(0.0, |prior| prior.grad_log_density(x))
    }
}
