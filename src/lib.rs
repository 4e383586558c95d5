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
#![warn(missing_docs)]
#![allow(non_snake_case)]

//! pymc_glm fits small Bayesian generalized linear models: Bernoulli,
//! Binomial, Gaussian and Student-t likelihoods with optional random
//! intercepts per level of a grouping factor. Priors are placed on the
//! link scale and default to weakly informative choices scaled to the
//! data. Inference is performed with Hamiltonian Monte Carlo using
//! analytic gradients of the supported likelihoods, and fitted models
//! can be summarized, transformed, used for prediction and compared with
//! Pareto-smoothed importance sampling leave-one-out cross-validation.
//!
//! A typical pipeline builds a [`Table`], describes the model with a
//! [`Formula`] and [`ModelSpec`], calls [`fit`] and queries the returned
//! [`Posterior`].

pub mod analyses;
pub mod data;
pub mod diagnostics;
pub mod errors;
pub mod family;
pub mod formula;
pub mod loo;
pub mod math;
pub mod model;
pub mod posterior;
pub mod predict;
pub mod priors;
pub mod sampler;
pub mod transform;

pub use crate::data::{Column, Table};
pub use crate::diagnostics::InferenceWarning;
pub use crate::errors::{ConfigError, DataError, GlmError, GlmResult};
pub use crate::family::Family;
pub use crate::formula::Formula;
pub use crate::loo::{compare, loo, LooComparison, LooScore};
pub use crate::model::{ModelSpec, Weights};
pub use crate::posterior::{fit, Estimate, ParameterSummary, Posterior};
pub use crate::predict::{posterior_predictive, predict, Prediction};
pub use crate::priors::Prior;
pub use crate::sampler::SamplerSettings;
