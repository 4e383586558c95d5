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

mod data;

use std::collections::BTreeMap;
use std::str::FromStr;

use numpy::{PyArray1, PyReadonlyArray1};
use pyo3::prelude::*;

use pymc_glm::{Estimate, Family, Formula, ModelSpec, Posterior, SamplerSettings};

use crate::data::{table_from_python, to_py_err};

/// `PosteriorWrapper` holds a fitted posterior for Python callers.
#[pyclass]
struct PosteriorWrapper {
    posterior: Posterior,
}

#[pymethods]
impl PosteriorWrapper {
    /// Parameter names in column order.
    fn names(&self) -> Vec<String> {
        self.posterior.names().to_vec()
    }

    /// Draws of one parameter as a numpy array.
    fn draw<'py>(&self, py: Python<'py>, name: &str) -> PyResult<Bound<'py, PyArray1<f64>>> {
        let draws = self.posterior.draw(name).map_err(to_py_err)?;
        Ok(PyArray1::from_array_bound(py, &draws.view()))
    }

    /// Posterior mean (or median) of every parameter.
    #[pyo3(signature = (median = false))]
    fn coefficients(&self, median: bool) -> BTreeMap<String, f64> {
        let estimate = if median {
            Estimate::Median
        } else {
            Estimate::Mean
        };
        self.posterior.coefficients(estimate)
    }

    /// Inference warnings as messages.
    fn warnings(&self) -> Vec<String> {
        self.posterior
            .warnings()
            .iter()
            .map(|w| w.to_string())
            .collect()
    }

    /// PSIS-LOO estimate as `(elpd, se, p_loo)`.
    fn loo(&self) -> (f64, f64, f64) {
        let score = pymc_glm::loo(&self.posterior);
        (score.elpd, score.se, score.p_loo)
    }
}

#[pyfunction]
#[pyo3(signature = (numeric, labels, response, terms, groups, family, weights = None, draws = 1000, tune = 1000, chains = 4, seed = None))]
#[allow(clippy::too_many_arguments)]
fn fit(
    numeric: BTreeMap<String, PyReadonlyArray1<f64>>,
    labels: BTreeMap<String, Vec<String>>,
    response: &str,
    terms: Vec<String>,
    groups: Vec<String>,
    family: &str,
    weights: Option<String>,
    draws: usize,
    tune: usize,
    chains: usize,
    seed: Option<u64>,
) -> PyResult<PosteriorWrapper> {
    let table = table_from_python(numeric, labels)?;
    let family = Family::from_str(family).map_err(|e| to_py_err(e.into()))?;

    let formula = terms.iter().fold(Formula::new(response), |f, t| f.term(t));
    let formula = groups.iter().fold(formula, |f, g| f.group_intercept(g));
    let mut spec = ModelSpec::new(formula, family);
    if let Some(column) = weights {
        spec = spec.weights_column(&column);
    }

    let mut settings = SamplerSettings::default()
        .draws(draws)
        .tune(tune)
        .chains(chains);
    if let Some(seed) = seed {
        settings = settings.seed(seed);
    }

    let posterior = pymc_glm::fit(&table, &spec, &settings).map_err(to_py_err)?;
    Ok(PosteriorWrapper { posterior })
}

#[pymodule]
fn pymc_glm_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PosteriorWrapper>()?;
    m.add_function(wrap_pyfunction!(fit, m)?)?;

    Ok(())
}
