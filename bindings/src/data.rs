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

use std::collections::BTreeMap;

use numpy::{PyArrayMethods, PyReadonlyArray1};
use pymc_glm::{GlmError, Table};
use pyo3::exceptions::PyValueError;
use pyo3::PyErr;

/// Maps crate errors onto Python `ValueError`s.
pub fn to_py_err(err: GlmError) -> PyErr {
    PyErr::new::<PyValueError, _>(err.to_string())
}

/// Builds a `Table` from numeric numpy columns and string label columns.
///
/// Columns are added in name order, numeric columns first.
pub fn table_from_python(
    numeric: BTreeMap<String, PyReadonlyArray1<f64>>,
    labels: BTreeMap<String, Vec<String>>,
) -> Result<Table, PyErr> {
    let mut table = Table::new();
    for (name, values) in numeric {
        let values = values.as_array().to_vec();
        table = table
            .with_reals(&name, values)
            .map_err(|e| to_py_err(e.into()))?;
    }
    for (name, values) in labels {
        table = table
            .with_labels(&name, values)
            .map_err(|e| to_py_err(e.into()))?;
    }
    Ok(table)
}
