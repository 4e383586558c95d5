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

//! In-memory observation tables.
//!
//! A `Table` is an ordered set of named, equal-length columns. Tables are
//! built either literally (`with_ints`, `with_reals`, `with_labels`) or by
//! reading a delimited text file, and can be reshaped from wide to long form
//! with [`Table::melt`]. Builders consume the table and hand back a new one,
//! so a table handed to the model fitter is never mutated afterwards.

use std::fs::File;
use std::path::Path;

use log::debug;
use ndarray::Array1;

use crate::errors::DataError;

/// A single column of observations.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Integer counts or indicators.
    Int(Vec<i64>),
    /// Real-valued measurements.
    Real(Vec<f64>),
    /// Categorical labels.
    Label(Vec<String>),
}

impl Column {
    /// Number of rows in the column.
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Real(v) => v.len(),
            Column::Label(v) => v.len(),
        }
    }

    /// Whether the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric values of the column, widening integers. `None` for labels.
    pub fn to_reals(&self) -> Option<Vec<f64>> {
        match self {
            Column::Int(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Column::Real(v) => Some(v.clone()),
            Column::Label(_) => None,
        }
    }

    /// String key of row `i`, used to identify group levels.
    pub fn key(&self, i: usize) -> String {
        match self {
            Column::Int(v) => v[i].to_string(),
            Column::Real(v) => v[i].to_string(),
            Column::Label(v) => v[i].clone(),
        }
    }

    /// Repeats every value `times` times in place, keeping row order.
    fn repeat_each(&self, times: usize) -> Column {
        fn rep<T: Clone>(values: &[T], times: usize) -> Vec<T> {
            values
                .iter()
                .flat_map(|v| std::iter::repeat(v.clone()).take(times))
                .collect()
        }

        match self {
            Column::Int(v) => Column::Int(rep(v, times)),
            Column::Real(v) => Column::Real(rep(v, times)),
            Column::Label(v) => Column::Label(rep(v, times)),
        }
    }

    /// Infers the narrowest column kind that holds every raw field.
    fn infer(raw: Vec<String>) -> Column {
        if let Ok(ints) = raw.iter().map(|s| s.parse::<i64>()).collect::<Result<Vec<_>, _>>() {
            return Column::Int(ints);
        }
        if let Ok(reals) = raw.iter().map(|s| s.parse::<f64>()).collect::<Result<Vec<_>, _>>() {
            return Column::Real(reals);
        }
        Column::Label(raw)
    }
}

/// An ordered collection of equal-length named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Table {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows (zero for a table without columns).
    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Appends a column, enforcing the equal-length invariant.
    pub fn with_column(mut self, name: &str, column: Column) -> Result<Self, DataError> {
        if self.names.iter().any(|n| n == name) {
            return Err(DataError::DuplicateColumn(name.to_string()));
        }
        if !self.columns.is_empty() && column.len() != self.n_rows() {
            return Err(DataError::LengthMismatch {
                name: name.to_string(),
                expected: self.n_rows(),
                found: column.len(),
            });
        }

        self.names.push(name.to_string());
        self.columns.push(column);
        Ok(self)
    }

    /// Appends an integer column.
    pub fn with_ints(self, name: &str, values: Vec<i64>) -> Result<Self, DataError> {
        self.with_column(name, Column::Int(values))
    }

    /// Appends a real-valued column.
    pub fn with_reals(self, name: &str, values: Vec<f64>) -> Result<Self, DataError> {
        self.with_column(name, Column::Real(values))
    }

    /// Appends a label column.
    pub fn with_labels<S: Into<String>>(
        self,
        name: &str,
        values: Vec<S>,
    ) -> Result<Self, DataError> {
        self.with_column(name, Column::Label(values.into_iter().map(Into::into).collect()))
    }

    /// Reads a delimited text file with a header row.
    ///
    /// Column kinds are inferred per column: all integers, else all numbers,
    /// else labels. Ragged rows and blank header fields are fatal.
    pub fn from_delimited<P: AsRef<Path>>(path: P, separator: u8) -> Result<Self, DataError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let malformed = |e: csv::Error| DataError::Malformed {
            path: display.clone(),
            message: e.to_string(),
        };

        let file = File::open(path).map_err(|source| DataError::Io {
            path: display.clone(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(separator)
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers = reader.headers().map_err(malformed)?.clone();
        if headers.is_empty() || headers.iter().any(str::is_empty) {
            return Err(DataError::Malformed {
                path: display.clone(),
                message: "header row is empty or has blank fields".to_string(),
            });
        }

        let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record.map_err(malformed)?;
            for (values, field) in raw.iter_mut().zip(record.iter()) {
                values.push(field.to_string());
            }
        }

        let mut table = Table::new();
        for (name, values) in headers.iter().zip(raw) {
            table = table.with_column(name, Column::infer(values))?;
        }
        debug!(
            "read {} rows x {} columns from {}",
            table.n_rows(),
            table.n_cols(),
            display
        );

        Ok(table)
    }

    /// Borrows a column by name.
    pub fn column(&self, name: &str) -> Result<&Column, DataError> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.columns[idx])
            .ok_or_else(|| DataError::MissingColumn {
                name: name.to_string(),
                available: self.names.clone(),
            })
    }

    /// Whether the table has a column called `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Numeric view of a column; integer columns are widened to `f64`.
    pub fn reals(&self, name: &str) -> Result<Array1<f64>, DataError> {
        self.column(name)?
            .to_reals()
            .map(Array1::from_vec)
            .ok_or_else(|| DataError::NotNumeric(name.to_string()))
    }

    /// Per-row string keys of a column, used as group levels.
    pub fn keys(&self, name: &str) -> Result<Vec<String>, DataError> {
        let column = self.column(name)?;
        Ok((0..column.len()).map(|i| column.key(i)).collect())
    }

    /// New table holding the named columns in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Table, DataError> {
        let mut table = Table::new();
        for name in names {
            table = table.with_column(name, self.column(name)?.clone())?;
        }
        Ok(table)
    }

    /// New table holding the columns at the given positions.
    pub fn select_positions(&self, positions: &[usize]) -> Result<Table, DataError> {
        let mut table = Table::new();
        for &position in positions {
            let (name, column) = self
                .names
                .get(position)
                .zip(self.columns.get(position))
                .ok_or(DataError::MissingPosition {
                    position,
                    width: self.n_cols(),
                })?;
            table = table.with_column(name, column.clone())?;
        }
        Ok(table)
    }

    /// Renames a column.
    pub fn rename(mut self, from: &str, to: &str) -> Result<Table, DataError> {
        let idx = self
            .names
            .iter()
            .position(|n| n == from)
            .ok_or_else(|| DataError::MissingColumn {
                name: from.to_string(),
                available: self.names.clone(),
            })?;
        if from != to && self.has_column(to) {
            return Err(DataError::DuplicateColumn(to.to_string()));
        }
        self.names[idx] = to.to_string();
        Ok(self)
    }

    /// Reshapes from wide to long form.
    ///
    /// Each input row yields one output row per entry of `value_columns`,
    /// in row-major order. `id_columns` are repeated alongside; the source
    /// column name is stored as a label in `variable_name` and the value
    /// in `value_name`. Value columns must be numeric.
    pub fn melt(
        &self,
        id_columns: &[&str],
        value_columns: &[&str],
        variable_name: &str,
        value_name: &str,
    ) -> Result<Table, DataError> {
        let width = value_columns.len();
        let values = value_columns
            .iter()
            .map(|name| {
                self.column(name)?
                    .to_reals()
                    .ok_or_else(|| DataError::NotNumeric(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut table = Table::new();
        for name in id_columns {
            table = table.with_column(name, self.column(name)?.repeat_each(width))?;
        }

        let n_rows = self.n_rows();
        let variable = (0..n_rows)
            .flat_map(|_| value_columns.iter().map(|name| name.to_string()))
            .collect::<Vec<_>>();
        let value = (0..n_rows)
            .flat_map(|row| values.iter().map(move |column| column[row]))
            .collect::<Vec<_>>();

        table
            .with_column(variable_name, Column::Label(variable))?
            .with_column(value_name, Column::Real(value))
    }
}
