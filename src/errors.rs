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

//! Error types shared by the table, model and posterior layers.
//!
//! Failures fall into two fatal groups: `DataError` for anything that goes
//! wrong while building or reading a table, and `ConfigError` for a model
//! specification that cannot be sampled. Both are caught before any sampling
//! starts. Sampler trouble (divergences, poor mixing) is *not* an error; see
//! [`crate::diagnostics::InferenceWarning`].

use thiserror::Error;

/// Failures raised while constructing, reading or reshaping a `Table`.
#[derive(Debug, Error)]
pub enum DataError {
    /// The delimited file could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The delimited file has an inconsistent layout.
    #[error("malformed delimited file {path}: {message}")]
    Malformed {
        /// Path that was being read.
        path: String,
        /// Parser message.
        message: String,
    },

    /// A column was requested that the table does not have.
    #[error("column '{name}' not found (available: {available:?})")]
    MissingColumn {
        /// Requested column.
        name: String,
        /// Columns present in the table.
        available: Vec<String>,
    },

    /// A column position beyond the table width was requested.
    #[error("column position {position} out of range for a table with {width} columns")]
    MissingPosition {
        /// Requested position.
        position: usize,
        /// Number of columns in the table.
        width: usize,
    },

    /// A new column does not match the table's row count.
    #[error("column '{name}' has {found} rows but the table has {expected}")]
    LengthMismatch {
        /// Column being inserted.
        name: String,
        /// Row count of the table.
        expected: usize,
        /// Row count of the new column.
        found: usize,
    },

    /// A column name is used twice.
    #[error("column '{0}' already exists")]
    DuplicateColumn(String),

    /// A numeric view was requested from a label column.
    #[error("column '{0}' holds labels, not numbers")]
    NotNumeric(String),
}

/// A model specification that cannot be turned into a sampleable density.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The formula contains no terms at all.
    #[error("formula for '{0}' has no intercept, predictors or group terms")]
    EmptyFormula(String),

    /// A formula term names a column the table does not have.
    #[error("formula refers to column '{name}' which is not in the table (available: {available:?})")]
    UnknownColumn {
        /// Missing column.
        name: String,
        /// Columns present in the table.
        available: Vec<String>,
    },

    /// A fixed-effect term refers to a label column.
    #[error("fixed-effect term '{0}' must be numeric; use it as a group term or encode it as an indicator")]
    NonNumericTerm(String),

    /// The table has no rows to fit.
    #[error("cannot fit a model to a table without rows")]
    NoObservations,

    /// A term names the same column twice, or the response as a predictor.
    #[error("term '{0}' appears more than once in the formula")]
    DuplicateTerm(String),

    /// The response column is outside the support of the likelihood.
    #[error("response '{column}' is invalid for the {family} family: {reason}")]
    InvalidResponse {
        /// Response column.
        column: String,
        /// Family name.
        family: String,
        /// What was wrong.
        reason: String,
    },

    /// The family needs weights (trial counts) that were not given.
    #[error("the {0} family requires trial counts passed as weights")]
    MissingWeights(String),

    /// The weight column holds labels.
    #[error("weight column '{0}' must be numeric")]
    NonNumericWeights(String),

    /// Weights do not line up with the table rows.
    #[error("{found} weights given for {expected} rows")]
    WeightLength {
        /// Number of rows.
        expected: usize,
        /// Number of weights.
        found: usize,
    },

    /// A weight is zero, negative or not finite.
    #[error("weight at row {row} is {value}; weights must be positive and finite")]
    InvalidWeight {
        /// Offending row.
        row: usize,
        /// Offending value.
        value: f64,
    },

    /// A prior was built with unusable parameters.
    #[error("invalid {family} prior: {reason}")]
    InvalidPrior {
        /// Prior family.
        family: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// A prior was attached to a parameter the model does not have.
    #[error("prior given for unknown parameter '{name}' (model parameters: {known:?})")]
    UnknownPrior {
        /// Parameter named by the caller.
        name: String,
        /// Parameters of the model.
        known: Vec<String>,
    },

    /// A scale parameter was given a prior with support on negative values.
    #[error("parameter '{0}' is positive and needs a half-normal, exponential, gamma or flat prior")]
    UnsupportedScalePrior(String),

    /// A family name could not be parsed.
    #[error("unknown family '{0}'")]
    UnknownFamily(String),

    /// Sampler settings that cannot produce draws.
    #[error("invalid sampler settings: {0}")]
    InvalidSettings(String),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum GlmError {
    /// Table construction or file reading failed.
    #[error(transparent)]
    Data(#[from] DataError),

    /// The model specification is not valid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A parameter name was not found in a posterior.
    #[error("parameter '{name}' not found in posterior (available: {available:?})")]
    UnknownParameter {
        /// Requested parameter.
        name: String,
        /// Parameters in the posterior.
        available: Vec<String>,
    },

    /// Two LOO scores cover a different number of observations.
    #[error("cannot compare LOO scores over {left} and {right} observations")]
    IncomparableScores {
        /// Observations in the first score.
        left: usize,
        /// Observations in the second score.
        right: usize,
    },
}

/// Result alias used across the crate.
pub type GlmResult<T> = Result<T, GlmError>;
