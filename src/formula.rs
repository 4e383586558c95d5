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

//! Structured model formulas.
//!
//! Rather than parsing `y ~ 1 + x + (1|g)` from a string, a `Formula` is
//! built from explicit parts: a response column, an optional intercept, a
//! list of numeric fixed-effect columns and a list of grouping columns, each
//! of which contributes one random intercept per level.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::errors::ConfigError;

/// Response, fixed effects and grouped intercepts of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Formula {
    response: String,
    intercept: bool,
    terms: Vec<String>,
    groups: Vec<String>,
}

impl Formula {
    /// Formula for `response` with an intercept and nothing else.
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            intercept: true,
            terms: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Keeps the global intercept (the default).
    pub fn intercept(mut self) -> Self {
        self.intercept = true;
        self
    }

    /// Drops the global intercept.
    pub fn no_intercept(mut self) -> Self {
        self.intercept = false;
        self
    }

    /// Adds a numeric fixed-effect column.
    pub fn term(mut self, column: &str) -> Self {
        self.terms.push(column.to_string());
        self
    }

    /// Adds one random intercept per level of `column`.
    pub fn group_intercept(mut self, column: &str) -> Self {
        self.groups.push(column.to_string());
        self
    }

    /// Response column.
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Whether the formula has a global intercept.
    pub fn has_intercept(&self) -> bool {
        self.intercept
    }

    /// Fixed-effect columns.
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Grouping columns.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Checks that the formula has at least one term and no repeats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.intercept && self.terms.is_empty() && self.groups.is_empty() {
            return Err(ConfigError::EmptyFormula(self.response.clone()));
        }

        let mut seen = HashSet::from([self.response.as_str()]);
        for name in self.terms.iter().chain(self.groups.iter()) {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateTerm(name.clone()));
            }
        }

        Ok(())
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        parts.push(if self.intercept { "1" } else { "0" }.to_string());
        parts.extend(self.terms.iter().cloned());
        parts.extend(self.groups.iter().map(|g| format!("(1|{})", g)));
        write!(f, "{} ~ {}", self.response, parts.join(" + "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reads_like_a_formula() {
        let formula = Formula::new("temp").term("year").group_intercept("month");
        assert_eq!(formula.to_string(), "temp ~ 1 + year + (1|month)");
    }

    #[test]
    fn empty_formula_is_rejected() {
        let formula = Formula::new("y").no_intercept();
        assert_eq!(
            formula.validate(),
            Err(ConfigError::EmptyFormula("y".to_string()))
        );
    }

    #[test]
    fn response_cannot_be_a_predictor() {
        let formula = Formula::new("y").term("y");
        assert_eq!(
            formula.validate(),
            Err(ConfigError::DuplicateTerm("y".to_string()))
        );
    }
}
