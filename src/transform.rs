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

//! Derived quantities over posterior draws.
//!
//! Every function here is a pure element-wise map: the output has exactly as
//! many draws as the input. Two-sequence combinators pair draws by index, so
//! both inputs must come from the same posterior (draw `i` of one parameter
//! and draw `i` of another belong to the same joint sample). Mixing
//! sequences of different lengths is a bug in the caller and panics.
//!
//! Edge cases such as a probability of exactly 0 or 1 are not trapped; the
//! resulting infinities or NaNs flow through to the caller.
//!
//! The `histogram` and `interval` helpers produce plain data for whatever
//! plotting tool renders the results.

use ndarray::{Array1, ArrayView1, Zip};
use serde::Serialize;

use crate::math::{median, quantile_sorted, sorted};

/// Inverse-logit (logistic) function, evaluated without overflow.
pub fn inv_logit(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Logit (log-odds) of a probability.
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Odds of a probability.
pub fn odds(p: f64) -> f64 {
    p / (1.0 - p)
}

/// Applies `f` to every draw.
pub fn apply<F>(draws: ArrayView1<f64>, f: F) -> Array1<f64>
where
    F: Fn(f64) -> f64,
{
    draws.mapv(f)
}

/// Combines two index-aligned draw sequences element-wise.
///
/// # Panics
///
/// If the sequences have different lengths.
pub fn combine<F>(a: ArrayView1<f64>, b: ArrayView1<f64>, f: F) -> Array1<f64>
where
    F: Fn(f64, f64) -> f64,
{
    assert_eq!(
        a.len(),
        b.len(),
        "draw sequences must be index-aligned samples of one posterior"
    );
    Zip::from(&a).and(&b).map_collect(|&x, &y| f(x, y))
}

/// Inverse-logit of every draw.
pub fn inv_logit_draws(draws: ArrayView1<f64>) -> Array1<f64> {
    apply(draws, inv_logit)
}

/// Odds ratio `odds(p1) / odds(p2)` per draw.
pub fn odds_ratio(p1: ArrayView1<f64>, p2: ArrayView1<f64>) -> Array1<f64> {
    combine(p1, p2, |a, b| odds(a) / odds(b))
}

/// Equal-tailed interval of a draw sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interval {
    /// Lower bound.
    pub lower: f64,
    /// Median.
    pub median: f64,
    /// Upper bound.
    pub upper: f64,
    /// Probability mass between the bounds.
    pub prob: f64,
}

/// Equal-tailed `prob` interval and median of a draw sequence.
pub fn interval(draws: ArrayView1<f64>, prob: f64) -> Interval {
    let sorted = sorted(draws);
    let tail = (1.0 - prob) / 2.0;
    Interval {
        lower: quantile_sorted(&sorted, tail),
        median: median(draws),
        upper: quantile_sorted(&sorted, 1.0 - tail),
        prob,
    }
}

/// Binned counts of a draw sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    /// `bins + 1` bin edges.
    pub edges: Vec<f64>,
    /// Count per bin.
    pub counts: Vec<usize>,
    /// Draws left out because they were not finite.
    pub dropped: usize,
}

/// Histogram of the finite draws with `bins` equal-width bins.
pub fn histogram(draws: ArrayView1<f64>, bins: usize) -> Histogram {
    let bins = bins.max(1);
    let finite: Vec<f64> = draws.iter().copied().filter(|x| x.is_finite()).collect();
    let dropped = draws.len() - finite.len();

    let (mut lo, mut hi) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        });
    if finite.is_empty() {
        lo = 0.0;
        hi = 1.0;
    } else if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }

    let width = (hi - lo) / bins as f64;
    let edges = (0..=bins).map(|i| lo + i as f64 * width).collect();
    let mut counts = vec![0; bins];
    for x in finite {
        let idx = (((x - lo) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }

    Histogram {
        edges,
        counts,
        dropped,
    }
}
