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

//! Worked analyses, each returning a serializable report.
//!
//! The temperature analyses expect a table read from a delimited file with
//! the year in the first column followed by twelve monthly columns
//! (January to December).

use log::info;
use serde::Serialize;

use crate::data::Table;
use crate::errors::GlmResult;
use crate::family::Family;
use crate::formula::Formula;
use crate::loo::{self, LooComparison, LooScore};
use crate::model::{ModelSpec, INTERCEPT};
use crate::posterior::{self, Estimate, ParameterSummary, Posterior};
use crate::predict::{self, Prediction};
use crate::priors::Prior;
use crate::sampler::SamplerSettings;
use crate::transform::{self, Histogram, Interval};

/// Position of the year column in the temperature file.
pub const YEAR_POSITION: usize = 0;
/// Positions of the June, July and August columns in the temperature file.
pub const SUMMER_POSITIONS: [usize; 3] = [6, 7, 8];

const HDI_PROB: f64 = 0.94;
const BINS: usize = 30;

fn coefficients(posterior: &Posterior) -> Vec<(String, f64)> {
    posterior.coefficients(Estimate::Mean).into_iter().collect()
}

/// Ten coin flips with a flat and a normal prior on the log-odds.
#[derive(Debug, Clone, Serialize)]
pub struct CoinFlipsReport {
    /// Summary under the flat prior.
    pub flat: Vec<ParameterSummary>,
    /// Summary under the `Normal(0, 1)` prior.
    pub normal: Vec<ParameterSummary>,
    /// Probability of heads under the flat prior.
    pub probability: Interval,
    /// Histogram of the probability of heads under the flat prior.
    pub histogram: Histogram,
}

/// Outcomes of the coin-flip analysis.
pub fn coin_flip_table() -> GlmResult<Table> {
    Ok(Table::new().with_ints("heads", vec![1, 0, 0, 1, 1, 1, 0, 1, 1, 0])?)
}

/// Intercept-only Bernoulli fit of ten binary outcomes.
pub fn coin_flips(settings: &SamplerSettings) -> GlmResult<CoinFlipsReport> {
    let table = coin_flip_table()?;
    let formula = Formula::new("heads");

    let flat_spec = ModelSpec::new(formula.clone(), Family::Bernoulli).prior(INTERCEPT, Prior::flat());
    let flat = posterior::fit(&table, &flat_spec, settings)?;

    let normal_spec =
        ModelSpec::new(formula, Family::Bernoulli).prior(INTERCEPT, Some(Prior::normal(0.0, 1.0)?));
    let normal = posterior::fit(&table, &normal_spec, settings)?;

    let p = transform::inv_logit_draws(flat.draw(INTERCEPT)?.view());
    info!("coin flips: fitted flat and normal prior models");

    Ok(CoinFlipsReport {
        flat: flat.summary(HDI_PROB),
        normal: normal.summary(HDI_PROB),
        probability: transform::interval(p.view(), HDI_PROB),
        histogram: transform::histogram(p.view(), BINS),
    })
}

/// Binomial fit and refit after new successes arrive.
#[derive(Debug, Clone, Serialize)]
pub struct BinomialTrialsReport {
    /// Posterior means of the first fit.
    pub original: Vec<(String, f64)>,
    /// Posterior means after refitting on the updated counts.
    pub refit: Vec<(String, f64)>,
    /// Success probability of the second arm, first fit.
    pub original_probability: Interval,
    /// Success probability of the second arm, refit.
    pub refit_probability: Interval,
}

/// Two arms of five trials each, with the given successes.
pub fn trials_table(successes: [i64; 2]) -> GlmResult<Table> {
    let trials = [5, 5];
    Ok(Table::new()
        .with_ints("trials", trials.to_vec())?
        .with_ints("successes", successes.to_vec())?
        .with_reals(
            "rate",
            successes
                .iter()
                .zip(&trials)
                .map(|(&y, &n)| y as f64 / n as f64)
                .collect(),
        )?
        .with_ints("arm", vec![0, 1])?)
}

/// Specification of the trial analysis: `rate ~ 1 + arm` weighted by trials.
pub fn trials_spec() -> ModelSpec {
    ModelSpec::new(Formula::new("rate").term("arm"), Family::Binomial).weights_column("trials")
}

/// Fits `successes = (4, 3)` and refits with `(4, 5)`.
pub fn binomial_trials(settings: &SamplerSettings) -> GlmResult<BinomialTrialsReport> {
    let original = posterior::fit(&trials_table([4, 3])?, &trials_spec(), settings)?;
    let refit = original.refit(&trials_table([4, 5])?)?;

    let second_arm = |post: &Posterior| -> GlmResult<Interval> {
        let eta = transform::combine(
            post.draw(INTERCEPT)?.view(),
            post.draw("arm")?.view(),
            |a, b| a + b,
        );
        Ok(transform::interval(
            transform::inv_logit_draws(eta.view()).view(),
            HDI_PROB,
        ))
    };

    Ok(BinomialTrialsReport {
        original: coefficients(&original),
        refit: coefficients(&refit),
        original_probability: second_arm(&original)?,
        refit_probability: second_arm(&refit)?,
    })
}

/// Comparison of two success rates.
#[derive(Debug, Clone, Serialize)]
pub struct TwoGroupReport {
    /// Posterior means of the coefficients.
    pub coefficients: Vec<(String, f64)>,
    /// Success probability of group 1.
    pub p_group1: Interval,
    /// Success probability of group 2.
    pub p_group2: Interval,
    /// Odds ratio of group 1 over group 2.
    pub odds_ratio: Interval,
    /// Histogram of the odds ratio.
    pub odds_ratio_histogram: Histogram,
}

/// 39 of 674 successes in group 1 and 22 of 680 in group 2, with an
/// indicator column for group 1.
pub fn two_group_table() -> GlmResult<Table> {
    let trials = [674, 680];
    let successes = [39, 22];
    Ok(Table::new()
        .with_ints("trials", trials.to_vec())?
        .with_ints("successes", successes.to_vec())?
        .with_reals(
            "rate",
            successes
                .iter()
                .zip(&trials)
                .map(|(&y, &n)| y as f64 / n as f64)
                .collect(),
        )?
        .with_ints("group1", vec![1, 0])?)
}

/// Binomial comparison of the two groups.
pub fn two_group_comparison(settings: &SamplerSettings) -> GlmResult<TwoGroupReport> {
    let spec = ModelSpec::new(Formula::new("rate").term("group1"), Family::Binomial)
        .weights_column("trials");
    let post = posterior::fit(&two_group_table()?, &spec, settings)?;

    let intercept = post.draw(INTERCEPT)?;
    let eta1 = transform::combine(intercept.view(), post.draw("group1")?.view(), |a, b| a + b);
    let p1 = transform::inv_logit_draws(eta1.view());
    let p2 = transform::inv_logit_draws(intercept.view());
    let odds_ratio = transform::odds_ratio(p1.view(), p2.view());

    Ok(TwoGroupReport {
        coefficients: coefficients(&post),
        p_group1: transform::interval(p1.view(), HDI_PROB),
        p_group2: transform::interval(p2.view(), HDI_PROB),
        odds_ratio: transform::interval(odds_ratio.view(), HDI_PROB),
        odds_ratio_histogram: transform::histogram(odds_ratio.view(), BINS),
    })
}

/// Linear trend of one month's temperature over the years.
#[derive(Debug, Clone, Serialize)]
pub struct TemperatureTrendReport {
    /// Posterior summary of the regression.
    pub summary: Vec<ParameterSummary>,
    /// Year predicted.
    pub year: f64,
    /// Expected temperature in `year`.
    pub expected: Prediction,
    /// Interval of simulated temperatures in `year`.
    pub predictive: Interval,
}

/// Year and one month column of the temperature file, named `year` and
/// `temp`.
pub fn month_table(table: &Table, month_position: usize) -> GlmResult<Table> {
    let names = table.column_names();
    let year = names
        .get(YEAR_POSITION)
        .cloned()
        .unwrap_or_default();
    let month = names.get(month_position).cloned().unwrap_or_default();
    Ok(table
        .select_positions(&[YEAR_POSITION, month_position])?
        .rename(&year, "year")?
        .rename(&month, "temp")?)
}

/// Gaussian regression `temp ~ 1 + year` for the month at `month_position`,
/// predicting the year after the last one observed.
pub fn temperature_trend(
    table: &Table,
    month_position: usize,
    settings: &SamplerSettings,
) -> GlmResult<TemperatureTrendReport> {
    let data = month_table(table, month_position)?;
    let spec = ModelSpec::new(Formula::new("temp").term("year"), Family::Gaussian);
    let post = posterior::fit(&data, &spec, settings)?;

    let year = data
        .reals("year")?
        .fold(f64::NEG_INFINITY, |a, &b| a.max(b))
        + 1.0;
    let new = Table::new().with_reals("year", vec![year])?;
    let expected = predict::predict(&post, &new)?;
    let simulated = predict::posterior_predictive(&post, &new, None, settings.seed)?;

    Ok(TemperatureTrendReport {
        summary: post.summary(HDI_PROB),
        year,
        expected,
        predictive: transform::interval(simulated.column(0), HDI_PROB),
    })
}

/// Summer months compared with a hierarchical intercept per month.
#[derive(Debug, Clone, Serialize)]
pub struct SummerAnovaReport {
    /// Posterior summary of the global parameters.
    pub summary: Vec<ParameterSummary>,
    /// Interval of each month's deviation from the global mean.
    pub month_effects: Vec<(String, Interval)>,
}

/// Long form of the summer months: columns `year`, `month`, `temp`.
pub fn summer_table(table: &Table) -> GlmResult<Table> {
    let mut positions = vec![YEAR_POSITION];
    positions.extend(SUMMER_POSITIONS);
    let wide = table.select_positions(&positions)?;

    let names = wide.column_names().to_vec();
    let months: Vec<&str> = names[1..].iter().map(String::as_str).collect();
    let wide = wide.rename(&names[0], "year")?;
    Ok(wide.melt(&["year"], &months, "month", "temp")?)
}

/// Fits `temp ~ 1 + (1|month)` on the summer months.
pub fn summer_anova(table: &Table, settings: &SamplerSettings) -> GlmResult<SummerAnovaReport> {
    let long = summer_table(table)?;
    let spec = ModelSpec::new(
        Formula::new("temp").group_intercept("month"),
        Family::Gaussian,
    );
    let post = posterior::fit(&long, &spec, settings)?;

    let month_effects = post
        .group_effects("month")?
        .into_iter()
        .map(|(level, draws)| (level, transform::interval(draws.view(), HDI_PROB)))
        .collect();
    let summary = post
        .summary(HDI_PROB)
        .into_iter()
        .filter(|s| !s.name.starts_with("1|month["))
        .collect();

    Ok(SummerAnovaReport {
        summary,
        month_effects,
    })
}

/// Gaussian and Student-t likelihoods compared by LOO.
#[derive(Debug, Clone, Serialize)]
pub struct RobustComparisonReport {
    /// LOO of the Gaussian model.
    pub gaussian: LooScore,
    /// LOO of the Student-t model.
    pub student_t: LooScore,
    /// Gaussian minus Student-t.
    pub comparison: LooComparison,
    /// Whether the difference is within noise.
    pub practically_equivalent: bool,
    /// Posterior summary of `nu`.
    pub nu: Option<ParameterSummary>,
}

/// Fits the trend of the month at `month_position` with both likelihoods.
pub fn robust_comparison(
    table: &Table,
    month_position: usize,
    settings: &SamplerSettings,
) -> GlmResult<RobustComparisonReport> {
    let data = month_table(table, month_position)?;
    let formula = Formula::new("temp").term("year");

    let gaussian = posterior::fit(&data, &ModelSpec::new(formula.clone(), Family::Gaussian), settings)?;
    let student_t = posterior::fit(&data, &ModelSpec::new(formula, Family::StudentT), settings)?;

    let gaussian_loo = loo::loo(&gaussian);
    let student_loo = loo::loo(&student_t);
    let comparison = loo::compare(&gaussian_loo, &student_loo)?;
    let nu = student_t
        .summary(HDI_PROB)
        .into_iter()
        .find(|s| s.name == crate::model::NU);

    Ok(RobustComparisonReport {
        gaussian: gaussian_loo,
        student_t: student_loo,
        practically_equivalent: comparison.practically_equivalent(),
        comparison,
        nu,
    })
}
