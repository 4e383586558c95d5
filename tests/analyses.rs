use std::io::Write;

use pymc_glm::analyses;
use pymc_glm::data::Table;
use pymc_glm::sampler::SamplerSettings;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tempfile::NamedTempFile;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

fn settings() -> SamplerSettings {
    SamplerSettings::default()
        .draws(500)
        .tune(500)
        .chains(2)
        .seed(2024)
}

/// Semicolon file with a year column and twelve monthly temperatures.
fn temperature_file(years: usize) -> NamedTempFile {
    let mut rng = StdRng::seed_from_u64(17);
    let noise = Normal::new(0.0, 0.8).unwrap();
    let mut contents = format!("year;{}\n", MONTHS.join(";"));
    for k in 0..years {
        let year = 1980 + k;
        let trend = 0.03 * k as f64;
        let row: Vec<String> = (0..12)
            .map(|m| {
                let seasonal = 8.0 - 10.0 * ((m as f64 + 0.5) / 12.0 * 2.0 * std::f64::consts::PI).cos();
                format!("{:.2}", seasonal + trend + noise.sample(&mut rng))
            })
            .collect();
        contents.push_str(&format!("{};{}\n", year, row.join(";")));
    }

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_two_group_odds_ratio_exceeds_one() {
    let report = analyses::two_group_comparison(&settings()).unwrap();
    assert!(report.odds_ratio.median > 1.0, "{:?}", report.odds_ratio);
    assert!(report.p_group1.median > report.p_group2.median);
    assert!((report.p_group1.median - 39.0 / 674.0).abs() < 0.01);
    assert_eq!(report.odds_ratio_histogram.counts.iter().sum::<usize>(), 1000);
}

#[test]
fn test_binomial_refit_changes_estimates() {
    let report = analyses::binomial_trials(&settings()).unwrap();
    assert_eq!(report.original.len(), report.refit.len());
    let changed = report
        .original
        .iter()
        .zip(&report.refit)
        .any(|((_, a), (_, b))| (a - b).abs() > 1e-6);
    assert!(changed);
    assert!(report.refit_probability.median > report.original_probability.median);
}

#[test]
fn test_coin_flips_probability() {
    let report = analyses::coin_flips(&settings()).unwrap();
    assert!(report.probability.lower > 0.0 && report.probability.upper < 1.0);
    assert!((report.probability.median - 0.6).abs() < 0.15);
    assert_eq!(report.flat.len(), 1);
    assert_eq!(report.normal.len(), 1);
}

#[test]
fn test_summer_table_is_long() {
    let file = temperature_file(10);
    let table = Table::from_delimited(file.path(), b';').unwrap();
    let long = analyses::summer_table(&table).unwrap();
    assert_eq!(long.n_rows(), 30);
    assert_eq!(long.column_names(), &["year", "month", "temp"]);
}

#[test]
fn test_summer_anova_orders_months() {
    let file = temperature_file(20);
    let table = Table::from_delimited(file.path(), b';').unwrap();
    let report = analyses::summer_anova(&table, &settings().target_accept(0.9)).unwrap();

    let months: Vec<&str> = report.month_effects.iter().map(|(m, _)| m.as_str()).collect();
    assert_eq!(months, vec!["jun", "jul", "aug"]);
    assert!(report.summary.iter().any(|s| s.name == "1|month_sigma"));
}

#[test]
fn test_temperature_trend_predicts_next_year() {
    let file = temperature_file(30);
    let table = Table::from_delimited(file.path(), b';').unwrap();
    let report = analyses::temperature_trend(&table, 7, &settings()).unwrap();

    assert_eq!(report.year, 2010.0);
    assert_eq!(report.expected.mean.len(), 1);
    assert!(report.predictive.lower < report.expected.mean[0]);
    assert!(report.predictive.upper > report.expected.mean[0]);
}

#[test]
fn test_gaussian_and_student_t_are_practically_equivalent() {
    let file = temperature_file(30);
    let table = Table::from_delimited(file.path(), b';').unwrap();
    let report = analyses::robust_comparison(&table, 7, &settings()).unwrap();

    assert_eq!(report.gaussian.pointwise.len(), 30);
    assert!(report.comparison.elpd_diff.abs() < 2.0 * report.comparison.se_diff.max(2.0));
    assert!(report.practically_equivalent);
    assert!(report.nu.is_some());
}
