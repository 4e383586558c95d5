use pymc_glm::analyses::two_group_table;
use pymc_glm::data::Table;
use pymc_glm::diagnostics::InferenceWarning;
use pymc_glm::errors::GlmError;
use pymc_glm::family::Family;
use pymc_glm::formula::Formula;
use pymc_glm::model::ModelSpec;
use pymc_glm::posterior::{fit, Estimate};
use pymc_glm::predict::{posterior_predictive, predict};
use pymc_glm::priors::Prior;
use pymc_glm::sampler::SamplerSettings;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn settings() -> SamplerSettings {
    SamplerSettings::default()
        .draws(500)
        .tune(500)
        .chains(2)
        .seed(42)
}

fn linear_table(n: usize, seed: u64) -> Table {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let x: Vec<f64> = (0..n).map(|i| i as f64 / n as f64 * 10.0).collect();
    let y: Vec<f64> = x
        .iter()
        .map(|&xi| 1.0 + 0.5 * xi + noise.sample(&mut rng))
        .collect();
    Table::new()
        .with_reals("x", x)
        .unwrap()
        .with_reals("y", y)
        .unwrap()
}

#[test]
fn test_seeded_fits_are_identical() {
    let table = linear_table(30, 1);
    let spec = ModelSpec::new(Formula::new("y").term("x"), Family::Gaussian);

    let a = fit(&table, &spec, &settings()).unwrap();
    let b = fit(&table, &spec, &settings()).unwrap();
    assert_eq!(a.draws_matrix(), b.draws_matrix());
    assert_eq!(
        a.coefficients(Estimate::Mean),
        b.coefficients(Estimate::Mean)
    );
}

#[test]
fn test_gaussian_regression_recovers_coefficients() {
    let table = linear_table(50, 2);
    let spec = ModelSpec::new(Formula::new("y").term("x"), Family::Gaussian);
    let post = fit(&table, &spec, &settings()).unwrap();

    assert_eq!(post.n_draws(), 1000);
    assert_eq!(post.n_chains(), 2);
    let coef = post.coefficients(Estimate::Median);
    assert!((coef["Intercept"] - 1.0).abs() < 0.4, "{:?}", coef);
    assert!((coef["x"] - 0.5).abs() < 0.1, "{:?}", coef);
    assert!((coef["sigma"] - 0.5).abs() < 0.2, "{:?}", coef);

    let summary = post.summary(0.94);
    assert_eq!(summary.len(), 3);
    for s in &summary {
        assert!(s.hdi_lower <= s.mean && s.mean <= s.hdi_upper, "{:?}", s);
        assert!(s.r_hat < 1.05, "{:?}", s);
    }
}

#[test]
fn test_draw_lookup() {
    let table = linear_table(20, 3);
    let spec = ModelSpec::new(Formula::new("y").term("x"), Family::Gaussian);
    let post = fit(&table, &spec, &settings()).unwrap();

    let all = post.draws(None).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.values().all(|d| d.len() == post.n_draws()));

    let some = post.draws(Some(&["x"][..])).unwrap();
    assert_eq!(some.len(), 1);
    assert!(post.draw("sigma").unwrap().iter().all(|&s| s > 0.0));

    assert!(matches!(
        post.draw("slope"),
        Err(GlmError::UnknownParameter { .. })
    ));
}

#[test]
fn test_refit_uses_new_data() {
    let spec = ModelSpec::new(Formula::new("y").term("x"), Family::Gaussian);
    let first = fit(&linear_table(30, 4), &spec, &settings()).unwrap();

    let shifted = linear_table(30, 4);
    let y: Vec<f64> = shifted.reals("y").unwrap().iter().map(|v| v + 5.0).collect();
    let shifted = shifted
        .select(&["x"])
        .unwrap()
        .with_reals("y", y)
        .unwrap();
    let second = first.refit(&shifted).unwrap();

    assert_eq!(second.spec(), first.spec());
    let a = first.coefficients(Estimate::Mean)["Intercept"];
    let b = second.coefficients(Estimate::Mean)["Intercept"];
    assert!((b - a - 5.0).abs() < 0.5, "{} vs {}", a, b);
}

#[test]
fn test_hierarchical_intercepts() {
    let mut rng = StdRng::seed_from_u64(9);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let offsets = [("north", -2.0), ("south", 0.0), ("east", 2.0)];

    let mut group = Vec::new();
    let mut y = Vec::new();
    for (name, offset) in offsets {
        for _ in 0..20 {
            group.push(name);
            y.push(10.0 + offset + noise.sample(&mut rng));
        }
    }
    let table = Table::new()
        .with_labels("region", group)
        .unwrap()
        .with_reals("y", y)
        .unwrap();

    let spec = ModelSpec::new(
        Formula::new("y").group_intercept("region"),
        Family::Gaussian,
    );
    let post = fit(&table, &spec, &settings().target_accept(0.9)).unwrap();

    let effects = post.group_effects("region").unwrap();
    let levels: Vec<&str> = effects.iter().map(|(l, _)| l.as_str()).collect();
    assert_eq!(levels, vec!["north", "south", "east"]);

    let coef = post.coefficients(Estimate::Mean);
    let north = coef["Intercept"] + coef["1|region[north]"];
    let east = coef["Intercept"] + coef["1|region[east]"];
    assert!((north - 8.0).abs() < 0.8, "{}", north);
    assert!((east - 12.0).abs() < 0.8, "{}", east);
    assert!(coef["1|region_sigma"] > 0.0);

    assert!(post.group_effects("site").is_err());
}

#[test]
fn test_predictions_for_new_rows() {
    let table = linear_table(40, 5);
    let spec = ModelSpec::new(Formula::new("y").term("x"), Family::Gaussian);
    let post = fit(&table, &spec, &settings()).unwrap();

    let new = Table::new().with_reals("x", vec![0.0, 10.0]).unwrap();
    let pred = predict(&post, &new).unwrap();
    assert_eq!(pred.mean.len(), 2);
    assert!(pred.mean[1] > pred.mean[0]);
    assert!(pred.sd.iter().all(|&s| s > 0.0));

    let sims = posterior_predictive(&post, &new, Some(200), Some(1)).unwrap();
    assert_eq!(sims.dim(), (200, 2));
    let again = posterior_predictive(&post, &new, Some(200), Some(1)).unwrap();
    assert_eq!(sims, again);

    // Observation noise widens the spread beyond the mean's uncertainty.
    let spread = pymc_glm::math::variance(sims.column(0)).sqrt();
    assert!(spread > pred.sd[0]);
}

#[test]
fn test_unseen_group_level_gets_new_deviation() {
    let table = Table::new()
        .with_labels("g", vec!["a", "a", "a", "b", "b", "b"])
        .unwrap()
        .with_reals("y", vec![1.0, 1.2, 0.9, 3.0, 3.1, 2.8])
        .unwrap();
    let spec = ModelSpec::new(Formula::new("y").group_intercept("g"), Family::Gaussian);
    let post = fit(&table, &spec, &settings()).unwrap();

    let new = Table::new().with_labels("g", vec!["a", "zzz"]).unwrap();
    let sims = posterior_predictive(&post, &new, None, Some(3)).unwrap();
    assert_eq!(sims.dim(), (post.n_draws(), 2));
    assert!(sims.iter().all(|v| v.is_finite()));
}

#[test]
fn test_bernoulli_with_predictor() {
    let x: Vec<f64> = (0..40).map(|i| i as f64 / 4.0 - 5.0).collect();
    // Ones for positive x, with every seventh outcome flipped.
    let y: Vec<i64> = x
        .iter()
        .enumerate()
        .map(|(i, &xi)| ((xi > 0.0) ^ (i % 7 == 0)) as i64)
        .collect();
    let table = Table::new()
        .with_reals("x", x)
        .unwrap()
        .with_ints("y", y)
        .unwrap();

    let spec = ModelSpec::new(Formula::new("y").term("x"), Family::Bernoulli);
    let post = fit(&table, &spec, &settings()).unwrap();
    assert!(post.coefficients(Estimate::Mean)["x"] > 0.0);

    let pred = predict(&post, &Table::new().with_reals("x", vec![-4.0, 4.0]).unwrap()).unwrap();
    assert!(pred.mean.iter().all(|&p| (0.0..=1.0).contains(&p)));
    assert!(pred.mean[1] > pred.mean[0]);
}

#[test]
fn test_intercept_prior_constrains_reported_intercept() {
    let spec = ModelSpec::new(Formula::new("rate").term("group1"), Family::Binomial)
        .weights_column("trials")
        .prior("Intercept", Some(Prior::normal(-5.0, 0.01).unwrap()));
    let post = fit(&two_group_table().unwrap(), &spec, &settings()).unwrap();

    let coef = post.coefficients(Estimate::Median);
    assert!((coef["Intercept"] + 5.0).abs() < 0.05, "{:?}", coef);
}

#[test]
fn test_short_run_attaches_warnings() {
    let spec = ModelSpec::new(Formula::new("rate").term("group1"), Family::Binomial)
        .weights_column("trials");
    let settings = SamplerSettings::default()
        .draws(3)
        .tune(300)
        .chains(4)
        .seed(1);
    let post = fit(&two_group_table().unwrap(), &spec, &settings).unwrap();

    assert_eq!(post.n_draws(), 12);
    assert!(!post.warnings().is_empty());
    for name in post.names() {
        assert!(post.warnings().iter().any(|w| matches!(
            w,
            InferenceWarning::UndeterminedDiagnostics { parameter } if parameter == name
        )));
    }
}
