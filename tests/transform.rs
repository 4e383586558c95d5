use ndarray::{array, Array1};
use pymc_glm::transform::{
    combine, histogram, interval, inv_logit, inv_logit_draws, logit, odds, odds_ratio,
};

use approx::assert_relative_eq;

#[test]
fn test_inv_logit_stays_in_unit_interval() {
    let xs = Array1::linspace(-30.0, 30.0, 601);
    let ps = inv_logit_draws(xs.view());
    assert_eq!(ps.len(), xs.len());
    assert!(ps.iter().all(|&p| p > 0.0 && p < 1.0));
    assert!(ps.windows(2).into_iter().all(|w| w[0] <= w[1]));
}

#[test]
fn test_inv_logit_of_zeros_is_one_half() {
    let ps = inv_logit_draws(Array1::zeros(50).view());
    assert!(ps.iter().all(|&p| p == 0.5));
}

#[test]
fn test_logit_inverts_inv_logit() {
    for &x in &[-4.0, -0.3, 0.0, 2.5] {
        assert_relative_eq!(logit(inv_logit(x)), x, epsilon = 1e-12);
    }
}

#[test]
fn test_odds_ratio_is_elementwise() {
    let p1 = array![0.5, 0.2];
    let p2 = array![0.5, 0.1];
    let or = odds_ratio(p1.view(), p2.view());
    assert_relative_eq!(or[0], 1.0);
    assert_relative_eq!(or[1], odds(0.2) / odds(0.1));
}

#[test]
fn test_degenerate_probabilities_propagate() {
    let or = odds_ratio(array![1.0].view(), array![0.5].view());
    assert!(or[0].is_infinite());
}

#[test]
#[should_panic(expected = "index-aligned")]
fn test_combine_rejects_mismatched_lengths() {
    let a = array![1.0, 2.0, 3.0];
    let b = array![1.0, 2.0];
    combine(a.view(), b.view(), |x, y| x + y);
}

#[test]
fn test_interval_and_histogram() {
    let draws = Array1::linspace(0.0, 1.0, 101);
    let iv = interval(draws.view(), 0.9);
    assert_relative_eq!(iv.lower, 0.05, epsilon = 1e-12);
    assert_relative_eq!(iv.median, 0.5, epsilon = 1e-12);
    assert_relative_eq!(iv.upper, 0.95, epsilon = 1e-12);

    let hist = histogram(array![0.0, 0.1, 0.9, 1.0, f64::NAN].view(), 2);
    assert_eq!(hist.counts, vec![2, 2]);
    assert_eq!(hist.dropped, 1);
    assert_eq!(hist.edges.len(), 3);
}
