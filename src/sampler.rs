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

//! Hamiltonian Monte Carlo over a differentiable log-density.
//!
//! Each chain runs a static-trajectory HMC sampler whose trajectory length
//! is jittered around `path_length`. During tuning the step size follows
//! dual averaging (Hoffman & Gelman, 2014) and a diagonal mass matrix is
//! estimated in doubling windows. Chains are independent and run on the
//! rayon thread pool.

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::Serialize;

use crate::errors::ConfigError;
use crate::math::RunningVariance;

/// Energy error above which a transition is flagged as divergent.
const MAX_ENERGY_ERROR: f64 = 1000.0;

/// A target density the sampler can explore.
pub trait Density: Sync {
    /// Number of unconstrained parameters.
    fn dim(&self) -> usize;
    /// Starting point of a chain.
    fn initial_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64>;
    /// Log-density (up to a constant) and its gradient at `theta`.
    fn log_density_gradient(&self, theta: ArrayView1<f64>) -> (f64, Array1<f64>);
}

/// Settings of a sampling run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplerSettings {
    /// Retained draws per chain.
    pub draws: usize,
    /// Tuning iterations per chain (discarded).
    pub tune: usize,
    /// Number of independent chains.
    pub chains: usize,
    /// Base seed; chain `c` uses `seed + c`. `None` draws from entropy.
    pub seed: Option<u64>,
    /// Target acceptance probability for step size adaptation.
    pub target_accept: f64,
    /// Mean integration time of a trajectory.
    pub path_length: f64,
    /// Upper bound on leapfrog steps per transition.
    pub max_leapfrog_steps: usize,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            draws: 1000,
            tune: 1000,
            chains: 4,
            seed: None,
            target_accept: 0.8,
            path_length: 2.0,
            max_leapfrog_steps: 256,
        }
    }
}

impl SamplerSettings {
    /// Sets the number of retained draws per chain.
    pub fn draws(mut self, draws: usize) -> Self {
        self.draws = draws;
        self
    }

    /// Sets the number of tuning iterations per chain.
    pub fn tune(mut self, tune: usize) -> Self {
        self.tune = tune;
        self
    }

    /// Sets the number of chains.
    pub fn chains(mut self, chains: usize) -> Self {
        self.chains = chains;
        self
    }

    /// Fixes the base seed, making the run reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the target acceptance probability.
    pub fn target_accept(mut self, target_accept: f64) -> Self {
        self.target_accept = target_accept;
        self
    }

    /// Sets the mean trajectory length.
    pub fn path_length(mut self, path_length: f64) -> Self {
        self.path_length = path_length;
        self
    }

    /// Sets the maximum number of leapfrog steps per transition.
    pub fn max_leapfrog_steps(mut self, steps: usize) -> Self {
        self.max_leapfrog_steps = steps;
        self
    }

    /// Rejects settings that cannot produce draws.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::InvalidSettings(msg.to_string()));
        if self.draws == 0 {
            return fail("draws must be at least 1");
        }
        if self.chains == 0 {
            return fail("chains must be at least 1");
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return fail("target_accept must lie in (0, 1)");
        }
        if !(self.path_length.is_finite() && self.path_length > 0.0) {
            return fail("path_length must be positive");
        }
        if self.max_leapfrog_steps == 0 {
            return fail("max_leapfrog_steps must be at least 1");
        }
        Ok(())
    }
}

/// Draws of one chain on the unconstrained scale.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    /// `draws x dim` matrix of retained positions.
    pub draws: Array2<f64>,
    /// Divergent transitions after tuning.
    pub divergences: usize,
    /// Step size used after tuning.
    pub step_size: f64,
    /// Mean acceptance probability after tuning.
    pub mean_accept: f64,
}

/// Step size adaptation by dual averaging.
#[derive(Debug, Clone)]
struct DualAverage {
    target: f64,
    mu: f64,
    log_step: f64,
    log_step_bar: f64,
    h_bar: f64,
    count: f64,
}

impl DualAverage {
    const GAMMA: f64 = 0.05;
    const T0: f64 = 10.0;
    const KAPPA: f64 = 0.75;

    fn new(step_size: f64, target: f64) -> Self {
        Self {
            target,
            mu: (10.0 * step_size).ln(),
            log_step: step_size.ln(),
            log_step_bar: 0.0,
            h_bar: 0.0,
            count: 0.0,
        }
    }

    fn restart(&mut self, step_size: f64) {
        *self = Self::new(step_size, self.target);
    }

    fn update(&mut self, accept_prob: f64) {
        self.count += 1.0;
        let eta = 1.0 / (self.count + Self::T0);
        self.h_bar = (1.0 - eta) * self.h_bar + eta * (self.target - accept_prob);
        self.log_step = self.mu - self.count.sqrt() / Self::GAMMA * self.h_bar;
        let w = self.count.powf(-Self::KAPPA);
        self.log_step_bar = w * self.log_step + (1.0 - w) * self.log_step_bar;
    }

    fn current(&self) -> f64 {
        self.log_step.exp()
    }

    fn final_step(&self) -> f64 {
        self.log_step_bar.exp()
    }
}

/// Iterations at which a mass matrix window closes.
///
/// Windows follow a fast/slow/fast schedule: an initial buffer where only
/// the step size adapts, doubling windows that estimate the mass matrix,
/// and a terminal buffer. Short tuning runs shrink every buffer.
fn mass_windows(tune: usize) -> Vec<usize> {
    if tune < 20 {
        return Vec::new();
    }

    let (mut init, mut term, mut base) = (75, 50, 25);
    if init + term + base > tune {
        init = tune * 15 / 100;
        term = tune / 10;
        base = tune - init - term;
    }

    let last = tune - term;
    let mut ends = Vec::new();
    let mut start = init;
    let mut size = base;
    while start < last {
        let mut end = start + size;
        if end + 2 * size > last {
            end = last;
        }
        ends.push(end);
        start = end;
        size *= 2;
    }
    ends
}

fn regularized_inverse_mass(var: Array1<f64>, n: usize) -> Array1<f64> {
    let n = n as f64;
    var.mapv(|v| (n / (n + 5.0)) * v + 1e-3 * (5.0 / (n + 5.0)))
}

struct Transition {
    accept_prob: f64,
    divergent: bool,
}

/// State of one HMC chain.
struct HmcChain<'a, D: Density, R: Rng> {
    density: &'a D,
    position: Array1<f64>,
    logp: f64,
    grad: Array1<f64>,
    step_size: f64,
    inv_mass: Array1<f64>,
    path_length: f64,
    max_steps: usize,
    rng: R,
}

impl<'a, D: Density, R: Rng> HmcChain<'a, D, R> {
    fn new(density: &'a D, settings: &SamplerSettings, mut rng: R) -> Self {
        let dim = density.dim();

        // Restart from a fresh jittered point until the density is finite.
        let mut position = density.initial_point(&mut rng);
        let (mut logp, mut grad) = density.log_density_gradient(position.view());
        for _ in 0..100 {
            if logp.is_finite() && grad.iter().all(|g| g.is_finite()) {
                break;
            }
            position = density.initial_point(&mut rng);
            (logp, grad) = density.log_density_gradient(position.view());
        }

        let mut chain = Self {
            density,
            position,
            logp,
            grad,
            step_size: 1.0,
            inv_mass: Array1::ones(dim),
            path_length: settings.path_length,
            max_steps: settings.max_leapfrog_steps,
            rng,
        };
        chain.step_size = chain.reasonable_step_size();
        chain
    }

    fn kinetic(&self, momentum: &Array1<f64>) -> f64 {
        0.5 * Zip::from(momentum)
            .and(&self.inv_mass)
            .fold(0.0, |acc, &p, &m| acc + p * p * m)
    }

    fn sample_momentum(&mut self) -> Array1<f64> {
        let rng = &mut self.rng;
        self.inv_mass.mapv(|m| {
            let z: f64 = StandardNormal.sample(rng);
            z / m.sqrt()
        })
    }

    /// Integrates `n_steps` leapfrog steps from the current state.
    fn leapfrog(
        &self,
        mut momentum: Array1<f64>,
        n_steps: usize,
        step_size: f64,
    ) -> (Array1<f64>, Array1<f64>, f64, Array1<f64>) {
        let mut position = self.position.clone();
        let mut grad = self.grad.clone();
        let mut logp = self.logp;

        momentum.scaled_add(0.5 * step_size, &grad);
        for step in 0..n_steps {
            let velocity = &momentum * &self.inv_mass;
            position.scaled_add(step_size, &velocity);
            (logp, grad) = self.density.log_density_gradient(position.view());
            if !logp.is_finite() {
                break;
            }
            let scale = if step + 1 == n_steps { 0.5 } else { 1.0 };
            momentum.scaled_add(scale * step_size, &grad);
        }

        (position, momentum, logp, grad)
    }

    /// Heuristic initial step size: halve or double until a single
    /// leapfrog step crosses an acceptance probability of one half.
    fn reasonable_step_size(&mut self) -> f64 {
        let mut step_size = self.step_size;
        let momentum = self.sample_momentum();
        let h0 = -self.logp + self.kinetic(&momentum);

        let log_accept = |chain: &Self, eps: f64| {
            let (_, p, logp, _) = chain.leapfrog(momentum.clone(), 1, eps);
            let h = -logp + chain.kinetic(&p);
            let delta = h0 - h;
            if delta.is_finite() {
                delta
            } else {
                f64::NEG_INFINITY
            }
        };

        let direction = if log_accept(self, step_size) > 0.5f64.ln() {
            1.0
        } else {
            -1.0
        };
        for _ in 0..50 {
            let delta = log_accept(self, step_size);
            if direction * delta <= direction * 0.5f64.ln() {
                break;
            }
            step_size *= 2f64.powf(direction);
        }
        step_size
    }

    fn step(&mut self) -> Transition {
        let momentum = self.sample_momentum();
        let h0 = -self.logp + self.kinetic(&momentum);

        let jitter: f64 = self.rng.gen_range(0.5..1.5);
        let n_steps = ((self.path_length / self.step_size * jitter).ceil() as usize)
            .clamp(1, self.max_steps);

        let (position, p, logp, grad) = self.leapfrog(momentum, n_steps, self.step_size);
        let h1 = -logp + self.kinetic(&p);
        let energy_error = h1 - h0;

        let divergent = !energy_error.is_finite() || energy_error > MAX_ENERGY_ERROR;
        let accept_prob = if energy_error.is_finite() {
            (-energy_error).exp().min(1.0)
        } else {
            0.0
        };

        if !divergent && self.rng.gen::<f64>() < accept_prob {
            self.position = position;
            self.logp = logp;
            self.grad = grad;
        }

        Transition {
            accept_prob,
            divergent,
        }
    }
}

fn chain_rng(seed: Option<u64>, chain: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(chain as u64)),
        None => StdRng::from_entropy(),
    }
}

/// Runs one chain: tuning followed by `settings.draws` retained draws.
pub fn run_chain<D: Density>(density: &D, settings: &SamplerSettings, chain: usize) -> ChainOutput {
    let rng = chain_rng(settings.seed, chain);
    let mut hmc = HmcChain::new(density, settings, rng);
    let dim = density.dim();

    let windows = mass_windows(settings.tune);
    let mut next_window = windows.iter().peekable();
    let first_window_start = match settings.tune {
        t if t < 20 => usize::MAX,
        t if 150 > t => t * 15 / 100,
        _ => 75,
    };

    let mut adapt = DualAverage::new(hmc.step_size, settings.target_accept);
    let mut variance = RunningVariance::new(dim);

    for i in 0..settings.tune {
        let transition = hmc.step();
        adapt.update(transition.accept_prob);
        hmc.step_size = adapt.current();

        if i >= first_window_start {
            variance.add(hmc.position.view());
        }
        if next_window.peek().map_or(false, |&&end| end == i + 1) {
            next_window.next();
            hmc.inv_mass = regularized_inverse_mass(variance.variance(), variance.count());
            variance.reset();
            hmc.step_size = hmc.reasonable_step_size();
            adapt.restart(hmc.step_size);
            debug!(
                "chain {}: mass matrix window closed at iteration {}, step size {:.4}",
                chain,
                i + 1,
                hmc.step_size
            );
        }
    }
    if settings.tune > 0 {
        hmc.step_size = adapt.final_step();
    }

    let mut draws = Array2::zeros((settings.draws, dim));
    let mut divergences = 0;
    let mut accept_sum = 0.0;
    for i in 0..settings.draws {
        let transition = hmc.step();
        divergences += transition.divergent as usize;
        accept_sum += transition.accept_prob;
        draws.row_mut(i).assign(&hmc.position);
    }

    let mean_accept = accept_sum / settings.draws as f64;
    debug!(
        "chain {} finished: step size {:.4}, mean acceptance {:.3}, {} divergences",
        chain, hmc.step_size, mean_accept, divergences
    );

    ChainOutput {
        draws,
        divergences,
        step_size: hmc.step_size,
        mean_accept,
    }
}

/// Runs every chain in parallel and returns them in chain order.
pub fn sample<D: Density>(density: &D, settings: &SamplerSettings) -> Result<Vec<ChainOutput>, ConfigError> {
    settings.validate()?;
    debug!(
        "sampling {} chains: {} tune, {} draws, dim {}",
        settings.chains,
        settings.tune,
        settings.draws,
        density.dim()
    );

    Ok((0..settings.chains)
        .into_par_iter()
        .map(|chain| run_chain(density, settings, chain))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gaussian2 {
        scales: [f64; 2],
    }

    impl Density for Gaussian2 {
        fn dim(&self) -> usize {
            2
        }

        fn initial_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
            Array1::from_vec(vec![rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
        }

        fn log_density_gradient(&self, theta: ArrayView1<f64>) -> (f64, Array1<f64>) {
            let s = self.scales;
            let logp = -0.5 * ((theta[0] / s[0]).powi(2) + (theta[1] / s[1]).powi(2));
            let grad = Array1::from_vec(vec![-theta[0] / (s[0] * s[0]), -theta[1] / (s[1] * s[1])]);
            (logp, grad)
        }
    }

    #[test]
    fn windows_end_at_terminal_buffer() {
        let ends = mass_windows(1000);
        assert_eq!(ends.first(), Some(&100));
        assert_eq!(ends.last(), Some(&950));
        assert!(ends.windows(2).all(|w| w[0] < w[1]));
        assert!(mass_windows(10).is_empty());
    }

    #[test]
    fn recovers_gaussian_moments() {
        let target = Gaussian2 { scales: [1.0, 5.0] };
        let settings = SamplerSettings::default().draws(2000).tune(500).chains(2).seed(7);
        let chains = sample(&target, &settings).unwrap();

        for out in &chains {
            assert_eq!(out.draws.nrows(), 2000);
            assert_eq!(out.divergences, 0);
            let mean = out.draws.mean_axis(ndarray::Axis(0)).unwrap();
            let sd = out.draws.std_axis(ndarray::Axis(0), 1.0);
            assert!(mean[0].abs() < 0.2, "{}", mean[0]);
            assert!((sd[0] - 1.0).abs() < 0.2, "{}", sd[0]);
            assert!((sd[1] - 5.0).abs() < 1.0, "{}", sd[1]);
        }
    }

    #[test]
    fn same_seed_same_draws() {
        let target = Gaussian2 { scales: [1.0, 1.0] };
        let settings = SamplerSettings::default().draws(50).tune(50).chains(2).seed(3);
        let a = sample(&target, &settings).unwrap();
        let b = sample(&target, &settings).unwrap();
        assert_eq!(a[0].draws, b[0].draws);
        assert_eq!(a[1].draws, b[1].draws);
        assert_ne!(a[0].draws, a[1].draws);
    }

    #[test]
    fn zero_chains_is_rejected() {
        let target = Gaussian2 { scales: [1.0, 1.0] };
        assert!(sample(&target, &SamplerSettings::default().chains(0)).is_err());
    }
}
