//! Expectation-maximization fitting of a mixture of GP experts.
//!
//! The trainer is an explicit state machine:
//!
//! ```text
//! Init -> EStep -> MStep -> ConvergenceCheck -> (EStep | Terminated)
//! ```
//!
//! * `Init` computes initial responsibilities and bootstraps experts and gating network,
//! * `EStep` computes posterior responsibilities and the data log-likelihood of the current mixture,
//! * `MStep` refits experts and gating network against the responsibilities,
//! * `ConvergenceCheck` stops when the max absolute change of responsibilities is below epsilon
//!   or when the max number of iterations is reached.
//!
//! The mixture with the best data log-likelihood seen during the run is returned.
use crate::algorithm::GpMixture;
use crate::errors::{MoeError, Result};
use crate::gating::GatingNetwork;
use crate::gaussian_mixture::GaussianMixture;
use crate::parameters::MixtureValidParams;

use linfa::traits::Fit;
use linfa::Dataset;
use linfa_clustering::GaussianMixtureModel;
use log::{debug, info, trace, warn};
use ndarray::{s, Array, Array2, ArrayView1, ArrayView2, Axis, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;
use sampling_gp::GpExpert;
use std::fmt;

/// Min number of samples per expert required to initialize responsibilities by clustering
pub const GMM_MIN_SAMPLES_PER_EXPERT: usize = 3;
/// Number of runs of the gaussian mixture clustering used at initialization
pub const GMM_N_RUNS: u64 = 5;

/// States of the EM procedure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmState {
    /// Initial responsibilities and bootstrap fit
    Init,
    /// Expectation: responsibilities from the current mixture
    EStep,
    /// Maximization: refit of experts and gating network
    MStep,
    /// Stopping criteria evaluation
    ConvergenceCheck,
    /// Final state
    Terminated,
}

impl fmt::Display for EmState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EmState::Init => "Init",
            EmState::EStep => "E-step",
            EmState::MStep => "M-step",
            EmState::ConvergenceCheck => "ConvergenceCheck",
            EmState::Terminated => "Terminated",
        };
        write!(f, "{name}")
    }
}

/// Origin of the initial responsibilities
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmInit {
    /// Single expert, every responsibility is 1
    SingleExpert,
    /// Posterior responsibilities of a previously fitted mixture
    WarmStart,
    /// Soft assignments of a gaussian mixture clustering of (position, value) samples
    Clustering,
    /// Random perturbation of uniform responsibilities
    Random,
}

/// Result of an EM run
#[derive(Clone, Debug)]
pub struct EmOutcome {
    /// Best fitted mixture (wrt data log-likelihood)
    pub mixture: GpMixture,
    /// Whether the responsibilities converged before the iteration cap
    pub converged: bool,
    /// Number of EM iterations (E-step/M-step cycles) performed
    pub iterations: usize,
    /// Data log-likelihood of the returned mixture
    pub log_likelihood: f64,
    /// Max absolute change of responsibilities at the last iteration
    pub max_delta: f64,
    /// How responsibilities were initialized
    pub init: EmInit,
    /// Visited states in order
    pub states: Vec<EmState>,
}

/// EM trainer of a mixture of GP experts on a fixed set of samples
pub struct EmTrainer<'a> {
    params: &'a MixtureValidParams,
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    warm_start: Option<&'a GpMixture>,
    rng: Xoshiro256Plus,
}

impl<'a> EmTrainer<'a> {
    /// Trainer of a mixture configured by `params` on (`x`, `y`) samples
    pub fn new(
        params: &'a MixtureValidParams,
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, f64>,
    ) -> Self {
        EmTrainer {
            params,
            x,
            y,
            warm_start: None,
            rng: params.rng(),
        }
    }

    /// Use a previously fitted mixture to initialize responsibilities
    pub fn warm_start(mut self, mixture: Option<&'a GpMixture>) -> Self {
        self.warm_start = mixture;
        self
    }

    /// Run EM until convergence or iteration cap
    ///
    /// # Errors
    ///
    /// * [MoeError::EmptyTrainingSet] without samples,
    /// * [MoeError::ShapeMismatch] if positions and values counts differ,
    /// * [MoeError::NumericalError] if an expert or gating function can not be fitted.
    pub fn run(mut self) -> Result<EmOutcome> {
        let n = self.x.nrows();
        if n == 0 {
            return Err(MoeError::EmptyTrainingSet);
        }
        if self.y.len() != n {
            return Err(MoeError::ShapeMismatch(format!(
                "{} positions for {} values",
                n,
                self.y.len()
            )));
        }

        let mut state = EmState::Init;
        let mut states = vec![];
        let mut init = EmInit::Random;
        let mut mixture = self.unfitted_mixture()?;
        let mut resp = Array2::zeros((n, self.params.n_experts()));
        let mut prev_resp = resp.to_owned();
        let mut best: Option<(f64, GpMixture)> = None;
        let mut iterations = 0;
        let mut converged = false;
        let mut max_delta = f64::INFINITY;

        loop {
            states.push(state);
            trace!("EM state {state}");
            state = match state {
                EmState::Init => {
                    let (r, origin) = self.initial_responsibilities()?;
                    debug!("EM initialized by {origin:?}");
                    init = origin;
                    resp = r;
                    mixture = mixture.maximize(&self.x, &self.y, &resp)?;
                    EmState::EStep
                }
                EmState::EStep => {
                    let (r, log_likelihood) = mixture.responsibilities(&self.x, &self.y)?;
                    keep_best(&mut best, log_likelihood, &mixture);
                    iterations += 1;
                    debug!("EM iteration {iterations}: log-likelihood={log_likelihood}");
                    prev_resp = std::mem::replace(&mut resp, r);
                    EmState::MStep
                }
                EmState::MStep => {
                    mixture = mixture.maximize(&self.x, &self.y, &resp)?;
                    EmState::ConvergenceCheck
                }
                EmState::ConvergenceCheck => {
                    max_delta = max_abs_diff(&resp, &prev_resp);
                    trace!("EM max responsibility change = {max_delta}");
                    if max_delta < self.params.epsilon() {
                        converged = true;
                        EmState::Terminated
                    } else if iterations >= self.params.max_iterations() {
                        EmState::Terminated
                    } else {
                        EmState::EStep
                    }
                }
                EmState::Terminated => break,
            };
        }

        // last M-step result is evaluated as well
        let (_, log_likelihood) = mixture.responsibilities(&self.x, &self.y)?;
        keep_best(&mut best, log_likelihood, &mixture);
        let (log_likelihood, mixture) = best.unwrap_or((log_likelihood, mixture));

        if converged {
            info!("EM converged in {iterations} iterations (log-likelihood={log_likelihood})");
        } else {
            warn!(
                "EM stopped after {iterations} iterations without convergence \
                 (max change={max_delta})"
            );
        }
        Ok(EmOutcome {
            mixture,
            converged,
            iterations,
            log_likelihood,
            max_delta,
            init,
            states,
        })
    }

    fn unfitted_mixture(&self) -> Result<GpMixture> {
        let experts = self
            .params
            .expert_kernels()?
            .into_iter()
            .map(GpExpert::new)
            .collect();
        let gating = GatingNetwork::new(self.params.gating_kernels()?)?;
        GpMixture::new(experts, gating, self.params.noise_stddev())
    }

    /// Initial (n, n_experts) responsibilities and their origin
    fn initial_responsibilities(&mut self) -> Result<(Array2<f64>, EmInit)> {
        let n = self.x.nrows();
        let k = self.params.n_experts();
        if k == 1 {
            return Ok((Array2::ones((n, 1)), EmInit::SingleExpert));
        }
        if let Some(previous) = self.warm_start {
            if previous.n_experts() == k {
                let (resp, _) = previous.responsibilities(&self.x, &self.y)?;
                return Ok((resp, EmInit::WarmStart));
            }
        }
        if n >= GMM_MIN_SAMPLES_PER_EXPERT * k {
            match self.clustering_responsibilities() {
                Ok(resp) => return Ok((resp, EmInit::Clustering)),
                Err(err) => warn!("Clustering initialization failed ({err}), use random one"),
            }
        }
        Ok((self.random_responsibilities(), EmInit::Random))
    }

    /// Soft assignments of a gaussian mixture fitted on (x, y, value) samples
    fn clustering_responsibilities(&self) -> Result<Array2<f64>> {
        let nx = self.x.ncols();
        let mut data = Array2::zeros((self.x.nrows(), nx + 1));
        data.slice_mut(s![.., ..nx]).assign(&self.x);
        data.column_mut(nx).assign(&self.y);
        trace!("GMM training...");
        let dataset = Dataset::from(data.to_owned());
        let gmm = GaussianMixtureModel::params(self.params.n_experts())
            .n_runs(GMM_N_RUNS)
            .with_rng(self.rng.clone())
            .fit(&dataset)?;
        let gmx = GaussianMixture::from_gmm(&gmm)?;
        Ok(gmx.predict_probas(&data))
    }

    /// Uniform responsibilities randomly perturbed to break the symmetry between experts
    fn random_responsibilities(&mut self) -> Array2<f64> {
        let n = self.x.nrows();
        let k = self.params.n_experts();
        let raw = Array::random_using((n, k), Uniform::new(0.5f64, 1.5), &mut self.rng);
        let sums = raw.sum_axis(Axis(1)).insert_axis(Axis(1));
        &raw / &sums
    }
}

fn keep_best(best: &mut Option<(f64, GpMixture)>, log_likelihood: f64, mixture: &GpMixture) {
    let better = match best {
        Some((best_ll, _)) => log_likelihood > *best_ll,
        None => log_likelihood.is_finite(),
    };
    if better {
        *best = Some((log_likelihood, mixture.clone()));
    }
}

fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    let mut max = 0.;
    Zip::from(a).and(b).for_each(|x, y| {
        let d = (x - y).abs();
        if d > max {
            max = d;
        }
    });
    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::is_stochastic;
    use crate::parameters::MixtureParams;
    use approx::assert_abs_diff_eq;
    use linfa::ParamGuard;
    use ndarray::{array, Array1};
    use ndarray_rand::rand::SeedableRng;

    fn step_field(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let x = Array::random_using((n, 2), Uniform::new(0f64, 1.), &mut rng);
        let y = x.map_axis(Axis(1), |p| if p[0] < 0.5 { -2. } else { 2. });
        (x, y)
    }

    #[test]
    fn test_single_expert_converges_at_once() {
        let (x, y) = step_field(20, 0);
        let params = MixtureParams::new_with_rng(1, Xoshiro256Plus::seed_from_u64(0))
            .check()
            .unwrap();
        let outcome = EmTrainer::new(&params, x.view(), y.view()).run().unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.init, EmInit::SingleExpert);
        assert_eq!(
            outcome.states,
            vec![
                EmState::Init,
                EmState::EStep,
                EmState::MStep,
                EmState::ConvergenceCheck,
                EmState::Terminated
            ]
        );
    }

    #[test]
    fn test_iterations_bounded() {
        let (x, y) = step_field(40, 1);
        for max_iterations in [1, 2, 5] {
            let params = MixtureParams::new_with_rng(3, Xoshiro256Plus::seed_from_u64(1))
                .epsilon(1e-12)
                .max_iterations(max_iterations)
                .check()
                .unwrap();
            let outcome = EmTrainer::new(&params, x.view(), y.view()).run().unwrap();
            assert!(outcome.iterations <= max_iterations);
            assert!(outcome.log_likelihood.is_finite());
        }
    }

    #[test]
    fn test_step_field_regimes_are_separated() {
        let (x, y) = step_field(60, 2);
        let params = MixtureParams::new_with_rng(2, Xoshiro256Plus::seed_from_u64(2))
            .expert_length_scales(&[0.3, 0.3])
            .check()
            .unwrap();
        let outcome = EmTrainer::new(&params, x.view(), y.view()).run().unwrap();
        assert_eq!(outcome.init, EmInit::Clustering);

        let xq = array![[0.1, 0.5], [0.2, 0.2], [0.8, 0.5], [0.9, 0.8]];
        let w = outcome.mixture.gating().weights(&xq).unwrap();
        assert!(is_stochastic(&w, 1e-10));
        let left = if w[[0, 0]] > w[[0, 1]] { 0 } else { 1 };
        assert!(w[[1, left]] > 0.5);
        assert!(w[[2, 1 - left]] > 0.5);
        assert!(w[[3, 1 - left]] > 0.5);

        let mean = outcome.mixture.predict(&xq).unwrap();
        assert_abs_diff_eq!(mean, array![-2., -2., 2., 2.], epsilon = 0.3);
    }

    #[test]
    fn test_random_init_with_few_samples() {
        let x = array![[0., 0.], [1., 1.], [0.5, 0.2]];
        let y = array![0.1, 0.4, -0.3];
        let params = MixtureParams::new_with_rng(3, Xoshiro256Plus::seed_from_u64(3))
            .check()
            .unwrap();
        let outcome = EmTrainer::new(&params, x.view(), y.view()).run().unwrap();
        assert_eq!(outcome.init, EmInit::Random);
        assert!(outcome.iterations >= 1);
    }

    #[test]
    fn test_warm_start() {
        let (x, y) = step_field(40, 4);
        let params = MixtureParams::new_with_rng(2, Xoshiro256Plus::seed_from_u64(4))
            .check()
            .unwrap();
        let first = EmTrainer::new(&params, x.view(), y.view()).run().unwrap();
        let second = EmTrainer::new(&params, x.view(), y.view())
            .warm_start(Some(&first.mixture))
            .run()
            .unwrap();
        assert_eq!(second.init, EmInit::WarmStart);
        assert!(second.log_likelihood.is_finite());
    }

    #[test]
    fn test_deterministic_given_seed() {
        let (x, y) = step_field(30, 5);
        let params = MixtureParams::new_with_rng(2, Xoshiro256Plus::seed_from_u64(5))
            .check()
            .unwrap();
        let a = EmTrainer::new(&params, x.view(), y.view()).run().unwrap();
        let b = EmTrainer::new(&params, x.view(), y.view()).run().unwrap();
        assert_eq!(a.iterations, b.iterations);
        let xq = array![[0.3, 0.3], [0.7, 0.1]];
        assert_eq!(
            a.mixture.predict_valvar(&xq).unwrap(),
            b.mixture.predict_valvar(&xq).unwrap()
        );
    }

    #[test]
    fn test_empty_samples() {
        let params = MixtureParams::new(2).check().unwrap();
        let x = Array2::<f64>::zeros((0, 2));
        let y = Array1::<f64>::zeros(0);
        let res = EmTrainer::new(&params, x.view(), y.view()).run();
        assert!(matches!(res, Err(MoeError::EmptyTrainingSet)));
    }
}
