use crate::errors::{MoeError, Result};

use linfa::ParamGuard;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use sampling_gp::kernels::SquaredExponentialKernel;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default number of experts
pub const DEFAULT_N_EXPERTS: usize = 3;
/// Default length scale of expert kernels
pub const DEFAULT_EXPERT_LENGTH_SCALE: f64 = 0.5;
/// Default signal variance of expert kernels
pub const DEFAULT_EXPERT_SIGNAL_VARIANCE: f64 = 0.5;
/// Default observation noise (standard deviation) of expert kernels
pub const DEFAULT_EXPERT_OBSERVATION_NOISE: f64 = 0.1;
/// Default length scale of gating kernels
pub const DEFAULT_GATING_LENGTH_SCALE: f64 = 0.5;
/// Default signal variance of gating kernels
pub const DEFAULT_GATING_SIGNAL_VARIANCE: f64 = 0.5;
/// Default observation noise (standard deviation) of gating kernels
pub const DEFAULT_GATING_OBSERVATION_NOISE: f64 = 0.0;
/// Default measurement noise standard deviation used to compute responsibilities
pub const DEFAULT_NOISE_STDDEV: f64 = 0.1;
/// Default convergence threshold on responsibilities change
pub const DEFAULT_EPSILON: f64 = 0.05;
/// Default max number of EM iterations
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Mixture of experts checked parameters
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct MixtureValidParams {
    /// Number of experts, fixed for the model lifetime
    n_experts: usize,
    /// Length scales of the expert kernels
    expert_length_scales: Vec<f64>,
    /// Signal variances of the expert kernels
    expert_signal_variances: Vec<f64>,
    /// Observation noises (standard deviations) of the expert kernels
    expert_observation_noises: Vec<f64>,
    /// Length scales of the gating kernels
    gating_length_scales: Vec<f64>,
    /// Signal variances of the gating kernels
    gating_signal_variances: Vec<f64>,
    /// Observation noises (standard deviations) of the gating kernels
    gating_observation_noises: Vec<f64>,
    /// Measurement noise standard deviation used in the E-step
    noise_stddev: f64,
    /// Convergence threshold on the max absolute change of responsibilities
    epsilon: f64,
    /// Max number of EM iterations
    max_iterations: usize,
    /// Random number generator
    rng: Xoshiro256Plus,
}

impl Default for MixtureValidParams {
    fn default() -> MixtureValidParams {
        Self::with_defaults(DEFAULT_N_EXPERTS, Xoshiro256Plus::from_entropy())
    }
}

impl MixtureValidParams {
    fn with_defaults(n_experts: usize, rng: Xoshiro256Plus) -> MixtureValidParams {
        MixtureValidParams {
            n_experts,
            expert_length_scales: vec![DEFAULT_EXPERT_LENGTH_SCALE; n_experts],
            expert_signal_variances: vec![DEFAULT_EXPERT_SIGNAL_VARIANCE; n_experts],
            expert_observation_noises: vec![DEFAULT_EXPERT_OBSERVATION_NOISE; n_experts],
            gating_length_scales: vec![DEFAULT_GATING_LENGTH_SCALE; n_experts],
            gating_signal_variances: vec![DEFAULT_GATING_SIGNAL_VARIANCE; n_experts],
            gating_observation_noises: vec![DEFAULT_GATING_OBSERVATION_NOISE; n_experts],
            noise_stddev: DEFAULT_NOISE_STDDEV,
            epsilon: DEFAULT_EPSILON,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            rng,
        }
    }

    /// The number of experts
    pub fn n_experts(&self) -> usize {
        self.n_experts
    }

    /// Length scales of the expert kernels
    pub fn expert_length_scales(&self) -> &[f64] {
        &self.expert_length_scales
    }

    /// Signal variances of the expert kernels
    pub fn expert_signal_variances(&self) -> &[f64] {
        &self.expert_signal_variances
    }

    /// Observation noises (standard deviations) of the expert kernels
    pub fn expert_observation_noises(&self) -> &[f64] {
        &self.expert_observation_noises
    }

    /// Length scales of the gating kernels
    pub fn gating_length_scales(&self) -> &[f64] {
        &self.gating_length_scales
    }

    /// Signal variances of the gating kernels
    pub fn gating_signal_variances(&self) -> &[f64] {
        &self.gating_signal_variances
    }

    /// Observation noises (standard deviations) of the gating kernels
    pub fn gating_observation_noises(&self) -> &[f64] {
        &self.gating_observation_noises
    }

    /// Measurement noise standard deviation
    pub fn noise_stddev(&self) -> f64 {
        self.noise_stddev
    }

    /// Convergence threshold
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Max number of EM iterations
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// The random generator
    pub fn rng(&self) -> Xoshiro256Plus {
        self.rng.clone()
    }

    /// Kernels of the experts built from the configured hyperparameters
    pub fn expert_kernels(&self) -> Result<Vec<SquaredExponentialKernel<f64>>> {
        build_kernels(
            &self.expert_length_scales,
            &self.expert_signal_variances,
            &self.expert_observation_noises,
        )
    }

    /// Kernels of the gating functions built from the configured hyperparameters
    pub fn gating_kernels(&self) -> Result<Vec<SquaredExponentialKernel<f64>>> {
        build_kernels(
            &self.gating_length_scales,
            &self.gating_signal_variances,
            &self.gating_observation_noises,
        )
    }
}

fn build_kernels(
    length_scales: &[f64],
    signal_variances: &[f64],
    noises: &[f64],
) -> Result<Vec<SquaredExponentialKernel<f64>>> {
    length_scales
        .iter()
        .zip(signal_variances)
        .zip(noises)
        .map(|((&l, &sf2), &sn)| {
            SquaredExponentialKernel::with_noise_stddev(l, sf2, sn).map_err(MoeError::from)
        })
        .collect()
}

/// Mixture of experts parameters
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct MixtureParams(MixtureValidParams);

impl Default for MixtureParams {
    fn default() -> MixtureParams {
        MixtureParams(MixtureValidParams::default())
    }
}

impl MixtureParams {
    /// Constructor of mixture parameters for `n_experts` experts, every hyperparameter
    /// vector being filled with default values.
    ///
    /// Defaults are: expert kernels (length scale 0.5, signal variance 0.5, noise 0.1),
    /// gating kernels (length scale 0.5, signal variance 0.5, noise 0.0), measurement noise 0.1,
    /// convergence threshold 0.05 and 100 max EM iterations.
    pub fn new(n_experts: usize) -> MixtureParams {
        Self::new_with_rng(n_experts, Xoshiro256Plus::from_entropy())
    }

    /// Constructor of mixture parameters specifying random number generator for reproducibility
    ///
    /// See [`new`](MixtureParams::new) for default parameters.
    pub fn new_with_rng(n_experts: usize, rng: Xoshiro256Plus) -> MixtureParams {
        Self(MixtureValidParams::with_defaults(n_experts, rng))
    }

    /// Sets the number of experts.
    ///
    /// Hyperparameter vectors are left untouched, they have to be set consistently.
    pub fn n_experts(mut self, n_experts: usize) -> Self {
        self.0.n_experts = n_experts;
        self
    }

    /// Sets length scales of the expert kernels
    pub fn expert_length_scales(mut self, length_scales: &[f64]) -> Self {
        self.0.expert_length_scales = length_scales.to_vec();
        self
    }

    /// Sets signal variances of the expert kernels
    pub fn expert_signal_variances(mut self, signal_variances: &[f64]) -> Self {
        self.0.expert_signal_variances = signal_variances.to_vec();
        self
    }

    /// Sets observation noises (standard deviations) of the expert kernels
    pub fn expert_observation_noises(mut self, noises: &[f64]) -> Self {
        self.0.expert_observation_noises = noises.to_vec();
        self
    }

    /// Sets length scales of the gating kernels
    pub fn gating_length_scales(mut self, length_scales: &[f64]) -> Self {
        self.0.gating_length_scales = length_scales.to_vec();
        self
    }

    /// Sets signal variances of the gating kernels
    pub fn gating_signal_variances(mut self, signal_variances: &[f64]) -> Self {
        self.0.gating_signal_variances = signal_variances.to_vec();
        self
    }

    /// Sets observation noises (standard deviations) of the gating kernels
    pub fn gating_observation_noises(mut self, noises: &[f64]) -> Self {
        self.0.gating_observation_noises = noises.to_vec();
        self
    }

    /// Sets the measurement noise standard deviation used to compute responsibilities
    pub fn noise_stddev(mut self, noise_stddev: f64) -> Self {
        self.0.noise_stddev = noise_stddev;
        self
    }

    /// Sets the convergence threshold on the max absolute change of responsibilities
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.0.epsilon = epsilon;
        self
    }

    /// Sets the max number of EM iterations
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.0.max_iterations = max_iterations;
        self
    }

    /// Sets the random number generator for reproducibility
    pub fn with_rng(mut self, rng: Xoshiro256Plus) -> MixtureParams {
        self.0.rng = rng;
        self
    }
}

impl ParamGuard for MixtureParams {
    type Checked = MixtureValidParams;
    type Error = MoeError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let n = self.0.n_experts;
        if n == 0 {
            return Err(MoeError::ConfigMismatch(
                "`n_experts` should be at least 1".to_string(),
            ));
        }
        let vectors = [
            ("expert_length_scales", &self.0.expert_length_scales),
            ("expert_signal_variances", &self.0.expert_signal_variances),
            ("expert_observation_noises", &self.0.expert_observation_noises),
            ("gating_length_scales", &self.0.gating_length_scales),
            ("gating_signal_variances", &self.0.gating_signal_variances),
            ("gating_observation_noises", &self.0.gating_observation_noises),
        ];
        for (name, values) in vectors {
            if values.len() != n {
                return Err(MoeError::ConfigMismatch(format!(
                    "`{}` should have {} values (one per expert), got {}",
                    name,
                    n,
                    values.len()
                )));
            }
        }
        // kernel constructors reject out of domain hyperparameters
        self.0.expert_kernels()?;
        self.0.gating_kernels()?;
        if !(self.0.noise_stddev.is_finite() && self.0.noise_stddev >= 0.) {
            return Err(MoeError::ConfigMismatch(format!(
                "`noise_stddev` should be positive or zero, got {}",
                self.0.noise_stddev
            )));
        }
        if !(self.0.epsilon.is_finite() && self.0.epsilon > 0.) {
            return Err(MoeError::ConfigMismatch(format!(
                "`epsilon` should be strictly positive, got {}",
                self.0.epsilon
            )));
        }
        if self.0.max_iterations == 0 {
            return Err(MoeError::ConfigMismatch(
                "`max_iterations` should be at least 1".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

impl From<MixtureValidParams> for MixtureParams {
    fn from(item: MixtureValidParams) -> Self {
        MixtureParams(item)
    }
}
