use crate::errors::{MoeError, Result};
use crate::gating::GatingNetwork;
use crate::utils::logsumexp;

use log::trace;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
use rayon::prelude::*;
use sampling_gp::GpExpert;
use std::f64::consts::PI;

/// Lower bound of the predictive variance used to evaluate expert likelihoods
pub const LIKELIHOOD_VARIANCE_FLOOR: f64 = 1e-12;

/// Mixture of gaussian process experts
///
/// A fitted mixture combines the posteriors of its experts weighted by the gating network:
///
/// * mean: `sum_k w_k(x) * mu_k(x)`
/// * variance: `sum_k w_k(x) * (sigma2_k(x) + mu_k(x)^2) - mean^2`
///
/// The variance is computed in the equivalent form `sum_k w_k * sigma2_k + sum_k w_k * (mu_k - mean)^2`
/// which does not suffer from cancellation and makes a mixture of one expert predict
/// exactly like that expert.
#[derive(Clone, Debug)]
pub struct GpMixture {
    /// The experts, each one being a GP trained with responsibility weighted observations
    experts: Vec<GpExpert<f64>>,
    /// The gating network giving expert weights at any position
    gating: GatingNetwork,
    /// Measurement noise standard deviation used to compute responsibilities
    noise_stddev: f64,
}

impl std::fmt::Display for GpMixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let experts = self
            .experts
            .iter()
            .map(|expert| expert.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "Mixture[{}]({})", self.gating, &experts)
    }
}

impl GpMixture {
    /// Constructor of a mixture from its experts and gating network
    ///
    /// # Errors
    ///
    /// [MoeError::ConfigMismatch] if the gating network does not gate the given number of experts
    pub fn new(
        experts: Vec<GpExpert<f64>>,
        gating: GatingNetwork,
        noise_stddev: f64,
    ) -> Result<GpMixture> {
        if experts.is_empty() || experts.len() != gating.n_experts() {
            return Err(MoeError::ConfigMismatch(format!(
                "Gating network of {} experts can not gate {} experts",
                gating.n_experts(),
                experts.len()
            )));
        }
        Ok(GpMixture {
            experts,
            gating,
            noise_stddev,
        })
    }

    /// Number of experts
    pub fn n_experts(&self) -> usize {
        self.experts.len()
    }

    /// The experts of the mixture
    pub fn experts(&self) -> &[GpExpert<f64>] {
        &self.experts
    }

    /// The gating network
    pub fn gating(&self) -> &GatingNetwork {
        &self.gating
    }

    /// Measurement noise standard deviation used to compute responsibilities
    pub fn noise_stddev(&self) -> f64 {
        self.noise_stddev
    }

    /// Predict output values at n given `x` points of nx components specified as a (n, nx) matrix.
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array1<f64>> {
        Ok(self.predict_valvar(x)?.0)
    }

    /// Predict variances at n given `x` points of nx components specified as a (n, nx) matrix.
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array1<f64>> {
        Ok(self.predict_valvar(x)?.1)
    }

    /// Predict both output values and variances at n given `x` points by moment matching
    /// of the experts posteriors weighted by the gating network.
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let weights = self.gating.weights(x)?;
        let (means, variances) = self.expert_predictions(x)?;

        let mean = (&weights * &means).sum_axis(Axis(1));
        let spread = (&means - &mean.view().insert_axis(Axis(1))).mapv(|d| d * d);
        let var =
            (&weights * &variances).sum_axis(Axis(1)) + (&weights * &spread).sum_axis(Axis(1));
        Ok((mean, var))
    }

    /// Posterior means and variances of every expert as two (n, n_experts) matrices
    pub fn expert_predictions(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let n = x.nrows();
        let mut means = Array2::zeros((n, self.n_experts()));
        let mut variances = Array2::zeros((n, self.n_experts()));
        for (k, expert) in self.experts.iter().enumerate() {
            let (mu, var) = expert.predict_valvar(x)?;
            means.column_mut(k).assign(&mu);
            variances.column_mut(k).assign(&var);
        }
        Ok((means, variances))
    }

    /// Posterior responsibilities of experts for the given samples (E-step).
    ///
    /// `log r_ik = ln w_k(x_i) + ln N(y_i | mu_k(x_i), sigma2_k(x_i) + noise_stddev^2)` normalized
    /// with log-sum-exp over experts.
    /// Returns the (n, n_experts) responsibilities and the data log-likelihood.
    pub fn responsibilities(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<(Array2<f64>, f64)> {
        if x.nrows() != y.len() {
            return Err(MoeError::ShapeMismatch(format!(
                "{} positions for {} values",
                x.nrows(),
                y.len()
            )));
        }
        let noise2 = self.noise_stddev * self.noise_stddev;
        let mut log_resp = self.gating.log_weights(x)?;
        let (means, variances) = self.expert_predictions(x)?;
        Zip::from(log_resp.rows_mut())
            .and(y)
            .and(means.rows())
            .and(variances.rows())
            .for_each(|mut lr, &yi, mu, var| {
                Zip::from(&mut lr).and(&mu).and(&var).for_each(|l, &m, &v| {
                    let s2 = (v + noise2).max(LIKELIHOOD_VARIANCE_FLOOR);
                    *l += -0.5 * ((yi - m) * (yi - m) / s2 + (2. * PI * s2).ln());
                });
            });

        let mut log_likelihood = 0.;
        for (i, mut lr) in log_resp.rows_mut().into_iter().enumerate() {
            let lse = logsumexp(&lr);
            if !lse.is_finite() {
                return Err(MoeError::NumericalError(format!(
                    "Sample {i} (value {}) has a null likelihood under every expert",
                    y[i]
                )));
            }
            log_likelihood += lse;
            lr.mapv_inplace(|l| (l - lse).exp());
        }
        Ok((log_resp, log_likelihood))
    }

    /// Refit experts and gating network against the given (n, n_experts) responsibilities (M-step).
    ///
    /// Expert `k` is refit on all samples, the ith observation noise variance being divided by
    /// the responsibility `r_ik` (bounded below). Experts are refit in parallel.
    /// The gating network is refit on log-responsibilities.
    pub fn maximize(
        &self,
        x: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
        y: &ArrayBase<impl Data<Elem = f64> + Sync, Ix1>,
        responsibilities: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
    ) -> Result<GpMixture> {
        if responsibilities.dim() != (x.nrows(), self.n_experts()) || y.len() != x.nrows() {
            return Err(MoeError::ShapeMismatch(format!(
                "Expected ({}, {}) responsibilities for {} values, got {:?}",
                x.nrows(),
                self.n_experts(),
                y.len(),
                responsibilities.shape()
            )));
        }
        trace!("Refit {} experts on {} samples", self.n_experts(), x.nrows());
        let experts = self
            .experts
            .par_iter()
            .enumerate()
            .map(|(k, expert)| -> Result<GpExpert<f64>> {
                let mut expert = expert.clone();
                expert.fit_weighted(x, y, &responsibilities.column(k))?;
                Ok(expert)
            })
            .collect::<Result<Vec<_>>>()?;
        let mut gating = self.gating.clone();
        gating.fit(x, responsibilities)?;
        GpMixture::new(experts, gating, self.noise_stddev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::is_stochastic;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;
    use sampling_gp::kernels::SquaredExponentialKernel;

    fn unfitted(n_experts: usize) -> GpMixture {
        let kernel = SquaredExponentialKernel::with_noise_stddev(0.5, 0.5, 0.1).unwrap();
        let gating_kernel = SquaredExponentialKernel::new(0.5, 0.5, 0.).unwrap();
        GpMixture::new(
            vec![GpExpert::new(kernel); n_experts],
            GatingNetwork::new(vec![gating_kernel; n_experts]).unwrap(),
            0.1,
        )
        .unwrap()
    }

    #[test]
    fn test_unfitted_mixture_prediction() {
        let moe = unfitted(2);
        assert!(matches!(
            moe.predict(&array![[0., 0.]]),
            Err(MoeError::ModelNotFit)
        ));
    }

    #[test]
    fn test_inconsistent_mixture() {
        let kernel = SquaredExponentialKernel::new(0.5, 0.5, 0.01).unwrap();
        let res = GpMixture::new(
            vec![GpExpert::new(kernel); 2],
            GatingNetwork::new(vec![kernel; 3]).unwrap(),
            0.1,
        );
        assert!(matches!(res, Err(MoeError::ConfigMismatch(_))));
    }

    #[test]
    fn test_single_expert_mixture_equals_expert() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let xt = Array::random_using((20, 2), Uniform::new(0f64, 1.), &mut rng);
        let yt = xt.map_axis(Axis(1), |p| p[0] * p[1] + p[0].cos());
        let moe = unfitted(1)
            .maximize(&xt, &yt, &Array2::ones((20, 1)))
            .unwrap();

        let kernel = SquaredExponentialKernel::with_noise_stddev(0.5, 0.5, 0.1).unwrap();
        let mut expert = GpExpert::new(kernel);
        expert.fit(&xt, &yt).unwrap();

        let xtest = Array::random_using((15, 2), Uniform::new(0f64, 1.), &mut rng);
        let (mean, var) = moe.predict_valvar(&xtest).unwrap();
        let (emean, evar) = expert.predict_valvar(&xtest).unwrap();
        assert_eq!(mean, emean);
        assert_eq!(var, evar);
    }

    #[test]
    fn test_responsibilities() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let xt = Array::random_using((30, 2), Uniform::new(0f64, 1.), &mut rng);
        let yt = xt.map_axis(Axis(1), |p| if p[0] < 0.5 { -1. } else { 1. });
        let raw = Array::random_using((30, 3), Uniform::new(0.5f64, 1.5), &mut rng);
        let resp = &raw / &raw.sum_axis(Axis(1)).insert_axis(Axis(1));
        let moe = unfitted(3).maximize(&xt, &yt, &resp).unwrap();

        let (new_resp, log_likelihood) = moe.responsibilities(&xt, &yt).unwrap();
        assert_eq!(new_resp.dim(), (30, 3));
        assert!(is_stochastic(&new_resp, 1e-10));
        assert!(log_likelihood.is_finite());

        let w = moe.gating().weights(&xt).unwrap();
        assert!(is_stochastic(&w, 1e-10));
    }

    #[test]
    fn test_moment_matching() {
        let xt = array![[0., 0.], [1., 1.]];
        let yt = array![1., -1.];
        let resp = array![[0.5, 0.5], [0.5, 0.5]];
        let moe = unfitted(2).maximize(&xt, &yt, &resp).unwrap();
        let xq = array![[0.3, 0.6]];
        let w = moe.gating().weights(&xq).unwrap();
        let (mus, vars) = moe.expert_predictions(&xq).unwrap();
        let mean = w[[0, 0]] * mus[[0, 0]] + w[[0, 1]] * mus[[0, 1]];
        let second = w[[0, 0]] * (vars[[0, 0]] + mus[[0, 0]].powi(2))
            + w[[0, 1]] * (vars[[0, 1]] + mus[[0, 1]].powi(2));
        let (m, v) = moe.predict_valvar(&xq).unwrap();
        assert_abs_diff_eq!(m[0], mean, epsilon = 1e-12);
        assert_abs_diff_eq!(v[0], second - mean * mean, epsilon = 1e-12);
    }

    #[test]
    fn test_responsibilities_of_unlikely_sample() {
        let xt = array![[0., 0.], [1., 1.], [0.5, 0.]];
        let yt = array![1., -1., 0.];
        let resp = array![[0.6, 0.4], [0.4, 0.6], [0.5, 0.5]];
        let moe = unfitted(2).maximize(&xt, &yt, &resp).unwrap();
        let res = moe.responsibilities(&array![[0.5, 0.5]], &array![1e160]);
        assert!(matches!(res, Err(MoeError::NumericalError(_))));
    }
}
