use crate::errors::{GpError, Result};
use crate::kernels::{Kernel, SquaredExponentialKernel};
use crate::parameters::{GpParams, GpValidParams};
use crate::utils::{all_finite, min_squared_distance};

use linfa::prelude::{DatasetBase, Fit, Float};
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};

use log::{debug, trace, warn};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Initial jitter (relative to the kernel prior variance) tried when the factorization fails
pub const GP_JITTER_INIT: f64 = 1e-10;
/// Multiplicative factor applied to the jitter at each new factorization attempt
pub const GP_JITTER_GROWTH: f64 = 10.;

/// Internal parameters computed Gp during training
/// used later on in prediction computations
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub(crate) struct GpInnerParams<F: Float> {
    /// Lower cholesky decomposition of the training covariance matrix \[K\]
    k_chol: Array2<F>,
    /// Solution of the linear equation system : \[K\] x alpha = y
    alpha: Array1<F>,
    /// Jitter added on the diagonal to get a successful factorization
    jitter: F,
}

/// A GP regression models a scalar field as a zero mean gaussian process
/// governed by a prior covariance kernel `k(x, x')`:
///
/// `Y(x) = Z(x)` with `Z ~ GP(0, k)`
///
/// Given training points `X` with observations `y` corrupted by a gaussian noise
/// of variance `sigma_n^2` (possibly different for each observation), the posterior
/// at a point `x*` is gaussian with
///
/// * mean: `k(x*, X).K^-1.y`
/// * variance: `k(x*, x*) - k(x*, X).K^-1.k(X, x*)`
///
/// where `K = k(X, X) + diag(sigma_n^2)`.
///
/// # Implementation
///
/// * Based on [ndarray](https://github.com/rust-ndarray/ndarray)
///   and [linfa](https://github.com/rust-ml/linfa)
/// * `K` is factorized once at fit time using a cholesky decomposition. When the
///   decomposition fails (ill-conditioned matrix, duplicated points without noise),
///   a jitter is added on the diagonal and increased until the decomposition succeeds
///   or the maximum number of attempts is reached.
/// * Observations may be weighted: a sample with weight `w` gets a noise variance `sigma_n^2 / w`
///   which is the way the experts of a mixture are trained against EM responsibilities.
///
/// # Example
///
/// ```no_run
/// use sampling_gp::{GaussianProcess, kernels::SquaredExponentialKernel};
/// use linfa::prelude::*;
/// use ndarray::array;
///
/// let xt = array![[0., 0.], [1., 0.], [0., 1.], [1., 1.]];
/// let yt = array![0., 1., 1., 2.];
///
/// let kernel = SquaredExponentialKernel::new(0.5, 1.0, 0.01).expect("valid kernel");
/// let gp = GaussianProcess::params(kernel)
///     .fit(&Dataset::new(xt, yt))
///     .expect("GP fitted");
///
/// let (means, variances) = gp
///     .predict_valvar(&array![[0.5, 0.5]])
///     .expect("GP prediction");
/// ```
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct GaussianProcess<F: Float, K: Kernel<F> = SquaredExponentialKernel<F>> {
    /// Log marginal likelihood of the training data
    likelihood: F,
    /// Gaussian process internal fitted params
    inner_params: GpInnerParams<F>,
    /// Noise variance used for each training observation
    noise: Array1<F>,
    /// Training dataset (input, output)
    pub(crate) training_data: (Array2<F>, Array1<F>),
    /// Parameters used to fit this model
    pub(crate) params: GpValidParams<F, K>,
}

impl<F: Float, K: Kernel<F>> fmt::Display for GaussianProcess<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(kernel={}, n_train={}, likelihood={})",
            self.params.kernel,
            self.training_data.0.nrows(),
            self.likelihood,
        )
    }
}

impl<F: Float, K: Kernel<F>> GaussianProcess<F, K> {
    /// Gp parameters contructor
    pub fn params(kernel: K) -> GpParams<F, K> {
        GpParams::new(kernel)
    }

    /// Predict output values at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns n scalar output values as a vector (n,).
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.check_dims(x)?;
        let kxt = self.params.kernel.covariance(x, &self.training_data.0);
        Ok(kxt.dot(&self.inner_params.alpha))
    }

    /// Predict variance values at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns n variance values as (n,) column vector.
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.check_dims(x)?;
        let kxt = self.params.kernel.covariance(x, &self.training_data.0);
        self._compute_var(&kxt)
    }

    /// Predict both output values and variance at n given `x` points of nx components
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        self.check_dims(x)?;
        let kxt = self.params.kernel.covariance(x, &self.training_data.0);
        let mean = kxt.dot(&self.inner_params.alpha);
        let var = self._compute_var(&kxt)?;
        Ok((mean, var))
    }

    /// Compute diagonal posterior variances given the (m, n) covariance matrix between
    /// m prediction points and n training points
    fn _compute_var(&self, kxt: &Array2<F>) -> Result<Array1<F>> {
        let kxt_t = kxt.t().to_owned();
        // v = L^-1 . k(X, x)
        let v = self
            .inner_params
            .k_chol
            .solve_triangular(&kxt_t, UPLO::Lower)?;
        let prior = self.params.kernel.diag_value();
        let var = v.mapv(|vi| vi * vi).sum_axis(Axis(0)).mapv(|s| prior - s);
        // Variance might be slightly negative depending on
        // machine precision: set to zero in that case
        Ok(var.mapv(|v| if v < F::zero() { F::zero() } else { v }))
    }

    fn check_dims(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
        let nx = self.training_data.0.ncols();
        if x.ncols() != nx {
            return Err(GpError::InvalidValueError(format!(
                "Prediction points should have {} components, got {}",
                nx,
                x.ncols()
            )));
        }
        Ok(())
    }

    /// Covariance kernel
    pub fn kernel(&self) -> &K {
        &self.params.kernel
    }

    /// Log marginal likelihood of the training data
    pub fn likelihood(&self) -> F {
        self.likelihood
    }

    /// Jitter which was added on the covariance diagonal to get a successful factorization
    pub fn jitter(&self) -> F {
        self.inner_params.jitter
    }

    /// Noise variances used for each training observation
    pub fn noise(&self) -> &Array1<F> {
        &self.noise
    }

    /// Training data (inputs, outputs)
    pub fn training_data(&self) -> &(Array2<F>, Array1<F>) {
        &self.training_data
    }

    /// Retrieve input dimension and number of training points
    pub fn dims(&self) -> (usize, usize) {
        (self.training_data.0.ncols(), self.training_data.0.nrows())
    }
}

impl<F: Float, K: Kernel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError> for GpValidParams<F, K>
{
    type Object = GaussianProcess<F, K>;

    /// Fit GP on the given dataset, all observations having the kernel noise variance
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        self.train(dataset.records(), dataset.targets(), None)
    }
}

impl<F: Float, K: Kernel<F>> GpValidParams<F, K> {
    /// Fit GP on (`x`, `y`) where each observation is given a weight in `[0, 1]`:
    /// the ith observation noise variance is `sigma_n^2 / max(w_i, weight_floor)`.
    pub fn fit_weighted(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        weights: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<GaussianProcess<F, K>> {
        if weights.len() != y.len() {
            return Err(GpError::InvalidValueError(format!(
                "Expected {} weights, got {}",
                y.len(),
                weights.len()
            )));
        }
        if !weights.iter().all(|w| w.is_finite() && *w >= F::zero()) {
            return Err(GpError::InvalidValueError(
                "Weights should be finite and positive".to_string(),
            ));
        }
        self.train(x, y, Some(&weights.to_owned()))
    }

    fn train(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        weights: Option<&Array1<F>>,
    ) -> Result<GaussianProcess<F, K>> {
        let n = x.nrows();
        if n == 0 {
            return Err(GpError::InvalidValueError(
                "Can not fit a GP without training points".to_string(),
            ));
        }
        if y.len() != n {
            return Err(GpError::InvalidValueError(format!(
                "Number of training points ({}) and of observations ({}) differ",
                n,
                y.len()
            )));
        }
        if !all_finite(x) || !all_finite(y) {
            return Err(GpError::InvalidValueError(
                "Training data contains non finite values".to_string(),
            ));
        }
        if let Some(d2) = min_squared_distance(x) {
            if d2 == F::zero() {
                debug!("Training set contains duplicated points (at least same row twice)");
            }
        }

        let kernel = &self.kernel;
        let prior = kernel.diag_value();
        let noise = match weights {
            None => Array1::from_elem(n, kernel.noise_variance()),
            Some(w) => w.mapv(|wi| {
                let wi = if wi < self.weight_floor {
                    self.weight_floor
                } else {
                    wi
                };
                kernel.noise_variance() / wi
            }),
        };

        let mut k_mx = kernel.covariance(x, x);
        let nugget = self.nugget * prior;
        k_mx.diag_mut()
            .iter_mut()
            .zip(noise.iter())
            .for_each(|(kii, ni)| *kii += *ni + nugget);

        let (k_chol, jitter) = cholesky_with_jitter(&k_mx, prior, self.max_jitter_attempts)?;

        let yt = y.to_owned().insert_axis(Axis(1));
        // K^-1.y = L^-t.L^-1.y
        let z = k_chol.solve_triangular(&yt, UPLO::Lower)?;
        let alpha = k_chol
            .t()
            .solve_triangular_into(z, UPLO::Upper)?
            .remove_axis(Axis(1));

        // log p(y|X) = -1/2 y^t.K^-1.y - sum(log(L_ii)) - n/2 log(2 pi)
        let data_fit = y.dot(&alpha);
        let logdet = k_chol.diag().mapv(|v| v.ln()).sum();
        let likelihood = F::cast(-0.5) * data_fit
            - logdet
            - F::cast(0.5 * n as f64 * (2. * std::f64::consts::PI).ln());
        trace!("GP fitted on {n} points, likelihood={likelihood}");

        Ok(GaussianProcess {
            likelihood,
            inner_params: GpInnerParams {
                k_chol,
                alpha,
                jitter,
            },
            noise,
            training_data: (x.to_owned(), y.to_owned()),
            params: self.clone(),
        })
    }
}

/// Cholesky decomposition of `k_mx` retried with an increasing jitter on the diagonal.
/// The first jitter is [GP_JITTER_INIT] times the `scale` (kernel prior variance).
/// Returns the lower triangular factor and the jitter finally used.
fn cholesky_with_jitter<F: Float>(
    k_mx: &Array2<F>,
    scale: F,
    max_attempts: usize,
) -> Result<(Array2<F>, F)> {
    let mut jitter = F::zero();
    for attempt in 0..=max_attempts {
        let mut k_jit = k_mx.to_owned();
        if jitter > F::zero() {
            k_jit.diag_mut().mapv_inplace(|v| v + jitter);
        }
        match k_jit.cholesky() {
            Ok(l) if all_finite(&l) && l.diag().iter().all(|d| *d > F::zero()) => {
                if attempt > 0 {
                    debug!("Cholesky decomposition succeeded with jitter={jitter}");
                }
                return Ok((l, jitter));
            }
            _ => {
                trace!("Cholesky decomposition failed with jitter={jitter}");
                jitter = if jitter == F::zero() {
                    F::cast(GP_JITTER_INIT) * scale
                } else {
                    jitter * F::cast(GP_JITTER_GROWTH)
                };
            }
        }
    }
    warn!("Covariance matrix factorization failed after {max_attempts} jitter attempts");
    Err(GpError::NumericalError(format!(
        "Cholesky decomposition of the ({}x{}) covariance matrix failed after {} jitter attempts",
        k_mx.nrows(),
        k_mx.ncols(),
        max_attempts
    )))
}
