use crate::errors::{GpError, Result};
use crate::kernels::{Kernel, SquaredExponentialKernel};
use linfa::{Float, ParamGuard};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default number of jitter escalations tried when the covariance factorization fails
pub const GP_MAX_JITTER_ATTEMPTS: usize = 8;
/// Default lower bound applied to sample weights in weighted fitting
pub const GP_WEIGHT_FLOOR: f64 = 1e-6;

/// A set of validated GP parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct GpValidParams<F: Float, K: Kernel<F> = SquaredExponentialKernel<F>> {
    /// Covariance kernel with its hyperparameters
    pub(crate) kernel: K,
    /// Parameter to improve numerical stability, relative to the kernel prior variance
    pub(crate) nugget: F,
    /// Max number of jitter escalations when cholesky factorization fails
    pub(crate) max_jitter_attempts: usize,
    /// Lower bound of the sample weights used in weighted fitting
    pub(crate) weight_floor: F,
}

impl<F: Float, K: Kernel<F> + Default> Default for GpValidParams<F, K> {
    fn default() -> GpValidParams<F, K> {
        GpValidParams::from_kernel(K::default())
    }
}

impl<F: Float, K: Kernel<F>> GpValidParams<F, K> {
    /// Default parameters for the given kernel, valid by construction
    pub(crate) fn from_kernel(kernel: K) -> Self {
        GpValidParams {
            kernel,
            nugget: F::cast(100.0) * F::epsilon(),
            max_jitter_attempts: GP_MAX_JITTER_ATTEMPTS,
            weight_floor: F::cast(GP_WEIGHT_FLOOR),
        }
    }

    /// Get covariance kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Get nugget
    pub fn nugget(&self) -> F {
        self.nugget
    }

    /// Get the max number of jitter escalations
    pub fn max_jitter_attempts(&self) -> usize {
        self.max_jitter_attempts
    }

    /// Get the weight lower bound used in weighted fitting
    pub fn weight_floor(&self) -> F {
        self.weight_floor
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [GP algorithm](struct.GaussianProcess.html).
pub struct GpParams<F: Float, K: Kernel<F> = SquaredExponentialKernel<F>>(GpValidParams<F, K>);

impl<F: Float, K: Kernel<F>> GpParams<F, K> {
    /// A constructor for GP parameters given a covariance kernel
    pub fn new(kernel: K) -> GpParams<F, K> {
        Self(GpValidParams::from_kernel(kernel))
    }

    /// A constructor for GP parameters from validated parameters
    pub fn new_from_valid(params: &GpValidParams<F, K>) -> Self {
        Self(params.clone())
    }

    /// Set covariance kernel.
    pub fn kernel(mut self, kernel: K) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set nugget.
    ///
    /// Nugget is used to improve numerical stability, it is scaled by the kernel prior variance
    /// and added on the covariance matrix diagonal.
    pub fn nugget(mut self, nugget: F) -> Self {
        self.0.nugget = nugget;
        self
    }

    /// Set the max number of jitter escalations tried when the covariance factorization fails
    pub fn max_jitter_attempts(mut self, max_jitter_attempts: usize) -> Self {
        self.0.max_jitter_attempts = max_jitter_attempts;
        self
    }

    /// Set the lower bound applied to sample weights in weighted fitting
    pub fn weight_floor(mut self, weight_floor: F) -> Self {
        self.0.weight_floor = weight_floor;
        self
    }
}

impl<F: Float, K: Kernel<F>> From<GpValidParams<F, K>> for GpParams<F, K> {
    fn from(valid: GpValidParams<F, K>) -> Self {
        GpParams(valid)
    }
}

impl<F: Float, K: Kernel<F>> ParamGuard for GpParams<F, K> {
    type Checked = GpValidParams<F, K>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if !(self.0.nugget.is_finite() && self.0.nugget >= F::zero()) {
            return Err(GpError::InvalidValueError(format!(
                "`nugget` should be positive or zero, got {}",
                self.0.nugget
            )));
        }
        if !(self.0.weight_floor > F::zero() && self.0.weight_floor <= F::one()) {
            return Err(GpError::InvalidValueError(format!(
                "`weight_floor` should be in ]0, 1], got {}",
                self.0.weight_floor
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_params() {
        let kernel = SquaredExponentialKernel::new(1.0, 1.0, 0.01).unwrap();
        let valid = GpParams::new(kernel).check().expect("valid params");
        assert_eq!(valid.max_jitter_attempts(), GP_MAX_JITTER_ATTEMPTS);
        assert_eq!(valid.kernel(), &kernel);

        let res = GpParams::new(kernel).nugget(-1.).check();
        assert!(matches!(res, Err(GpError::InvalidValueError(_))));
        let res = GpParams::new(kernel).weight_floor(0.).check();
        assert!(matches!(res, Err(GpError::InvalidValueError(_))));
    }
}
