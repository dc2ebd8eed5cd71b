//! A module for covariance kernels used by GP experts and gating functions.
//!
//! Only the squared exponential kernel is implemented:
//!
//! `k(x, x') = signal_variance * exp( - |x - x'|^2 / (2 * length_scale^2) )`
//!
//! The observation noise variance is owned by the kernel as well as it is
//! added on the diagonal of the training covariance matrix.

use crate::errors::{GpError, Result};
use crate::utils::differences;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for using a covariance kernel in GP regression
pub trait Kernel<F: Float>: Clone + fmt::Debug + fmt::Display + Send + Sync {
    /// Compute covariance values given the `d` (n, nx) matrix of componentwise
    /// differences between n pairs of points.
    /// Returns the (n,) vector of covariances.
    fn value(&self, d: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F>;

    /// Prior variance `k(x, x)`
    fn diag_value(&self) -> F;

    /// Variance of the observation noise added on the training covariance diagonal
    fn noise_variance(&self) -> F;

    /// Compute the (na, nb) cross covariance matrix between `xa` (na, nx) and `xb` (nb, nx) points
    fn covariance(
        &self,
        xa: &ArrayBase<impl Data<Elem = F>, Ix2>,
        xb: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F> {
        let mut k = Array2::zeros((xa.nrows(), xb.nrows()));
        Zip::from(k.rows_mut())
            .and(xa.rows())
            .for_each(|mut krow, xi| krow.assign(&self.value(&differences(&xi, xb))));
        k
    }
}

/// Squared exponential covariance kernel
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SquaredExponentialKernel<F: Float> {
    /// Characteristic length of the spatial correlation
    length_scale: F,
    /// Prior variance of the process
    signal_variance: F,
    /// Variance of the observation noise
    noise_variance: F,
}

impl<F: Float> Default for SquaredExponentialKernel<F> {
    fn default() -> Self {
        SquaredExponentialKernel {
            length_scale: F::one(),
            signal_variance: F::one(),
            noise_variance: F::zero(),
        }
    }
}

impl<F: Float> SquaredExponentialKernel<F> {
    /// Constructor given length scale, signal variance and noise variance.
    ///
    /// # Errors
    ///
    /// [GpError::InvalidHyperparameter] if length scale or signal variance is not strictly positive
    /// or if noise variance is negative.
    pub fn new(length_scale: F, signal_variance: F, noise_variance: F) -> Result<Self> {
        if !(length_scale.is_finite() && length_scale > F::zero()) {
            return Err(GpError::InvalidHyperparameter(format!(
                "length scale should be strictly positive, got {length_scale}"
            )));
        }
        if !(signal_variance.is_finite() && signal_variance > F::zero()) {
            return Err(GpError::InvalidHyperparameter(format!(
                "signal variance should be strictly positive, got {signal_variance}"
            )));
        }
        if !(noise_variance.is_finite() && noise_variance >= F::zero()) {
            return Err(GpError::InvalidHyperparameter(format!(
                "noise variance should be positive or zero, got {noise_variance}"
            )));
        }
        Ok(SquaredExponentialKernel {
            length_scale,
            signal_variance,
            noise_variance,
        })
    }

    /// Constructor where the observation noise is given as a standard deviation
    pub fn with_noise_stddev(length_scale: F, signal_variance: F, noise_stddev: F) -> Result<Self> {
        if noise_stddev < F::zero() {
            return Err(GpError::InvalidHyperparameter(format!(
                "noise standard deviation should be positive or zero, got {noise_stddev}"
            )));
        }
        Self::new(length_scale, signal_variance, noise_stddev * noise_stddev)
    }

    /// Length scale
    pub fn length_scale(&self) -> F {
        self.length_scale
    }

    /// Signal variance
    pub fn signal_variance(&self) -> F {
        self.signal_variance
    }
}

impl<F: Float> Kernel<F> for SquaredExponentialKernel<F> {
    /// sigma_f^2 * exp( - sum_j d_j^2 / (2 * l^2) )
    fn value(&self, d: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        let factor = F::cast(-0.5) / (self.length_scale * self.length_scale);
        d.mapv(|v| v * v)
            .sum_axis(Axis(1))
            .mapv(|r| self.signal_variance * F::exp(factor * r))
    }

    fn diag_value(&self) -> F {
        self.signal_variance
    }

    fn noise_variance(&self) -> F {
        self.noise_variance
    }
}

impl<F: Float> fmt::Display for SquaredExponentialKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SquaredExponential(length_scale={}, signal_variance={}, noise_variance={})",
            self.length_scale, self.signal_variance, self.noise_variance
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_squared_exponential_value() {
        let kernel = SquaredExponentialKernel::new(1.0, 2.0, 0.).unwrap();
        let d = array![[0., 0.], [1., 0.], [1., 1.]];
        let expected = array![2.0, 2.0 * f64::exp(-0.5), 2.0 * f64::exp(-1.0)];
        assert_abs_diff_eq!(expected, kernel.value(&d), epsilon = 1e-12);
    }

    #[test]
    fn test_squared_exponential_covariance() {
        let kernel = SquaredExponentialKernel::new(0.5, 1.0, 0.).unwrap();
        let xa = array![[0., 0.], [1., 0.]];
        let xb = array![[0., 0.], [0., 1.], [1., 0.]];
        let k = kernel.covariance(&xa, &xb);
        assert_eq!(&[2, 3], k.shape());
        assert_abs_diff_eq!(k[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(k[[1, 2]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(k[[0, 1]], f64::exp(-2.0), epsilon = 1e-12);
        assert_abs_diff_eq!(k[[1, 1]], f64::exp(-4.0), epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_hyperparameters() {
        assert!(matches!(
            SquaredExponentialKernel::new(0., 1., 0.1),
            Err(GpError::InvalidHyperparameter(_))
        ));
        assert!(matches!(
            SquaredExponentialKernel::new(1., -1., 0.1),
            Err(GpError::InvalidHyperparameter(_))
        ));
        assert!(matches!(
            SquaredExponentialKernel::new(1., 1., -0.1),
            Err(GpError::InvalidHyperparameter(_))
        ));
        assert!(matches!(
            SquaredExponentialKernel::with_noise_stddev(1., 1., -0.1),
            Err(GpError::InvalidHyperparameter(_))
        ));
        assert!(SquaredExponentialKernel::new(f64::NAN, 1., 0.).is_err());
    }

    #[test]
    fn test_noise_stddev_is_squared() {
        let kernel = SquaredExponentialKernel::with_noise_stddev(1., 1., 0.1).unwrap();
        assert_abs_diff_eq!(kernel.noise_variance(), 0.01, epsilon = 1e-15);
    }
}
