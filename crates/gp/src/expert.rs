//! A GP expert is a single gaussian process regressor which can be refitted
//! in place. Before its first successful fit, any prediction fails with
//! [GpError::NotFitted].

use crate::algorithm::GaussianProcess;
use crate::errors::{GpError, Result};
use crate::kernels::{Kernel, SquaredExponentialKernel};
use crate::parameters::GpValidParams;

use linfa::prelude::{Dataset, Fit, Float};
use ndarray::{Array1, ArrayBase, Data, Ix1, Ix2};
use std::fmt;

/// A refittable GP regressor with a fixed kernel
#[derive(Clone, Debug)]
pub struct GpExpert<F: Float, K: Kernel<F> = SquaredExponentialKernel<F>> {
    params: GpValidParams<F, K>,
    gp: Option<GaussianProcess<F, K>>,
}

impl<F: Float, K: Kernel<F>> GpExpert<F, K> {
    /// Create an unfitted expert with default fitting parameters for the given kernel
    pub fn new(kernel: K) -> Self {
        GpExpert {
            params: GpValidParams::from_kernel(kernel),
            gp: None,
        }
    }

    /// Create an unfitted expert from validated GP parameters
    pub fn from_params(params: GpValidParams<F, K>) -> Self {
        GpExpert { params, gp: None }
    }

    /// Fit the expert on (`x`, `y`), every observation getting the kernel noise variance.
    /// On error the expert keeps its previous state.
    pub fn fit(
        &mut self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<()> {
        let gp = self
            .params
            .fit(&Dataset::new(x.to_owned(), y.to_owned()))?;
        self.gp = Some(gp);
        Ok(())
    }

    /// Fit the expert on (`x`, `y`) with per observation weights in `[0, 1]`.
    /// On error the expert keeps its previous state.
    pub fn fit_weighted(
        &mut self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        weights: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<()> {
        let gp = self.params.fit_weighted(x, y, weights)?;
        self.gp = Some(gp);
        Ok(())
    }

    /// Posterior means at `x` points
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.gp()?.predict(x)
    }

    /// Posterior variances at `x` points
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        self.gp()?.predict_var(x)
    }

    /// Posterior means and variances at `x` points
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        self.gp()?.predict_valvar(x)
    }

    /// Whether the expert was successfully fitted at least once
    pub fn is_fitted(&self) -> bool {
        self.gp.is_some()
    }

    /// The underlying fitted gaussian process
    pub fn gp(&self) -> Result<&GaussianProcess<F, K>> {
        self.gp.as_ref().ok_or(GpError::NotFitted)
    }

    /// The expert kernel
    pub fn kernel(&self) -> &K {
        &self.params.kernel
    }

    /// The expert fitting parameters
    pub fn params(&self) -> &GpValidParams<F, K> {
        &self.params
    }
}

impl<F: Float, K: Kernel<F>> fmt::Display for GpExpert<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.gp {
            Some(gp) => write!(f, "Expert({gp})"),
            None => write!(f, "Expert({}, unfitted)", self.params.kernel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_unfitted_expert() {
        let expert = GpExpert::new(SquaredExponentialKernel::new(0.5, 0.5, 0.01).unwrap());
        assert!(!expert.is_fitted());
        assert!(matches!(
            expert.predict(&array![[0., 0.]]),
            Err(GpError::NotFitted)
        ));
        assert!(matches!(
            expert.predict_valvar(&array![[0., 0.]]),
            Err(GpError::NotFitted)
        ));
    }

    #[test]
    fn test_expert_fit_and_refit() {
        let mut expert =
            GpExpert::new(SquaredExponentialKernel::with_noise_stddev(1.0, 1.0, 0.1).unwrap());
        expert.fit(&array![[0., 0.]], &array![1.]).unwrap();
        assert!(expert.is_fitted());
        let (mean, var) = expert.predict_valvar(&array![[0., 0.]]).unwrap();
        assert_abs_diff_eq!(mean[0], 1. / 1.01, epsilon = 1e-9);
        assert_abs_diff_eq!(var[0], 0.01 / 1.01, epsilon = 1e-9);

        expert.fit(&array![[0., 0.]], &array![-1.]).unwrap();
        assert_abs_diff_eq!(
            expert.predict(&array![[0., 0.]]).unwrap()[0],
            -1. / 1.01,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_failed_fit_keeps_previous_state() {
        let mut expert = GpExpert::new(SquaredExponentialKernel::new(1.0, 1.0, 0.01).unwrap());
        expert.fit(&array![[0., 0.]], &array![2.]).unwrap();
        let before = expert.predict(&array![[0., 0.]]).unwrap();
        assert!(expert
            .fit(&array![[0., 0.]], &array![f64::INFINITY])
            .is_err());
        assert_abs_diff_eq!(expert.predict(&array![[0., 0.]]).unwrap(), before);
    }

    #[test]
    fn test_weighted_fit() {
        let mut expert = GpExpert::new(SquaredExponentialKernel::new(1.0, 1.0, 0.01).unwrap());
        expert
            .fit_weighted(&array![[0., 0.], [1., 1.]], &array![1., 3.], &array![1., 0.5])
            .unwrap();
        let gp = expert.gp().unwrap();
        assert_abs_diff_eq!(gp.noise(), &array![0.01, 0.02], epsilon = 1e-12);
    }
}
