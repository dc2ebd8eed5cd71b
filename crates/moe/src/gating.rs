use crate::errors::{MoeError, Result};
use crate::utils::log_softmax_rows;

use linfa::ParamGuard;
use log::trace;
use ndarray::{Array2, ArrayBase, Data, Ix2};
use rayon::prelude::*;
use sampling_gp::kernels::SquaredExponentialKernel;
use sampling_gp::{GpExpert, GpParams};
use std::fmt;

/// Lower bound applied to responsibilities before taking their log as gating targets
pub const GATING_FLOOR: f64 = 1e-3;
/// Nugget of the gating functions, relative to their prior variance.
/// Gating targets are smoothed rather than interpolated, which keeps scores bounded
/// away from training positions even with a zero gating observation noise.
pub const GATING_NUGGET: f64 = 2e-2;

/// The gating network softly partitions the input space among experts.
///
/// It holds one GP regressor per expert mapping a position to an unbounded relevance score.
/// Weights are the softmax of the scores across experts. Each gating GP is trained on
/// the log of the expert responsibilities (bounded below by [GATING_FLOOR]), the softmax
/// being invariant to the per sample shift which turns log-responsibilities into log-odds.
///
/// As gating GPs have a zero prior mean, an unfitted gating network (or a query far from
/// any training sample) gives uniform weights.
#[derive(Clone, Debug)]
pub struct GatingNetwork {
    functions: Vec<GpExpert<f64>>,
}

impl GatingNetwork {
    /// Create an unfitted gating network with one gating function per given kernel
    pub fn new(kernels: Vec<SquaredExponentialKernel<f64>>) -> Result<Self> {
        let functions = kernels
            .into_iter()
            .map(|kernel| -> Result<GpExpert<f64>> {
                let params = GpParams::new(kernel).nugget(GATING_NUGGET).check()?;
                Ok(GpExpert::from_params(params))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(GatingNetwork { functions })
    }

    /// Number of experts gated by this network
    pub fn n_experts(&self) -> usize {
        self.functions.len()
    }

    /// Whether every gating function was fitted
    pub fn is_fitted(&self) -> bool {
        self.functions.iter().all(|f| f.is_fitted())
    }

    /// Gating functions
    pub fn functions(&self) -> &[GpExpert<f64>] {
        &self.functions
    }

    /// Relevance scores of each expert as a (n, n_experts) matrix.
    /// An unfitted gating function scores 0 everywhere (its prior mean).
    pub fn scores(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array2<f64>> {
        let mut scores = Array2::zeros((x.nrows(), self.n_experts()));
        for (mut col, function) in scores.columns_mut().into_iter().zip(&self.functions) {
            if function.is_fitted() {
                col.assign(&function.predict(x)?);
            }
        }
        Ok(scores)
    }

    /// Log of gating weights as a (n, n_experts) matrix
    pub fn log_weights(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array2<f64>> {
        Ok(log_softmax_rows(&self.scores(x)?))
    }

    /// Gating weights as a (n, n_experts) matrix: entries are in ]0, 1] and rows sum to 1
    pub fn weights(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array2<f64>> {
        Ok(self.log_weights(x)?.mapv(f64::exp))
    }

    /// Fit every gating function on the log of the given (n, n_experts) responsibilities.
    /// On error the gating network keeps its previous state.
    pub fn fit(
        &mut self,
        x: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
        responsibilities: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
    ) -> Result<()> {
        if responsibilities.nrows() != x.nrows() || responsibilities.ncols() != self.n_experts() {
            return Err(MoeError::ShapeMismatch(format!(
                "Expected ({}, {}) responsibilities, got {:?}",
                x.nrows(),
                self.n_experts(),
                responsibilities.shape()
            )));
        }
        let targets = responsibilities.mapv(|r| r.max(GATING_FLOOR).ln());
        trace!("Fit {} gating functions", self.n_experts());
        let functions = self
            .functions
            .par_iter()
            .enumerate()
            .map(|(k, function)| -> Result<GpExpert<f64>> {
                let mut function = function.clone();
                function.fit(x, &targets.column(k))?;
                Ok(function)
            })
            .collect::<Result<Vec<_>>>()?;
        self.functions = functions;
        Ok(())
    }
}

impl fmt::Display for GatingNetwork {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let functions = self
            .functions
            .iter()
            .map(|function| function.kernel().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "Gating[{functions}]")
    }
}

/// Check that every row of `weights` is a probability vector up to `tol`
#[cfg(test)]
pub(crate) fn is_stochastic(weights: &ArrayBase<impl Data<Elem = f64>, Ix2>, tol: f64) -> bool {
    use ndarray::Axis;
    weights.iter().all(|w| *w >= 0.)
        && weights
            .sum_axis(Axis(1))
            .iter()
            .all(|s| (s - 1.).abs() <= tol)
}
