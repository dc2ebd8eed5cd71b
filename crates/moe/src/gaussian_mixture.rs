//! Soft assignment of samples to the components of a gaussian mixture,
//! used to initialize EM responsibilities from a clustering of (position, value) samples.
use crate::errors::Result;
use crate::utils::logsumexp_rows;

use linfa::Float;
use linfa_clustering::GaussianMixtureModel;
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{s, Array, Array1, Array2, Array3, ArrayBase, Axis, Data, Ix2, Ix3, Zip};

/// Weighted multivariate normal components obtained from a clustering,
/// with their precision factors cached to score samples.
///
/// Component means are stored as a (k, nx) matrix and precision factors as a (k, nx, nx) array.
#[derive(Clone, Debug)]
pub struct GaussianMixture<F: Float> {
    /// (k,) component weights
    weights: Array1<F>,
    /// (k, nx) component means
    means: Array2<F>,
    /// (k, nx, nx) factors `P_k` with `P_k P_k^T` the inverse covariance of component k
    precisions_chol: Array3<F>,
    /// (k,) `ln det P_k`
    log_det: Array1<F>,
}

impl<F: Float> GaussianMixture<F> {
    /// Mixture from (k,) weights, (k, nx) means and (k, nx, nx) covariances
    ///
    /// # Errors
    ///
    /// When a covariance is not positive definite
    pub fn new(
        weights: Array1<F>,
        means: Array2<F>,
        covariances: Array3<F>,
    ) -> Result<GaussianMixture<F>> {
        let precisions_chol = Self::precision_factors(&covariances)?;
        let log_det = Self::log_det_factors(&precisions_chol);
        Ok(GaussianMixture {
            weights,
            means,
            precisions_chol,
            log_det,
        })
    }

    /// Mixture of the components found by a linfa GMM clustering
    pub fn from_gmm(gmm: &GaussianMixtureModel<F>) -> Result<GaussianMixture<F>> {
        Self::new(
            gmm.weights().to_owned(),
            gmm.means().to_owned(),
            gmm.covariances().to_owned(),
        )
    }

    /// Number of components
    pub fn n_clusters(&self) -> usize {
        self.means.nrows()
    }

    /// Component weights
    pub fn weights(&self) -> &Array1<F> {
        &self.weights
    }

    /// Component means
    pub fn means(&self) -> &Array2<F> {
        &self.means
    }

    /// Posterior membership probabilities of (n, nx) samples,
    /// as a (n, k) matrix with rows summing to 1
    pub fn predict_probas<D: Data<Elem = F>>(&self, x: &ArrayBase<D, Ix2>) -> Array2<F> {
        if self.n_clusters() == 1 {
            Array::from_elem((x.nrows(), 1), F::one())
        } else {
            let (_, log_resp) = self.log_memberships(x);
            log_resp.mapv(|v| v.exp())
        }
    }

    /// `P_k = L_k^{-T}` where `L_k` is the lower cholesky factor of covariance k
    fn precision_factors<D: Data<Elem = F>>(
        covariances: &ArrayBase<D, Ix3>,
    ) -> Result<Array3<F>> {
        let n_clusters = covariances.shape()[0];
        let n_features = covariances.shape()[1];
        let mut precisions_chol = Array::zeros((n_clusters, n_features, n_features));
        for (k, covariance) in covariances.outer_iter().enumerate() {
            let cov_chol = covariance.cholesky()?;
            let sol = cov_chol.solve_triangular(&Array::eye(n_features), UPLO::Lower)?;
            precisions_chol.slice_mut(s![k, .., ..]).assign(&sol.t());
        }
        Ok(precisions_chol)
    }

    fn log_det_factors(matrix_chol: &Array3<F>) -> Array1<F> {
        matrix_chol
            .outer_iter()
            .map(|chol| chol.diag().mapv(|v| v.ln()).sum())
            .collect()
    }

    /// Log normalizers (n,) and log memberships (n, k)
    fn log_memberships<D: Data<Elem = F>>(
        &self,
        x: &ArrayBase<D, Ix2>,
    ) -> (Array1<F>, Array2<F>) {
        let weighted_log_prob = self.log_densities(x) + self.weights().mapv(|v| v.ln());
        let log_prob_norm = logsumexp_rows(&weighted_log_prob);
        let log_resp = weighted_log_prob - log_prob_norm.to_owned().insert_axis(Axis(1));
        (log_prob_norm, log_resp)
    }

    /// (n, k) log densities
    /// `ln N(x_i | mu_k, S_k) = -0.5 (nx ln 2pi + |P_k^T (x_i - mu_k)|^2) + ln det P_k`
    fn log_densities<D: Data<Elem = F>>(&self, x: &ArrayBase<D, Ix2>) -> Array2<F> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        let means = self.means();
        let n_clusters = means.nrows();
        let mut log_prob: Array2<F> = Array::zeros((n_samples, n_clusters));
        Zip::indexed(means.rows())
            .and(self.precisions_chol.outer_iter())
            .for_each(|k, mu, prec_chol| {
                let diff = (&x.to_owned() - &mu).dot(&prec_chol);
                log_prob
                    .slice_mut(s![.., k])
                    .assign(&diff.mapv(|v| v * v).sum_axis(Axis(1)))
            });
        let cst = F::cast(n_features as f64 * f64::ln(2. * std::f64::consts::PI));
        let minus_half = F::cast(-0.5);
        log_prob.mapv(|v| minus_half * (v + cst)) + &self.log_det
    }
}
