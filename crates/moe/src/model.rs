use crate::algorithm::GpMixture;
use crate::errors::{MoeError, Result};
use crate::parameters::{MixtureParams, MixtureValidParams};
use crate::trainer::EmTrainer;

use linfa::ParamGuard;
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Dimension of sample positions
pub const POSITION_DIM: usize = 2;

/// Summary of a fit of a [MixtureModel]
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct FitReport {
    /// Whether EM converged before reaching the max number of iterations
    pub converged: bool,
    /// Number of EM iterations performed
    pub iterations: usize,
    /// Data log-likelihood of the committed mixture
    pub log_likelihood: f64,
    /// Number of samples used by this fit
    pub n_samples: usize,
    /// Version of the committed model
    pub version: u64,
    /// Human readable status
    pub message: String,
}

/// Predictive means and variances at query positions
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Prediction {
    /// Predictive means (n,)
    pub means: Array1<f64>,
    /// Predictive variances (n,)
    pub variances: Array1<f64>,
}

#[derive(Default)]
struct Samples {
    positions: Vec<[f64; POSITION_DIM]>,
    values: Vec<f64>,
}

impl Samples {
    fn snapshot(&self) -> (Array2<f64>, Array1<f64>) {
        let positions = Array2::from_shape_fn((self.positions.len(), POSITION_DIM), |(i, j)| {
            self.positions[i][j]
        });
        (positions, Array1::from_vec(self.values.clone()))
    }
}

struct Committed {
    mixture: Arc<GpMixture>,
    version: u64,
}

/// A field model made of a mixture of GP experts fitted incrementally.
///
/// Samples (2D position, value) are accumulated with [MixtureModel::add_samples] and
/// the model is (re)fitted on demand with [MixtureModel::fit] using the EM algorithm.
/// Predictions always come from the last committed fit.
///
/// All methods take `&self`: the model can be shared between threads (e.g. within an `Arc`).
/// Fits are serialized and work on a snapshot of the samples taken at their start,
/// samples added meanwhile are used by the next fit. Predictions are never blocked by a running fit
/// and never observe a partially fitted mixture.
///
/// # Example
///
/// ```no_run
/// use sampling_moe::{MixtureModel, MixtureParams};
/// use ndarray::array;
///
/// let model = MixtureModel::new(MixtureParams::new(1)).expect("valid configuration");
/// model.add_samples(&array![[0., 0.], [1., 0.]], &array![1.0, 2.0]).expect("samples");
/// let report = model.fit().expect("fit");
/// println!("{}", report.message);
/// let prediction = model.predict(&array![[0.5, 0.]]).expect("prediction");
/// ```
pub struct MixtureModel {
    params: MixtureValidParams,
    samples: Mutex<Samples>,
    fit_lock: Mutex<()>,
    committed: RwLock<Option<Committed>>,
    test_positions: RwLock<Option<Array2<f64>>>,
}

impl MixtureModel {
    /// Create an unfitted model without samples
    ///
    /// # Errors
    ///
    /// [MoeError::ConfigMismatch] when the configuration is inconsistent
    pub fn new(params: MixtureParams) -> Result<MixtureModel> {
        let params = params.check()?;
        debug!("New mixture model of {} experts", params.n_experts());
        Ok(MixtureModel {
            params,
            samples: Mutex::new(Samples::default()),
            fit_lock: Mutex::new(()),
            committed: RwLock::new(None),
            test_positions: RwLock::new(None),
        })
    }

    /// Validated parameters of the model
    pub fn params(&self) -> &MixtureValidParams {
        &self.params
    }

    /// Append a batch of samples given as (n, 2) positions and (n,) values.
    /// Either the whole batch is appended or nothing is. Does not trigger any fit.
    /// Returns the total number of samples.
    ///
    /// # Errors
    ///
    /// * [MoeError::ShapeMismatch] if positions are not 2D or counts differ,
    /// * [MoeError::InvalidValueError] if the batch contains non finite values.
    pub fn add_samples(
        &self,
        positions: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        values: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<usize> {
        check_positions(positions)?;
        if positions.nrows() != values.len() {
            return Err(MoeError::ShapeMismatch(format!(
                "{} positions for {} values",
                positions.nrows(),
                values.len()
            )));
        }
        if !values.iter().all(|v| v.is_finite()) {
            return Err(MoeError::InvalidValueError(
                "Sample values should be finite".to_string(),
            ));
        }
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples
            .positions
            .extend(positions.rows().into_iter().map(|p| [p[0], p[1]]));
        samples.values.extend(values.iter().copied());
        debug!(
            "Added {} samples (total {})",
            values.len(),
            samples.values.len()
        );
        Ok(samples.values.len())
    }

    /// Number of accumulated samples
    pub fn n_samples(&self) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values
            .len()
    }

    /// Copy of the accumulated samples as (n, 2) positions and (n,) values
    pub fn samples(&self) -> (Array2<f64>, Array1<f64>) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Fit the mixture on the samples accumulated so far using EM and commit
    /// the result as a new version of the model.
    /// The previous fitted mixture, if any, is used to initialize EM.
    ///
    /// Non convergence within the max number of iterations is not an error, it is reported
    /// in the returned [FitReport]. On error the previously committed model is kept.
    ///
    /// # Errors
    ///
    /// * [MoeError::EmptyTrainingSet] without samples,
    /// * [MoeError::NumericalError] when a covariance factorization fails.
    pub fn fit(&self) -> Result<FitReport> {
        let _fitting = self.fit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (x, y) = self.samples();
        if y.is_empty() {
            return Err(MoeError::EmptyTrainingSet);
        }
        let previous = self.fitted();
        info!(
            "Fit mixture of {} experts on {} samples",
            self.params.n_experts(),
            y.len()
        );
        let outcome = EmTrainer::new(&self.params, x.view(), y.view())
            .warm_start(previous.as_deref())
            .run()?;

        let message = if outcome.converged {
            format!(
                "EM converged after {} iterations (max responsibility change {:.3e} < {})",
                outcome.iterations,
                outcome.max_delta,
                self.params.epsilon()
            )
        } else {
            format!(
                "EM did not converge within {} iterations (max responsibility change {:.3e})",
                outcome.iterations, outcome.max_delta
            )
        };

        let mut committed = self.committed.write().unwrap_or_else(PoisonError::into_inner);
        let version = committed.as_ref().map_or(0, |c| c.version) + 1;
        *committed = Some(Committed {
            mixture: Arc::new(outcome.mixture),
            version,
        });
        info!("Committed model version {version}");

        Ok(FitReport {
            converged: outcome.converged,
            iterations: outcome.iterations,
            log_likelihood: outcome.log_likelihood,
            n_samples: y.len(),
            version,
            message,
        })
    }

    /// Predict means and variances at (n, 2) query positions with the last committed mixture
    ///
    /// # Errors
    ///
    /// * [MoeError::ModelNotFit] before the first successful fit,
    /// * [MoeError::ShapeMismatch] if positions are not 2D.
    pub fn predict(&self, positions: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Prediction> {
        check_positions(positions)?;
        let mixture = self.fitted().ok_or(MoeError::ModelNotFit)?;
        let (means, variances) = mixture.predict_valvar(positions)?;
        Ok(Prediction { means, variances })
    }

    /// Store (n, 2) test positions to be predicted later with [MixtureModel::predict_test_positions]
    pub fn set_test_positions(
        &self,
        positions: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<()> {
        check_positions(positions)?;
        *self
            .test_positions
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(positions.to_owned());
        Ok(())
    }

    /// Stored test positions if any
    pub fn test_positions(&self) -> Option<Array2<f64>> {
        self.test_positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Predict at the stored test positions
    ///
    /// # Errors
    ///
    /// * [MoeError::MissingTestPositions] if no test positions were set,
    /// * [MoeError::ModelNotFit] before the first successful fit.
    pub fn predict_test_positions(&self) -> Result<Prediction> {
        let positions = self.test_positions().ok_or(MoeError::MissingTestPositions)?;
        self.predict(&positions)
    }

    /// Version of the committed model, 0 when never fitted
    pub fn version(&self) -> u64 {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |c| c.version)
    }

    /// Whether a fit was committed
    pub fn is_fitted(&self) -> bool {
        self.version() > 0
    }

    /// The last committed mixture if any
    pub fn fitted(&self) -> Option<Arc<GpMixture>> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| Arc::clone(&c.mixture))
    }
}

fn check_positions(positions: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<()> {
    if positions.ncols() != POSITION_DIM {
        return Err(MoeError::ShapeMismatch(format!(
            "Positions should have {} components, got {}",
            POSITION_DIM,
            positions.ncols()
        )));
    }
    if !positions.iter().all(|v| v.is_finite()) {
        return Err(MoeError::InvalidValueError(
            "Positions should be finite".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array, Axis};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;
    use sampling_gp::kernels::SquaredExponentialKernel;
    use sampling_gp::GpExpert;

    fn seeded(n_experts: usize) -> MixtureParams {
        MixtureParams::new_with_rng(n_experts, Xoshiro256Plus::seed_from_u64(42))
    }

    fn field(x: &Array2<f64>) -> Array1<f64> {
        x.map_axis(Axis(1), |p| (2. * p[0]).sin() + p[1])
    }

    #[test]
    fn test_model_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MixtureModel>();
    }

    #[test]
    fn test_single_sample_scenario() {
        let model = MixtureModel::new(
            seeded(1)
                .expert_length_scales(&[1.])
                .expert_signal_variances(&[1.])
                .expert_observation_noises(&[0.1]),
        )
        .unwrap();
        model.add_samples(&array![[0., 0.]], &array![1.0]).unwrap();
        let report = model.fit().unwrap();
        assert!(report.converged);
        assert_eq!(report.version, 1);
        let prediction = model.predict(&array![[0., 0.]]).unwrap();
        assert_abs_diff_eq!(prediction.means[0], 1.0, epsilon = 0.02);
        assert!(prediction.variances[0] > 0. && prediction.variances[0] < 1.);
    }

    #[test]
    fn test_gating_length_mismatch_fails() {
        let res = MixtureModel::new(MixtureParams::new(3).gating_length_scales(&[0.5, 0.5]));
        assert!(matches!(res, Err(MoeError::ConfigMismatch(_))));
    }

    #[test]
    fn test_predict_before_fit() {
        let model = MixtureModel::new(seeded(3)).unwrap();
        assert!(matches!(
            model.predict(&array![[0., 0.]]),
            Err(MoeError::ModelNotFit)
        ));
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_fit_without_samples() {
        let model = MixtureModel::new(seeded(3)).unwrap();
        assert!(matches!(model.fit(), Err(MoeError::EmptyTrainingSet)));
        assert_eq!(model.version(), 0);
    }

    #[test]
    fn test_add_samples() {
        let model = MixtureModel::new(seeded(2)).unwrap();
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let mut expected = 0;
        for batch in [3, 0, 7, 1] {
            let x = Array::random_using((batch, 2), Uniform::new(0f64, 1.), &mut rng);
            expected += batch;
            assert_eq!(model.add_samples(&x, &field(&x)).unwrap(), expected);
        }
        assert_eq!(model.n_samples(), 11);

        let res = model.add_samples(&array![[0., 0.], [1., 1.]], &array![1.]);
        assert!(matches!(res, Err(MoeError::ShapeMismatch(_))));
        let res = model.add_samples(&array![[0., 0., 0.]], &array![1.]);
        assert!(matches!(res, Err(MoeError::ShapeMismatch(_))));
        let res = model.add_samples(&array![[0., 0.], [1., 1.]], &array![1., f64::NAN]);
        assert!(matches!(res, Err(MoeError::InvalidValueError(_))));
        assert_eq!(model.n_samples(), 11);
        assert_eq!(model.samples().0.dim(), (11, 2));
    }

    #[test]
    fn test_single_expert_equals_gp() {
        let mut rng = Xoshiro256Plus::seed_from_u64(1);
        let x = Array::random_using((25, 2), Uniform::new(0f64, 1.), &mut rng);
        let y = field(&x);
        let model = MixtureModel::new(seeded(1)).unwrap();
        model.add_samples(&x, &y).unwrap();
        model.fit().unwrap();

        let kernel = SquaredExponentialKernel::with_noise_stddev(0.5, 0.5, 0.1).unwrap();
        let mut expert = GpExpert::new(kernel);
        expert.fit(&x, &y).unwrap();

        let xq = Array::random_using((10, 2), Uniform::new(0f64, 1.), &mut rng);
        let prediction = model.predict(&xq).unwrap();
        let (means, variances) = expert.predict_valvar(&xq).unwrap();
        assert_eq!(prediction.means, means);
        assert_eq!(prediction.variances, variances);
    }

    #[test]
    fn test_predict_is_idempotent() {
        let mut rng = Xoshiro256Plus::seed_from_u64(2);
        let x = Array::random_using((30, 2), Uniform::new(0f64, 1.), &mut rng);
        let model = MixtureModel::new(seeded(3)).unwrap();
        model.add_samples(&x, &field(&x)).unwrap();
        let report = model.fit().unwrap();
        assert!(report.iterations <= model.params().max_iterations());
        assert_eq!(report.n_samples, 30);

        let xq = Array::random_using((20, 2), Uniform::new(0f64, 1.), &mut rng);
        let first = model.predict(&xq).unwrap();
        let second = model.predict(&xq).unwrap();
        assert_eq!(first, second);
        assert!(first.variances.iter().all(|v| *v >= 0.));
    }

    #[test]
    fn test_near_exact_interpolation() {
        let x = array![[0.1, 0.1], [0.5, 0.9], [0.9, 0.3]];
        let y = array![1.5, -0.5, 0.7];
        let model = MixtureModel::new(
            seeded(1)
                .expert_observation_noises(&[1e-4])
                .noise_stddev(1e-4),
        )
        .unwrap();
        model.add_samples(&x, &y).unwrap();
        model.fit().unwrap();
        let prediction = model.predict(&x).unwrap();
        assert_abs_diff_eq!(prediction.means, y, epsilon = 1e-3);
        assert!(prediction.variances.iter().all(|v| *v < 1e-6));
    }

    #[test]
    fn test_versions_and_refit() {
        let mut rng = Xoshiro256Plus::seed_from_u64(3);
        let model = MixtureModel::new(seeded(2)).unwrap();
        let x = Array::random_using((20, 2), Uniform::new(0f64, 1.), &mut rng);
        model.add_samples(&x, &field(&x)).unwrap();
        assert_eq!(model.fit().unwrap().version, 1);
        let x = Array::random_using((10, 2), Uniform::new(0f64, 1.), &mut rng);
        model.add_samples(&x, &field(&x)).unwrap();
        // samples added after a fit are not visible until the next fit
        assert_eq!(model.version(), 1);
        let report = model.fit().unwrap();
        assert_eq!(report.version, 2);
        assert_eq!(report.n_samples, 30);
        assert!(model.is_fitted());
    }

    #[test]
    fn test_samples_added_during_fit_are_deferred() {
        let mut rng = Xoshiro256Plus::seed_from_u64(4);
        let model = MixtureModel::new(seeded(2)).unwrap();
        let x = Array::random_using((40, 2), Uniform::new(0f64, 1.), &mut rng);
        model.add_samples(&x, &field(&x)).unwrap();
        let extra = Array::random_using((5, 2), Uniform::new(0f64, 1.), &mut rng);

        let report = std::thread::scope(|s| {
            let fitting = s.spawn(|| model.fit());
            model.add_samples(&extra, &field(&extra)).unwrap();
            let predicting = s.spawn(|| model.predict(&array![[0.5, 0.5]]));
            let prediction = predicting.join().unwrap();
            assert!(prediction.is_ok() || matches!(prediction, Err(MoeError::ModelNotFit)));
            fitting.join().unwrap().unwrap()
        });
        assert!(report.n_samples == 40 || report.n_samples == 45);
        assert_eq!(model.n_samples(), 45);
        assert_eq!(model.fit().unwrap().n_samples, 45);
    }

    #[test]
    fn test_test_positions() {
        let model = MixtureModel::new(seeded(1)).unwrap();
        assert!(matches!(
            model.predict_test_positions(),
            Err(MoeError::MissingTestPositions)
        ));
        model
            .set_test_positions(&array![[0., 0.], [0.5, 0.5], [1., 1.]])
            .unwrap();
        assert!(matches!(
            model.predict_test_positions(),
            Err(MoeError::ModelNotFit)
        ));
        model
            .add_samples(&array![[0., 0.], [1., 1.]], &array![0., 1.])
            .unwrap();
        model.fit().unwrap();
        let prediction = model.predict_test_positions().unwrap();
        assert_eq!(prediction.means.len(), 3);
        assert!(matches!(
            model.set_test_positions(&array![[0.]]),
            Err(MoeError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_failed_fit_keeps_committed_model() {
        let mut rng = Xoshiro256Plus::seed_from_u64(6);
        let x = Array::random_using((30, 2), Uniform::new(0f64, 1.), &mut rng);
        let model = MixtureModel::new(seeded(3)).unwrap();
        model.add_samples(&x, &field(&x)).unwrap();
        let report = model.fit().unwrap();
        let xq = array![[0.2, 0.4], [0.7, 0.7]];
        let before = model.predict(&xq).unwrap();

        // values so large that no expert gives them a finite likelihood
        model
            .add_samples(&array![[0.5, 0.5], [0.6, 0.1]], &array![1e160, -1e160])
            .unwrap();
        assert!(matches!(model.fit(), Err(MoeError::NumericalError(_))));
        assert_eq!(model.version(), report.version);
        assert_eq!(model.predict(&xq).unwrap(), before);
        assert_eq!(model.n_samples(), 32);
    }

    #[test]
    fn test_default_gating_weights_away_from_samples() {
        let mut rng = Xoshiro256Plus::seed_from_u64(8);
        let x = Array::random_using((40, 2), Uniform::new(0f64, 1.), &mut rng);
        let y = x.map_axis(Axis(1), |p| if p[0] < 0.5 { -2. } else { 2. });
        let model = MixtureModel::new(seeded(3)).unwrap();
        model.add_samples(&x, &y).unwrap();
        model.fit().unwrap();

        let mut xq = Array::random_using((50, 2), Uniform::new(-1f64, 2.), &mut rng);
        xq.row_mut(0).assign(&array![10., -10.]);
        let mixture = model.fitted().unwrap();
        let w = mixture.gating().weights(&xq).unwrap();
        assert!(w.iter().all(|v| *v > 0. && *v < 1.), "weights {w}");
        for row in w.rows() {
            assert_abs_diff_eq!(row.sum(), 1., epsilon = 1e-12);
        }
        let prediction = model.predict(&xq).unwrap();
        assert!(prediction.means.iter().all(|m| m.is_finite()));
        assert!(prediction.variances.iter().all(|v| *v >= 0.));
    }
}
