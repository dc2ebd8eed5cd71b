use crate::errors::{MeasurementError, Result};
use crate::surface::PolynomialSurface;
use crate::trial::TrialData;

use linfa::traits::Fit;
use linfa::{Dataset, DatasetBase, ParamGuard};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256Plus;
use std::sync::{Arc, PoisonError, RwLock};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default order of the fitted polynomial surface
pub const DEFAULT_ORDER: usize = 5;
/// Default standard deviation of the measurement noise
pub const DEFAULT_NOISE_STDDEV: f64 = 0.5;

/// Validated measurement oracle parameters
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct OracleValidParams {
    order: usize,
    noise_stddev: f64,
    rng: Xoshiro256Plus,
}

impl Default for OracleValidParams {
    fn default() -> OracleValidParams {
        OracleValidParams {
            order: DEFAULT_ORDER,
            noise_stddev: DEFAULT_NOISE_STDDEV,
            rng: Xoshiro256Plus::from_entropy(),
        }
    }
}

impl OracleValidParams {
    /// Order of the polynomial surface
    pub fn order(&self) -> usize {
        self.order
    }

    /// Standard deviation of the measurement noise
    pub fn noise_stddev(&self) -> f64 {
        self.noise_stddev
    }

    /// Random generator used to draw the measurement noise
    pub fn rng(&self) -> Xoshiro256Plus {
        self.rng.clone()
    }
}

/// Measurement oracle parameters
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct OracleParams(OracleValidParams);

impl OracleParams {
    /// Parameters given the polynomial `order` and the measurement `noise_stddev`
    pub fn new(order: usize, noise_stddev: f64) -> OracleParams {
        OracleParams(OracleValidParams {
            order,
            noise_stddev,
            ..Default::default()
        })
    }

    /// Set the polynomial order
    pub fn order(mut self, order: usize) -> Self {
        self.0.order = order;
        self
    }

    /// Set the measurement noise standard deviation
    pub fn noise_stddev(mut self, noise_stddev: f64) -> Self {
        self.0.noise_stddev = noise_stddev;
        self
    }

    /// Set the random generator for reproducible measurements
    pub fn with_rng(mut self, rng: Xoshiro256Plus) -> Self {
        self.0.rng = rng;
        self
    }
}

impl From<OracleValidParams> for OracleParams {
    fn from(valid: OracleValidParams) -> Self {
        OracleParams(valid)
    }
}

impl ParamGuard for OracleParams {
    type Checked = OracleValidParams;
    type Error = MeasurementError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if !(self.0.noise_stddev.is_finite() && self.0.noise_stddev >= 0.) {
            return Err(MeasurementError::InvalidValueError(format!(
                "`noise_stddev` should be positive or zero, got {}",
                self.0.noise_stddev
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

impl<D: Data<Elem = f64>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, MeasurementError>
    for OracleValidParams
{
    type Object = MeasurementOracle;

    /// Fit the oracle surface on trial positions and measurements
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let surface = PolynomialSurface::fit(dataset.records(), dataset.targets(), self.order)?;
        let noise = Normal::new(0., self.noise_stddev)
            .map_err(|e| MeasurementError::InvalidValueError(e.to_string()))?;
        info!(
            "Measurement oracle fitted (order={}, noise={}) on {} samples",
            self.order,
            self.noise_stddev,
            dataset.targets().len()
        );
        Ok(MeasurementOracle {
            surface,
            noise_stddev: self.noise_stddev,
            noise,
            rng: Arc::new(RwLock::new(self.rng.clone())),
        })
    }
}

/// Simulated sensor returning noisy values of a polynomial surface
/// fitted on the measurements of a sampling trial
///
/// Clones share the same random generator.
#[derive(Clone, Debug)]
pub struct MeasurementOracle {
    surface: PolynomialSurface,
    noise_stddev: f64,
    noise: Normal<f64>,
    rng: Arc<RwLock<Xoshiro256Plus>>,
}

impl MeasurementOracle {
    /// Oracle parameters given the polynomial `order` and the measurement `noise_stddev`
    ///
    /// ```no_run
    /// use sampling_measurement::{MeasurementOracle, TrialData};
    /// use linfa::prelude::*;
    ///
    /// let trial = TrialData::load("positions.txt", "measurements.txt").unwrap();
    /// let oracle = MeasurementOracle::params(5, 0.5)
    ///     .fit(&trial.to_dataset())
    ///     .expect("Oracle fitted");
    /// let value = oracle.measure(1.5, -0.5);
    /// ```
    pub fn params(order: usize, noise_stddev: f64) -> OracleParams {
        OracleParams::new(order, noise_stddev)
    }

    /// Fitted polynomial surface
    pub fn surface(&self) -> &PolynomialSurface {
        &self.surface
    }

    /// Measurement noise standard deviation
    pub fn noise_stddev(&self) -> f64 {
        self.noise_stddev
    }

    /// Noisy measurement at position (`x`, `y`)
    pub fn measure(&self, x: f64, y: f64) -> f64 {
        let mut rng = self.rng.write().unwrap_or_else(PoisonError::into_inner);
        self.surface.eval_one(x, y) + self.noise.sample(&mut *rng)
    }

    /// Noisy measurements at (n, 2) positions
    pub fn measure_batch(
        &self,
        positions: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<Array1<f64>> {
        let mut values = self.true_values(positions)?;
        let mut rng = self.rng.write().unwrap_or_else(PoisonError::into_inner);
        values.iter_mut().for_each(|v| *v += self.noise.sample(&mut *rng));
        debug!("{} measurements simulated", values.len());
        Ok(values)
    }

    /// Noise free surface values at (n, 2) positions
    pub fn true_values(
        &self,
        positions: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<Array1<f64>> {
        if positions.ncols() != 2 {
            return Err(MeasurementError::ShapeMismatch(format!(
                "Positions should have 2 components, got {}",
                positions.ncols()
            )));
        }
        Ok(self.surface.eval(positions))
    }

    /// Noisy measurements at (n, 2) positions as a dataset ready for training
    pub fn sample_dataset(
        &self,
        positions: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<Dataset<f64, f64, Ix1>> {
        let values = self.measure_batch(positions)?;
        Ok(Dataset::new(positions.to_owned(), values))
    }
}

/// Gaussian bump with a linear trend, used to build synthetic trials
pub fn synthetic_field(positions: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array1<f64> {
    let mut values = Array1::zeros(positions.nrows());
    Zip::from(&mut values)
        .and(positions.rows())
        .for_each(|v, p| *v = 2. * (-(p[0] * p[0] + p[1] * p[1]) / 2.).exp() + 0.3 * p[0]);
    values
}

/// Synthetic trial measurements of [synthetic_field] on the given positions
pub fn synthetic_trial(positions: &Array2<f64>) -> Result<TrialData> {
    TrialData::new(positions, &synthetic_field(positions))
}
