use crate::errors::{MeasurementError, Result};

use linfa::Float;
use ndarray::{Array, Array2, ArrayBase, Data, Ix2};
use ndarray_rand::{rand::Rng, rand::SeedableRng, rand_distr::Uniform, RandomExt};
use rand_xoshiro::Xoshiro256Plus;
use std::sync::{Arc, PoisonError, RwLock};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Dimension of the sampled positions
pub const SPACE_DIM: usize = 2;

/// Position sampler over a rectangular 2D sampling space
///
/// The sampling space is a (2, 2) matrix where the ith row is
/// `[lower_bound, upper_bound]` of the ith position component.
pub trait SamplingMethod<F: Float> {
    /// Returns the bounds of the sampling space
    fn sampling_space(&self) -> &Array2<F>;

    /// Generates (ns, 2) positions belonging to `[0., 1.]^2`
    fn normalized_sample(&self, ns: usize) -> Array2<F>;

    /// Generates (ns, 2) positions within the sampling space bounds
    fn sample(&self, ns: usize) -> Array2<F> {
        let xlimits = self.sampling_space();
        let lower = xlimits.column(0);
        let scaler = &xlimits.column(1) - &lower;
        self.normalized_sample(ns) * scaler + lower
    }
}

fn check_sampling_space<F: Float>(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<()> {
    if xlimits.shape() != [SPACE_DIM, 2] {
        return Err(MeasurementError::ShapeMismatch(format!(
            "Sampling space should be a (2, 2) matrix, got {:?}",
            xlimits.shape()
        )));
    }
    for row in xlimits.rows() {
        if !(row[0].is_finite() && row[1].is_finite() && row[0] <= row[1]) {
            return Err(MeasurementError::InvalidValueError(format!(
                "Bad sampling space bounds [{}, {}]",
                row[0], row[1]
            )));
        }
    }
    Ok(())
}

type RngRef<R> = Arc<RwLock<R>>;

/// Positions drawn uniformly at random in the sampling space
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct RandomSampling<F: Float, R: Rng> {
    xlimits: Array2<F>,
    /// Random generator shared by clones for reproducibility
    rng: RngRef<R>,
}

impl<F: Float> RandomSampling<F, Xoshiro256Plus> {
    /// Constructor given the (2, 2) sampling space \[\[x_lower, x_upper\], \[y_lower, y_upper\]\]
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Self> {
        Self::new_with_rng(xlimits, Xoshiro256Plus::from_entropy())
    }
}

impl<F: Float, R: Rng> RandomSampling<F, R> {
    /// Constructor given the sampling space and a random generator
    pub fn new_with_rng(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>, rng: R) -> Result<Self> {
        check_sampling_space(xlimits)?;
        Ok(RandomSampling {
            xlimits: xlimits.to_owned(),
            rng: Arc::new(RwLock::new(rng)),
        })
    }

    /// Set random generator
    pub fn with_rng<R2: Rng>(self, rng: R2) -> RandomSampling<F, R2> {
        RandomSampling {
            xlimits: self.xlimits,
            rng: Arc::new(RwLock::new(rng)),
        }
    }
}

impl<F: Float, R: Rng> SamplingMethod<F> for RandomSampling<F, R> {
    fn sampling_space(&self) -> &Array2<F> {
        &self.xlimits
    }

    fn normalized_sample(&self, ns: usize) -> Array2<F> {
        let mut rng = self.rng.write().unwrap_or_else(PoisonError::into_inner);
        Array::random_using((ns, SPACE_DIM), Uniform::new(0f64, 1.), &mut *rng).mapv(F::cast)
    }
}

/// Positions on a regular grid covering the sampling space
///
/// The number of levels per component is chosen as evenly as possible
/// and the first `ns` grid nodes are returned in row major order.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct GridSampling<F: Float> {
    xlimits: Array2<F>,
}

impl<F: Float> GridSampling<F> {
    /// Constructor given the (2, 2) sampling space \[\[x_lower, x_upper\], \[y_lower, y_upper\]\]
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Self> {
        check_sampling_space(xlimits)?;
        Ok(GridSampling {
            xlimits: xlimits.to_owned(),
        })
    }

    /// Levels along each component for `ns` requested positions
    pub fn levels(ns: usize) -> (usize, usize) {
        let (mut nx, mut ny) = (1, 1);
        while nx * ny < ns {
            if nx <= ny {
                nx += 1;
            } else {
                ny += 1;
            }
        }
        (nx, ny)
    }
}

impl<F: Float> SamplingMethod<F> for GridSampling<F> {
    fn sampling_space(&self) -> &Array2<F> {
        &self.xlimits
    }

    fn normalized_sample(&self, ns: usize) -> Array2<F> {
        let (nx, ny) = Self::levels(ns);
        let tick = |i: usize, n: usize| {
            if n > 1 {
                F::cast(i) / F::cast(n - 1)
            } else {
                F::zero()
            }
        };
        Array2::from_shape_fn((ns, SPACE_DIM), |(k, j)| {
            if j == 0 {
                tick(k / ny, nx)
            } else {
                tick(k % ny, ny)
            }
        })
    }
}
