/*!
This library simulates the measurements of a sampling agent exploring a 2D field.

The field is a polynomial surface fitted by least squares on the positions and
measured values of a past sampling trial. Measurements are drawn from that
surface with an additive gaussian noise. Position samplers generate the
positions visited by the simulated agent.

Example:
```no_run
use sampling_measurement::{GridSampling, MeasurementOracle, SamplingMethod, TrialData};
use linfa::prelude::*;
use ndarray::arr2;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

// Trial files: one `x,y` line per position, one value per line
let trial = TrialData::load("positions.txt", "measurements.txt").unwrap();
let oracle = MeasurementOracle::params(5, 0.5)
    .with_rng(Xoshiro256Plus::seed_from_u64(42))
    .fit(&trial.to_dataset())
    .expect("Oracle fitted");

let positions = GridSampling::new(&arr2(&[[-5., 5.], [-5., 5.]]))
    .unwrap()
    .sample(16);
let measurements = oracle.measure_batch(&positions).unwrap();
```
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod errors;
mod oracle;
mod sampling;
mod surface;
mod trial;

pub use errors::*;
pub use oracle::*;
pub use sampling::*;
pub use surface::*;
pub use trial::*;
