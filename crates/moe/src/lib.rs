//! This library implements a mixture of [GP experts](sampling_gp) to model a scalar field
//! over a 2D workspace from noisy point measurements collected incrementally.
//!
//! The mixture of experts replaces a single global GP by a set of GP regressors (experts)
//! whose predictions are softly combined by a gating network. The gating network holds one GP
//! per expert mapping a position to a relevance score, the softmax of the scores giving the
//! weights of the experts at that position.
//!
//! Experts and gating network are fitted jointly with the Expectation-Maximization algorithm:
//! * E-step: the responsibility of each expert for each sample is computed from the gating
//!   weights and the expert predictive likelihood of the sample value,
//! * M-step: each expert is refitted on every sample, the observation noise of a sample being
//!   inflated by the inverse of the expert responsibility, and the gating network is refitted
//!   on log-responsibilities.
//!
//! Predictions at a position are obtained by moment matching of the experts posteriors.
//!
//! # Implementation
//!
//! * Initial responsibilities come from the previously fitted mixture when available,
//!   otherwise from a clustering of (position, value) samples with
//!   [linfa-clustering](https://docs.rs/linfa-clustering/latest/linfa_clustering/)
//!   gaussian mixture model, otherwise from a random perturbation of uniform responsibilities.
//! * Experts are refitted in parallel with [rayon](https://docs.rs/rayon).
//! * [MixtureModel] is `Send + Sync`: samples can be added and predictions requested
//!   while a fit is running, the fit committing a new version of the model when done.
//!
//! # Features
//!
//! ## serializable
//!
//! The `serializable` feature enables serialization of parameters and reports
//! based on [serde crate](https://serde.rs/).
//!
//! # Example
//!
//! ```no_run
//! use ndarray::{Array1, Array2, Axis};
//! use ndarray_rand::{RandomExt, rand::SeedableRng, rand_distr::Uniform};
//! use rand_xoshiro::Xoshiro256Plus;
//! use sampling_moe::{MixtureModel, MixtureParams};
//!
//! // Field with two regimes
//! fn field(x: &Array2<f64>) -> Array1<f64> {
//!     x.map_axis(Axis(1), |p| if p[0] < 0.5 { p[1] } else { 3. + p[1] * p[1] })
//! }
//!
//! let mut rng = Xoshiro256Plus::seed_from_u64(42);
//! let model = MixtureModel::new(
//!     MixtureParams::new(2).with_rng(rng.clone())
//! ).expect("valid configuration");
//!
//! let xt = Array2::random_using((50, 2), Uniform::new(0f64, 1.), &mut rng);
//! model.add_samples(&xt, &field(&xt)).expect("samples added");
//! let report = model.fit().expect("Mixture fitted");
//! println!("{}", report.message);
//!
//! let xtest = Array2::random_using((10, 2), Uniform::new(0f64, 1.), &mut rng);
//! let prediction = model.predict(&xtest).expect("Mixture prediction");
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod errors;
mod gating;
mod gaussian_mixture;
mod model;
mod parameters;
mod trainer;
mod utils;

pub use algorithm::*;
pub use errors::*;
pub use gating::*;
pub use gaussian_mixture::*;
pub use model::*;
pub use parameters::*;
pub use trainer::*;
