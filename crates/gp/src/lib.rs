//! This library implements [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression
//! of scalar fields sampled over a 2D (or more generally nD) workspace.
//!
//! GP regression is implemented by [GaussianProcess] parameterized by [GpParams] and a covariance
//! [kernels::Kernel]. Only the squared exponential kernel is available, its hyperparameters are fixed
//! by the user (no likelihood optimization).
//!
//! Observations may be weighted ([GpValidParams::fit_weighted]): a weight `w` in `[0, 1]` inflates
//! the observation noise variance by `1/w`, which is how the experts of a mixture of GPs are trained
//! against soft assignments.
//!
//! [GpExpert] wraps a GP which can be refitted in place and reports [GpError::NotFitted]
//! until its first successful fit.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod errors;
mod expert;
pub mod kernels;
mod parameters;
mod utils;

pub use algorithm::*;
pub use errors::*;
pub use expert::*;
pub use parameters::*;
pub use utils::{all_finite, min_squared_distance};
