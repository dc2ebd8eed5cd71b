use thiserror::Error;

/// A result type for GP regression algorithm
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when using [`GaussianProcess`](crate::GaussianProcess) or a [`GpExpert`](crate::GpExpert)
#[derive(Error, Debug)]
pub enum GpError {
    /// When a kernel hyperparameter is out of its valid domain
    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),
    /// When the covariance matrix factorization fails even after jitter escalation
    #[error("Numerical error: {0}")]
    NumericalError(String),
    /// When prediction is requested from an expert which was never fitted
    #[error("GP expert is not fitted")]
    NotFitted,
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When error dur to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
