use sampling_gp::GpError;
use thiserror::Error;

/// A result type for mixture of experts algorithm
pub type Result<T> = std::result::Result<T, MoeError>;

/// An error when using a mixture of GP experts
#[derive(Error, Debug)]
pub enum MoeError {
    /// When the configuration is inconsistent (hyperparameter vector length
    /// different from the number of experts, out of domain value)
    #[error("Configuration mismatch: {0}")]
    ConfigMismatch(String),
    /// When a batch of positions and values have incompatible shapes
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// When fitting is requested without any accumulated sample
    #[error("Empty training set: no sample to fit")]
    EmptyTrainingSet,
    /// When a covariance factorization fails even after jitter escalation
    #[error("Numerical error: {0}")]
    NumericalError(String),
    /// When prediction is requested before the first successful fit
    #[error("Model is not fitted")]
    ModelNotFit,
    /// When prediction at stored test positions is requested but none were set
    #[error("No test positions were set")]
    MissingTestPositions,
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When Gaussian Process fails
    #[error("GP error: {0}")]
    GpError(GpError),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When a linfa GMM clustering error occurs
    #[error(transparent)]
    ClusteringError(#[from] linfa_clustering::GmmError),
}

impl From<GpError> for MoeError {
    fn from(err: GpError) -> Self {
        match err {
            GpError::NumericalError(msg) => MoeError::NumericalError(msg),
            GpError::NotFitted => MoeError::ModelNotFit,
            GpError::InvalidHyperparameter(msg) => MoeError::ConfigMismatch(msg),
            GpError::LinalgError(err) => MoeError::LinalgError(err),
            GpError::LinfaError(err) => MoeError::LinfaError(err),
            err => MoeError::GpError(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gp_error_conversion() {
        assert!(matches!(
            MoeError::from(GpError::NotFitted),
            MoeError::ModelNotFit
        ));
        assert!(matches!(
            MoeError::from(GpError::NumericalError("cholesky".to_string())),
            MoeError::NumericalError(_)
        ));
        assert!(matches!(
            MoeError::from(GpError::InvalidHyperparameter("length".to_string())),
            MoeError::ConfigMismatch(_)
        ));
        assert!(matches!(
            MoeError::from(GpError::InvalidValueError("nan".to_string())),
            MoeError::GpError(_)
        ));
    }
}
