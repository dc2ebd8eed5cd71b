use thiserror::Error;

/// A result type for measurement simulation
pub type Result<T> = std::result::Result<T, MeasurementError>;

/// An error when loading trial data or simulating measurements
#[derive(Error, Debug)]
pub enum MeasurementError {
    /// When positions and measurements have incompatible shapes
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// When there are fewer samples than polynomial coefficients
    #[error("Not enough samples: {required} required, got {actual}")]
    NotEnoughSamples {
        /// Number of samples required
        required: usize,
        /// Number of samples available
        actual: usize,
    },
    /// When the least squares system is rank deficient
    #[error("Rank deficient least squares system: {0}")]
    RankDeficient(String),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When reading a data file fails
    #[error("Load IO error")]
    LoadIoError(#[from] std::io::Error),
    /// When parsing a data file fails
    #[error("Load CSV error: {0}")]
    LoadCsvError(#[from] csv::Error),
}
