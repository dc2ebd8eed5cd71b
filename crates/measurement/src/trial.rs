use crate::errors::{MeasurementError, Result};

use csv::{ReaderBuilder, Trim};
use linfa::Dataset;
use log::debug;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Positions and measured values of a field sampling trial
#[derive(Clone, Debug, PartialEq)]
pub struct TrialData {
    positions: Array2<f64>,
    measurements: Array1<f64>,
}

impl TrialData {
    /// Constructor given (n, 2) positions and (n,) measurements
    pub fn new(
        positions: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        measurements: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<TrialData> {
        if positions.ncols() != 2 {
            return Err(MeasurementError::ShapeMismatch(format!(
                "Positions should have 2 components, got {}",
                positions.ncols()
            )));
        }
        if positions.nrows() != measurements.len() {
            return Err(MeasurementError::ShapeMismatch(format!(
                "{} positions for {} measurements",
                positions.nrows(),
                measurements.len()
            )));
        }
        if !positions.iter().chain(measurements.iter()).all(|v| v.is_finite()) {
            return Err(MeasurementError::InvalidValueError(
                "Trial data should be finite".to_string(),
            ));
        }
        Ok(TrialData {
            positions: positions.to_owned(),
            measurements: measurements.to_owned(),
        })
    }

    /// Load trial data from a position file (one `x,y` line per sample)
    /// and a measurement file (one value per line)
    pub fn load<P: AsRef<Path>>(position_file: P, measurement_file: P) -> Result<TrialData> {
        debug!(
            "Load trial data from {} and {}",
            position_file.as_ref().display(),
            measurement_file.as_ref().display()
        );
        Self::from_readers(
            File::open(position_file)?,
            File::open(measurement_file)?,
        )
    }

    /// Read trial data from position and measurement contents
    /// with the same layout as [TrialData::load] files
    pub fn from_readers<R1: Read, R2: Read>(positions: R1, measurements: R2) -> Result<TrialData> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b',')
            .trim(Trim::All)
            .from_reader(positions);
        let mut coords = vec![];
        for record in reader.deserialize::<(f64, f64)>() {
            let (x, y) = record?;
            coords.push([x, y]);
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .trim(Trim::All)
            .from_reader(measurements);
        let mut values = vec![];
        for record in reader.deserialize::<f64>() {
            values.push(record?);
        }

        let positions = Array2::from_shape_fn((coords.len(), 2), |(i, j)| coords[i][j]);
        Self::new(&positions, &Array1::from_vec(values))
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Whether the trial has no sample
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// (n, 2) sample positions
    pub fn positions(&self) -> &Array2<f64> {
        &self.positions
    }

    /// (n,) measured values
    pub fn measurements(&self) -> &Array1<f64> {
        &self.measurements
    }

    /// Trial data as a linfa dataset
    pub fn to_dataset(&self) -> Dataset<f64, f64, Ix1> {
        Dataset::new(self.positions.to_owned(), self.measurements.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_from_readers() {
        let positions = "0.0, 1.0\n2.5,3.0\n-1,4\n";
        let measurements = "10.5\n 11.0\n12\n";
        let trial = TrialData::from_readers(positions.as_bytes(), measurements.as_bytes()).unwrap();
        assert_eq!(trial.len(), 3);
        assert_abs_diff_eq!(
            trial.positions(),
            &array![[0., 1.], [2.5, 3.], [-1., 4.]]
        );
        assert_abs_diff_eq!(trial.measurements(), &array![10.5, 11., 12.]);
    }

    #[test]
    fn test_inconsistent_files() {
        let res = TrialData::from_readers("0,1\n2,3\n".as_bytes(), "1\n".as_bytes());
        assert!(matches!(res, Err(MeasurementError::ShapeMismatch(_))));
        let res = TrialData::from_readers("0,a\n".as_bytes(), "1\n".as_bytes());
        assert!(matches!(res, Err(MeasurementError::LoadCsvError(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let res = TrialData::load("no/such/positions.txt", "no/such/measurements.txt");
        assert!(matches!(res, Err(MeasurementError::LoadIoError(_))));
    }

    #[test]
    fn test_new_checks() {
        assert!(TrialData::new(&array![[0., 1., 2.]], &array![1.]).is_err());
        assert!(TrialData::new(&array![[0., f64::NAN]], &array![1.]).is_err());
        let trial = TrialData::new(&array![[0., 1.]], &array![1.]).unwrap();
        assert_eq!(trial.to_dataset().records().nrows(), 1);
    }
}
