//! Least squares fit of a 2D tensor product polynomial
//!
//! `z(x, y) = sum_{i, j <= order} c_ij * u^i * v^j`
//!
//! where `(u, v)` are the positions rescaled to `[-1, 1]` using the bounding box
//! of the fitted positions, which keeps high orders well conditioned.
//!
//! Coefficients are only computed when the samples determine them: with fewer samples
//! than coefficients or positions that do not span the polynomial space (e.g. all on a line),
//! fitting fails with [MeasurementError::NotEnoughSamples] or [MeasurementError::RankDeficient]
//! instead of picking one of the many least squares solutions (such as the minimum norm one).
//! Lower the order to fit such trials.
use crate::errors::{MeasurementError, Result};

use linfa_linalg::{qr::*, triangular::*};
use log::debug;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Relative threshold on the diagonal of the triangular factor under which
/// the least squares system is considered rank deficient
const RANK_TOLERANCE: f64 = 1e-10;

/// A fitted 2D polynomial surface
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct PolynomialSurface {
    /// Max degree in each component
    order: usize,
    /// (order+1)^2 coefficients, `c_ij` being at index `i * (order + 1) + j`
    coefficients: Array1<f64>,
    /// Center of the fitted positions bounding box
    center: [f64; 2],
    /// Half extent of the fitted positions bounding box
    scale: [f64; 2],
}

impl PolynomialSurface {
    /// Fit a polynomial surface of the given `order` on (n, 2) `positions` and (n,) `values`
    ///
    /// # Errors
    ///
    /// * [MeasurementError::ShapeMismatch] on inconsistent shapes,
    /// * [MeasurementError::NotEnoughSamples] with fewer samples than `(order + 1)^2` coefficients,
    /// * [MeasurementError::RankDeficient] when samples do not determine the polynomial.
    pub fn fit(
        positions: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        values: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        order: usize,
    ) -> Result<PolynomialSurface> {
        if positions.ncols() != 2 || positions.nrows() != values.len() {
            return Err(MeasurementError::ShapeMismatch(format!(
                "Expected (n, 2) positions for {} values, got {:?}",
                values.len(),
                positions.shape()
            )));
        }
        let n_coefs = (order + 1) * (order + 1);
        if values.len() < n_coefs {
            return Err(MeasurementError::NotEnoughSamples {
                required: n_coefs,
                actual: values.len(),
            });
        }

        let mut center = [0.; 2];
        let mut scale = [1.; 2];
        for (j, col) in positions.axis_iter(Axis(1)).enumerate() {
            let lo = col.fold(f64::INFINITY, |m, v| m.min(*v));
            let hi = col.fold(f64::NEG_INFINITY, |m, v| m.max(*v));
            center[j] = 0.5 * (lo + hi);
            if hi > lo {
                scale[j] = 0.5 * (hi - lo);
            }
        }

        let mut surface = PolynomialSurface {
            order,
            coefficients: Array1::zeros(n_coefs),
            center,
            scale,
        };
        let basis = surface.basis(positions);
        let (q, r) = basis.qr()?.into_decomp();

        let diag = r.diag().mapv(f64::abs);
        let rmax = diag.fold(0., |m: f64, d| m.max(*d));
        if diag.iter().any(|d| d.is_nan() || *d <= RANK_TOLERANCE * rmax) {
            return Err(MeasurementError::RankDeficient(format!(
                "positions do not determine a polynomial of order {order}"
            )));
        }
        let rhs = q.t().dot(values).insert_axis(Axis(1));
        surface.coefficients = r
            .solve_triangular_into(rhs, UPLO::Upper)?
            .remove_axis(Axis(1));
        debug!("Polynomial surface of order {order} fitted on {} samples", values.len());
        Ok(surface)
    }

    /// Max degree in each component
    pub fn order(&self) -> usize {
        self.order
    }

    /// Coefficients in rescaled coordinates, `c_ij` being at index `i * (order + 1) + j`
    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    /// Evaluate the surface at (n, 2) positions
    pub fn eval(&self, positions: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array1<f64> {
        self.basis(positions).dot(&self.coefficients)
    }

    /// Evaluate the surface at a single position
    pub fn eval_one(&self, x: f64, y: f64) -> f64 {
        let (u, v) = self.rescale(x, y);
        let n = self.order + 1;
        let mut z = 0.;
        let mut ui = 1.;
        for i in 0..n {
            let mut vj = 1.;
            for j in 0..n {
                z += self.coefficients[i * n + j] * ui * vj;
                vj *= v;
            }
            ui *= u;
        }
        z
    }

    fn rescale(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.center[0]) / self.scale[0],
            (y - self.center[1]) / self.scale[1],
        )
    }

    /// (n, (order+1)^2) matrix of monomials `u^i * v^j` at the given positions
    fn basis(&self, positions: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        let n = self.order + 1;
        let mut basis = Array2::zeros((positions.nrows(), n * n));
        Zip::from(basis.rows_mut())
            .and(positions.rows())
            .for_each(|mut row, p| {
                let (u, v) = self.rescale(p[0], p[1]);
                for i in 0..n {
                    for j in 0..n {
                        row[i * n + j] = u.powi(i as i32) * v.powi(j as i32);
                    }
                }
            });
        basis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    fn grid(n: usize, lo: f64, hi: f64) -> Array2<f64> {
        let ticks = Array::linspace(lo, hi, n);
        Array2::from_shape_fn((n * n, 2), |(k, j)| {
            if j == 0 {
                ticks[k / n]
            } else {
                ticks[k % n]
            }
        })
    }

    #[test]
    fn test_exact_recovery() {
        let x = grid(6, -3., 5.);
        let f = |x: f64, y: f64| 1. + 2. * x - 0.5 * x * y + 0.1 * y * y * y;
        let z = x.map_axis(Axis(1), |p| f(p[0], p[1]));
        let surface = PolynomialSurface::fit(&x, &z, 3).unwrap();
        assert_abs_diff_eq!(surface.eval(&x), z, epsilon = 1e-8);
        assert_abs_diff_eq!(surface.eval_one(0.3, -1.2), f(0.3, -1.2), epsilon = 1e-8);
        assert_abs_diff_eq!(
            surface.eval(&array![[0.3, -1.2]])[0],
            surface.eval_one(0.3, -1.2),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_not_enough_samples() {
        let x = grid(2, 0., 1.);
        let z = Array1::zeros(4);
        assert!(matches!(
            PolynomialSurface::fit(&x, &z, 2),
            Err(MeasurementError::NotEnoughSamples {
                required: 9,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_rank_deficient() {
        // all samples on a line can not determine a 2D surface
        let x = Array2::from_shape_fn((20, 2), |(i, _)| i as f64);
        let z = Array1::linspace(0., 1., 20);
        assert!(matches!(
            PolynomialSurface::fit(&x, &z, 2),
            Err(MeasurementError::RankDeficient(_))
        ));
        // a constant is still determined
        let surface = PolynomialSurface::fit(&x, &z, 0).unwrap();
        assert_abs_diff_eq!(surface.coefficients()[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(matches!(
            PolynomialSurface::fit(&array![[0., 0.]], &array![1., 2.], 0),
            Err(MeasurementError::ShapeMismatch(_))
        ));
    }
}
