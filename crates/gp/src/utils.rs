use linfa::Float;
use ndarray::{s, Array1, Array2, ArrayBase, Axis, Data, Dimension, Ix1, Ix2};
use ndarray_stats::QuantileExt;

/// Computes differences between x and each element of y
/// resulting in a 2d array of shape (nrows(y), ncols(x));
/// *Panics* if x and y have not the same number of components
pub fn differences<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix1>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    assert!(x.len() == y.ncols());
    x.to_owned() - y
}

/// Smallest squared euclidean distance between two distinct rows of `x`.
/// Returns `None` when `x` has less than two rows.
pub fn min_squared_distance<F: Float>(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Option<F> {
    let n = x.nrows();
    if n < 2 {
        return None;
    }
    let mut d2 = Vec::with_capacity(n * (n - 1) / 2);
    for k in 0..(n - 1) {
        let diff = differences(&x.row(k), &x.slice(s![k + 1..n, ..]));
        d2.extend(diff.mapv(|v| v * v).sum_axis(Axis(1)).iter().copied());
    }
    Array1::from_vec(d2).min().ok().copied()
}

/// Check that all values are finite
pub fn all_finite<F: Float, D: Dimension>(x: &ArrayBase<impl Data<Elem = F>, D>) -> bool {
    x.iter().all(|v| v.is_finite())
}
