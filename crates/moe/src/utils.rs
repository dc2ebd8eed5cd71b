use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use ndarray_stats::QuantileExt;

/// Numerically stable `ln(sum(exp(v)))`
pub fn logsumexp<F: Float>(v: &ArrayBase<impl Data<Elem = F>, Ix1>) -> F {
    match v.max() {
        Ok(&m) if m.is_finite() => m + v.mapv(|vi| (vi - m).exp()).sum().ln(),
        Ok(&m) => m,
        Err(_) => F::neg_infinity(),
    }
}

/// Row-wise [logsumexp] of a (n, k) matrix
pub fn logsumexp_rows<F: Float>(m: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
    m.map_axis(Axis(1), |row| logsumexp(&row))
}

/// Row-wise log of the softmax of a (n, k) matrix
pub fn log_softmax_rows<F: Float>(m: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
    let lse = logsumexp_rows(m);
    m.to_owned() - lse.insert_axis(Axis(1))
}
