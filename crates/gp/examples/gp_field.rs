use linfa::prelude::*;
use ndarray::{arr1, arr2, Array, Array2, Axis};
use sampling_gp::{kernels::SquaredExponentialKernel, GaussianProcess};

fn main() {
    let xtrain: Array2<f64> = arr2(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [0.5, 0.5]]);
    let ytrain = arr1(&[0.0, 1.0, 1.5, 0.9, 1.0]);

    let kernel = SquaredExponentialKernel::with_noise_stddev(0.5, 0.5, 0.1).expect("valid kernel");
    let gp = GaussianProcess::params(kernel)
        .fit(&Dataset::new(xtrain, ytrain))
        .expect("GP fitting");
    println!("{gp}");

    let line = Array::linspace(0., 1., 11).insert_axis(Axis(1));
    let mut xtest = Array2::zeros((11, 2));
    xtest.column_mut(0).assign(&line.column(0));
    xtest.column_mut(1).assign(&line.column(0));
    let (means, variances) = gp.predict_valvar(&xtest).expect("GP prediction");
    for ((x, m), v) in xtest.rows().into_iter().zip(means.iter()).zip(variances.iter()) {
        println!("{x} -> {m:.3} +/- {:.3}", v.sqrt());
    }
}
