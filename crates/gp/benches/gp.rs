use criterion::{criterion_group, criterion_main, Criterion};
use linfa::prelude::{Dataset, Fit};
use ndarray::{Array, Array2, Axis};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;
use sampling_gp::kernels::SquaredExponentialKernel;
use sampling_gp::GaussianProcess;

fn criterion_gp(c: &mut Criterion) {
    let nts = [50, 100, 200, 400];

    let mut group = c.benchmark_group("gp");
    group.sample_size(20);
    for nt in nts {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let xt: Array2<f64> = Array::random_using((nt, 2), Uniform::new(0., 10.), &mut rng);
        let yt = xt.map_axis(Axis(1), |p| p[0].sin() * p[1].cos());
        let xtest: Array2<f64> = Array::random_using((1000, 2), Uniform::new(0., 10.), &mut rng);
        let kernel = SquaredExponentialKernel::with_noise_stddev(0.5, 0.5, 0.1).unwrap();

        group.bench_function(format!("gp fit {nt}"), |b| {
            b.iter(|| {
                std::hint::black_box(
                    GaussianProcess::params(kernel)
                        .fit(&Dataset::new(xt.to_owned(), yt.to_owned()))
                        .expect("GP fit error"),
                )
            });
        });

        let gp = GaussianProcess::params(kernel)
            .fit(&Dataset::new(xt.to_owned(), yt.to_owned()))
            .expect("GP fit error");
        group.bench_function(format!("gp predict_valvar {nt}"), |b| {
            b.iter(|| std::hint::black_box(gp.predict_valvar(&xtest).expect("GP prediction")));
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_gp);
criterion_main!(benches);
