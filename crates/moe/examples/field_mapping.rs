use linfa::traits::Fit;
use ndarray::{arr2, concatenate, Axis};
use ndarray_npy::write_npy;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use sampling_measurement::{
    synthetic_trial, GridSampling, MeasurementOracle, RandomSampling, SamplingMethod,
};
use sampling_moe::{MixtureModel, MixtureParams};
use std::error::Error;

/// Simulated sampling loop: an agent measures a field batch after batch
/// and the mixture model is refitted after each batch.
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let xlimits = arr2(&[[-3., 3.], [-3., 3.]]);
    let trial = synthetic_trial(&GridSampling::new(&xlimits)?.sample(100))?;
    let oracle = MeasurementOracle::params(5, 0.1)
        .with_rng(Xoshiro256Plus::seed_from_u64(0))
        .fit(&trial.to_dataset())?;

    let model = MixtureModel::new(
        MixtureParams::new_with_rng(3, Xoshiro256Plus::seed_from_u64(42)).max_iterations(50),
    )?;
    let agent = RandomSampling::new_with_rng(&xlimits, Xoshiro256Plus::seed_from_u64(1))?;
    let xtest = GridSampling::new(&xlimits)?.sample(900);
    model.set_test_positions(&xtest)?;

    for batch in 0..5 {
        let positions = agent.sample(20);
        let values = oracle.measure_batch(&positions)?;
        model.add_samples(&positions, &values)?;
        let report = model.fit()?;
        let prediction = model.predict_test_positions()?;
        let truth = oracle.true_values(&xtest)?;
        let rmse = ((&prediction.means - &truth).mapv(|e| e * e).sum() / truth.len() as f64).sqrt();
        println!(
            "batch {batch}: {} samples, {} EM iterations (converged={}), rmse={rmse:.3}",
            report.n_samples, report.iterations, report.converged
        );
    }

    let prediction = model.predict_test_positions()?;
    let ytrue = oracle.true_values(&xtest)?;
    let (xt, yt) = model.samples();
    let xtrain = concatenate![Axis(1), xt, yt.insert_axis(Axis(1))];

    // Save data as numpy arrays to plot with Python
    let example_dir = "target/examples";
    std::fs::create_dir_all(example_dir).ok();

    write_npy(format!("{example_dir}/field_x.npy"), &xtest)?;
    write_npy(format!("{example_dir}/field_ytrue.npy"), &ytrue)?;
    write_npy(format!("{example_dir}/field_ypred.npy"), &prediction.means)?;
    write_npy(format!("{example_dir}/field_yvar.npy"), &prediction.variances)?;
    write_npy(format!("{example_dir}/field_samples.npy"), &xtrain)?;

    Ok(())
}
