use anyhow::Result;
use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    module::AutodiffModule,
};
use lenet_mnist::{
    dataset, report,
    training::{self, TrainingConfig},
};
use log::{info, LevelFilter};

type Backend = Autodiff<NdArray>;

const DATA_DIR: &str = "data/";

fn main() -> Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = TrainingConfig::lenet();
    info!("Training configuration: {}", config);

    let device = NdArrayDevice::Cpu;
    let (train, test) = dataset::load(DATA_DIR, true)?;

    let (model, history) = training::run::<Backend>(&config, &train, &test, &device)?;
    report::plot_history(&history);

    let metrics = training::evaluate(&model.valid(), &test, config.eval_batch_size, &device)?;
    println!("{}", report::final_summary(&metrics));

    Ok(())
}
