use std::path::Path;
use std::time::Instant;

use burn::data::dataloader::DataLoaderBuilder;
use burn::tensor::backend::AutodiffBackend;

use super::{StepReport, TrainingConfig};
use crate::data::{FlashPairBatch, FlashPairBatcher, FlashPairDataset, PairAugmenter};
use crate::error::{DataError, TrainError};
use crate::model::Generator;

/// Running means of the named losses over an epoch.
#[derive(Debug, Default)]
struct LossTracker {
    sums: Vec<(&'static str, f64)>,
    steps: usize,
}

impl LossTracker {
    fn update(&mut self, report: &StepReport) {
        for &(name, value) in &report.losses {
            match self.sums.iter().position(|(key, _)| *key == name) {
                Some(index) => self.sums[index].1 += value as f64,
                None => self.sums.push((name, value as f64)),
            }
        }
        self.steps += 1;
    }

    fn summary(&self) -> String {
        let steps = self.steps.max(1) as f64;
        self.sums
            .iter()
            .map(|(name, sum)| format!("{name}: {:.5}", sum / steps))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Train the configured model on `<data_dir>/train`, saving the configuration and periodic
/// generator checkpoints into `checkpoints_dir`. Returns the trained generator.
pub fn train<B: AutodiffBackend>(
    config: TrainingConfig,
    device: B::Device,
) -> Result<Generator<B>, TrainError> {
    let config_file = config.save_to_checkpoints()?;
    log::info!("Saved run configuration to {}", config_file.display());
    config.log_summary();

    B::seed(config.seed);

    let dataset = FlashPairDataset::new(&Path::new(&config.data_dir).join("train"))?;
    let batcher = FlashPairBatcher::new(config.generator.out_act)
        .with_augmenter(PairAugmenter::train(config.image_size as u32), config.seed);
    let mut builder = DataLoaderBuilder::<B, _, _>::new(batcher)
        .batch_size(config.batch_size.max(1))
        .shuffle(config.seed)
        .set_device(device.clone());
    if config.num_workers > 0 {
        builder = builder.num_workers(config.num_workers);
    }
    let dataloader = builder.build(dataset);
    let num_items = dataloader.num_items();

    let mut model = config.model.init::<B>(&config, &device)?;
    let interval = config.checkpoint_interval.max(1);
    let start = Instant::now();

    for epoch in 1..=config.num_epochs {
        let mut tracker = LossTracker::default();
        let mut loaded = 0;

        for (iteration, batch) in dataloader.iter().enumerate() {
            let FlashPairBatch::<B> { ambient, flash } = batch;
            loaded += ambient.dims()[0];
            let (input, target) = config.direction.orient(ambient, flash);

            model.set_inputs(input, target);
            let report = model.optimize_parameters()?;
            log::debug!(
                "[Train - Epoch {epoch} - Iteration {iteration}] {:?}",
                report.losses
            );
            tracker.update(&report);
        }

        if loaded < num_items {
            return Err(DataError::Incomplete {
                loaded,
                expected: num_items,
            }
            .into());
        }

        log::info!(
            "[Epoch {epoch}/{}] {} ({:.1}s)",
            config.num_epochs,
            tracker.summary(),
            start.elapsed().as_secs_f32()
        );

        if epoch % interval == 0 || epoch == config.num_epochs {
            model.save_model(epoch)?;
        }
    }

    Ok(model.generator().clone())
}
