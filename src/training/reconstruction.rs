use std::path::PathBuf;

use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use super::{
    load_generator, save_generator, BoundBatch, Phase, StepReport, TrainingConfig,
    TranslationModel,
};
use crate::error::{CheckpointError, TrainError};
use crate::loss::ReconstructionLoss;
use crate::model::Generator;

/// Encoder-decoder trained on the reconstruction loss alone (`VGG_ED`).
pub struct ReconstructionModel<B: AutodiffBackend> {
    generator: Generator<B>,
    optimizer: OptimizerAdaptor<Adam, Generator<B>, B>,
    criterion: ReconstructionLoss,
    attention: bool,
    lr: f64,
    checkpoints_dir: PathBuf,
    device: B::Device,
    batch: Option<BoundBatch<B>>,
    z: Option<Tensor<B, 4>>,
}

impl<B: AutodiffBackend> ReconstructionModel<B> {
    /// Build the generator (with the pretrained backbone when configured) and its optimizer.
    pub fn new(config: &TrainingConfig, device: &B::Device) -> Result<Self, TrainError> {
        let generator = config.init_generator(device)?;

        Ok(Self {
            generator,
            optimizer: config.optimizer().init(),
            criterion: config.reconstruction_loss,
            attention: config.attention,
            lr: config.lr1,
            checkpoints_dir: config.checkpoints_path(),
            device: device.clone(),
            batch: None,
            z: None,
        })
    }

    /// Bottleneck code of the latest forward pass.
    pub fn latest_code(&self) -> Option<&Tensor<B, 4>> {
        self.z.as_ref()
    }
}

impl<B: AutodiffBackend> TranslationModel<B> for ReconstructionModel<B> {
    fn set_inputs(&mut self, input: Tensor<B, 4>, target: Tensor<B, 4>) {
        self.batch = Some(BoundBatch::new(input, target, self.attention));
    }

    fn forward(&mut self) -> Result<Tensor<B, 4>, TrainError> {
        let batch = self.batch.as_ref().ok_or(TrainError::MissingInputs)?;
        let (z, fake) = self.generator.forward(batch.input.clone())?;
        self.z = Some(z.detach());

        Ok(fake)
    }

    fn optimize_parameters(&mut self) -> Result<StepReport, TrainError> {
        let fake = self.forward()?;
        let batch = self.batch.take().ok_or(TrainError::MissingInputs)?;

        let loss = match batch.attention {
            Some(attention) => self
                .criterion
                .forward_weighted(fake, batch.target, attention),
            None => self.criterion.forward(fake, batch.target),
        };
        let loss_value = loss.clone().into_scalar().elem::<f32>();

        let grads = GradientsParams::from_grads(loss.backward(), &self.generator);
        self.generator = self
            .optimizer
            .step(self.lr, self.generator.clone(), grads);

        log::debug!("reconstruction step: R {loss_value:.5}");
        Ok(StepReport {
            losses: vec![("R", loss_value)],
            phases: vec![Phase::Generator],
        })
    }

    fn save_model(&self, epoch: usize) -> Result<PathBuf, CheckpointError> {
        save_generator(&self.generator, &self.checkpoints_dir, epoch)
    }

    fn load_model(&mut self, epoch: usize) -> Result<(), CheckpointError> {
        self.generator = load_generator(
            self.generator.clone(),
            &self.checkpoints_dir,
            epoch,
            &self.device,
        )?;
        Ok(())
    }

    fn generator(&self) -> &Generator<B> {
        &self.generator
    }
}
