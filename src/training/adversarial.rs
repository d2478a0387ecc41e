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
use crate::loss::{GanLoss, GanLossConfig, GanTarget, ReconstructionLoss};
use crate::model::{set_requires_grad, Discriminator, Generator};

/// Encoder-decoder trained against a patch discriminator (`advModel`).
///
/// Each [optimize_parameters](TranslationModel::optimize_parameters) call runs one generator
/// forward pass, then updates the discriminator, then the generator. The generator step scores
/// the reconstruction of that same forward pass with the freshly updated discriminator.
pub struct AdversarialModel<B: AutodiffBackend> {
    generator: Generator<B>,
    discriminator: Discriminator<B>,
    optimizer_gen: OptimizerAdaptor<Adam, Generator<B>, B>,
    optimizer_dis: OptimizerAdaptor<Adam, Discriminator<B>, B>,
    criterion: ReconstructionLoss,
    criterion_gan: GanLoss,
    attention_gen: bool,
    lambda_gan: f32,
    lr_gen: f64,
    lr_dis: f64,
    checkpoints_dir: PathBuf,
    device: B::Device,
    batch: Option<BoundBatch<B>>,
}

impl<B: AutodiffBackend> AdversarialModel<B> {
    /// Build both networks and their optimizers.
    pub fn new(config: &TrainingConfig, device: &B::Device) -> Result<Self, TrainError> {
        let generator = config.init_generator(device)?;
        let discriminator = config.discriminator.init(device);

        Ok(Self {
            generator,
            discriminator,
            optimizer_gen: config.optimizer().init(),
            optimizer_dis: config.optimizer().init(),
            criterion: config.reconstruction_loss,
            criterion_gan: GanLossConfig::new().init(),
            attention_gen: config.attention_gen,
            lambda_gan: config.lambda_gan,
            lr_gen: config.lr1,
            lr_dis: config.lr2,
            checkpoints_dir: config.checkpoints_path(),
            device: device.clone(),
            batch: None,
        })
    }

    /// The discriminator being trained.
    pub fn discriminator(&self) -> &Discriminator<B> {
        &self.discriminator
    }
}

impl<B: AutodiffBackend> TranslationModel<B> for AdversarialModel<B> {
    fn set_inputs(&mut self, input: Tensor<B, 4>, target: Tensor<B, 4>) {
        let with_attention = self.attention_gen || self.discriminator.uses_attention();
        self.batch = Some(BoundBatch::new(input, target, with_attention));
    }

    fn forward(&mut self) -> Result<Tensor<B, 4>, TrainError> {
        let batch = self.batch.as_ref().ok_or(TrainError::MissingInputs)?;
        let (_, fake) = self.generator.forward(batch.input.clone())?;

        Ok(fake)
    }

    fn optimize_parameters(&mut self) -> Result<StepReport, TrainError> {
        let fake = self.forward()?;
        let batch = self.batch.take().ok_or(TrainError::MissingInputs)?;
        let attention_dis = if self.discriminator.uses_attention() {
            batch.attention.clone()
        } else {
            None
        };
        let mut phases = Vec::with_capacity(2);

        // Discriminator: no gradient flows back into the generator.
        let discriminator = set_requires_grad(self.discriminator.clone(), true);
        let score_fake = discriminator.forward(fake.clone().detach(), attention_dis.clone())?;
        let score_real = discriminator.forward(batch.target.clone(), attention_dis.clone())?;
        let loss_dis_fake = self.criterion_gan.forward(score_fake, GanTarget::Fake);
        let loss_dis_real = self.criterion_gan.forward(score_real, GanTarget::Real);
        let loss_dis = (loss_dis_fake.clone() + loss_dis_real.clone()).mul_scalar(self.lambda_gan);

        let grads = GradientsParams::from_grads(loss_dis.backward(), &discriminator);
        let discriminator = self.optimizer_dis.step(self.lr_dis, discriminator, grads);
        phases.push(Phase::Discriminator);

        // Generator: the discriminator is only a fixed critic here.
        let discriminator = set_requires_grad(discriminator, false);
        let loss_r = match (self.attention_gen, batch.attention) {
            (true, Some(attention)) => {
                self.criterion
                    .forward_weighted(fake.clone(), batch.target, attention)
            }
            _ => self.criterion.forward(fake.clone(), batch.target),
        };
        let score = discriminator.forward(fake, attention_dis)?;
        let loss_gan = self.criterion_gan.forward(score, GanTarget::Real);
        let loss_gen = loss_r.clone() + loss_gan.clone().mul_scalar(self.lambda_gan);

        let grads = GradientsParams::from_grads(loss_gen.backward(), &self.generator);
        self.generator = self
            .optimizer_gen
            .step(self.lr_gen, self.generator.clone(), grads);
        self.discriminator = discriminator;
        phases.push(Phase::Generator);

        let report = StepReport {
            losses: vec![
                ("R", loss_r.into_scalar().elem::<f32>()),
                ("G_GAN", loss_gan.into_scalar().elem::<f32>()),
                ("D_real", loss_dis_real.into_scalar().elem::<f32>()),
                ("D_fake", loss_dis_fake.into_scalar().elem::<f32>()),
            ],
            phases,
        };
        log::debug!("adversarial step: {:?}", report.losses);

        Ok(report)
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
