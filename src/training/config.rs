use std::path::{Path, PathBuf};

use burn::optim::AdamConfig;
use burn::prelude::*;

use super::ModelKind;
use crate::data::Direction;
use crate::error::{CheckpointError, TrainError};
use crate::loss::ReconstructionLoss;
use crate::model::{DiscriminatorConfig, Generator, GeneratorConfig};

/// Name of the run configuration inside the checkpoints directory.
pub const CONFIG_FILE: &str = "config.json";

/// Run configuration, saved next to the checkpoints.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Orchestrator.
    #[config(default = "ModelKind::AdvModel")]
    pub model: ModelKind,
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
    #[config(default = "ReconstructionLoss::Cauchy")]
    pub reconstruction_loss: ReconstructionLoss,
    /// Weight the reconstruction loss with the ambient/flash attention map (`VGG_ED`).
    #[config(default = false)]
    pub attention: bool,
    /// Weight the reconstruction loss with the attention map (`advModel`). The discriminator
    /// gate is `discriminator.attention`.
    #[config(default = false)]
    pub attention_gen: bool,
    /// Keep the transferred VGG16 weights fixed.
    #[config(default = false)]
    pub vgg_freezed: bool,
    /// Generator learning rate.
    #[config(default = 1e-4)]
    pub lr1: f64,
    /// Discriminator learning rate.
    #[config(default = 1e-4)]
    pub lr2: f64,
    /// Adam first moment decay, shared by both optimizers.
    #[config(default = 0.5)]
    pub beta1: f32,
    /// Weight of the adversarial terms.
    #[config(default = 1.0)]
    pub lambda_gan: f32,
    /// Accelerator indices; the first one is used, empty means the default device.
    #[config(default = "Vec::new()")]
    pub gpu_ids: Vec<usize>,
    #[config(default = "String::from(\"checkpoints\")")]
    pub checkpoints_dir: String,
    /// torchvision VGG16 state dict copied into the encoder before training.
    pub pretrained: Option<String>,
    /// Root of the dataset, holding `train/` and `test/`.
    #[config(default = "String::from(\"datasets/flash\")")]
    pub data_dir: String,
    #[config(default = "Direction::AmbientToFlash")]
    pub direction: Direction,
    /// Side of the square training crops.
    #[config(default = 256)]
    pub image_size: usize,
    #[config(default = 100)]
    pub num_epochs: usize,
    #[config(default = 4)]
    pub batch_size: usize,
    /// Data loading threads.
    #[config(default = 2)]
    pub num_workers: usize,
    /// Save a checkpoint every `checkpoint_interval` epochs.
    #[config(default = 5)]
    pub checkpoint_interval: usize,
    #[config(default = 20)]
    pub seed: u64,
}

impl TrainingConfig {
    /// Checkpoints directory as a path.
    pub fn checkpoints_path(&self) -> PathBuf {
        PathBuf::from(&self.checkpoints_dir)
    }

    /// Adam configuration shared by the generator and the discriminator.
    pub fn optimizer(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.beta1)
            .with_beta_2(0.999)
            .with_epsilon(1e-8)
    }

    /// Build the generator, with the VGG16 backbone copied into its encoder when `pretrained`
    /// is set.
    pub fn init_generator<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<Generator<B>, TrainError> {
        let generator = self.generator.init(device)?;

        match &self.pretrained {
            Some(path) => {
                let generator =
                    generator.set_vgg_as_encoder(Path::new(path), self.vgg_freezed, device)?;
                Ok(generator)
            }
            None => {
                if self.vgg_freezed {
                    log::warn!(
                        "vgg_freezed is set but no pretrained weights are given, nothing is frozen"
                    );
                }
                Ok(generator)
            }
        }
    }

    /// Write the configuration as `config.json` into the checkpoints directory.
    pub fn save_to_checkpoints(&self) -> Result<PathBuf, CheckpointError> {
        let dir = self.checkpoints_path();
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(CONFIG_FILE);
        self.save(&path)?;
        Ok(path)
    }

    /// Read the configuration saved by [save_to_checkpoints](Self::save_to_checkpoints).
    pub fn load_from_checkpoints(dir: &Path) -> Result<Self, CheckpointError> {
        let path = dir.join(CONFIG_FILE);
        Self::load(&path).map_err(|err| CheckpointError::Config(format!("{path:?}: {err}")))
    }

    pub(crate) fn log_summary(&self) {
        log::info!("Training with:");
        log::info!("    model        {:?}", self.model);
        log::info!("    loss         {:?}", self.reconstruction_loss);
        log::info!("    upsample     {:?}", self.generator.upsample);
        match self.model {
            ModelKind::VggEd => log::info!("    attention    {}", self.attention),
            ModelKind::AdvModel => {
                log::info!("    attention gen {}", self.attention_gen);
                log::info!("    attention dis {}", self.discriminator.attention);
            }
        }
        log::info!("    vgg_freezed  {}", self.vgg_freezed);
        log::info!("    out_act      {:?}", self.generator.out_act);
    }
}
