//! Training orchestrators and the epoch driver.

mod adversarial;
mod checkpoint;
mod config;
mod reconstruction;
mod run;

pub use adversarial::*;
pub use checkpoint::*;
pub use config::*;
pub use reconstruction::*;
pub use run::*;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{CheckpointError, TrainError};
use crate::model::Generator;

/// Which orchestrator drives a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum ModelKind {
    /// Plain encoder-decoder trained on the reconstruction loss only.
    #[serde(rename = "VGG_ED")]
    #[value(name = "VGG_ED")]
    VggEd,
    /// Encoder-decoder trained against a patch discriminator.
    #[serde(rename = "advModel")]
    #[value(name = "advModel")]
    AdvModel,
}

impl ModelKind {
    /// Build the orchestrator for this kind.
    pub fn init<B: AutodiffBackend>(
        &self,
        config: &TrainingConfig,
        device: &B::Device,
    ) -> Result<Box<dyn TranslationModel<B>>, TrainError> {
        Ok(match self {
            ModelKind::VggEd => Box::new(ReconstructionModel::new(config, device)?),
            ModelKind::AdvModel => Box::new(AdversarialModel::new(config, device)?),
        })
    }
}

/// Optimizer update performed during [optimize_parameters](TranslationModel::optimize_parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Discriminator step.
    Discriminator,
    /// Generator step.
    Generator,
}

/// Losses of a single step, plus the order in which the optimizers ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// `(name, value)` pairs.
    pub losses: Vec<(&'static str, f32)>,
    /// Optimizer phases, in execution order.
    pub phases: Vec<Phase>,
}

impl StepReport {
    /// Value of a named loss.
    pub fn loss(&self, name: &str) -> Option<f32> {
        self.losses
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }
}

/// A trainable image translator.
///
/// Lifecycle of a step: [set_inputs](Self::set_inputs), then
/// [optimize_parameters](Self::optimize_parameters), which runs the forward pass, the backward
/// passes and the optimizer steps and leaves the model without inputs again.
pub trait TranslationModel<B: AutodiffBackend> {
    /// Bind the current batch. `input` is translated towards `target`.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, 3, height, width]`
    /// - target: `[batch_size, 3, height, width]`
    fn set_inputs(&mut self, input: Tensor<B, 4>, target: Tensor<B, 4>);

    /// Translate the bound input, returning the reconstruction.
    fn forward(&mut self) -> Result<Tensor<B, 4>, TrainError>;

    /// Run one full optimization step on the bound batch.
    fn optimize_parameters(&mut self) -> Result<StepReport, TrainError>;

    /// Persist the generator weights for `epoch`.
    fn save_model(&self, epoch: usize) -> Result<std::path::PathBuf, CheckpointError>;

    /// Restore the generator weights saved for `epoch`.
    fn load_model(&mut self, epoch: usize) -> Result<(), CheckpointError>;

    /// The generator being trained.
    fn generator(&self) -> &Generator<B>;
}

/// Batch bound by `set_inputs`.
#[derive(Debug, Clone)]
pub(crate) struct BoundBatch<B: Backend> {
    pub input: Tensor<B, 4>,
    pub target: Tensor<B, 4>,
    pub attention: Option<Tensor<B, 4>>,
}

impl<B: Backend> BoundBatch<B> {
    pub fn new(input: Tensor<B, 4>, target: Tensor<B, 4>, with_attention: bool) -> Self {
        let attention =
            with_attention.then(|| crate::loss::attention_map(input.clone(), target.clone()));

        Self {
            input,
            target,
            attention,
        }
    }
}
