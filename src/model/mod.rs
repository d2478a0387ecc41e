//! Networks: the VGG16 encoder/decoder generator and the patch discriminator.

mod backbone;
mod decoder;
mod discriminator;
mod encoder;
mod generator;
mod params;

pub use backbone::*;
pub use decoder::*;
pub use discriminator::*;
pub use encoder::*;
pub use generator::*;
pub use params::*;

use burn::prelude::*;
use burn::tensor::activation::{sigmoid, tanh};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Deepest supported encoder/decoder configuration (the five VGG16 blocks).
pub const MAX_LEVELS: usize = 5;

/// Convolutions per level, matching the 13 convolutions of VGG16.
pub const CONVS_PER_LEVEL: [usize; MAX_LEVELS] = [2, 2, 3, 3, 3];

/// Channel multiplier of each level relative to the base width.
pub const WIDTH_MULTIPLIERS: [usize; MAX_LEVELS] = [1, 2, 4, 8, 8];

/// Number of image channels (RGB).
pub const IMAGE_CHANNELS: usize = 3;

/// How the decoder brings features back to the resolution of the previous level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Upsample {
    /// Learned stride-2 transposed convolution.
    Deconv,
    /// Max-unpooling with the indices recorded by the matching encoder pool.
    Unpool,
}

/// Activation applied to the reconstructed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    /// Raw decoder output.
    Identity,
    /// Output in `[0, 1]`.
    Sigmoid,
    /// Output in `[-1, 1]`.
    Tanh,
}

impl OutputActivation {
    /// Applies the activation.
    pub fn forward<B: Backend, const D: usize>(&self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            OutputActivation::Identity => tensor,
            OutputActivation::Sigmoid => sigmoid(tensor),
            OutputActivation::Tanh => tanh(tensor),
        }
    }

    /// Whether images are expected in `[-1, 1]` rather than `[0, 1]`.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, OutputActivation::Tanh)
    }
}

/// Channels produced by the convolutions of `level` (1-based) for a base `width`.
pub fn level_channels(level: usize, width: usize) -> usize {
    WIDTH_MULTIPLIERS[level - 1] * width
}

pub(crate) fn check_levels(levels: usize) -> Result<(), crate::error::ModelError> {
    if levels == 0 || levels > MAX_LEVELS {
        return Err(crate::error::ModelError::InvalidLevels(levels));
    }
    Ok(())
}
