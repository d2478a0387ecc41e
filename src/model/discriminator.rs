use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, LeakyRelu, LeakyReluConfig, PaddingConfig2d};
use burn::prelude::*;

use super::IMAGE_CHANNELS;
use crate::error::ModelError;

/// Configuration to create a [Discriminator] using the [init function](DiscriminatorConfig::init).
///
/// The defaults build the adversarial model's critic: five stride-2 blocks and the scoring
/// convolution, 64 to 1024 channels.
#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    /// Channels of the first block, doubled by every following block.
    #[config(default = 64)]
    pub init_channels: usize,
    /// Square kernel size of every convolution.
    #[config(default = 3)]
    pub kernel_size: usize,
    /// Number of stride-2 blocks.
    #[config(default = 5)]
    pub down_levels: usize,
    /// Total depth: `deep - down_levels - 1` stride-1 blocks follow the stride-2 ones.
    #[config(default = 6)]
    pub deep: usize,
    /// Multiply the input by an attention map before scoring it.
    #[config(default = false)]
    pub attention: bool,
    /// Negative slope of the leaky ReLUs.
    #[config(default = 0.01)]
    pub negative_slope: f64,
}

/// conv, batch norm (absent on the input block), leaky ReLU.
#[derive(Module, Debug)]
pub struct DiscriminatorBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B, 2>>,
    activation: LeakyRelu,
}

/// Patch discriminator: scores every receptive field of an image as real or fake.
///
/// The output keeps spatial dimensions, one logit per patch.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    blocks: Vec<DiscriminatorBlock<B>>,
    score: Conv2d<B>,
    attention: bool,
}

impl DiscriminatorConfig {
    /// Initialize a new [discriminator](Discriminator) module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let padding = self.padding();
        let num_flat = self.deep.saturating_sub(self.down_levels + 1);
        let strides = std::iter::repeat(2)
            .take(self.down_levels)
            .chain(std::iter::repeat(1).take(num_flat));

        let mut blocks = Vec::with_capacity(self.down_levels + num_flat);
        let mut channels_in = IMAGE_CHANNELS;
        let mut channels_out = self.init_channels;

        for (index, stride) in strides.enumerate() {
            let conv = Conv2dConfig::new([channels_in, channels_out], [self.kernel_size; 2])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .init(device);
            // The input block sees raw pixels and is left unnormalized.
            let norm = (index > 0).then(|| BatchNormConfig::new(channels_out).init(device));

            blocks.push(DiscriminatorBlock {
                conv,
                norm,
                activation: LeakyReluConfig::new()
                    .with_negative_slope(self.negative_slope)
                    .init(),
            });

            channels_in = channels_out;
            channels_out *= 2;
        }

        let score = Conv2dConfig::new([channels_in, 1], [self.kernel_size; 2])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init(device);

        Discriminator {
            blocks,
            score,
            attention: self.attention,
        }
    }

    fn padding(&self) -> usize {
        if self.kernel_size % 2 == 0 {
            (self.kernel_size / 2).saturating_sub(1)
        } else {
            (self.kernel_size - 1) / 2
        }
    }
}

impl<B: Backend> DiscriminatorBlock<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        self.activation.forward(x)
    }
}

impl<B: Backend> Discriminator<B> {
    /// Whether the discriminator expects an attention map.
    pub fn uses_attention(&self) -> bool {
        self.attention
    }

    /// Number of conv/norm/activation blocks before the scoring convolution.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Score an image batch.
    ///
    /// An attention map must be supplied exactly when the discriminator was built with
    /// attention.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, 3, height, width]`
    /// - attention: `[batch_size, 1, height, width]`
    /// - output: `[batch_size, 1, height / 2^down_levels, width / 2^down_levels]`
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        attention: Option<Tensor<B, 4>>,
    ) -> Result<Tensor<B, 4>, ModelError> {
        let input = match (self.attention, attention) {
            (true, Some(attention)) => input * attention,
            (false, None) => input,
            (expected, _) => return Err(ModelError::AttentionMismatch { expected }),
        };

        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));

        Ok(self.score.forward(x))
    }
}
