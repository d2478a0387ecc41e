use burn::module::Ignored;
use burn::nn::conv::{Conv2d, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::Relu;
use burn::prelude::*;
use burn::tensor::module::adaptive_avg_pool2d;
use burn::tensor::BasicOps;

use super::encoder::conv3x3;
use super::{
    check_levels, level_channels, FeaturePyramid, OutputActivation, PyramidLevel, Upsample,
    CONVS_PER_LEVEL, IMAGE_CHANNELS,
};
use crate::error::ModelError;

/// Configuration to create a [Decoder] using the [init function](DecoderConfig::init).
#[derive(Config, Debug)]
pub struct DecoderConfig {
    /// Must equal the depth of the encoder feeding this decoder.
    #[config(default = 5)]
    pub levels: usize,
    /// Channels of the shallowest level; VGG16 uses 64.
    #[config(default = 64)]
    pub width: usize,
    /// Upsampling strategy.
    #[config(default = "Upsample::Deconv")]
    pub upsample: Upsample,
    /// Activation applied to the reconstructed image.
    #[config(default = "OutputActivation::Tanh")]
    pub out_act: OutputActivation,
    /// Gate skip connections with the attention map.
    #[config(default = true)]
    pub skip_attention: bool,
}

/// Mirror of one encoder level: upsample, fuse the skip activation, then convolve.
#[derive(Module, Debug)]
pub struct DecoderLevel<B: Backend> {
    deconv: Option<ConvTranspose2d<B>>,
    convs: Vec<Conv2d<B>>,
    activation: Relu,
}

/// Reconstructs an image from a [feature pyramid](FeaturePyramid).
///
/// Levels are walked deepest first. At every level the features are upsampled to the resolution
/// of the matching encoder activation, that activation is added (gated by the attention map when
/// `skip_attention` is set) and the mirrored convolutions are applied. A final 3x3 convolution
/// maps back to RGB followed by the output activation.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    levels: Vec<DecoderLevel<B>>,
    output: Conv2d<B>,
    out_act: Ignored<OutputActivation>,
    skip_attention: bool,
}

impl DecoderConfig {
    /// Initialize a new [decoder](Decoder) module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Decoder<B>, ModelError> {
        check_levels(self.levels)?;

        let levels = (1..=self.levels)
            .map(|level| {
                let channels = level_channels(level, self.width);
                let channels_out = if level == 1 {
                    channels
                } else {
                    level_channels(level - 1, self.width)
                };
                let num_convs = CONVS_PER_LEVEL[level - 1];

                let deconv = match self.upsample {
                    Upsample::Deconv => Some(
                        ConvTranspose2dConfig::new([channels, channels], [2, 2])
                            .with_stride([2, 2])
                            .init(device),
                    ),
                    Upsample::Unpool => None,
                };

                let convs = (0..num_convs)
                    .map(|index| {
                        let target = if index + 1 == num_convs {
                            channels_out
                        } else {
                            channels
                        };
                        conv3x3(channels, target, device)
                    })
                    .collect();

                DecoderLevel {
                    deconv,
                    convs,
                    activation: Relu::new(),
                }
            })
            .collect();

        Ok(Decoder {
            levels,
            output: conv3x3(self.width, IMAGE_CHANNELS, device),
            out_act: Ignored(self.out_act),
            skip_attention: self.skip_attention,
        })
    }
}

impl<B: Backend> DecoderLevel<B> {
    fn upsample(
        &self,
        x: Tensor<B, 4>,
        indices: Option<Tensor<B, 4, Int>>,
        size: [usize; 2],
        level: usize,
    ) -> Result<Tensor<B, 4>, ModelError> {
        match &self.deconv {
            Some(deconv) => Ok(deconv.forward(x)),
            None => {
                let indices = indices.ok_or(ModelError::MissingIndices(level))?;
                Ok(max_unpool2d(x, indices, size))
            }
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.convs
            .iter()
            .fold(input, |x, conv| self.activation.forward(conv.forward(x)))
    }
}

impl<B: Backend> Decoder<B> {
    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Upsampling strategy the decoder was built with.
    pub fn upsample(&self) -> Upsample {
        match self.levels.first().and_then(|level| level.deconv.as_ref()) {
            Some(_) => Upsample::Deconv,
            None => Upsample::Unpool,
        }
    }

    /// Reconstruct an image from the pyramid.
    ///
    /// # Shapes
    ///
    /// - attention: `[batch_size, 1, height, width]` at input resolution
    /// - output: `[batch_size, 3, height, width]`
    pub fn forward(
        &self,
        pyramid: FeaturePyramid<B>,
        attention: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>, ModelError> {
        let FeaturePyramid { mut levels, z } = pyramid;
        if levels.len() != self.levels.len() {
            return Err(ModelError::InvalidLevels(levels.len()));
        }

        let mut x = z;
        for (index, level) in self.levels.iter().enumerate().rev() {
            let PyramidLevel {
                activation: skip,
                indices,
            } = levels.pop().ok_or(ModelError::InvalidLevels(index + 1))?;
            let [_, _, height, width] = skip.dims();

            x = level.upsample(x, indices, [height, width], index + 1)?;

            let skip = if self.skip_attention {
                skip * adaptive_avg_pool2d(attention.clone(), [height, width])
            } else {
                skip
            };
            x = level.forward(x + skip);
        }

        Ok(self.out_act.0.forward(self.output.forward(x)))
    }
}

/// Inverse of a 2D max pool: every value is written back at the position its pool window
/// selected, all other positions are zero.
///
/// Values and indices are repeated over their pool window and kept where the index matches the
/// flattened output position, so the gradient reaches only the selected maxima.
///
/// # Shapes
///
/// - input: `[batch_size, channels, height, width]`
/// - indices: `[batch_size, channels, height, width]`, flattened positions in the output plane
/// - output: `[batch_size, channels, size[0], size[1]]`, a multiple of the input size
pub fn max_unpool2d<B: Backend>(
    input: Tensor<B, 4>,
    indices: Tensor<B, 4, Int>,
    size: [usize; 2],
) -> Tensor<B, 4> {
    let [batch_size, channels, height, width] = input.dims();
    let [out_height, out_width] = size;
    let window = [out_height / height.max(1), out_width / width.max(1)];
    let device = input.device();

    let positions = Tensor::<B, 1, Int>::arange(0..(out_height * out_width) as i64, &device)
        .reshape([1, 1, out_height, out_width])
        .repeat_dim(0, batch_size)
        .repeat_dim(1, channels);
    let mask = repeat_window(indices, window).equal(positions).float();

    repeat_window(input, window) * mask
}

/// Nearest-neighbour upsampling by an integer factor per spatial dimension.
fn repeat_window<B: Backend, K: BasicOps<B>>(
    tensor: Tensor<B, 4, K>,
    window: [usize; 2],
) -> Tensor<B, 4, K> {
    let [batch_size, channels, height, width] = tensor.dims();
    let [window_height, window_width] = window;

    tensor
        .unsqueeze_dim::<5>(3)
        .repeat_dim(3, window_height)
        .reshape([batch_size, channels, height * window_height, width])
        .unsqueeze_dim::<5>(4)
        .repeat_dim(4, window_width)
        .reshape([
            batch_size,
            channels,
            height * window_height,
            width * window_width,
        ])
}
