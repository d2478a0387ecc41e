use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::*;
use burn::tensor::module::max_pool2d_with_indices;

use super::{check_levels, level_channels, CONVS_PER_LEVEL, IMAGE_CHANNELS};
use crate::error::ModelError;

/// Configuration to create an [Encoder] using the [init function](EncoderConfig::init).
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// Number of VGG16 blocks to stack, in `1..=5`.
    #[config(default = 5)]
    pub levels: usize,
    /// Channels of the first block; VGG16 uses 64.
    #[config(default = 64)]
    pub width: usize,
}

/// One VGG16 block: 3x3 convolutions each followed by a ReLU.
#[derive(Module, Debug)]
pub struct EncoderLevel<B: Backend> {
    pub(crate) convs: Vec<Conv2d<B>>,
    activation: Relu,
}

/// VGG16 convolutional feature extractor.
///
/// Every level records its pre-pool activation, then halves the resolution with a 2x2 max pool.
/// The output of the last pool is the bottleneck code `z`.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub(crate) levels: Vec<EncoderLevel<B>>,
    pool: MaxPool2d,
}

/// Activation recorded at one encoder level.
#[derive(Debug, Clone)]
pub struct PyramidLevel<B: Backend> {
    /// Pre-pool activation, used as the decoder skip input.
    pub activation: Tensor<B, 4>,
    /// Flattened argmax positions of the pool, only kept by the unpool pass.
    pub indices: Option<Tensor<B, 4, Int>>,
}

/// Encoder output handed to the decoder.
#[derive(Debug, Clone)]
pub struct FeaturePyramid<B: Backend> {
    /// Per-level activations, shallowest (`conv1`) first.
    pub levels: Vec<PyramidLevel<B>>,
    /// Bottleneck code.
    pub z: Tensor<B, 4>,
}

impl<B: Backend> FeaturePyramid<B> {
    /// Number of spatial levels (excluding `z`).
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the pyramid has no spatial level.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Activation recorded at `level` (1-based).
    pub fn level(&self, level: usize) -> Option<&Tensor<B, 4>> {
        level
            .checked_sub(1)
            .and_then(|index| self.levels.get(index))
            .map(|entry| &entry.activation)
    }

    /// Names of the recorded entries, `conv1..convN` followed by `z`.
    pub fn names(&self) -> Vec<String> {
        (1..=self.levels.len())
            .map(|level| format!("conv{level}"))
            .chain(std::iter::once("z".to_string()))
            .collect()
    }
}

impl EncoderConfig {
    /// Initialize a new [encoder](Encoder) module with random weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Encoder<B>, ModelError> {
        check_levels(self.levels)?;

        let mut levels = Vec::with_capacity(self.levels);
        let mut channels_in = IMAGE_CHANNELS;

        for level in 1..=self.levels {
            let channels_out = level_channels(level, self.width);
            let mut convs = Vec::with_capacity(CONVS_PER_LEVEL[level - 1]);

            for _ in 0..CONVS_PER_LEVEL[level - 1] {
                convs.push(conv3x3(channels_in, channels_out, device));
                channels_in = channels_out;
            }

            levels.push(EncoderLevel {
                convs,
                activation: Relu::new(),
            });
        }

        Ok(Encoder {
            levels,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        })
    }
}

impl<B: Backend> EncoderLevel<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.convs
            .iter()
            .fold(input, |x, conv| self.activation.forward(conv.forward(x)))
    }
}

impl<B: Backend> Encoder<B> {
    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Encoder pass for the unpool decoder: keeps the pooling indices of every level.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, 3, height, width]`, both sides divisible by `2^levels`
    pub fn forward_unpool(&self, input: Tensor<B, 4>) -> Result<FeaturePyramid<B>, ModelError> {
        self.forward_pyramid(input, true)
    }

    /// Encoder pass for the deconv decoder: plain max pooling, no indices.
    pub fn forward_deconv(&self, input: Tensor<B, 4>) -> Result<FeaturePyramid<B>, ModelError> {
        self.forward_pyramid(input, false)
    }

    fn forward_pyramid(
        &self,
        input: Tensor<B, 4>,
        keep_indices: bool,
    ) -> Result<FeaturePyramid<B>, ModelError> {
        let [_, _, height, width] = input.dims();
        let factor = 1 << self.levels.len();
        if height % factor != 0 || width % factor != 0 {
            return Err(ModelError::IndivisibleInput {
                height,
                width,
                levels: self.levels.len(),
            });
        }

        let mut x = input;
        let mut levels = Vec::with_capacity(self.levels.len());

        for level in self.levels.iter() {
            let activation = level.forward(x);

            let (pooled, indices) = if keep_indices {
                let (pooled, indices) =
                    max_pool2d_with_indices(activation.clone(), [2, 2], [2, 2], [0, 0], [1, 1]);
                (pooled, Some(indices))
            } else {
                (self.pool.forward(activation.clone()), None)
            };

            levels.push(PyramidLevel {
                activation,
                indices,
            });
            x = pooled;
        }

        Ok(FeaturePyramid { levels, z: x })
    }
}

pub(crate) fn conv3x3<B: Backend>(
    channels_in: usize,
    channels_out: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([channels_in, channels_out], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;
    use burn::tensor::Distribution;

    #[test]
    fn pyramid_has_one_entry_per_level_plus_z() {
        let device = Default::default();

        for levels in 1..=5 {
            let encoder = EncoderConfig::new()
                .with_levels(levels)
                .with_width(4)
                .init::<TestBackend>(&device)
                .unwrap();
            let input = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);

            let pyramid = encoder.forward_unpool(input.clone()).unwrap();
            assert_eq!(pyramid.len(), levels);
            assert_eq!(pyramid.names().len(), levels + 1);
            assert_eq!(pyramid.names().last().unwrap(), "z");
            assert!(pyramid.levels.iter().all(|level| level.indices.is_some()));

            let side = 32 >> levels;
            let channels = level_channels(levels, 4);
            assert_eq!(pyramid.z.dims(), [1, channels, side, side]);

            let pyramid = encoder.forward_deconv(input).unwrap();
            assert_eq!(pyramid.len(), levels);
            assert!(pyramid.levels.iter().all(|level| level.indices.is_none()));
        }
    }

    #[test]
    fn skip_activations_keep_the_pre_pool_resolution() {
        let device = Default::default();
        let encoder = EncoderConfig::new()
            .with_width(4)
            .init::<TestBackend>(&device)
            .unwrap();
        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 64], &device);

        let pyramid = encoder.forward_deconv(input).unwrap();

        for level in 1..=5 {
            let side = 64 >> (level - 1);
            assert_eq!(
                pyramid.level(level).unwrap().dims(),
                [2, level_channels(level, 4), side, side]
            );
        }
        assert!(pyramid.level(0).is_none());
        assert!(pyramid.level(6).is_none());
    }

    #[test]
    fn rejects_invalid_levels_and_sizes() {
        let device = Default::default();
        assert!(matches!(
            EncoderConfig::new().with_levels(0).init::<TestBackend>(&device),
            Err(ModelError::InvalidLevels(0))
        ));

        let encoder = EncoderConfig::new()
            .with_levels(3)
            .with_width(2)
            .init::<TestBackend>(&device)
            .unwrap();
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 20, 20], &device);
        assert!(matches!(
            encoder.forward_unpool(input),
            Err(ModelError::IndivisibleInput { levels: 3, .. })
        ));
    }
}
