use std::path::Path;

use burn::module::Ignored;
use burn::prelude::*;

use super::{
    transfer_backbone, DecoderConfig, Decoder, Encoder, EncoderConfig, OutputActivation, Upsample,
    Vgg16Features,
};
use crate::error::{ModelError, TransferError};

/// Configuration to create a [Generator] using the [init function](GeneratorConfig::init).
#[derive(Config, Debug)]
pub struct GeneratorConfig {
    /// Depth shared by the encoder and the decoder, in `1..=5`.
    #[config(default = 5)]
    pub levels: usize,
    /// Channels of the first VGG16 block; pretrained weights require 64.
    #[config(default = 64)]
    pub width: usize,
    /// Upsampling strategy of the decoder.
    #[config(default = "Upsample::Deconv")]
    pub upsample: Upsample,
    /// Activation applied to the reconstructed image.
    #[config(default = "OutputActivation::Tanh")]
    pub out_act: OutputActivation,
    /// Gate the decoder skip connections with the channel mean of the input.
    #[config(default = true)]
    pub skip_attention: bool,
}

/// Encoder-decoder image translator.
///
/// The upsampling strategy is fixed at construction: the unpool generator runs the encoder
/// pass that keeps pooling indices and feeds them to the decoder, the deconv generator doesn't.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    pub(crate) encoder: Encoder<B>,
    pub(crate) decoder: Decoder<B>,
    upsample: Ignored<Upsample>,
}

impl GeneratorConfig {
    /// Initialize a new [generator](Generator) with random weights.
    ///
    /// Encoder and decoder are always built with the same depth.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Generator<B>, ModelError> {
        let encoder = EncoderConfig::new()
            .with_levels(self.levels)
            .with_width(self.width)
            .init(device)?;
        let decoder = DecoderConfig::new()
            .with_levels(self.levels)
            .with_width(self.width)
            .with_upsample(self.upsample)
            .with_out_act(self.out_act)
            .with_skip_attention(self.skip_attention)
            .init(device)?;

        Ok(Generator {
            encoder,
            decoder,
            upsample: Ignored(self.upsample),
        })
    }
}

impl<B: Backend> Generator<B> {
    /// Number of encoder (and decoder) levels.
    pub fn levels(&self) -> usize {
        self.encoder.num_levels()
    }

    /// Upsampling strategy.
    pub fn upsample(&self) -> Upsample {
        self.upsample.0
    }

    /// Translate a batch of images, returning the bottleneck code and the reconstruction.
    ///
    /// # Shapes
    ///
    /// - input: `[batch_size, 3, height, width]`
    /// - z: `[batch_size, channels, height / 2^levels, width / 2^levels]`
    /// - output: `[batch_size, 3, height, width]`
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Result<(Tensor<B, 4>, Tensor<B, 4>), ModelError> {
        let attention = input.clone().mean_dim(1);

        let pyramid = match self.upsample.0 {
            Upsample::Unpool => self.encoder.forward_unpool(input)?,
            Upsample::Deconv => self.encoder.forward_deconv(input)?,
        };
        let z = pyramid.z.clone();
        let output = self.decoder.forward(pyramid, attention)?;

        Ok((z, output))
    }

    /// Returns a generator whose encoder levels up to the configured depth carry the VGG16
    /// backbone weights. When `freeze` is set the copied parameters stop requiring gradients.
    pub fn with_backbone(
        self,
        backbone: &Vgg16Features<B>,
        freeze: bool,
    ) -> Result<Self, TransferError> {
        let levels = self.levels();
        let encoder = transfer_backbone(self.encoder, backbone, levels, freeze)?;

        Ok(Self { encoder, ..self })
    }

    /// Load the torchvision VGG16 state dict at `path` and transfer it into the encoder.
    pub fn set_vgg_as_encoder(
        self,
        path: &Path,
        freeze: bool,
        device: &B::Device,
    ) -> Result<Self, TransferError> {
        let backbone = Vgg16Features::load(path, device)?;
        self.with_backbone(&backbone, freeze)
    }
}
