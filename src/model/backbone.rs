use std::path::Path;

use burn::module::Param;
use burn::nn::conv::Conv2d;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use super::encoder::conv3x3;
use super::{Encoder, IMAGE_CHANNELS};
use crate::error::TransferError;

/// Where a backbone convolution lands in the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackboneLink {
    /// Index of the convolution in torchvision's `vgg16().features`.
    pub index: usize,
    /// Encoder level (1-based).
    pub level: usize,
    /// Convolution position inside the level (1-based).
    pub position: usize,
}

const fn link(index: usize, level: usize, position: usize) -> BackboneLink {
    BackboneLink {
        index,
        level,
        position,
    }
}

/// Source to target mapping of the 13 VGG16 convolutions. The gaps in `index` are the ReLU and
/// max-pool entries of the torchvision `features` list.
pub const BACKBONE_TABLE: [BackboneLink; 13] = [
    link(0, 1, 1),
    link(2, 1, 2),
    link(5, 2, 1),
    link(7, 2, 2),
    link(10, 3, 1),
    link(12, 3, 2),
    link(14, 3, 3),
    link(17, 4, 1),
    link(19, 4, 2),
    link(21, 4, 3),
    link(24, 5, 1),
    link(26, 5, 2),
    link(28, 5, 3),
];

/// Convolutional stage of VGG16, with fields named after their torchvision `features` index so
/// a PyTorch state dict maps onto it with a single key remap.
#[derive(Module, Debug)]
pub struct Vgg16Features<B: Backend> {
    conv0: Conv2d<B>,
    conv2: Conv2d<B>,
    conv5: Conv2d<B>,
    conv7: Conv2d<B>,
    conv10: Conv2d<B>,
    conv12: Conv2d<B>,
    conv14: Conv2d<B>,
    conv17: Conv2d<B>,
    conv19: Conv2d<B>,
    conv21: Conv2d<B>,
    conv24: Conv2d<B>,
    conv26: Conv2d<B>,
    conv28: Conv2d<B>,
}

impl<B: Backend> Vgg16Features<B> {
    /// Randomly initialized backbone, used as the target of a loaded record.
    pub fn init(device: &B::Device) -> Self {
        Self {
            conv0: conv3x3(IMAGE_CHANNELS, 64, device),
            conv2: conv3x3(64, 64, device),
            conv5: conv3x3(64, 128, device),
            conv7: conv3x3(128, 128, device),
            conv10: conv3x3(128, 256, device),
            conv12: conv3x3(256, 256, device),
            conv14: conv3x3(256, 256, device),
            conv17: conv3x3(256, 512, device),
            conv19: conv3x3(512, 512, device),
            conv21: conv3x3(512, 512, device),
            conv24: conv3x3(512, 512, device),
            conv26: conv3x3(512, 512, device),
            conv28: conv3x3(512, 512, device),
        }
    }

    /// Load the pretrained weights from a torchvision VGG16 state dict (`.pth`).
    pub fn load(path: &Path, device: &B::Device) -> Result<Self, TransferError> {
        let args = LoadArgs::new(path.to_path_buf())
            .with_key_remap(r"^features\.([0-9]+)\.(weight|bias)$", "conv$1.$2");
        let record: Vgg16FeaturesRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(args, device)
            .map_err(|source| TransferError::Load {
                path: path.to_path_buf(),
                source,
            })?;

        log::info!("Loaded VGG16 backbone from {}", path.display());
        Ok(Self::init(device).load_record(record))
    }

    /// Convolution stored at a torchvision `features` index.
    pub fn layer(&self, index: usize) -> Option<&Conv2d<B>> {
        match index {
            0 => Some(&self.conv0),
            2 => Some(&self.conv2),
            5 => Some(&self.conv5),
            7 => Some(&self.conv7),
            10 => Some(&self.conv10),
            12 => Some(&self.conv12),
            14 => Some(&self.conv14),
            17 => Some(&self.conv17),
            19 => Some(&self.conv19),
            21 => Some(&self.conv21),
            24 => Some(&self.conv24),
            26 => Some(&self.conv26),
            28 => Some(&self.conv28),
            _ => None,
        }
    }
}

/// Copy the backbone into the first `levels` encoder levels and return the new encoder.
///
/// Levels deeper than `levels` keep their current weights. Copied parameters get fresh values
/// but keep their parameter ids; with `freeze` they no longer require gradients.
pub fn transfer_backbone<B: Backend>(
    mut encoder: Encoder<B>,
    backbone: &Vgg16Features<B>,
    levels: usize,
    freeze: bool,
) -> Result<Encoder<B>, TransferError> {
    let depth = levels.min(encoder.num_levels());

    for link in BACKBONE_TABLE.iter().filter(|link| link.level <= depth) {
        let source = backbone
            .layer(link.index)
            .ok_or(TransferError::MissingLayer(link.index))?;
        let target = &mut encoder.levels[link.level - 1].convs[link.position - 1];

        let source_shape = source.weight.val().dims().to_vec();
        let target_shape = target.weight.val().dims().to_vec();
        if source_shape != target_shape {
            return Err(TransferError::ShapeMismatch {
                index: link.index,
                level: link.level,
                position: link.position,
                source_shape,
                target_shape,
            });
        }

        target.weight = copy_param(&target.weight, source.weight.val(), freeze);
        if let (Some(bias), Some(source_bias)) = (target.bias.as_ref(), source.bias.as_ref()) {
            target.bias = Some(copy_param(bias, source_bias.val(), freeze));
        }

        log::debug!(
            "backbone features.{} -> conv{}_{}",
            link.index,
            link.level,
            link.position
        );
    }

    log::info!(
        "Transferred VGG16 weights into {depth} encoder level(s){}",
        if freeze { ", frozen" } else { "" }
    );
    Ok(encoder)
}

fn copy_param<B: Backend, const D: usize>(
    target: &Param<Tensor<B, D>>,
    value: Tensor<B, D>,
    freeze: bool,
) -> Param<Tensor<B, D>> {
    let value = if freeze {
        value.detach().set_require_grad(false)
    } else {
        value.detach().require_grad()
    };
    Param::initialized(target.id, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{requires_grad_flags, EncoderConfig};
    use crate::{TestAutodiffBackend, TestBackend};

    fn weights<B: Backend>(conv: &Conv2d<B>) -> Vec<f32> {
        conv.weight.val().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn table_covers_every_encoder_convolution() {
        for (level, count) in crate::model::CONVS_PER_LEVEL.iter().enumerate() {
            let links = BACKBONE_TABLE
                .iter()
                .filter(|link| link.level == level + 1)
                .count();
            assert_eq!(links, *count);
        }
    }

    #[test]
    fn transfer_is_conditional_per_level() {
        let device = Default::default();
        let backbone = Vgg16Features::<TestBackend>::init(&device);
        let encoder = EncoderConfig::new().init::<TestBackend>(&device).unwrap();
        let untouched = weights(&encoder.levels[2].convs[0]);

        let encoder = transfer_backbone(encoder, &backbone, 2, false).unwrap();

        assert_eq!(weights(&encoder.levels[0].convs[0]), weights(&backbone.conv0));
        assert_eq!(weights(&encoder.levels[0].convs[1]), weights(&backbone.conv2));
        assert_eq!(weights(&encoder.levels[1].convs[0]), weights(&backbone.conv5));
        assert_eq!(weights(&encoder.levels[1].convs[1]), weights(&backbone.conv7));
        assert_eq!(weights(&encoder.levels[2].convs[0]), untouched);
        assert_ne!(weights(&encoder.levels[2].convs[0]), weights(&backbone.conv10));
    }

    #[test]
    fn transfer_rejects_narrow_encoders() {
        let device = Default::default();
        let backbone = Vgg16Features::<TestBackend>::init(&device);
        let encoder = EncoderConfig::new()
            .with_levels(1)
            .with_width(8)
            .init::<TestBackend>(&device)
            .unwrap();

        let result = transfer_backbone(encoder, &backbone, 1, false);

        assert!(matches!(
            result,
            Err(TransferError::ShapeMismatch {
                index: 0,
                level: 1,
                position: 1,
                ..
            })
        ));
    }

    #[test]
    fn frozen_transfer_stops_gradients() {
        let device = Default::default();
        let backbone = Vgg16Features::<TestAutodiffBackend>::init(&device);
        let encoder = EncoderConfig::new()
            .with_levels(2)
            .init::<TestAutodiffBackend>(&device)
            .unwrap();

        let encoder = transfer_backbone(encoder, &backbone, 1, true).unwrap();

        let level1 = requires_grad_flags(&encoder.levels[0]);
        let level2 = requires_grad_flags(&encoder.levels[1]);
        assert!(level1.iter().all(|flag| !flag));
        assert!(level2.iter().all(|flag| *flag));
    }
}
