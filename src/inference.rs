use std::path::{Path, PathBuf};

use burn::prelude::*;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::data::{image_to_tensor, list_with_suffix, open_rgb};
use crate::error::{DataError, InferError};
use crate::model::{Generator, OutputActivation};
use crate::training::{load_generator, TrainingConfig};

/// Suffix appended to the stem of translated images.
pub const OUTPUT_SUFFIX: &str = "_out.png";

/// Translate `input` (an image, or every input-side photograph of a directory) with the
/// generator saved for `epoch`, writing `<stem>_out.png` files into `output_dir`.
///
/// Images are translated at the training resolution and resized back to their own size.
pub fn infer<B: Backend>(
    checkpoints_dir: &Path,
    epoch: usize,
    input: &Path,
    output_dir: &Path,
    device: &B::Device,
) -> Result<Vec<PathBuf>, InferError> {
    let config = TrainingConfig::load_from_checkpoints(checkpoints_dir)?;
    let generator = config.generator.init::<B>(device)?;
    let generator = load_generator(generator, checkpoints_dir, epoch, device)?;

    let inputs = if input.is_dir() {
        let mut files = list_with_suffix(input, config.direction.input_suffix())?;
        files.sort();
        files
    } else {
        vec![input.to_path_buf()]
    };
    if inputs.is_empty() {
        return Err(InferError::NoInputs(input.to_path_buf()));
    }

    std::fs::create_dir_all(output_dir).map_err(|source| DataError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let size = config.image_size as u32;
    let mut written = Vec::with_capacity(inputs.len());
    for path in inputs {
        let image = open_rgb(&path)?;
        let translated = translate(&generator, &image, size, config.generator.out_act, device)?;

        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("image"));
        let output = output_dir.join(format!("{stem}{OUTPUT_SUFFIX}"));
        translated
            .save(&output)
            .map_err(|source| DataError::Image {
                path: output.clone(),
                source,
            })?;

        log::info!("{} -> {}", path.display(), output.display());
        written.push(output);
    }

    Ok(written)
}

/// Translate a single image at `size`x`size`, returning an image of the input dimensions.
pub fn translate<B: Backend>(
    generator: &Generator<B>,
    image: &RgbImage,
    size: u32,
    out_act: OutputActivation,
    device: &B::Device,
) -> Result<RgbImage, InferError> {
    let (width, height) = image.dimensions();
    let resized = imageops::resize(image, size, size, FilterType::Lanczos3);

    let input = image_to_tensor::<B>(&resized, out_act, device).unsqueeze::<4>();
    let (_, output) = generator.forward(input)?;
    let output = tensor_to_image(output.squeeze::<3>(0), out_act);

    Ok(imageops::resize(&output, width, height, FilterType::Lanczos3))
}

/// Maps a `[3, height, width]` generator output back to 8-bit RGB.
pub fn tensor_to_image<B: Backend>(tensor: Tensor<B, 3>, out_act: OutputActivation) -> RgbImage {
    let [_, height, width] = tensor.dims();
    let tensor = if out_act.is_symmetric() {
        (tensor + 1) / 2
    } else {
        tensor
    };

    let pixels = tensor
        .clamp(0.0, 1.0)
        .mul_scalar(255.0)
        .round()
        // [C, H, W] -> [H, W, C]
        .swap_dims(0, 1)
        .swap_dims(1, 2)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default()
        .into_iter()
        .map(|value| value as u8)
        .collect::<Vec<_>>();

    RgbImage::from_raw(width as u32, height as u32, pixels)
        .unwrap_or_else(|| RgbImage::new(width as u32, height as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::write_pair;
    use crate::data::AMBIENT_SUFFIX;
    use crate::model::{DiscriminatorConfig, GeneratorConfig};
    use crate::training::save_generator;
    use crate::TestBackend;

    fn checkpoint(dir: &Path, out_act: OutputActivation) {
        let config = TrainingConfig::new(
            GeneratorConfig::new()
                .with_levels(2)
                .with_width(2)
                .with_out_act(out_act),
            DiscriminatorConfig::new(),
        )
        .with_image_size(16)
        .with_checkpoints_dir(dir.to_string_lossy().into_owned());
        config.save_to_checkpoints().unwrap();

        let generator = config
            .generator
            .init::<TestBackend>(&Default::default())
            .unwrap();
        save_generator(&generator, dir, 5).unwrap();
    }

    #[test]
    fn translates_every_input_of_a_directory() {
        let checkpoints = tempfile::tempdir().unwrap();
        let inputs = tempfile::tempdir().unwrap();
        let outputs = tempfile::tempdir().unwrap();
        checkpoint(checkpoints.path(), OutputActivation::Tanh);
        write_pair(inputs.path(), "a", 30, 20);
        write_pair(inputs.path(), "b", 12, 12);

        let written = infer::<TestBackend>(
            checkpoints.path(),
            5,
            inputs.path(),
            outputs.path(),
            &Default::default(),
        )
        .unwrap();

        let stem = AMBIENT_SUFFIX.trim_end_matches(".png");
        assert_eq!(
            written,
            vec![
                outputs.path().join(format!("a_{stem}{OUTPUT_SUFFIX}")),
                outputs.path().join(format!("b_{stem}{OUTPUT_SUFFIX}")),
            ]
        );
        let first = image::open(&written[0]).unwrap();
        assert_eq!((first.width(), first.height()), (30, 20));
    }

    #[test]
    fn unknown_epochs_are_reported() {
        let checkpoints = tempfile::tempdir().unwrap();
        let inputs = tempfile::tempdir().unwrap();
        checkpoint(checkpoints.path(), OutputActivation::Sigmoid);
        write_pair(inputs.path(), "a", 8, 8);

        let result = infer::<TestBackend>(
            checkpoints.path(),
            6,
            inputs.path(),
            inputs.path(),
            &Default::default(),
        );

        assert!(matches!(result, Err(InferError::Checkpoint(_))));
    }

    #[test]
    fn output_range_maps_back_to_pixels() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 1>::from_floats([-1.0, 0.0, 1.0], &device)
            .reshape([3, 1, 1]);

        let symmetric = tensor_to_image(tensor.clone(), OutputActivation::Tanh);
        let unit = tensor_to_image(tensor, OutputActivation::Sigmoid);

        assert_eq!(symmetric.get_pixel(0, 0).0, [0, 128, 255]);
        assert_eq!(unit.get_pixel(0, 0).0, [0, 0, 255]);
    }
}
