//! Paired ambient/flash photographs: discovery, augmentation and batching.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use clap::ValueEnum;
use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::model::OutputActivation;

/// File name suffix of ambient-lit photographs.
pub const AMBIENT_SUFFIX: &str = "ambient.png";

/// File name suffix of flash-lit photographs.
pub const FLASH_SUFFIX: &str = "flash.png";

/// Which image of a pair is the network input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Translate ambient photographs into flash photographs.
    AmbientToFlash,
    /// Translate flash photographs into ambient photographs.
    FlashToAmbient,
}

impl Direction {
    /// Returns `(input, target)` for this direction.
    pub fn orient<T>(&self, ambient: T, flash: T) -> (T, T) {
        match self {
            Direction::AmbientToFlash => (ambient, flash),
            Direction::FlashToAmbient => (flash, ambient),
        }
    }

    /// Suffix of the files read as network input.
    pub fn input_suffix(&self) -> &'static str {
        match self {
            Direction::AmbientToFlash => AMBIENT_SUFFIX,
            Direction::FlashToAmbient => FLASH_SUFFIX,
        }
    }
}

/// A decoded ambient/flash pair.
#[derive(Debug, Clone)]
pub struct FlashPairItem {
    pub ambient: RgbImage,
    pub flash: RgbImage,
    /// Common file name prefix of the two photographs.
    pub name: String,
}

/// Ambient/flash pairs found in one directory.
///
/// Every `*ambient.png` is matched with the `*flash.png` sharing its prefix; both lists are
/// sorted and must line up one to one.
#[derive(Debug, Clone)]
pub struct FlashPairDataset {
    pairs: Vec<(PathBuf, PathBuf)>,
}

impl FlashPairDataset {
    /// Discover the pairs of `dir`.
    pub fn new(dir: &Path) -> Result<Self, DataError> {
        let mut ambient = list_with_suffix(dir, AMBIENT_SUFFIX)?;
        let mut flash = list_with_suffix(dir, FLASH_SUFFIX)?;
        ambient.sort();
        flash.sort();

        if ambient.is_empty() && flash.is_empty() {
            return Err(DataError::Empty(dir.to_path_buf()));
        }
        if ambient.len() != flash.len() {
            let (ambient, flash) = first_unmatched(&ambient, &flash);
            return Err(DataError::UnmatchedPair { ambient, flash });
        }

        let pairs = ambient
            .into_iter()
            .zip(flash)
            .map(|(ambient, flash)| {
                if pair_prefix(&ambient, AMBIENT_SUFFIX) == pair_prefix(&flash, FLASH_SUFFIX) {
                    Ok((ambient, flash))
                } else {
                    Err(DataError::UnmatchedPair { ambient, flash })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("Found {} image pairs in {}", pairs.len(), dir.display());
        Ok(Self { pairs })
    }

    /// Decode the pair at `index`.
    pub fn load(&self, index: usize) -> Result<FlashPairItem, DataError> {
        let (ambient, flash) = &self.pairs[index];

        Ok(FlashPairItem {
            ambient: open_rgb(ambient)?,
            flash: open_rgb(flash)?,
            name: pair_prefix(ambient, AMBIENT_SUFFIX),
        })
    }
}

impl Dataset<FlashPairItem> for FlashPairDataset {
    fn get(&self, index: usize) -> Option<FlashPairItem> {
        if index >= self.pairs.len() {
            return None;
        }
        match self.load(index) {
            Ok(item) => Some(item),
            Err(err) => {
                log::error!("Failed to load pair {index}: {err}");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}

/// Read an image file as 8-bit RGB.
pub fn open_rgb(path: &Path) -> Result<RgbImage, DataError> {
    image::open(path)
        .map(|image| image.into_rgb8())
        .map_err(|source| DataError::Image {
            path: path.to_path_buf(),
            source,
        })
}

/// Files of `dir` whose name ends with `suffix`.
pub fn list_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, DataError> {
    let io_error = |source| DataError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(suffix));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

fn pair_prefix(path: &Path, suffix: &str) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(suffix).unwrap_or(&name).to_string()
}

fn first_unmatched(ambient: &[PathBuf], flash: &[PathBuf]) -> (PathBuf, PathBuf) {
    ambient
        .iter()
        .zip(flash)
        .find(|(a, f)| pair_prefix(a, AMBIENT_SUFFIX) != pair_prefix(f, FLASH_SUFFIX))
        .map(|(a, f)| (a.clone(), f.clone()))
        .unwrap_or_else(|| {
            let len = ambient.len().min(flash.len());
            (
                ambient.get(len).cloned().unwrap_or_default(),
                flash.get(len).cloned().unwrap_or_default(),
            )
        })
}

/// Geometric augmentation applied identically to both photographs of a pair.
#[derive(Debug, Clone, Copy)]
pub struct PairAugmenter {
    image_size: u32,
    random_crop: bool,
}

impl PairAugmenter {
    /// Random flip, random square crop of 80% to 100% of the shorter side, resize.
    pub fn train(image_size: u32) -> Self {
        Self {
            image_size,
            random_crop: true,
        }
    }

    /// Resize only.
    pub fn test(image_size: u32) -> Self {
        Self {
            image_size,
            random_crop: false,
        }
    }

    /// Augment a pair.
    pub fn apply<R: Rng>(&self, item: FlashPairItem, rng: &mut R) -> FlashPairItem {
        let FlashPairItem {
            mut ambient,
            mut flash,
            name,
        } = item;

        if self.random_crop {
            if rng.random_bool(0.5) {
                ambient = imageops::flip_horizontal(&ambient);
                flash = imageops::flip_horizontal(&flash);
            }

            let (width, height) = ambient.dimensions();
            let min_side = width.min(height) as f64;
            let side = ((min_side * rng.random_range(0.8..=1.0)) as u32).max(1);
            let x = rng.random_range(0..=width - side);
            let y = rng.random_range(0..=height - side);

            ambient = imageops::crop_imm(&ambient, x, y, side, side).to_image();
            flash = imageops::crop_imm(&flash, x, y, side, side).to_image();
        }

        FlashPairItem {
            ambient: self.resize(&ambient),
            flash: self.resize(&flash),
            name,
        }
    }

    fn resize(&self, image: &RgbImage) -> RgbImage {
        if image.dimensions() == (self.image_size, self.image_size) {
            return image.clone();
        }
        imageops::resize(image, self.image_size, self.image_size, FilterType::Lanczos3)
    }
}

/// Converts an RGB image into a `[3, height, width]` tensor in the value range expected by the
/// output activation: `[-1, 1]` for `tanh`, `[0, 1]` otherwise.
pub fn image_to_tensor<B: Backend>(
    image: &RgbImage,
    out_act: OutputActivation,
    device: &B::Device,
) -> Tensor<B, 3> {
    let (width, height) = image.dimensions();
    let data = TensorData::new(
        image.as_raw().clone(),
        Shape::new([height as usize, width as usize, 3]),
    );

    let tensor = Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), device)
        // [H, W, C] -> [C, H, W]
        .swap_dims(2, 1)
        .swap_dims(1, 0)
        / 255;

    if out_act.is_symmetric() {
        tensor * 2 - 1
    } else {
        tensor
    }
}

/// Stacked ambient and flash images.
#[derive(Clone, Debug)]
pub struct FlashPairBatch<B: Backend> {
    /// `[batch_size, 3, height, width]`
    pub ambient: Tensor<B, 4>,
    /// `[batch_size, 3, height, width]`
    pub flash: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
struct Augmentation {
    augmenter: PairAugmenter,
    rng: Arc<Mutex<StdRng>>,
}

/// Builds [FlashPairBatch]es, augmenting the pairs first when configured.
///
/// Without augmentation every pair of a batch must already have the same size.
#[derive(Clone, Debug)]
pub struct FlashPairBatcher {
    out_act: OutputActivation,
    augmentation: Option<Augmentation>,
}

impl FlashPairBatcher {
    pub fn new(out_act: OutputActivation) -> Self {
        Self {
            out_act,
            augmentation: None,
        }
    }

    /// Apply `augmenter` to every pair, drawing from a generator seeded with `seed`.
    pub fn with_augmenter(mut self, augmenter: PairAugmenter, seed: u64) -> Self {
        self.augmentation = Some(Augmentation {
            augmenter,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        });
        self
    }
}

impl<B: Backend> Batcher<B, FlashPairItem, FlashPairBatch<B>> for FlashPairBatcher {
    fn batch(&self, items: Vec<FlashPairItem>, device: &B::Device) -> FlashPairBatch<B> {
        let items = match &self.augmentation {
            Some(Augmentation { augmenter, rng }) => {
                let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
                items
                    .into_iter()
                    .map(|item| augmenter.apply(item, &mut *rng))
                    .collect()
            }
            None => items,
        };

        let (ambient, flash): (Vec<_>, Vec<_>) = items
            .iter()
            .map(|item| {
                (
                    image_to_tensor::<B>(&item.ambient, self.out_act, device),
                    image_to_tensor::<B>(&item.flash, self.out_act, device),
                )
            })
            .unzip();

        FlashPairBatch {
            ambient: Tensor::stack(ambient, 0),
            flash: Tensor::stack(flash, 0),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::TestBackend;
    use image::Rgb;

    pub(crate) fn write_pair(dir: &Path, prefix: &str, width: u32, height: u32) {
        let ambient = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 10]));
        let flash = RgbImage::from_fn(width, height, |x, y| Rgb([200, x as u8, y as u8]));
        ambient
            .save(dir.join(format!("{prefix}_{AMBIENT_SUFFIX}")))
            .unwrap();
        flash.save(dir.join(format!("{prefix}_{FLASH_SUFFIX}"))).unwrap();
    }

    #[test]
    fn pairs_are_sorted_and_matched_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "b", 8, 8);
        write_pair(dir.path(), "a", 8, 8);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let dataset = FlashPairDataset::new(dir.path()).unwrap();

        assert_eq!(dataset.len(), 2);
        let names: Vec<_> = (0..2).map(|i| dataset.get(i).unwrap().name).collect();
        assert_eq!(names, vec!["a_", "b_"]);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn mismatched_prefixes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a", 4, 4);
        std::fs::rename(
            dir.path().join(format!("a_{FLASH_SUFFIX}")),
            dir.path().join(format!("z_{FLASH_SUFFIX}")),
        )
        .unwrap();

        let result = FlashPairDataset::new(dir.path());

        assert!(matches!(result, Err(DataError::UnmatchedPair { .. })));
    }

    #[test]
    fn an_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FlashPairDataset::new(dir.path()),
            Err(DataError::Empty(_))
        ));
    }

    #[test]
    fn augmentation_keeps_pairs_aligned() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a", 40, 30);
        let dataset = FlashPairDataset::new(dir.path()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..8 {
            let item = PairAugmenter::train(16).apply(dataset.load(0).unwrap(), &mut rng);

            assert_eq!(item.ambient.dimensions(), (16, 16));
            assert_eq!(item.flash.dimensions(), (16, 16));
        }

        // Without resizing, the crop origin shows in both images at the same place.
        let mut rng = StdRng::seed_from_u64(5);
        let augmenter = PairAugmenter::train(24);
        let item = augmenter.apply(dataset.load(0).unwrap(), &mut rng);
        let corner_ambient = item.ambient.get_pixel(0, 0);
        let corner_flash = item.flash.get_pixel(0, 0);
        assert!((corner_ambient[1] as i32 - corner_flash[2] as i32).abs() <= 2);
    }

    #[test]
    fn test_time_augmentation_only_resizes() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a", 8, 8);
        let dataset = FlashPairDataset::new(dir.path()).unwrap();
        let original = dataset.load(0).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let item = PairAugmenter::test(8).apply(original.clone(), &mut rng);

        assert_eq!(item.ambient, original.ambient);
        assert_eq!(item.flash, original.flash);
    }

    #[test]
    fn batches_are_normalized_to_the_activation_range() {
        let device = Default::default();
        let item = FlashPairItem {
            ambient: RgbImage::from_pixel(2, 2, Rgb([0, 255, 0])),
            flash: RgbImage::from_pixel(2, 2, Rgb([255, 255, 255])),
            name: "x".into(),
        };

        let batch: FlashPairBatch<TestBackend> = FlashPairBatcher::new(OutputActivation::Tanh)
            .batch(vec![item.clone(), item.clone()], &device);
        assert_eq!(batch.ambient.dims(), [2, 3, 2, 2]);
        let ambient = batch.ambient.into_data().to_vec::<f32>().unwrap();
        assert_eq!(&ambient[0..4], &[-1.0; 4]);
        assert_eq!(&ambient[4..8], &[1.0; 4]);

        let batch: FlashPairBatch<TestBackend> =
            FlashPairBatcher::new(OutputActivation::Sigmoid).batch(vec![item], &device);
        let flash = batch.flash.into_data().to_vec::<f32>().unwrap();
        assert!(flash.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn augmenting_batcher_brings_pairs_to_one_size() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a", 40, 30);
        write_pair(dir.path(), "b", 12, 12);
        let dataset = FlashPairDataset::new(dir.path()).unwrap();
        let items = vec![dataset.load(0).unwrap(), dataset.load(1).unwrap()];

        let batcher = FlashPairBatcher::new(OutputActivation::Sigmoid)
            .with_augmenter(PairAugmenter::train(16), 7);
        let batch: FlashPairBatch<TestBackend> = batcher.batch(items, &device);

        assert_eq!(batch.ambient.dims(), [2, 3, 16, 16]);
        assert_eq!(batch.flash.dims(), [2, 3, 16, 16]);
    }

    #[test]
    fn undecodable_pairs_are_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a", 4, 4);
        std::fs::write(dir.path().join(format!("a_{FLASH_SUFFIX}")), b"not a png").unwrap();

        let dataset = FlashPairDataset::new(dir.path()).unwrap();

        assert!(matches!(dataset.load(0), Err(DataError::Image { .. })));
        assert!(dataset.get(0).is_none());
    }

    #[test]
    fn direction_picks_the_input() {
        assert_eq!(Direction::AmbientToFlash.orient("a", "f"), ("a", "f"));
        assert_eq!(Direction::FlashToAmbient.orient("a", "f"), ("f", "a"));
        assert_eq!(Direction::FlashToAmbient.input_suffix(), FLASH_SUFFIX);
    }
}
