use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use crate::error::CheckpointError;
use crate::model::Generator;

/// Recorder used for generator checkpoints. Full precision keeps a save/load cycle bit exact.
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Extension appended by [CheckpointRecorder].
pub const CHECKPOINT_EXTENSION: &str = "mpk";

/// Path of the checkpoint for `epoch`, without the recorder extension.
pub fn checkpoint_stem(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("model-{epoch}"))
}

/// File written for `epoch`.
pub fn checkpoint_file(dir: &Path, epoch: usize) -> PathBuf {
    checkpoint_stem(dir, epoch).with_extension(CHECKPOINT_EXTENSION)
}

/// Write the generator parameters of `epoch` into `dir`, returning the file written.
///
/// Only the generator is persisted. An existing checkpoint of the same epoch is overwritten.
pub fn save_generator<B: Backend>(
    generator: &Generator<B>,
    dir: &Path,
    epoch: usize,
) -> Result<PathBuf, CheckpointError> {
    std::fs::create_dir_all(dir)?;

    generator
        .clone()
        .save_file(checkpoint_stem(dir, epoch), &CheckpointRecorder::new())?;

    let file = checkpoint_file(dir, epoch);
    log::info!("Saved generator checkpoint {}", file.display());
    Ok(file)
}

/// Load the generator parameters of `epoch` from `dir` into `generator`.
///
/// The generator must have the configuration the checkpoint was trained with.
pub fn load_generator<B: Backend>(
    generator: Generator<B>,
    dir: &Path,
    epoch: usize,
    device: &B::Device,
) -> Result<Generator<B>, CheckpointError> {
    let file = checkpoint_file(dir, epoch);
    if !file.is_file() {
        return Err(CheckpointError::Missing { epoch, path: file });
    }

    let generator = generator.load_file(
        checkpoint_stem(dir, epoch),
        &CheckpointRecorder::new(),
        device,
    )?;

    log::info!("Loaded generator checkpoint {}", file.display());
    Ok(generator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parameter_snapshot, GeneratorConfig, Upsample};
    use crate::TestBackend;

    fn config(upsample: Upsample) -> GeneratorConfig {
        GeneratorConfig::new()
            .with_levels(3)
            .with_width(4)
            .with_upsample(upsample)
    }

    #[test]
    fn save_then_load_is_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();

        for (epoch, upsample) in [(1, Upsample::Deconv), (2, Upsample::Unpool)] {
            let trained = config(upsample).init::<TestBackend>(&device).unwrap();
            let file = save_generator(&trained, dir.path(), epoch).unwrap();
            assert_eq!(file, dir.path().join(format!("model-{epoch}.mpk")));
            assert!(file.is_file());

            let fresh = config(upsample).init::<TestBackend>(&device).unwrap();
            assert_ne!(parameter_snapshot(&fresh), parameter_snapshot(&trained));

            let restored = load_generator(fresh, dir.path(), epoch, &device).unwrap();
            assert_eq!(parameter_snapshot(&restored), parameter_snapshot(&trained));
        }
    }

    #[test]
    fn every_epoch_gets_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let generator = config(Upsample::Deconv).init::<TestBackend>(&device).unwrap();

        save_generator(&generator, dir.path(), 3).unwrap();
        save_generator(&generator, dir.path(), 4).unwrap();
        save_generator(&generator, dir.path(), 4).unwrap();

        assert!(checkpoint_file(dir.path(), 3).is_file());
        assert!(checkpoint_file(dir.path(), 4).is_file());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn loading_a_missing_epoch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let generator = config(Upsample::Deconv).init::<TestBackend>(&device).unwrap();

        let result = load_generator(generator, dir.path(), 7, &device);

        match result {
            Err(CheckpointError::Missing { epoch, path }) => {
                assert_eq!(epoch, 7);
                assert_eq!(path, dir.path().join("model-7.mpk"));
            }
            other => panic!("expected a missing checkpoint, got {other:?}"),
        }
    }

    #[test]
    fn loading_a_corrupted_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        std::fs::write(checkpoint_file(dir.path(), 1), b"not a checkpoint").unwrap();
        let generator = config(Upsample::Deconv).init::<TestBackend>(&device).unwrap();

        let result = load_generator(generator, dir.path(), 1, &device);

        assert!(matches!(result, Err(CheckpointError::Recorder(_))));
    }
}
