use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

/// Errors raised while building or running the networks.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The encoder/decoder depth is outside of the supported range.
    #[error("invalid level count {0}, expected a value in 1..={max}", max = crate::model::MAX_LEVELS)]
    InvalidLevels(usize),

    /// The spatial size can't be halved `levels` times without a remainder.
    #[error("input of size {height}x{width} is not divisible by 2^{levels}")]
    IndivisibleInput {
        /// Input height.
        height: usize,
        /// Input width.
        width: usize,
        /// Configured depth.
        levels: usize,
    },

    /// The discriminator attention flag and the supplied map disagree.
    #[error("discriminator built with attention={expected} does not match the supplied attention map")]
    AttentionMismatch {
        /// Whether the discriminator expects an attention map.
        expected: bool,
    },

    /// The unpool decoder was fed a pyramid recorded without pooling indices.
    #[error("level {0} has no pooling indices, the unpool decoder needs the unpool encoder pass")]
    MissingIndices(usize),
}

/// Errors raised while copying the pretrained backbone into the encoder.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The backbone state dict could not be read.
    #[error("failed to load backbone weights from {path:?}: {source}")]
    Load {
        /// Backbone file.
        path: PathBuf,
        /// Recorder failure.
        source: RecorderError,
    },

    /// A backbone tensor does not fit the encoder layer it maps to.
    #[error("backbone layer {index} has shape {source_shape:?}, encoder conv{level}_{position} expects {target_shape:?}")]
    ShapeMismatch {
        /// Index in the backbone `features` list.
        index: usize,
        /// Encoder level (1-based).
        level: usize,
        /// Convolution position inside the level (1-based).
        position: usize,
        /// Backbone weight shape.
        source_shape: Vec<usize>,
        /// Encoder weight shape.
        target_shape: Vec<usize>,
    },

    /// The backbone has no convolution at this `features` index.
    #[error("backbone has no convolution at index {0}")]
    MissingLayer(usize),
}

/// Errors raised while persisting or restoring generator weights.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists for the requested epoch.
    #[error("no checkpoint for epoch {epoch} at {path:?}")]
    Missing {
        /// Requested epoch.
        epoch: usize,
        /// Expected file.
        path: PathBuf,
    },

    /// The recorder failed to serialize or deserialize the weights.
    #[error("checkpoint recorder failure: {0}")]
    Recorder(#[from] RecorderError),

    /// Filesystem failure.
    #[error("checkpoint I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The saved run configuration could not be read.
    #[error("failed to read run configuration: {0}")]
    Config(String),
}

/// Errors raised by the training orchestrators.
#[derive(Error, Debug)]
pub enum TrainError {
    /// `forward`/`optimize_parameters` called before `set_inputs`.
    #[error("no inputs bound, call set_inputs first")]
    MissingInputs,

    /// A network rejected its inputs.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Pretrained weights could not be transferred.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Checkpoint failure.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Dataset failure.
    #[error(transparent)]
    Data(#[from] DataError),
}

/// Errors raised by the paired image dataset.
#[derive(Error, Debug)]
pub enum DataError {
    /// Filesystem failure.
    #[error("I/O failure on {path:?}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// An image could not be decoded or encoded.
    #[error("image failure on {path:?}: {source}")]
    Image {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: image::ImageError,
    },

    /// The ambient and flash lists don't line up.
    #[error("unmatched pair: {ambient:?} / {flash:?}")]
    UnmatchedPair {
        /// Ambient file.
        ambient: PathBuf,
        /// Flash file.
        flash: PathBuf,
    },

    /// The split directory holds no pairs.
    #[error("no image pairs found in {0:?}")]
    Empty(PathBuf),

    /// Some pairs failed to load during an epoch.
    #[error("only {loaded} of {expected} image pairs could be loaded")]
    Incomplete {
        /// Pairs that reached a batch.
        loaded: usize,
        /// Pairs in the dataset.
        expected: usize,
    },
}

/// Errors raised while translating images with a trained generator.
#[derive(Error, Debug)]
pub enum InferError {
    /// The run configuration or the weights could not be restored.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The generator rejected an input.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// An input could not be read or an output written.
    #[error(transparent)]
    Data(#[from] DataError),

    /// Nothing to translate.
    #[error("no input images found at {0:?}")]
    NoInputs(PathBuf),
}
