use std::path::PathBuf;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;

use crate::data::Direction;
use crate::error::{CheckpointError, InferError, TrainError};
use crate::inference::infer;
use crate::logging::install_logger;
use crate::loss::ReconstructionLoss;
use crate::model::{DiscriminatorConfig, GeneratorConfig, OutputActivation, Upsample};
use crate::training::{train, ModelKind, TrainingConfig};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[clap(short, long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a generator on paired ambient/flash photographs
    Train(TrainArgs),
    /// Translate images with a trained generator
    Infer(InferArgs),
}

/// Options of `train`. Flags override the values of `--config`.
#[derive(Args, Debug, Default)]
pub struct TrainArgs {
    /// Run configuration (JSON) to start from
    #[clap(long)]
    pub config: Option<PathBuf>,
    #[clap(long, value_enum)]
    pub model: Option<ModelKind>,
    #[clap(long, value_enum)]
    pub upsample: Option<Upsample>,
    #[clap(long = "r-loss", value_enum)]
    pub r_loss: Option<ReconstructionLoss>,
    #[clap(long, value_enum)]
    pub out_act: Option<OutputActivation>,
    #[clap(long, value_enum)]
    pub direction: Option<Direction>,
    /// Attention-weighted reconstruction loss (VGG_ED)
    #[clap(long)]
    pub attention: bool,
    /// Attention-weighted reconstruction loss (advModel)
    #[clap(long)]
    pub attention_gen: bool,
    /// Attention-gated discriminator (advModel)
    #[clap(long)]
    pub attention_dis: bool,
    /// Keep the pretrained encoder weights fixed
    #[clap(long)]
    pub vgg_freezed: bool,
    /// torchvision VGG16 state dict (.pth) used to initialize the encoder
    #[clap(long)]
    pub pretrained: Option<String>,
    #[clap(long)]
    pub lr1: Option<f64>,
    #[clap(long)]
    pub lr2: Option<f64>,
    #[clap(long)]
    pub beta1: Option<f32>,
    #[clap(long)]
    pub lambda_gan: Option<f32>,
    /// Comma separated accelerator indices
    #[clap(long, value_delimiter = ',')]
    pub gpu_ids: Option<Vec<usize>>,
    #[clap(long)]
    pub checkpoints_dir: Option<String>,
    #[clap(long)]
    pub data_dir: Option<String>,
    #[clap(long)]
    pub levels: Option<usize>,
    #[clap(long)]
    pub width: Option<usize>,
    #[clap(long)]
    pub image_size: Option<usize>,
    #[clap(long)]
    pub num_epochs: Option<usize>,
    #[clap(long)]
    pub batch_size: Option<usize>,
    /// Data loading threads
    #[clap(long)]
    pub num_workers: Option<usize>,
    #[clap(long)]
    pub checkpoint_interval: Option<usize>,
    #[clap(long)]
    pub seed: Option<u64>,
}

/// Options of `infer`.
#[derive(Args, Debug)]
pub struct InferArgs {
    /// Directory holding `config.json` and the `model-<epoch>` checkpoints
    #[clap(long)]
    pub checkpoints_dir: PathBuf,
    #[clap(long)]
    pub epoch: usize,
    /// An image, or a directory of input photographs
    #[clap(long)]
    pub input: PathBuf,
    #[clap(long, default_value = "results")]
    pub output_dir: PathBuf,
    /// Comma separated accelerator indices
    #[clap(long, value_delimiter = ',')]
    pub gpu_ids: Vec<usize>,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] CheckpointError),
    #[error("training failed: {0}")]
    Train(#[from] TrainError),
    #[error("inference failed: {0}")]
    Infer(#[from] InferError),
}

impl TrainArgs {
    /// Resolve the run configuration.
    pub fn into_config(self) -> Result<TrainingConfig, CheckpointError> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .map_err(|err| CheckpointError::Config(format!("{path:?}: {err}")))?,
            None => TrainingConfig::new(GeneratorConfig::new(), DiscriminatorConfig::new()),
        };

        if let Some(value) = self.model {
            config.model = value;
        }
        if let Some(value) = self.upsample {
            config.generator.upsample = value;
        }
        if let Some(value) = self.r_loss {
            config.reconstruction_loss = value;
        }
        if let Some(value) = self.out_act {
            config.generator.out_act = value;
        }
        if let Some(value) = self.direction {
            config.direction = value;
        }
        if let Some(value) = self.lr1 {
            config.lr1 = value;
        }
        if let Some(value) = self.lr2 {
            config.lr2 = value;
        }
        if let Some(value) = self.beta1 {
            config.beta1 = value;
        }
        if let Some(value) = self.lambda_gan {
            config.lambda_gan = value;
        }
        if let Some(value) = self.gpu_ids {
            config.gpu_ids = value;
        }
        if let Some(value) = self.checkpoints_dir {
            config.checkpoints_dir = value;
        }
        if let Some(value) = self.data_dir {
            config.data_dir = value;
        }
        if let Some(value) = self.levels {
            config.generator.levels = value;
        }
        if let Some(value) = self.width {
            config.generator.width = value;
        }
        if let Some(value) = self.image_size {
            config.image_size = value;
        }
        if let Some(value) = self.num_epochs {
            config.num_epochs = value;
        }
        if let Some(value) = self.batch_size {
            config.batch_size = value;
        }
        if let Some(value) = self.num_workers {
            config.num_workers = value;
        }
        if let Some(value) = self.checkpoint_interval {
            config.checkpoint_interval = value;
        }
        if let Some(value) = self.seed {
            config.seed = value;
        }
        if let Some(value) = self.pretrained {
            config.pretrained = Some(value);
        }

        config.attention |= self.attention;
        config.attention_gen |= self.attention_gen;
        config.discriminator.attention |= self.attention_dis;
        config.vgg_freezed |= self.vgg_freezed;

        Ok(config)
    }
}

/// Run a parsed command line. `device` maps the configured accelerator indices to a device.
pub fn run<B, F>(cli: Cli, device: F) -> Result<(), CliError>
where
    B: AutodiffBackend,
    F: Fn(&[usize]) -> B::Device,
{
    install_logger(if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    });

    match cli.command {
        Commands::Train(args) => {
            let config = args.into_config()?;
            let device = device(&config.gpu_ids);
            train::<B>(config, device)?;
        }
        Commands::Infer(args) => {
            let device = device(&args.gpu_ids);
            let written = infer::<B::InnerBackend>(
                &args.checkpoints_dir,
                args.epoch,
                &args.input,
                &args.output_dir,
                &device,
            )?;
            log::info!("Translated {} image(s)", written.len());
        }
    }

    Ok(())
}
