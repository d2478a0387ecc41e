use std::error::Error;

use clap::Parser;
use flashlit::cli::Cli;

#[cfg(not(any(feature = "wgpu", feature = "tch-gpu", feature = "tch-cpu")))]
mod backend {
    use burn::backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    };
    use flashlit::cli::{self, Cli, CliError};

    pub fn run(cli: Cli) -> Result<(), CliError> {
        cli::run::<Autodiff<NdArray>, _>(cli, |_| NdArrayDevice::Cpu)
    }
}

#[cfg(all(feature = "tch-cpu", not(any(feature = "wgpu", feature = "tch-gpu"))))]
mod backend {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use flashlit::cli::{self, Cli, CliError};

    pub fn run(cli: Cli) -> Result<(), CliError> {
        cli::run::<Autodiff<LibTorch>, _>(cli, |_| LibTorchDevice::Cpu)
    }
}

#[cfg(all(feature = "tch-gpu", not(feature = "wgpu")))]
mod backend {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use flashlit::cli::{self, Cli, CliError};

    pub fn run(cli: Cli) -> Result<(), CliError> {
        cli::run::<Autodiff<LibTorch>, _>(cli, |gpu_ids| match gpu_ids.first() {
            #[cfg(not(target_os = "macos"))]
            Some(index) => LibTorchDevice::Cuda(*index),
            #[cfg(target_os = "macos")]
            Some(_) => LibTorchDevice::Mps,
            None => LibTorchDevice::Cpu,
        })
    }
}

#[cfg(feature = "wgpu")]
mod backend {
    use burn::backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    };
    use flashlit::cli::{self, Cli, CliError};

    pub fn run(cli: Cli) -> Result<(), CliError> {
        cli::run::<Autodiff<Wgpu>, _>(cli, |gpu_ids| match gpu_ids.first() {
            Some(index) => WgpuDevice::DiscreteGpu(*index),
            None => WgpuDevice::default(),
        })
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = backend::run(cli) {
        let mut source = err.source();
        while let Some(cause) = source {
            log::error!("caused by: {cause}");
            source = cause.source();
        }
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
