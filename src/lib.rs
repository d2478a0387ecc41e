//! Ambient/flash photograph translation with a VGG16 encoder-decoder, optionally trained
//! against an attention-gated patch discriminator.

pub mod cli;
pub mod data;
pub mod error;
pub mod inference;
pub mod logging;
pub mod loss;
pub mod model;
pub mod training;

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::NdArray<f32>;

#[cfg(test)]
pub(crate) type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
