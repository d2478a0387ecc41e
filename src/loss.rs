//! Reconstruction and adversarial objectives.

use burn::prelude::*;
use burn::tensor::activation::log_sigmoid;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Scale of the Cauchy loss; 0.1 is 12.75 intensity levels on a `[0, 255]` image mapped to
/// `[-1, 1]`.
pub const CAUCHY_SCALE: f32 = 0.1;

/// Reconstruction objective, chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum ReconstructionLoss {
    /// Robust Cauchy (Lorentzian) loss with scale [CAUCHY_SCALE].
    #[serde(rename = "Cauchy")]
    #[value(name = "Cauchy")]
    Cauchy,
    /// Mean absolute error.
    #[serde(rename = "L1")]
    #[value(name = "L1")]
    L1,
}

impl ReconstructionLoss {
    /// Compute the loss between a reconstruction and its target, reduced to a scalar mean.
    ///
    /// # Shapes
    ///
    /// - predictions: `[...dims]`
    /// - targets: `[...dims]`
    /// - output: `[1]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        predictions: Tensor<B, D>,
        targets: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        match self {
            ReconstructionLoss::Cauchy => cauchy_loss(predictions, targets, CAUCHY_SCALE),
            ReconstructionLoss::L1 => (predictions - targets).abs().mean(),
        }
    }

    /// Same as [forward](Self::forward) with both operands multiplied by a per-pixel weight map.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, channels, height, width]`
    /// - targets: `[batch_size, channels, height, width]`
    /// - attention: `[batch_size, 1, height, width]`
    pub fn forward_weighted<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4>,
        attention: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        self.forward(predictions * attention.clone(), targets * attention)
    }
}

/// `c * mean(log(1 + (x - y)^2 / c^2))`
pub fn cauchy_loss<B: Backend, const D: usize>(
    predictions: Tensor<B, D>,
    targets: Tensor<B, D>,
    scale: f32,
) -> Tensor<B, 1> {
    let diff = predictions - targets;
    diff.clone()
        .mul(diff)
        .div_scalar(scale * scale)
        .log1p()
        .mul_scalar(scale)
        .mean()
}

/// Per-pixel agreement between the two exposures: `1 - mean_channel(|ambient - flash|)`.
///
/// # Shapes
///
/// - ambient: `[batch_size, channels, height, width]`
/// - flash: `[batch_size, channels, height, width]`
/// - output: `[batch_size, 1, height, width]`
pub fn attention_map<B: Backend>(ambient: Tensor<B, 4>, flash: Tensor<B, 4>) -> Tensor<B, 4> {
    (ambient - flash).abs().mean_dim(1).neg().add_scalar(1.0)
}

/// Which label the discriminator output is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GanTarget {
    /// Label `1`.
    Real,
    /// Label `0`.
    Fake,
}

/// Configuration to create a [GAN loss](GanLoss) using the [init function](GanLossConfig::init).
#[derive(Config, Debug)]
pub struct GanLossConfig {
    /// Label of real samples.
    #[config(default = 1.0)]
    pub real_label: f32,
    /// Label of generated samples.
    #[config(default = 0.0)]
    pub fake_label: f32,
}

impl GanLossConfig {
    /// Initialize [GAN loss](GanLoss).
    pub fn init(&self) -> GanLoss {
        GanLoss {
            real_label: self.real_label,
            fake_label: self.fake_label,
        }
    }
}

/// Binary cross entropy with logits against a constant label broadcast to the score map.
///
/// ```text
/// L(x, t) = -mean(t * log(sigmoid(x)) + (1 - t) * log(1 - sigmoid(x)))
/// ```
#[derive(Module, Clone, Debug)]
pub struct GanLoss {
    real_label: f32,
    fake_label: f32,
}

impl GanLoss {
    /// Compute the mean loss of a score map against the label of `target`.
    ///
    /// # Shapes
    ///
    /// - logits: `[...dims]`
    /// - output: `[1]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        logits: Tensor<B, D>,
        target: GanTarget,
    ) -> Tensor<B, 1> {
        let label = match target {
            GanTarget::Real => self.real_label,
            GanTarget::Fake => self.fake_label,
        };
        let targets = logits.ones_like().mul_scalar(label);

        // log(1 - sigmoid(x)) = log_sigmoid(-x)
        let positive = log_sigmoid(logits.clone()).mul(targets.clone());
        let negative = log_sigmoid(logits.neg()).mul(targets.neg().add_scalar(1.0));

        (positive + negative).neg().mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TestAutodiffBackend, TestBackend};
    use burn::tensor::{Distribution, TensorData};

    type TestTensor<const D: usize> = Tensor<TestBackend, D>;

    fn scalar(tensor: Tensor<TestBackend, 1>) -> f32 {
        tensor.into_scalar()
    }

    #[test]
    fn cauchy_loss_is_zero_on_identical_inputs() {
        let device = Default::default();
        let images = TestTensor::<4>::random([2, 3, 8, 8], Distribution::Default, &device);

        let loss_no_reduction = images
            .clone()
            .sub(images.clone())
            .powf_scalar(2.0)
            .div_scalar(CAUCHY_SCALE * CAUCHY_SCALE)
            .log1p()
            .mul_scalar(CAUCHY_SCALE);
        let loss = ReconstructionLoss::Cauchy.forward(images.clone(), images);

        assert!(loss_no_reduction
            .into_data()
            .to_vec::<f32>()
            .unwrap()
            .iter()
            .all(|v| *v == 0.0));
        assert_eq!(scalar(loss), 0.0);
    }

    #[test]
    fn cauchy_loss_matches_the_formula() {
        let device = Default::default();
        let predictions = TestTensor::<1>::from_floats([0.0, 0.1, -0.3, 1.0], &device);
        let targets = TestTensor::<1>::zeros([4], &device);

        let loss = scalar(cauchy_loss(predictions, targets, 0.1));

        let expected = [0.0f32, 0.1, -0.3, 1.0]
            .iter()
            .map(|d| 0.1 * (1.0 + d * d / 0.01).ln())
            .sum::<f32>()
            / 4.0;
        assert!((loss - expected).abs() < 1e-5, "{loss} != {expected}");
    }

    #[test]
    fn l1_loss_is_mean_absolute_error() {
        let device = Default::default();
        let predictions = TestTensor::<1>::from_floats([-2.0, -0.5, 0.0, 0.5], &device);
        let targets = TestTensor::<1>::from_floats([0.0, 0.0, 0.0, 1.5], &device);

        let loss = scalar(ReconstructionLoss::L1.forward(predictions, targets));

        assert!((loss - 0.875).abs() < 1e-6);
    }

    #[test]
    fn weighted_loss_ignores_masked_pixels() {
        let device = Default::default();
        let predictions = TestTensor::<4>::ones([1, 3, 2, 2], &device);
        let targets = TestTensor::<4>::zeros([1, 3, 2, 2], &device);
        let attention = TestTensor::<4>::zeros([1, 1, 2, 2], &device);

        for loss in [ReconstructionLoss::Cauchy, ReconstructionLoss::L1] {
            let value = scalar(loss.forward_weighted(
                predictions.clone(),
                targets.clone(),
                attention.clone(),
            ));
            assert_eq!(value, 0.0);
        }
    }

    #[test]
    fn attention_is_one_where_exposures_agree() {
        let device = Default::default();
        let images = TestTensor::<4>::random([3, 3, 16, 16], Distribution::Default, &device);

        let attention = attention_map(images.clone(), images);

        assert_eq!(attention.dims(), [3, 1, 16, 16]);
        assert!(attention
            .into_data()
            .to_vec::<f32>()
            .unwrap()
            .iter()
            .all(|v| *v == 1.0));
    }

    #[test]
    fn attention_averages_channel_differences() {
        let device = Default::default();
        let ambient = TestTensor::<4>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 0.0, 0.0, 0.0, 0.0], [1, 3, 1, 2]),
            &device,
        );
        let flash = TestTensor::<4>::from_data(
            TensorData::new(vec![0.3f32, 0.0, 0.6, 0.0, 0.9, 0.0], [1, 3, 1, 2]),
            &device,
        );

        let attention = attention_map(ambient, flash)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert!((attention[0] - 0.4).abs() < 1e-6);
        assert_eq!(attention[1], 1.0);
    }

    #[test]
    fn gan_loss_is_monotonic_in_the_score() {
        let device = Default::default();
        let gan = GanLossConfig::new().init();
        let confident = TestTensor::<4>::full([1, 1, 2, 2], 10.0, &device);
        let wrong = TestTensor::<4>::full([1, 1, 2, 2], -10.0, &device);
        let unsure = TestTensor::<4>::zeros([1, 1, 2, 2], &device);

        let low = scalar(gan.forward(confident.clone(), GanTarget::Real));
        let mid = scalar(gan.forward(unsure, GanTarget::Real));
        let high = scalar(gan.forward(wrong.clone(), GanTarget::Real));

        assert!(low < 1e-4);
        assert!((mid - std::f32::consts::LN_2).abs() < 1e-6);
        assert!((high - 10.0).abs() < 1e-3);
        assert!(low < mid && mid < high);

        let fake_low = scalar(gan.forward(wrong, GanTarget::Fake));
        let fake_high = scalar(gan.forward(confident, GanTarget::Fake));
        assert!(fake_low < 1e-4);
        assert!((fake_high - 10.0).abs() < 1e-3);
    }

    #[test]
    fn gan_loss_gradient_is_sigmoid_minus_label() {
        let device = Default::default();
        let logits = Tensor::<TestAutodiffBackend, 1>::from_floats([0.0, 2.0], &device)
            .require_grad();
        let gan = GanLossConfig::new().init();

        let grads = gan.forward(logits.clone(), GanTarget::Real).backward();
        let grad = logits.grad(&grads).unwrap().into_data().to_vec::<f32>().unwrap();

        // d/dx mean(BCE) = (sigmoid(x) - 1) / n
        let expected = [(0.5 - 1.0) / 2.0, (1.0 / (1.0 + (-2.0f32).exp()) - 1.0) / 2.0];
        assert!((grad[0] - expected[0]).abs() < 1e-5);
        assert!((grad[1] - expected[1]).abs() < 1e-5);
    }
}
